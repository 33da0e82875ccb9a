//! Dual-core task table, periodic tick, and the priority/EDF-hybrid dispatch
//! decision.
//!
//! Grounded on the teacher's `process::scheduler_smp` (per-CPU runqueue,
//! `TIMESLICE_REMAINING`/`NEED_RESCHED` per-core atomics, a `schedule()`
//! entry point called with interrupts disabled) and `smp::percpu` (per-core
//! state with no shared lock on the hot fields), generalized from plain
//! round-robin to the spec's three-pass dispatch and from a single runqueue
//! per CPU to a owned-table-plus-cross-core-fallback model, since this
//! kernel additionally carries deadline urgency and explicit affinity.

pub mod task;

use heapless::Vec;

use crate::config::{MAX_NAME_LEN, MAX_TASKS_PER_CORE, NUM_CORES};
use crate::error::{KernelError, Result};
use crate::protection;
use task::{Affinity, DeadlineMissHandler, DeadlineRecord, DeadlineType, Priority, Task, TaskEntry, TaskId, TaskKind, TaskState};

const MAX_TOTAL_TASKS: usize = 2 * MAX_TASKS_PER_CORE;

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub context_switches: u64,
    pub context_switches_per_core: [u64; NUM_CORES],
    pub tasks_created: u32,
    pub tasks_deleted: u32,
    pub total_runtime_us: u64,
}

/// A read-only copy of a task's observable state, returned by
/// [`Scheduler::get_task_info`] since callers must not hold a reference into
/// the locked table.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: heapless::String<MAX_NAME_LEN>,
    pub priority: Priority,
    pub kind: TaskKind,
    pub state: TaskState,
    pub affinity: Affinity,
    pub run_count: u32,
    pub total_runtime_us: u64,
    pub core: usize,
}

struct CoreTable {
    tasks: Vec<Task, MAX_TASKS_PER_CORE>,
    /// Round-robin cursor: index into `tasks` of the last-dispatched slot at
    /// the current priority level, advanced on every priority-pass dispatch.
    cursor: usize,
    current: Option<TaskId>,
}

impl CoreTable {
    const fn new() -> Self {
        Self { tasks: Vec::new(), cursor: 0, current: None }
    }

    fn find_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn find(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

pub struct Scheduler {
    cores: [CoreTable; NUM_CORES],
    next_id: TaskId,
    stats: SchedulerStats,
    tracing: bool,
    running: bool,
    core1_started: bool,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            cores: [CoreTable::new(), CoreTable::new()],
            next_id: 1,
            stats: SchedulerStats {
                context_switches: 0,
                context_switches_per_core: [0; NUM_CORES],
                tasks_created: 0,
                tasks_deleted: 0,
                total_runtime_us: 0,
            },
            tracing: false,
            running: false,
            core1_started: false,
        }
    }

    fn home_core_for(&self, affinity: Affinity) -> usize {
        match affinity {
            Affinity::Core(c) => c as usize,
            // Load-balance ANY tasks onto whichever core's table is
            // currently smaller; the task remains reachable from the other
            // core only through the cross-core fallback scan.
            Affinity::Any => {
                if self.cores[0].tasks.len() <= self.cores[1].tasks.len() { 0 } else { 1 }
            }
        }
    }

    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        param: usize,
        stack_size: usize,
        priority: Priority,
        name: &str,
        affinity_raw: i32,
        kind: TaskKind,
    ) -> Result<TaskId> {
        let affinity = Affinity::from_raw(affinity_raw, NUM_CORES as u8).ok_or(KernelError::InvalidArgument)?;
        let home = self.home_core_for(affinity);
        if self.cores[home].tasks.len() >= MAX_TASKS_PER_CORE {
            return Err(KernelError::ResourceExhausted);
        }
        let id = self.next_id;
        self.next_id += 1;
        let task = Task::new(id, name, entry, param, priority, kind, affinity, 0, stack_size);
        self.cores[home]
            .tasks
            .push(task)
            .map_err(|_| KernelError::ResourceExhausted)?;
        self.stats.tasks_created += 1;
        Ok(id)
    }

    fn find_task_mut(&mut self, id: TaskId) -> Option<(&mut Task, usize)> {
        for (core_idx, core) in self.cores.iter_mut().enumerate() {
            if core.find(id).is_some() {
                return core.find_mut(id).map(|t| (t, core_idx));
            }
        }
        None
    }

    pub fn delete_task(&mut self, id: TaskId) -> bool {
        for core in self.cores.iter_mut() {
            let before = core.tasks.len();
            core.tasks.retain(|t| t.id != id);
            if core.tasks.len() != before {
                self.stats.tasks_deleted += 1;
                return true;
            }
        }
        false
    }

    pub fn suspend_task(&mut self, id: TaskId) -> bool {
        match self.find_task_mut(id) {
            Some((task, _)) if task.state == TaskState::Ready || task.state == TaskState::Running => {
                task.state = TaskState::Suspended;
                true
            }
            _ => false,
        }
    }

    /// Scheduling hint only, per the spec: flips SUSPENDED back to READY so
    /// the next dispatch pass may pick it up, with no queue-ordering
    /// guarantee.
    pub fn resume_task(&mut self, id: TaskId) -> bool {
        match self.find_task_mut(id) {
            Some((task, _)) if task.state == TaskState::Suspended => {
                task.state = TaskState::Ready;
                true
            }
            _ => false,
        }
    }

    /// Nudge a task to run "soon" - the integration point the IRQ coalescer
    /// and log pipeline use to request their drain tasks run ahead of their
    /// normal period after crossing a coalescing/overflow threshold. Just
    /// `resume_task`'s scheduling-hint semantics under another name: a
    /// READY/RUNNING task is already eligible for the next dispatch pass, so
    /// there is nothing further to do beyond waking it if SUSPENDED.
    pub fn wake_task_soon(&mut self, id: TaskId) {
        self.resume_task(id);
    }

    pub fn get_task_info(&self, id: TaskId) -> Option<TaskInfo> {
        for (core_idx, core) in self.cores.iter().enumerate() {
            if let Some(t) = core.find(id) {
                return Some(TaskInfo {
                    id: t.id,
                    name: t.name.clone(),
                    priority: t.priority,
                    kind: t.kind,
                    state: t.state,
                    affinity: t.affinity,
                    run_count: t.run_count,
                    total_runtime_us: t.total_runtime_us,
                    core: core_idx,
                });
            }
        }
        None
    }

    pub fn get_stats(&self) -> SchedulerStats {
        self.stats
    }

    /// All live task ids across both core tables, for enumeration commands.
    pub fn all_task_ids(&self) -> Vec<TaskId, MAX_TOTAL_TASKS> {
        let mut ids = Vec::new();
        for core in self.cores.iter() {
            for t in core.tasks.iter() {
                let _ = ids.push(t.id);
            }
        }
        ids
    }

    pub fn get_current_task(&self, core: usize) -> Option<TaskId> {
        self.cores.get(core).and_then(|c| c.current)
    }

    pub fn set_deadline(
        &mut self,
        id: TaskId,
        kind: DeadlineType,
        period_ms: u32,
        deadline_ms: u32,
        budget_us: u32,
    ) -> Result<()> {
        let (task, _) = self.find_task_mut(id).ok_or(KernelError::InvalidArgument)?;
        let candidate = DeadlineRecord { kind, period_ms, deadline_ms, ..task.deadline };
        if !candidate.is_well_formed() {
            return Err(KernelError::InvalidArgument);
        }
        task.deadline.kind = kind;
        task.deadline.period_ms = period_ms;
        task.deadline.deadline_ms = deadline_ms;
        task.deadline.budget_us = budget_us;
        if kind == DeadlineType::Hard && task.priority < Priority::High {
            task.priority = Priority::High;
        }
        Ok(())
    }

    pub fn set_deadline_miss_handler(&mut self, id: TaskId, handler: DeadlineMissHandler) -> Result<()> {
        let (task, _) = self.find_task_mut(id).ok_or(KernelError::InvalidArgument)?;
        task.deadline.miss_handler = Some(handler);
        Ok(())
    }

    pub fn get_deadline_info(&self, id: TaskId) -> Option<DeadlineRecord> {
        for core in self.cores.iter() {
            if let Some(t) = core.find(id) {
                return Some(t.deadline);
            }
        }
        None
    }

    pub fn enable_tracing(&mut self, enabled: bool) {
        self.tracing = enabled;
    }

    /// Busy-sleep the calling task for `ms` milliseconds, reading the
    /// platform clock via `now_us` on every spin. No blocking mutex is
    /// involved (spec §5's suspension-point contract: `scheduler_delay` is a
    /// busy sleep on the core's timer, not a queue wait), so it never
    /// touches the task table and carries no task id.
    pub fn scheduler_delay(ms: u32, mut now_us: impl FnMut() -> u64) {
        let target = now_us() + ms as u64 * 1000;
        while now_us() < target {
            core::hint::spin_loop();
        }
    }

    /// Demote the calling core's RUNNING task back to READY immediately.
    /// The caller must invoke [`Scheduler::dispatch`] afterwards to pick a
    /// replacement (the spec leaves `yield` and the subsequent reschedule
    /// as two separate steps, matching the tick handler's own shape).
    pub fn yield_now(&mut self, core: usize) {
        if let Some(core_table) = self.cores.get_mut(core) {
            if let Some(id) = core_table.current {
                if let Some(t) = core_table.find_mut(id) {
                    if t.state == TaskState::Running {
                        t.state = TaskState::Ready;
                    }
                }
            }
        }
    }

    /// Periodic tick: demote a persistent RUNNING task to READY to force a
    /// reschedule, then run dispatch. Oneshot tasks reach COMPLETED only via
    /// [`Scheduler::on_task_return`], never via the tick.
    pub fn tick(&mut self, core: usize, now_us: u64) -> Option<TaskId> {
        if let Some(core_table) = self.cores.get_mut(core) {
            if let Some(id) = core_table.current {
                if let Some(t) = core_table.find_mut(id) {
                    if t.state == TaskState::Running && t.kind == TaskKind::Persistent {
                        t.state = TaskState::Ready;
                    }
                }
            }
        }
        self.dispatch(core, now_us)
    }

    /// The three-pass dispatch decision: deadline-urgency, then
    /// priority+round-robin, then cross-core ANY fallback.
    pub fn dispatch(&mut self, core: usize, now_us: u64) -> Option<TaskId> {
        if core >= NUM_CORES {
            return None;
        }

        if let Some(id) = self.pick_urgent(core, now_us) {
            return Some(self.commit_dispatch(core, id, now_us));
        }
        if let Some(id) = self.pick_priority_round_robin(core) {
            return Some(self.commit_dispatch(core, id, now_us));
        }
        let other = 1 - core;
        if let Some(id) = self.pick_cross_core_fallback(other) {
            return Some(self.commit_dispatch(core, id, now_us));
        }
        None
    }

    fn pick_urgent(&self, core: usize, now_us: u64) -> Option<TaskId> {
        let table = &self.cores[core];
        table
            .tasks
            .iter()
            .filter(|t| t.is_ready() && t.affinity.allows(core as u8))
            .filter(|t| t.deadline.kind == DeadlineType::Hard && t.deadline.is_urgent(now_us))
            .max_by_key(|t| t.priority)
            .map(|t| t.id)
    }

    fn pick_priority_round_robin(&mut self, core: usize) -> Option<TaskId> {
        let table = &self.cores[core];
        let top_priority = table
            .tasks
            .iter()
            .filter(|t| t.is_ready() && t.affinity.allows(core as u8))
            .map(|t| t.priority)
            .max()?;

        let n = table.tasks.len();
        if n == 0 {
            return None;
        }
        let start = table.cursor % n;
        for offset in 0..n {
            let idx = (start + offset) % n;
            let t = &table.tasks[idx];
            if t.is_ready() && t.priority == top_priority && t.affinity.allows(core as u8) {
                self.cores[core].cursor = (idx + 1) % n;
                return Some(t.id);
            }
        }
        None
    }

    fn pick_cross_core_fallback(&self, other_core: usize) -> Option<TaskId> {
        let table = self.cores.get(other_core)?;
        table
            .tasks
            .iter()
            .filter(|t| t.is_ready() && t.affinity == Affinity::Any)
            .max_by_key(|t| t.priority)
            .map(|t| t.id)
    }

    /// Transition the chosen task to RUNNING on `core`, apply its protection
    /// domain, and account the context switch. The task may live in either
    /// core's table (cross-core fallback), so this searches both.
    fn commit_dispatch(&mut self, core: usize, id: TaskId, now_us: u64) -> TaskId {
        for c in self.cores.iter_mut() {
            if let Some(t) = c.find_mut(id) {
                t.state = TaskState::Running;
                t.run_count += 1;
                t.start_time_us = now_us;
                if t.deadline.kind != DeadlineType::None {
                    t.deadline.last_start_time_us = now_us;
                }
                break;
            }
        }
        self.cores[core].current = Some(id);
        self.stats.context_switches += 1;
        self.stats.context_switches_per_core[core] += 1;
        if self.tracing {
            crate::klog_debug!("sched", "dispatch core={} task={}", core, id);
        }
        let _ = protection::CONTROLLER.lock().apply(id, core);
        id
    }

    /// Execution accounting on task return (oneshot completion or a
    /// persistent task voluntarily finishing one activation).
    pub fn on_task_return(&mut self, core: usize, id: TaskId, now_us: u64, completed: bool) {
        let mut miss_handler = None;
        let mut hard_miss = false;
        let mut deadline_missed = false;
        let mut execution: Option<(u64, u64)> = None;
        for c in self.cores.iter_mut() {
            if let Some(t) = c.find_mut(id) {
                let execution_time = now_us.saturating_sub(t.start_time_us);
                t.total_runtime_us += execution_time;
                self.stats.total_runtime_us += execution_time;
                execution = Some((execution_time, t.start_time_us));
                if t.deadline.kind != DeadlineType::None {
                    t.deadline.last_completion_time_us = now_us;
                    t.deadline.budget_overrun = execution_time > t.deadline.budget_us as u64;
                    let absolute = t.deadline.absolute_deadline_us(t.start_time_us);
                    if now_us > absolute {
                        t.deadline.miss_count += 1;
                        deadline_missed = true;
                        if t.deadline.kind == DeadlineType::Hard {
                            hard_miss = true;
                            miss_handler = t.deadline.miss_handler;
                        }
                    }
                }
                t.state = if completed && t.kind == TaskKind::Oneshot {
                    TaskState::Completed
                } else {
                    TaskState::Ready
                };
                break;
            }
        }
        if let Some(core_table) = self.cores.get_mut(core) {
            if core_table.current == Some(id) {
                core_table.current = None;
            }
        }
        // Forward the timing/deadline-miss bookkeeping just computed above to
        // the stats collector, so `task_stats`/`opt suggest` reflect real
        // per-task history instead of only what a test calls directly.
        if let Some((execution_time, start_time_us)) = execution {
            let _ = crate::stats::STATS.lock().record_task_execution(id, execution_time, start_time_us);
        }
        if deadline_missed {
            let _ = crate::stats::STATS.lock().record_deadline_miss(id);
        }
        if hard_miss {
            if let Some(handler) = miss_handler {
                handler(id);
            }
        }
    }

    /// Core 0's bring-up entry point: marks the scheduler running. Core 1's
    /// own loop (`run_pending_tasks`, driven by the embedding application)
    /// waits on [`Scheduler::core1_started`] before entering its tick loop.
    pub fn init(&mut self) {
        self.running = true;
    }

    pub fn start(&mut self) {
        self.core1_started = true;
    }

    pub fn core1_started(&self) -> bool {
        self.core1_started
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

lazy_static::lazy_static! {
    pub static ref SCHEDULER: spin::Mutex<Scheduler> = spin::Mutex::new(Scheduler::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use task::Priority;

    fn noop(_p: usize) {}

    #[test]
    fn scheduler_delay_spins_until_target_elapsed() {
        use core::cell::Cell;
        let clock = Cell::new(0u64);
        Scheduler::scheduler_delay(5, || {
            let t = clock.get();
            clock.set(t + 1000);
            t
        });
        assert!(clock.get() >= 5_000);
    }

    #[test]
    fn create_task_rejects_bad_affinity() {
        let mut s = Scheduler::new();
        assert_eq!(
            s.create_task(noop, 0, 1024, Priority::Low, "a", 7, TaskKind::Oneshot),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn table_full_is_resource_exhausted() {
        let mut s = Scheduler::new();
        for i in 0..MAX_TASKS_PER_CORE {
            s.create_task(noop, 0, 1024, Priority::Low, "a", 0, TaskKind::Oneshot).unwrap();
            let _ = i;
        }
        assert_eq!(
            s.create_task(noop, 0, 1024, Priority::Low, "a", 0, TaskKind::Oneshot),
            Err(KernelError::ResourceExhausted)
        );
    }

    #[test]
    fn higher_priority_task_is_dispatched_first() {
        let mut s = Scheduler::new();
        let low = s.create_task(noop, 0, 1024, Priority::Low, "low", -1, TaskKind::Oneshot).unwrap();
        let high = s.create_task(noop, 0, 1024, Priority::High, "high", -1, TaskKind::Oneshot).unwrap();
        let picked = s.dispatch(0, 0).unwrap();
        assert_eq!(picked, high);
        s.on_task_return(0, high, 10, true);
        let picked2 = s.dispatch(0, 20).unwrap();
        assert_eq!(picked2, low);
    }

    #[test]
    fn set_deadline_promotes_hard_priority_to_high() {
        let mut s = Scheduler::new();
        let id = s.create_task(noop, 0, 1024, Priority::Low, "t", 0, TaskKind::Persistent).unwrap();
        s.set_deadline(id, DeadlineType::Hard, 10, 5, 1000).unwrap();
        let info = s.get_task_info(id).unwrap();
        assert_eq!(info.priority, Priority::High);
    }

    #[test]
    fn suspend_then_resume_round_trips_state() {
        let mut s = Scheduler::new();
        let id = s.create_task(noop, 0, 1024, Priority::Low, "t", 0, TaskKind::Persistent).unwrap();
        assert!(s.suspend_task(id));
        assert_eq!(s.get_task_info(id).unwrap().state, TaskState::Suspended);
        assert!(s.resume_task(id));
        assert_eq!(s.get_task_info(id).unwrap().state, TaskState::Ready);
    }

    #[test]
    fn cross_core_fallback_picks_up_any_affinity_task() {
        let mut s = Scheduler::new();
        // Force the ANY task's home onto core 0 by creating it first.
        let any_task = s.create_task(noop, 0, 1024, Priority::Normal, "any", -1, TaskKind::Persistent).unwrap();
        // Core 1 has nothing of its own; dispatch should fall back to core 0's ANY task.
        let picked = s.dispatch(1, 0);
        assert_eq!(picked, Some(any_task));
    }

    #[test]
    fn deleting_a_task_removes_it_from_its_table() {
        let mut s = Scheduler::new();
        let id = s.create_task(noop, 0, 1024, Priority::Low, "t", 0, TaskKind::Oneshot).unwrap();
        assert!(s.delete_task(id));
        assert!(s.get_task_info(id).is_none());
        assert!(!s.delete_task(id));
    }
}
