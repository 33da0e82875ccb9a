//! Task identity, attributes and the per-task deadline record.
//!
//! Grounded on the teacher's `process::task::Task` / `ProcessState` shape
//! (id + name + state + a handful of POD fields) but replaces the Unix
//! process model (page tables, fds, signals) with the spec's function-entry
//! task model, since this kernel runs a fixed set of cooperating firmware
//! tasks rather than user processes.

use heapless::String;

use crate::config::MAX_NAME_LEN;

/// Monotonically assigned, unique for the kernel's lifetime.
pub type TaskId = u32;

/// Priority level. Declaration order is the ranking order (derives `Ord`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Idle,
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Oneshot,
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Inactive,
    Ready,
    Running,
    /// Reserved for future synchronization primitives; currently unreachable.
    Blocked,
    Suspended,
    Completed,
}

/// Core affinity: a fixed core, or either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Core(u8),
    Any,
}

impl Affinity {
    /// Parse the shell-level encoding: -1 = ANY, 0/1 = a specific core.
    pub fn from_raw(raw: i32, num_cores: u8) -> Option<Self> {
        if raw == -1 {
            Some(Affinity::Any)
        } else if raw >= 0 && (raw as u8) < num_cores {
            Some(Affinity::Core(raw as u8))
        } else {
            None
        }
    }

    pub fn allows(&self, core: u8) -> bool {
        match self {
            Affinity::Core(c) => *c == core,
            Affinity::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineType {
    None,
    Soft,
    Hard,
}

/// A handler invoked synchronously on a HARD deadline miss.
pub type DeadlineMissHandler = fn(TaskId);

/// Timing contract for a periodic task.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineRecord {
    pub kind: DeadlineType,
    pub period_ms: u32,
    pub deadline_ms: u32,
    pub budget_us: u32,
    pub miss_count: u32,
    pub last_start_time_us: u64,
    pub last_completion_time_us: u64,
    pub miss_handler: Option<DeadlineMissHandler>,
    /// Execution budget overrun observed on the most recent run.
    pub budget_overrun: bool,
}

impl DeadlineRecord {
    pub const fn none() -> Self {
        Self {
            kind: DeadlineType::None,
            period_ms: 0,
            deadline_ms: 0,
            budget_us: 0,
            miss_count: 0,
            last_start_time_us: 0,
            last_completion_time_us: 0,
            miss_handler: None,
            budget_overrun: false,
        }
    }

    /// Invariant from the data model: if kind != None then period > 0 and
    /// deadline <= period.
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            DeadlineType::None => true,
            _ => self.period_ms > 0 && self.deadline_ms <= self.period_ms,
        }
    }

    /// Absolute deadline for the period starting at or after `last_start`,
    /// per the dispatch algorithm's period-boundary rule.
    pub fn absolute_deadline_us(&self, current_time_us: u64) -> u64 {
        let period_us = self.period_ms as u64 * 1000;
        let deadline_us = self.deadline_ms as u64 * 1000;
        if self.last_start_time_us == 0 && self.last_completion_time_us == 0 {
            // First run: anchor the window at the current tick.
            return current_time_us + deadline_us;
        }
        let period_start = if period_us == 0 {
            self.last_start_time_us
        } else {
            (self.last_start_time_us / period_us) * period_us + period_us
        };
        period_start + deadline_us
    }

    /// Urgent once within `DEADLINE_URGENCY_FRACTION` of the deadline window.
    pub fn is_urgent(&self, current_time_us: u64) -> bool {
        if self.kind != DeadlineType::Hard || self.period_ms == 0 || self.deadline_ms == 0 {
            return false;
        }
        let absolute = self.absolute_deadline_us(current_time_us);
        let remaining = absolute.saturating_sub(current_time_us) as f32;
        let window = (self.deadline_ms as u64 * 1000) as f32;
        remaining <= crate::config::DEADLINE_URGENCY_FRACTION * window
    }
}

/// Opaque entry point: a function pointer plus an opaque parameter word.
/// The kernel never interprets `param`; it is handed back verbatim.
pub type TaskEntry = fn(usize);

pub struct Task {
    pub id: TaskId,
    pub name: String<MAX_NAME_LEN>,
    pub entry: TaskEntry,
    pub param: usize,
    pub priority: Priority,
    pub kind: TaskKind,
    pub state: TaskState,
    pub affinity: Affinity,
    pub run_count: u32,
    pub total_runtime_us: u64,
    pub stack_base: usize,
    pub stack_size: usize,
    pub deadline: DeadlineRecord,
    pub deadline_overrun: bool,
    /// Start-of-run timestamp used for execution accounting, independent of
    /// whether the task carries a deadline.
    pub start_time_us: u64,
}

impl Task {
    pub fn new(
        id: TaskId,
        name: &str,
        entry: TaskEntry,
        param: usize,
        priority: Priority,
        kind: TaskKind,
        affinity: Affinity,
        stack_base: usize,
        stack_size: usize,
    ) -> Self {
        let mut bounded_name = String::new();
        // Truncate silently past MAX_NAME_LEN, matching the spec's "bounded
        // length" attribute rather than rejecting task creation over a name.
        for c in name.chars() {
            if bounded_name.push(c).is_err() {
                break;
            }
        }
        Self {
            id,
            name: bounded_name,
            entry,
            param,
            priority,
            kind,
            state: TaskState::Ready,
            affinity,
            run_count: 0,
            total_runtime_us: 0,
            stack_base,
            stack_size,
            deadline: DeadlineRecord::none(),
            deadline_overrun: false,
            start_time_us: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }
}
