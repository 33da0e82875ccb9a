//! Per-task timing aggregates, system-level counters, double-buffer
//! registrations and optimization hints.
//!
//! Grounded on the teacher's `smp::percpu::{CpuStat, PerCpuStats}` (a
//! snapshot struct built from live per-core counters under one collection
//! point) generalized from "per-CPU only" to "per-task plus per-CPU plus
//! environment", since the spec tracks task-level timing distributions the
//! teacher's CPU-only model has no equivalent for.

use heapless::{String, Vec};

use crate::config::{MAX_BUFFER_REGISTRATIONS, MAX_NAME_LEN, MAX_TRACKED_TASKS, NUM_CORES};
use crate::error::{KernelError, Result};
use crate::sched::task::TaskId;

#[derive(Debug, Clone, Copy)]
pub struct TaskTimingStats {
    pub task_id: TaskId,
    pub sample_count: u32,
    pub min_exec_us: u64,
    pub max_exec_us: u64,
    pub sum_exec_us: u64,
    pub min_period_us: u64,
    pub max_period_us: u64,
    pub last_start_us: u64,
    pub jitter_accum_us: u64,
    pub deadline_misses: u32,
}

impl TaskTimingStats {
    const fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            sample_count: 0,
            min_exec_us: u64::MAX,
            max_exec_us: 0,
            sum_exec_us: 0,
            min_period_us: u64::MAX,
            max_period_us: 0,
            last_start_us: 0,
            jitter_accum_us: 0,
            deadline_misses: 0,
        }
    }

    pub fn avg_exec_us(&self) -> u64 {
        if self.sample_count == 0 { 0 } else { self.sum_exec_us / self.sample_count as u64 }
    }

    pub fn avg_jitter_us(&self) -> u64 {
        if self.sample_count == 0 { 0 } else { self.jitter_accum_us / self.sample_count as u64 }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemStats {
    pub uptime_ms: u64,
    pub cpu_percent: [f32; NUM_CORES],
    pub temperature_c: f32,
    pub voltage_mv: u32,
}

struct BufferRegistration {
    name: String<MAX_NAME_LEN>,
    addr: usize,
    size: usize,
    swap_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferInfo {
    pub addr: usize,
    pub size: usize,
    pub swap_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationHint {
    /// Task consistently overruns its execution budget.
    BudgetTooTight(TaskId),
    /// Task's observed period jitter exceeds a quarter of its deadline.
    HighJitter(TaskId),
    /// A double-buffer pair has swapped far more than the others; consider
    /// a larger buffer to reduce swap frequency.
    FrequentBufferSwap,
}

pub struct StatsCollector {
    tasks: Vec<TaskTimingStats, MAX_TRACKED_TASKS>,
    system: SystemStats,
    buffers: Vec<BufferRegistration, MAX_BUFFER_REGISTRATIONS>,
}

impl StatsCollector {
    pub const fn new() -> Self {
        Self { tasks: Vec::new(), system: SystemStats {
            uptime_ms: 0,
            cpu_percent: [0.0; NUM_CORES],
            temperature_c: 0.0,
            voltage_mv: 0,
        }, buffers: Vec::new() }
    }

    fn find_or_create(&mut self, task_id: TaskId) -> Result<&mut TaskTimingStats> {
        if let Some(idx) = self.tasks.iter().position(|t| t.task_id == task_id) {
            return Ok(&mut self.tasks[idx]);
        }
        self.tasks
            .push(TaskTimingStats::new(task_id))
            .map_err(|_| KernelError::ResourceExhausted)?;
        Ok(self.tasks.last_mut().unwrap())
    }

    pub fn record_task_execution(&mut self, task_id: TaskId, exec_us: u64, start_us: u64) -> Result<()> {
        let t = self.find_or_create(task_id)?;
        if t.last_start_us != 0 {
            let period = start_us.saturating_sub(t.last_start_us);
            if period < t.min_period_us { t.min_period_us = period; }
            if period > t.max_period_us { t.max_period_us = period; }
            let expected = if t.sample_count > 0 { t.max_period_us } else { period };
            t.jitter_accum_us += period.abs_diff(expected);
        }
        t.last_start_us = start_us;
        if exec_us < t.min_exec_us { t.min_exec_us = exec_us; }
        if exec_us > t.max_exec_us { t.max_exec_us = exec_us; }
        t.sum_exec_us += exec_us;
        t.sample_count += 1;
        Ok(())
    }

    pub fn record_deadline_miss(&mut self, task_id: TaskId) -> Result<()> {
        let t = self.find_or_create(task_id)?;
        t.deadline_misses += 1;
        Ok(())
    }

    pub fn get_task_stats(&self, task_id: TaskId) -> Option<TaskTimingStats> {
        self.tasks.iter().find(|t| t.task_id == task_id).copied()
    }

    pub fn update_system_stats(&mut self, cpu_percent: [f32; NUM_CORES], uptime_ms: u64, temperature_c: f32, voltage_mv: u32) {
        self.system = SystemStats { uptime_ms, cpu_percent, temperature_c, voltage_mv };
    }

    pub fn get_system_stats(&self) -> SystemStats {
        self.system
    }

    pub fn register_buffer(&mut self, name: &str, addr: usize, size: usize) -> Result<()> {
        if self.buffers.iter().any(|b| b.name.as_str() == name) {
            return Err(KernelError::InvalidState);
        }
        let mut bounded = String::new();
        let _ = bounded.push_str(name);
        self.buffers
            .push(BufferRegistration { name: bounded, addr, size, swap_count: 0 })
            .map_err(|_| KernelError::ResourceExhausted)
    }

    pub fn record_buffer_swap(&mut self, name: &str) -> Result<()> {
        let b = self.buffers.iter_mut().find(|b| b.name.as_str() == name).ok_or(KernelError::InvalidArgument)?;
        b.swap_count += 1;
        Ok(())
    }

    /// Enumerate registered buffers into a caller-provided array, returning
    /// the count actually copied (bounded by `out.len()`).
    pub fn enumerate_buffers(&self, out: &mut [(heapless::String<MAX_NAME_LEN>, BufferInfo)]) -> usize {
        let mut n = 0;
        for (slot, b) in out.iter_mut().zip(self.buffers.iter()) {
            *slot = (b.name.clone(), BufferInfo { addr: b.addr, size: b.size, swap_count: b.swap_count });
            n += 1;
        }
        n
    }

    /// Heuristic suggestions keyed off observed timing behavior: a budget
    /// overrun rate, high jitter relative to the task's own max period, or a
    /// buffer pair swapping much more than the median.
    pub fn suggest_optimizations(&self) -> Vec<OptimizationHint, 8> {
        let mut hints = Vec::new();
        for t in self.tasks.iter() {
            if t.sample_count == 0 {
                continue;
            }
            if t.max_exec_us > 0 && t.avg_exec_us() * 4 > t.max_exec_us * 3 {
                let _ = hints.push(OptimizationHint::BudgetTooTight(t.task_id));
            }
            if t.max_period_us > 0 && t.avg_jitter_us() * 4 > t.max_period_us {
                let _ = hints.push(OptimizationHint::HighJitter(t.task_id));
            }
        }
        if let Some(max_swaps) = self.buffers.iter().map(|b| b.swap_count).max() {
            let avg_swaps: u32 = if self.buffers.is_empty() {
                0
            } else {
                self.buffers.iter().map(|b| b.swap_count).sum::<u32>() / self.buffers.len() as u32
            };
            if max_swaps > avg_swaps.saturating_mul(3).max(10) {
                let _ = hints.push(OptimizationHint::FrequentBufferSwap);
            }
        }
        hints
    }

    pub fn reset_all(&mut self) {
        self.tasks.clear();
        self.buffers.iter_mut().for_each(|b| b.swap_count = 0);
    }

    pub fn reset_task(&mut self, task_id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.task_id != task_id);
        self.tasks.len() != before
    }
}

lazy_static::lazy_static! {
    pub static ref STATS: spin::Mutex<StatsCollector> = spin::Mutex::new(StatsCollector::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_aggregates_track_min_max_avg() {
        let mut s = StatsCollector::new();
        s.record_task_execution(1, 100, 1000).unwrap();
        s.record_task_execution(1, 300, 2000).unwrap();
        s.record_task_execution(1, 200, 3000).unwrap();
        let t = s.get_task_stats(1).unwrap();
        assert_eq!(t.min_exec_us, 100);
        assert_eq!(t.max_exec_us, 300);
        assert_eq!(t.avg_exec_us(), 200);
        assert_eq!(t.sample_count, 3);
    }

    #[test]
    fn register_buffer_rejects_duplicate_names() {
        let mut s = StatsCollector::new();
        s.register_buffer("imu", 0x2000, 64).unwrap();
        assert_eq!(s.register_buffer("imu", 0x3000, 64), Err(KernelError::InvalidState));
    }

    #[test]
    fn reset_task_removes_only_that_task() {
        let mut s = StatsCollector::new();
        s.record_task_execution(1, 10, 0).unwrap();
        s.record_task_execution(2, 20, 0).unwrap();
        assert!(s.reset_task(1));
        assert!(s.get_task_stats(1).is_none());
        assert!(s.get_task_stats(2).is_some());
    }

    #[test]
    fn deadline_miss_is_tracked_per_task() {
        let mut s = StatsCollector::new();
        s.record_deadline_miss(7).unwrap();
        s.record_deadline_miss(7).unwrap();
        assert_eq!(s.get_task_stats(7).unwrap().deadline_misses, 2);
    }
}
