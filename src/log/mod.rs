//! Thread-safe asynchronous logging pipeline.
//!
//! Grounded on the teacher's `log.rs` (level enum + global level + ANSI
//! color prefixes) and `lib::printk.rs` (the macro family layered over a
//! ring buffer), generalized to the spec's multi-destination model: console
//! fast path plus a drained ring for durable sinks, rather than a single
//! UART target.

pub mod ring;
pub mod console;
pub mod flash;

use core::fmt::{self, Write as _};

use crate::config::{
    DEFAULT_MAX_MESSAGE_SIZE, LOG_DRAIN_BATCH, LOG_OVERFLOW_WARN_PERIOD, LOG_RING_CAPACITY,
    MAX_MODULE_NAME_LEN,
};
use crate::error::{KernelError, Result};
use crate::sched::task::TaskId;
use crate::spinlock::{self, LockCategory};
use ring::ByteRing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// ANSI color code used when `color_output` is enabled.
    pub fn ansi_color(&self) -> &'static str {
        match self {
            LogLevel::Trace => "\x1b[90m",
            LogLevel::Debug => "\x1b[36m",
            LogLevel::Info => "\x1b[32m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Error => "\x1b[31m",
            LogLevel::Fatal => "\x1b[35m",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub active: bool,
    pub min_level: LogLevel,
}

impl Destination {
    const fn off() -> Self {
        Self { active: false, min_level: LogLevel::Info }
    }
}

bitflags::bitflags! {
    /// Which optional prefix fields the formatter emits, fixed at init per
    /// the spec ("whether each prefix appears is fixed at init").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatFlags: u8 {
        const TIMESTAMP = 1 << 0;
        const LEVEL     = 1 << 1;
        const CORE_ID   = 1 << 2;
        const COLOR     = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    pub console: Destination,
    pub sdcard: Destination,
    pub flash: Destination,
    pub max_message_size: usize,
    pub format: FormatFlags,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: Destination { active: true, min_level: LogLevel::Info },
            sdcard: Destination::off(),
            flash: Destination::off(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            format: FormatFlags::TIMESTAMP.union(FormatFlags::LEVEL).union(FormatFlags::CORE_ID),
        }
    }
}

/// Platform hook for raw byte output. Installed once at init; console and
/// durable sinks each get one.
pub trait ByteSink: Send + Sync {
    fn write(&self, bytes: &[u8]);
    fn flush(&self) {}
}

struct NullSink;
impl ByteSink for NullSink {
    fn write(&self, _bytes: &[u8]) {}
}

/// Fixed-capacity `core::fmt::Write` target, so formatting never allocates.
struct LineBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> LineBuf<N> {
    fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl<const N: usize> fmt::Write for LineBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if self.len >= N {
                // Cap at max_message_size: truncate silently rather than error.
                return Ok(());
            }
            self.buf[self.len] = b;
            self.len += 1;
        }
        Ok(())
    }
}

pub(crate) const LINE_CAP: usize = 320; // headroom over DEFAULT_MAX_MESSAGE_SIZE for prefixes

enum LockMode {
    /// Early boot, before the spinlock registry reaches FULL.
    Fallback,
    Hardware { console_slot: usize, log_slot: usize },
}

pub struct Pipeline {
    config: LogConfig,
    ring: ByteRing<LOG_RING_CAPACITY>,
    overflow_count: u32,
    lock_mode: LockMode,
    fallback_console: spin::Mutex<()>,
    fallback_log: spin::Mutex<()>,
    console_sink: &'static dyn ByteSink,
    sdcard_sink: &'static dyn ByteSink,
    flash_sink: &'static dyn ByteSink,
    initialized: bool,
}

impl Pipeline {
    pub const fn new() -> Self {
        Self {
            config: LogConfig {
                console: Destination { active: true, min_level: LogLevel::Info },
                sdcard: Destination::off(),
                flash: Destination::off(),
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
                format: FormatFlags::TIMESTAMP.union(FormatFlags::LEVEL).union(FormatFlags::CORE_ID),
            },
            ring: ByteRing::new(),
            overflow_count: 0,
            lock_mode: LockMode::Fallback,
            fallback_console: spin::Mutex::new(()),
            fallback_log: spin::Mutex::new(()),
            console_sink: &NullSink,
            sdcard_sink: &NullSink,
            flash_sink: &NullSink,
            initialized: true,
        }
    }

    pub fn configure(&mut self, config: LogConfig) {
        self.config = config;
    }

    pub fn set_console_sink(&mut self, sink: &'static dyn ByteSink) {
        self.console_sink = sink;
    }

    pub fn set_sdcard_sink(&mut self, sink: &'static dyn ByteSink) {
        self.sdcard_sink = sink;
    }

    pub fn set_flash_sink(&mut self, sink: &'static dyn ByteSink) {
        self.flash_sink = sink;
    }

    /// One-step transition from the boot-time fallback mutex to the
    /// registered hardware spinlocks. After this call the fallback is never
    /// used again.
    pub fn init_spinlocks(&mut self, console_slot: usize, log_slot: usize) {
        self.lock_mode = LockMode::Hardware { console_slot, log_slot };
    }

    fn with_console_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.lock_mode {
            LockMode::Fallback => {
                let guard = self.fallback_console.lock();
                let r = f();
                drop(guard);
                r
            }
            LockMode::Hardware { console_slot, .. } => {
                // `spinlock::acquire`/`release` only briefly touch the
                // registry's bookkeeping lock to validate the slot, and never
                // hold it across the blocking hardware wait - holding
                // `REGISTRY.lock()` here for the full critical section would
                // deadlock against another core doing the same for the same
                // slot.
                let saved = spinlock::acquire(console_slot, 0).expect("console lock slot must be valid");
                let r = f();
                spinlock::release(saved);
                r
            }
        }
    }

    fn with_log_lock<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        match self.lock_mode {
            LockMode::Fallback => {
                // SAFETY: fallback_log is a plain spin mutex guarding only
                // this struct's own ring; there is no re-entrant call path.
                let guard = self.fallback_log.lock();
                let r = f(self);
                drop(guard);
                r
            }
            LockMode::Hardware { log_slot, .. } => {
                let saved = spinlock::acquire(log_slot, 0).expect("log lock slot must be valid");
                let r = f(self);
                spinlock::release(saved);
                r
            }
        }
    }

    fn format_line(&self, level: LogLevel, module: &str, args: fmt::Arguments, core_id: u8, timestamp_ms: u64) -> LineBuf<LINE_CAP> {
        let mut line = LineBuf::<LINE_CAP>::new();
        let color_prefix = self.config.format.contains(FormatFlags::COLOR);
        if color_prefix {
            let _ = line.write_str(level.ansi_color());
        }
        if self.config.format.contains(FormatFlags::TIMESTAMP) {
            let secs = timestamp_ms / 1000;
            let ms = timestamp_ms % 1000;
            let _ = write!(line, "[{:>5}.{:03}]", secs, ms);
        }
        if self.config.format.contains(FormatFlags::LEVEL) {
            let _ = write!(line, "[{}]", level.as_str());
        }
        if self.config.format.contains(FormatFlags::CORE_ID) {
            let _ = write!(line, "[C{}]", core_id);
        }
        if !module.is_empty() {
            let _ = write!(line, "[{}]", module);
        }
        let _ = line.write_char(' ');
        let _ = line.write_fmt(args);
        if color_prefix {
            let _ = line.write_str("\x1b[0m");
        }
        line
    }

    /// Console fast path plus (when applicable) the durable-sink queue path.
    /// `log_message` called before init falls back to a direct synchronous
    /// console write (spec section 4.5 failure semantics); since this
    /// struct's `new()` always leaves it usable, "before init" here means
    /// "before any destination has been configured active".
    pub fn log_message(
        &mut self,
        level: LogLevel,
        module: &str,
        args: fmt::Arguments,
        core_id: u8,
        timestamp_ms: u64,
    ) {
        let mut bounded_module = heapless::String::<MAX_MODULE_NAME_LEN>::new();
        let _ = bounded_module.push_str(module);

        if self.config.console.active && level >= self.config.console.min_level {
            let line = self.format_line(level, bounded_module.as_str(), args, core_id, timestamp_ms);
            self.with_console_lock(|| {
                self.console_sink.write(line.as_bytes());
                self.console_sink.write(b"\n");
                self.console_sink.flush();
            });
        }

        let durable_active = (self.config.sdcard.active && level >= self.config.sdcard.min_level)
            || (self.config.flash.active && level >= self.config.flash.min_level);
        if !durable_active {
            return;
        }

        let max_msg = self.config.max_message_size.min(LINE_CAP);
        let line = self.format_line(level, bounded_module.as_str(), args, core_id, timestamp_ms);
        let payload = &line.as_bytes()[..line.len.min(max_msg)];

        self.enqueue_record(payload);
    }

    fn enqueue_record(&mut self, payload: &[u8]) {
        let dropped = self.with_log_lock(|this| !this.ring.push_frame(payload));
        if dropped {
            self.overflow_count += 1;
            if self.overflow_count % LOG_OVERFLOW_WARN_PERIOD == 0 {
                let msg = "log ring overflow, dropping records";
                self.with_console_lock(|| {
                    self.console_sink.write(b"[WARN] ");
                    self.console_sink.write(msg.as_bytes());
                    self.console_sink.write(b"\n");
                });
            }
        }
        wake_log_task();
    }

    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }

    /// Drain up to `LOG_DRAIN_BATCH` records, emitting each to active
    /// durable destinations. Returns the number of records actually
    /// drained.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        let max_msg = self.config.max_message_size.min(LINE_CAP);
        let mut buf = [0u8; LINE_CAP];
        for _ in 0..LOG_DRAIN_BATCH {
            let outcome = self.with_log_lock(|this| this.ring.pop_frame(&mut buf[..max_msg]));
            match outcome {
                Ok(Some(len)) => {
                    if self.config.sdcard.active {
                        self.sdcard_sink.write(&buf[..len]);
                        self.sdcard_sink.write(b"\n");
                    }
                    if self.config.flash.active {
                        flash::write_record(self.flash_sink, &buf[..len]);
                    }
                    drained += 1;
                }
                Ok(None) => break,
                Err(()) => {
                    self.with_log_lock(|this| this.ring.reset());
                    self.with_console_lock(|| {
                        self.console_sink.write(b"[ERROR] log ring corrupt, reset\n");
                    });
                    break;
                }
            }
        }
        drained
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }
}

lazy_static::lazy_static! {
    pub static ref PIPELINE: spin::Mutex<Pipeline> = spin::Mutex::new(Pipeline::new());
}

/// Register the log and console spinlocks with the registry and transition
/// the pipeline off its boot-time fallback mutex. Call once the registry
/// reaches `InitPhase::Full`.
pub fn init_hardware_locks() -> Result<()> {
    let (console_slot, log_slot) = {
        let mut reg = spinlock::REGISTRY.lock();
        if reg.init_phase() < spinlock::InitPhase::Full {
            return Err(KernelError::InvalidState);
        }
        let console_slot = reg.allocate(LockCategory::Logging, "console")?;
        let log_slot = reg.allocate(LockCategory::Logging, "log")?;
        (console_slot, log_slot)
    };
    PIPELINE.lock().init_spinlocks(console_slot, log_slot);
    Ok(())
}

/// Id of the scheduled task that runs [`Pipeline::drain`], recorded once by
/// `crate::init` after it spawns that task. `None` until then (or in tests
/// that drive the pipeline directly without a running scheduler).
static LOG_TASK_ID: spin::Mutex<Option<TaskId>> = spin::Mutex::new(None);

pub fn set_log_task_id(id: TaskId) {
    *LOG_TASK_ID.lock() = Some(id);
}

/// Hint the scheduler to run the log-drain task "soon" after a record is
/// enqueued, rather than waiting for its next scheduled activation. A
/// best-effort nudge: see `sched::Scheduler::wake_task_soon`.
fn wake_log_task() {
    if let Some(id) = *LOG_TASK_ID.lock() {
        crate::sched::SCHEDULER.lock().wake_task_soon(id);
    }
}

/// Task entry point for the dedicated log-drain task spawned by
/// `crate::init`, matching spec §4.5's "Drain (dedicated log task)".
pub fn log_task_entry(_param: usize) {
    PIPELINE.lock().drain();
}

/// Internal macro family used by the rest of the crate for its own tracing,
/// layered over the same pipeline `log_message` callers use.
#[macro_export]
macro_rules! klog {
    ($level:expr, $module:expr, $($arg:tt)*) => {{
        $crate::log::PIPELINE.lock().log_message($level, $module, format_args!($($arg)*), 0, 0);
    }};
}

#[macro_export]
macro_rules! klog_error {
    ($module:expr, $($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Error, $module, $($arg)*) };
}

#[macro_export]
macro_rules! klog_warn {
    ($module:expr, $($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Warn, $module, $($arg)*) };
}

#[macro_export]
macro_rules! klog_info {
    ($module:expr, $($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Info, $module, $($arg)*) };
}

#[macro_export]
macro_rules! klog_debug {
    ($module:expr, $($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Debug, $module, $($arg)*) };
}

#[macro_export]
macro_rules! klog_trace {
    ($module:expr, $($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Trace, $module, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        count: AtomicUsize,
    }
    impl ByteSink for CountingSink {
        fn write(&self, _bytes: &[u8]) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    static FLASH: CountingSink = CountingSink { count: AtomicUsize::new(0) };

    #[test]
    fn console_fast_path_never_touches_ring() {
        let mut p = Pipeline::new();
        p.log_message(LogLevel::Info, "core", format_args!("hello {}", 1), 0, 0);
        assert!(p.ring.is_empty());
    }

    #[test]
    fn durable_record_round_trips_through_drain() {
        let mut p = Pipeline::new();
        p.configure(LogConfig {
            console: Destination::off(),
            sdcard: Destination::off(),
            flash: Destination { active: true, min_level: LogLevel::Info },
            ..LogConfig::default()
        });
        p.set_flash_sink(&FLASH);
        p.log_message(LogLevel::Info, "core", format_args!("durable line"), 0, 0);
        assert!(!p.ring.is_empty());
        let n = p.drain();
        assert_eq!(n, 1);
        assert!(p.ring.is_empty());
    }

    #[test]
    fn drain_caps_at_batch_size() {
        let mut p = Pipeline::new();
        p.configure(LogConfig {
            console: Destination::off(),
            sdcard: Destination::off(),
            flash: Destination { active: true, min_level: LogLevel::Info },
            ..LogConfig::default()
        });
        p.set_flash_sink(&FLASH);
        for _ in 0..5 {
            p.log_message(LogLevel::Info, "core", format_args!("line"), 0, 0);
        }
        assert_eq!(p.drain(), LOG_DRAIN_BATCH);
    }

    #[test]
    fn overflow_drops_and_counts() {
        let mut p = Pipeline::new();
        p.configure(LogConfig {
            console: Destination::off(),
            sdcard: Destination::off(),
            flash: Destination { active: true, min_level: LogLevel::Info },
            ..LogConfig::default()
        });
        p.set_flash_sink(&FLASH);
        // Flood past ring capacity.
        for _ in 0..(LOG_RING_CAPACITY / 8 + 10) {
            p.log_message(LogLevel::Info, "x", format_args!("0123456789"), 0, 0);
        }
        assert!(p.overflow_count() > 0);
    }
}
