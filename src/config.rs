//! Compile-time knobs. Every bound named as a "compile-time constant" in the
//! spec's external-interfaces section lives here so the rest of the crate
//! never hardcodes a magic number.

/// Number of hardware cores this kernel build targets.
pub const NUM_CORES: usize = 2;

/// Maximum number of tasks a single core's table can hold.
pub const MAX_TASKS_PER_CORE: usize = 32;

/// Maximum number of IRQs the coalescer can manage.
pub const MAX_MANAGED_INTERRUPTS: usize = 64;

/// Maximum number of tasks the stats collector tracks timing history for.
pub const MAX_TRACKED_TASKS: usize = 64;

/// Maximum number of hardware spinlocks the registry can hand out.
pub const MAX_SPINLOCKS: usize = 32;

/// Maximum number of memory regions a single task's protection domain can hold.
pub const MAX_REGIONS_PER_TASK: usize = 8;

/// Maximum number of secure-callable bindings a task can register.
pub const MAX_SECURE_CALLABLE_BINDINGS: usize = 16;

/// Maximum number of double-buffer registrations the stats collector tracks.
pub const MAX_BUFFER_REGISTRATIONS: usize = 16;

/// Scheduler tick period, fixed per spec section 6.
pub const TICK_PERIOD_MS: u32 = 10;

/// Interrupt-coalescer drain period, fixed per spec section 6.
pub const DRAIN_PERIOD_MS: u32 = 5;

/// Default cap on a single formatted log message, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256;

/// Capacity of the durable-sink log ring buffer, in bytes.
pub const LOG_RING_CAPACITY: usize = 4096;

/// Maximum log records drained per log-task activation (cooperative timeout).
pub const LOG_DRAIN_BATCH: usize = 2;

/// Emit an overflow warning only on every Nth dropped record.
pub const LOG_OVERFLOW_WARN_PERIOD: u32 = 100;

/// Urgency window for hard deadlines: urgent once within this fraction of the
/// absolute deadline. See spec section 9 open question - left as a constant
/// rather than a runtime policy knob, matching the source behavior.
pub const DEADLINE_URGENCY_FRACTION: f32 = 0.25;

/// Flash log region: write alignment.
pub const FLASH_WRITE_ALIGN: usize = 4;

/// Name-length bound for tasks and spinlock owners (heapless::String<N>).
pub const MAX_NAME_LEN: usize = 32;

/// Name-length bound for module names passed to the log pipeline.
pub const MAX_MODULE_NAME_LEN: usize = 16;

/// Stack size, in bytes, for the kernel's own background tasks (IRQ-drain,
/// log-drain). Task stacks are opaque per the spec; this is metadata only.
pub const DEFAULT_TASK_STACK_SIZE: usize = 4096;
