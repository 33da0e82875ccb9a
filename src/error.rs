//! Kernel error kinds.
//!
//! Grounded on the teacher's `lib::error::KernelError` - a flat enum with no
//! payload, one kind per failure category, converted to a boolean/errno at
//! the public boundary rather than threaded through as a rich error type.

/// The five failure categories named in the spec's error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Null pointer, out-of-range core, unknown task id, unknown IRQ.
    InvalidArgument,
    /// No task slot, no spinlock slot, no IRQ slot, log-ring full.
    ResourceExhausted,
    /// Double-register, acquire-before-init, apply-before-configure.
    InvalidState,
    /// Deadline miss. Recorded, never terminates the task.
    PolicyViolation,
    /// Invalid length frame in the log ring; ring is reset and one error is logged.
    Catastrophic,
}

impl KernelError {
    /// Short tag used in log lines and shell error output.
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelError::InvalidArgument => "invalid-argument",
            KernelError::ResourceExhausted => "resource-exhausted",
            KernelError::InvalidState => "invalid-state",
            KernelError::PolicyViolation => "policy-violation",
            KernelError::Catastrophic => "catastrophic",
        }
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
