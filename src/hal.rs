//! Hardware abstraction seam for the one thing the spinlock registry and log
//! pipeline need from the platform: "disable interrupts on this core, give me
//! a token, restore from the token". The spec treats the protection unit's
//! and security attribution unit's register layouts as opaque; this module
//! is the same kind of seam - it defines *what* must happen, not *which
//! bits*. A real target crate substitutes a CPSR/PRIMASK-backed
//! implementation; the default here is a plain per-core flag so the crate
//! builds and tests on the host.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config::NUM_CORES;

static IRQ_ENABLED: [AtomicBool; NUM_CORES] = [AtomicBool::new(true), AtomicBool::new(true)];

static NOW_US: AtomicU64 = AtomicU64::new(0);

/// Monotonic microsecond clock. A real platform crate substitutes a timer
/// peripheral read; the reference build exposes a plain atomic that only
/// advances when [`set_now_us`] (or the periodic tick driving it) is called,
/// so host builds stay deterministic.
pub fn now_us() -> u64 {
    NOW_US.load(Ordering::Relaxed)
}

/// Platform/test hook: set the value [`now_us`] returns. A real target
/// crate drives this from its own timer interrupt instead.
pub fn set_now_us(us: u64) {
    NOW_US.store(us, Ordering::Relaxed);
}

/// Returns whether interrupts were enabled before this call (the value the
/// caller must pass back to [`interrupts_restore`]).
pub fn interrupts_disable() -> bool {
    let core = current_core();
    IRQ_ENABLED[core].swap(false, Ordering::AcqRel)
}

pub fn interrupts_restore(was_enabled: bool) {
    let core = current_core();
    IRQ_ENABLED[core].store(was_enabled, Ordering::Release);
}

pub fn interrupts_enabled() -> bool {
    IRQ_ENABLED[current_core()].load(Ordering::Acquire)
}

/// Which core this call is executing on. Single-threaded host tests and the
/// reference simulation both run "as" core 0 unless told otherwise via
/// [`set_current_core`] - a real platform crate replaces this with an MPIDR
/// read or equivalent.
#[cfg(not(test))]
pub fn current_core() -> usize {
    CURRENT_CORE.load(Ordering::Relaxed)
}

#[cfg(test)]
pub fn current_core() -> usize {
    CURRENT_CORE.with(|c| c.get())
}

#[cfg(not(test))]
static CURRENT_CORE: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
std::thread_local! {
    static CURRENT_CORE: core::cell::Cell<usize> = core::cell::Cell::new(0);
}

/// Test/simulation hook: pretend subsequent calls on this thread run on
/// `core`. Production builds pin this via the real per-core entry point
/// instead (see the scheduler's multicore bring-up).
#[cfg(not(test))]
pub fn set_current_core(core: usize) {
    CURRENT_CORE.store(core, Ordering::Relaxed);
}

#[cfg(test)]
pub fn set_current_core(core: usize) {
    CURRENT_CORE.with(|c| c.set(core));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_then_restore_round_trips() {
        assert!(interrupts_enabled());
        let prev = interrupts_disable();
        assert!(prev);
        assert!(!interrupts_enabled());
        interrupts_restore(prev);
        assert!(interrupts_enabled());
    }
}
