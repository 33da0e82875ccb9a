//! Per-task memory-region and security-state isolation, applied at dispatch.
//!
//! Grounded structurally on the teacher's `security::cred` module (a small
//! POD config struct stored per-subject, applied by a separate enforcement
//! point) but replaced with region/security-state config instead of Unix
//! credentials, since this kernel has no filesystem permission model - it
//! isolates tasks via memory-protection-unit regions and a security-state
//! transition (SECURE / NON_SECURE / TRANSITIONAL), not uid/gid.

use heapless::Vec;

use crate::config::{MAX_REGIONS_PER_TASK, MAX_SECURE_CALLABLE_BINDINGS, NUM_CORES};
use crate::error::{KernelError, Result};
use crate::sched::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    ReadExecute,
    NoAccess,
}

#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub base: usize,
    pub size: usize,
    pub access: AccessMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    Secure,
    NonSecure,
    Transitional,
}

#[derive(Debug, Clone, Copy)]
pub struct AddressRange {
    pub base: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SecureCallableBinding {
    pub name_hash: u32,
    pub veneer_addr: usize,
}

/// Everything the controller needs to install for one task.
struct DomainConfig {
    task_id: TaskId,
    regions: Vec<Region, MAX_REGIONS_PER_TASK>,
    stack_range: AddressRange,
    code_range: AddressRange,
    security_state: SecurityState,
    bindings: Vec<SecureCallableBinding, MAX_SECURE_CALLABLE_BINDINGS>,
    configured: bool,
}

impl DomainConfig {
    const fn empty(task_id: TaskId) -> Self {
        Self {
            task_id,
            regions: Vec::new(),
            stack_range: AddressRange { base: 0, size: 0 },
            code_range: AddressRange { base: 0, size: 0 },
            security_state: SecurityState::NonSecure,
            bindings: Vec::new(),
            configured: false,
        }
    }
}

const MAX_DOMAINS: usize = crate::config::MAX_TRACKED_TASKS;

pub struct ProtectionController {
    domains: Vec<DomainConfig, MAX_DOMAINS>,
    /// Per-core "last task whose settings were applied" cache. Written only
    /// by the owning core; reading it from another core is a logic error,
    /// not a data race, so it needs no lock (spec section 9 design note).
    last_applied: [Option<TaskId>; NUM_CORES],
    enabled: bool,
    overflow_reported: bool,
    secure_veneers: Vec<(u32, usize, usize), 32>,
    next_veneer_addr: usize,
}

impl ProtectionController {
    pub const fn new() -> Self {
        Self {
            domains: Vec::new(),
            last_applied: [None; NUM_CORES],
            enabled: true,
            overflow_reported: false,
            secure_veneers: Vec::new(),
            next_veneer_addr: 0x1000_0000,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn find_domain_mut(&mut self, task_id: TaskId) -> Option<&mut DomainConfig> {
        self.domains.iter_mut().find(|d| d.task_id == task_id)
    }

    fn find_or_create_domain(&mut self, task_id: TaskId) -> Result<&mut DomainConfig> {
        if self.domains.iter().any(|d| d.task_id == task_id) {
            return Ok(self.find_domain_mut(task_id).unwrap());
        }
        self.domains
            .push(DomainConfig::empty(task_id))
            .map_err(|_| KernelError::ResourceExhausted)?;
        Ok(self.domains.last_mut().unwrap())
    }

    /// Idempotent: re-configuring a task overwrites its stored regions.
    pub fn configure_task(
        &mut self,
        task_id: TaskId,
        regions: &[Region],
        stack_range: AddressRange,
        code_range: AddressRange,
    ) -> Result<()> {
        let domain = self.find_or_create_domain(task_id)?;
        domain.regions.clear();
        for r in regions {
            if domain.regions.push(*r).is_err() {
                if !self.overflow_reported {
                    crate::klog_warn!("protection", "region configuration overflow");
                    self.overflow_reported = true;
                }
                break;
            }
        }
        domain.stack_range = stack_range;
        domain.code_range = code_range;
        domain.configured = true;
        Ok(())
    }

    pub fn configure_security(
        &mut self,
        task_id: TaskId,
        state: SecurityState,
        bindings: &[SecureCallableBinding],
    ) -> Result<()> {
        let domain = self.find_or_create_domain(task_id)?;
        domain.security_state = state;
        domain.bindings.clear();
        for b in bindings {
            let _ = domain.bindings.push(*b);
        }
        domain.configured = true;
        Ok(())
    }

    /// Install the task's regions, then transition security state if it
    /// differs from current. Short-circuits when the per-core cache already
    /// names this task (idempotent within the same core, no intervening
    /// `reset`).
    pub fn apply(&mut self, task_id: TaskId, core: usize) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.last_applied.get(core).copied().flatten() == Some(task_id) {
            return Ok(());
        }
        let domain = self
            .domains
            .iter()
            .find(|d| d.task_id == task_id)
            .ok_or(KernelError::InvalidState)?;
        if !domain.configured {
            return Err(KernelError::InvalidState);
        }
        // Regions are written and enabled first; the security transition is
        // performed last because it may clobber the region view (section 4.2
        // algorithm note).
        install_regions(&domain.regions, &domain.stack_range, &domain.code_range);
        transition_security(domain.security_state, &domain.bindings);
        self.last_applied[core] = Some(task_id);
        Ok(())
    }

    /// Restore the default (kernel-trusted) domain.
    pub fn reset(&mut self, core: usize) {
        if core < self.last_applied.len() {
            self.last_applied[core] = None;
        }
        install_regions(&[], &AddressRange { base: 0, size: 0 }, &AddressRange { base: 0, size: 0 });
        transition_security(SecurityState::Secure, &[]);
    }

    pub fn last_applied(&self, core: usize) -> Option<TaskId> {
        self.last_applied.get(core).copied().flatten()
    }

    /// Allocate a non-secure-callable veneer address for a secure function
    /// living at `secure_fn`. Idempotent by name: re-registering the same
    /// name returns the same veneer address, updating the stored target
    /// address in case it changed (e.g. a relocated build).
    pub fn register_secure_function(&mut self, name: &str, secure_fn: usize) -> Result<usize> {
        let hash = hash_name(name);
        if let Some(entry) = self.secure_veneers.iter_mut().find(|(h, _, _)| *h == hash) {
            entry.1 = secure_fn;
            return Ok(entry.2);
        }
        let addr = self.next_veneer_addr;
        self.next_veneer_addr += 32; // one veneer slot per function
        self.secure_veneers
            .push((hash, secure_fn, addr))
            .map_err(|_| KernelError::ResourceExhausted)?;
        Ok(addr)
    }
}

fn hash_name(name: &str) -> u32 {
    // FNV-1a, good enough for a small in-memory veneer table.
    let mut h: u32 = 0x811c9dc5;
    for b in name.as_bytes() {
        h ^= *b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// Platform hook: install the given regions/ranges into the memory
/// protection unit. Opaque per the spec; the reference build is a no-op so
/// the crate can be exercised on the host.
fn install_regions(_regions: &[Region], _stack: &AddressRange, _code: &AddressRange) {}

/// Platform hook: perform the security-attribution-unit state transition.
fn transition_security(_state: SecurityState, _bindings: &[SecureCallableBinding]) {}

lazy_static::lazy_static! {
    pub static ref CONTROLLER: spin::Mutex<ProtectionController> =
        spin::Mutex::new(ProtectionController::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region { base: 0x2000_0000, size: 0x1000, access: AccessMode::ReadWrite }
    }

    #[test]
    fn apply_before_configure_is_invalid_state() {
        let mut c = ProtectionController::new();
        assert_eq!(c.apply(1, 0), Err(KernelError::InvalidState));
    }

    #[test]
    fn apply_is_idempotent_on_same_core() {
        let mut c = ProtectionController::new();
        c.configure_task(1, &[region()], AddressRange { base: 0, size: 0x1000 }, AddressRange { base: 0, size: 0x1000 })
            .unwrap();
        c.apply(1, 0).unwrap();
        assert_eq!(c.last_applied(0), Some(1));
        // Second apply with no intervening reset performs only the first
        // application (there is nothing observable to assert beyond "it
        // still succeeds and the cache is unchanged").
        c.apply(1, 0).unwrap();
        assert_eq!(c.last_applied(0), Some(1));
    }

    #[test]
    fn reset_clears_the_per_core_cache() {
        let mut c = ProtectionController::new();
        c.configure_task(1, &[region()], AddressRange { base: 0, size: 0 }, AddressRange { base: 0, size: 0 }).unwrap();
        c.apply(1, 0).unwrap();
        c.reset(0);
        assert_eq!(c.last_applied(0), None);
    }

    #[test]
    fn per_core_caches_are_independent() {
        let mut c = ProtectionController::new();
        c.configure_task(1, &[region()], AddressRange { base: 0, size: 0 }, AddressRange { base: 0, size: 0 }).unwrap();
        c.apply(1, 0).unwrap();
        assert_eq!(c.last_applied(1), None);
    }

    #[test]
    fn disabled_controller_apply_is_infallible_noop() {
        let mut c = ProtectionController::new();
        c.set_enabled(false);
        assert_eq!(c.apply(42, 0), Ok(()));
    }

    #[test]
    fn register_secure_function_is_idempotent_by_name() {
        let mut c = ProtectionController::new();
        let a = c.register_secure_function("svc_crypto", 0x0800_1000).unwrap();
        let b = c.register_secure_function("svc_crypto", 0x0800_1000).unwrap();
        assert_eq!(a, b);
        let c2 = c.register_secure_function("svc_other", 0x0800_2000).unwrap();
        assert_ne!(a, c2);
    }
}
