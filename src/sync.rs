//! # Synchronization Primitives
//!
//! Critical section abstractions for task and interrupt context.
//!
//! Both variants go through the `critical-section` crate. On Cortex-M the
//! implementation comes from `cortex-m`'s `critical-section-single-core`
//! feature, which saves PRIMASK, disables interrupts and restores the saved
//! state on exit. Host builds use the `std` implementation (a process-wide
//! reentrant lock).
//!
//! Critical sections must never enclose a blocking wait: every kernel
//! object in this crate acquires its permits first and only then enters a
//! critical section for the O(1) data move.

use critical_section::{CriticalSection, RestoreState};

/// Execute a closure within a critical section (task context).
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Interrupt-context critical section.
///
/// Entering saves the current interrupt-mask state and masks interrupts;
/// dropping the guard restores exactly the saved state, so it nests
/// correctly inside handlers that were entered with interrupts already
/// masked.
pub struct IsrCriticalSection {
    saved: RestoreState,
}

impl IsrCriticalSection {
    /// Mask interrupts and remember the previous mask state.
    #[inline]
    pub fn enter() -> Self {
        // SAFETY: the matching release happens in `Drop`, and guards are
        // only ever created and dropped on the same stack frame chain.
        let saved = unsafe { critical_section::acquire() };
        Self { saved }
    }

    /// Token proving that interrupts are masked while `self` is alive.
    #[inline]
    pub fn token(&self) -> CriticalSection<'_> {
        // SAFETY: the critical section stays active until `self` is dropped,
        // and the returned token cannot outlive the borrow of `self`.
        unsafe { CriticalSection::new() }
    }
}

impl Drop for IsrCriticalSection {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `saved` came from the `acquire` in `enter`.
        unsafe { critical_section::release(self.saved) }
    }
}

/// Whether the CPU is currently executing an exception or interrupt handler.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline]
pub fn in_interrupt() -> bool {
    use cortex_m::peripheral::{scb::VectActive, SCB};
    SCB::vect_active() != VectActive::ThreadMode
}

/// Whether the CPU is currently executing an exception or interrupt handler.
///
/// Hosted targets have no handler mode.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[inline]
pub fn in_interrupt() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[test]
    fn test_critical_section_returns_value() {
        let shared = critical_section::Mutex::new(Cell::new(41));
        let value = critical_section(|cs| {
            let cell = shared.borrow(cs);
            cell.set(cell.get() + 1);
            cell.get()
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn test_isr_critical_section_nests() {
        let shared = critical_section::Mutex::new(Cell::new(0u32));
        {
            let outer = IsrCriticalSection::enter();
            shared.borrow(outer.token()).set(1);
            {
                let inner = IsrCriticalSection::enter();
                shared.borrow(inner.token()).set(2);
            }
            assert_eq!(shared.borrow(outer.token()).get(), 2);
        }
        assert_eq!(critical_section(|cs| shared.borrow(cs).get()), 2);
    }

    #[test]
    fn test_host_is_never_in_interrupt() {
        assert!(!in_interrupt());
    }
}
