//! # Capability Contract
//!
//! What a unit of work may ask of the execution context it runs in, and how
//! the unit of work itself is invoked.
//!
//! Kernels differ in which task operations they compile in. Every
//! capability therefore has a safe default, so a step function written
//! against [`Capabilities`] runs unchanged on a partial configuration or
//! outside of any task ([`Detached`]).

use crate::config::{Priority, Ticks};

/// Task operations visible to a running step function.
pub trait Capabilities {
    /// Suspend the task until resumed.
    fn suspend(&self) {}

    /// Resume the task if it is suspended.
    fn resume(&self) {}

    /// Block the calling task for `ticks`.
    fn delay(&self, _ticks: Ticks) {}

    /// Force the task out of a blocked wait.
    fn abort_delay(&self) -> bool {
        false
    }

    /// Priority of the task.
    fn priority(&self) -> Priority {
        0
    }

    /// Whether the caller is running inside this task.
    fn is_current_task(&self) -> bool {
        false
    }

    /// Whether the owner has asked the task to finish.
    ///
    /// Defaults to `true`: a step function with no task behind it has no
    /// reason to keep going.
    fn deleting_in_progress(&self) -> bool {
        true
    }
}

/// Capabilities of a step function that is not attached to any task.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl Capabilities for Detached {}

/// A repeating unit of work.
///
/// The task lifecycle calls [`Runnable::run`] in a loop until it returns
/// `true` ("done") or until the owner requests deletion. Long waits inside
/// `run` should go through kernel primitives (queue waits, delays) so that
/// teardown can abort them.
///
/// Any `FnMut() -> bool` closure is a `Runnable`:
///
/// ```
/// use kobj::runnable::{Detached, Runnable};
///
/// let mut left = 3;
/// let mut step = move || {
///     left -= 1;
///     left == 0
/// };
/// assert!(!step.run(&Detached));
/// assert!(!step.run(&Detached));
/// assert!(step.run(&Detached));
/// ```
pub trait Runnable: Send + 'static {
    /// Perform one step. Return `true` when the work is complete.
    fn run(&mut self, task: &dyn Capabilities) -> bool;
}

impl<F> Runnable for F
where
    F: FnMut() -> bool + Send + 'static,
{
    #[inline]
    fn run(&mut self, _task: &dyn Capabilities) -> bool {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountDown {
        left: u32,
        saw_deletion: bool,
    }

    impl Runnable for CountDown {
        fn run(&mut self, task: &dyn Capabilities) -> bool {
            self.saw_deletion = task.deleting_in_progress();
            self.left = self.left.saturating_sub(1);
            self.left == 0
        }
    }

    #[test]
    fn test_detached_defaults() {
        let caps = Detached;
        caps.suspend();
        caps.resume();
        caps.delay(100);
        assert!(!caps.abort_delay());
        assert_eq!(caps.priority(), 0);
        assert!(!caps.is_current_task());
        assert!(caps.deleting_in_progress());
    }

    #[test]
    fn test_struct_runnable_sees_capabilities() {
        let mut step = CountDown {
            left: 2,
            saw_deletion: false,
        };
        assert!(!step.run(&Detached));
        assert!(step.saw_deletion);
        assert!(step.run(&Detached));
    }

    #[test]
    fn test_closure_and_struct_are_interchangeable() {
        fn drive(step: &mut dyn Runnable) -> u32 {
            let mut calls = 1;
            while !step.run(&Detached) {
                calls += 1;
            }
            calls
        }

        let mut n = 0;
        let mut closure = move || {
            n += 1;
            n == 4
        };
        let mut countdown = CountDown {
            left: 4,
            saw_deletion: false,
        };
        assert_eq!(drive(&mut closure), 4);
        assert_eq!(drive(&mut countdown), 4);
    }
}
