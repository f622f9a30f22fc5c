//! # Kernel
//!
//! The runtime contract consumed by the queue and the task lifecycle.
//!
//! kobj does not schedule anything itself. A port implements [`Kernel`] on
//! top of the target RTOS (or, for host builds, on top of `std` threads; see
//! [`crate::host`]) and the kernel objects only ever talk to it through this
//! trait and through [`crate::sync`] for critical sections.
//!
//! ## Scheduler Lifecycle
//!
//! ```text
//! main()
//!   ├─► Queue::new(&kernel)      ← permits created, no concurrency yet
//!   ├─► Task::spawn(&kernel, ..) ← execution context created, not running
//!   └─► kernel.start_scheduler() ← SchedulerState: Stopped ─► Running
//!                                   (write-once, never reset)
//! ```
//!
//! Before the transition, deleting a task is synchronous because nothing can
//! run concurrently. After it, the lifecycle falls back to the cooperative
//! teardown protocol.

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{Priority, Ticks};
use crate::error::Error;
use crate::task::TaskConfig;

/// Entry point handed to [`Kernel::create_task`]. Receives the handle of the
/// execution context it runs in.
pub type TaskEntry<H> = Box<dyn FnOnce(H) + Send + 'static>;

/// A bounded counting semaphore ("permit" object).
///
/// Dropping the value deletes the underlying runtime object.
pub trait CountingSemaphore: Send + Sync {
    /// Acquire one permit, blocking the calling task for up to `timeout`
    /// ticks. `0` polls, [`MAX_DELAY`](crate::config::MAX_DELAY) waits
    /// forever. Returns `false` on timeout or when the wait was aborted.
    fn take(&self, timeout: Ticks) -> bool;

    /// Acquire one permit without blocking. Safe to call from interrupt
    /// context.
    fn take_from_isr(&self) -> bool;

    /// Release one permit. Returns `false` if the count is already at its
    /// maximum.
    fn give(&self) -> bool;

    /// Release one permit from interrupt context.
    fn give_from_isr(&self) -> bool;

    /// Current permit count. A snapshot only.
    fn count(&self) -> usize;
}

/// Operations a runtime must provide to host kernel objects.
///
/// Handles passed back into a kernel must have been produced by that same
/// kernel.
pub trait Kernel: Clone + Send + Sync + 'static {
    /// Counting semaphore type of this runtime.
    type Semaphore: CountingSemaphore;

    /// Opaque handle to one execution context.
    type TaskHandle: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// Create a counting semaphore holding `initial` of at most `max` permits.
    fn create_semaphore(&self, max: usize, initial: usize) -> Self::Semaphore;

    /// Create an execution context that runs `entry` once the scheduler is
    /// running.
    fn create_task(
        &self,
        config: &TaskConfig,
        entry: TaskEntry<Self::TaskHandle>,
    ) -> Result<Self::TaskHandle, Error>;

    /// Delete a task. `None` deletes the calling task.
    fn delete_task(&self, task: Option<Self::TaskHandle>);

    /// Take a task out of scheduling until [`Kernel::resume_task`].
    fn suspend_task(&self, task: Self::TaskHandle);

    /// Make a suspended task schedulable again. No effect otherwise.
    fn resume_task(&self, task: Self::TaskHandle);

    /// Block the calling task for `ticks`.
    fn delay(&self, ticks: Ticks);

    /// Force a task out of any timed or indefinite wait. Returns `false` when
    /// the task was not blocked.
    fn abort_delay(&self, task: Self::TaskHandle) -> bool;

    /// Priority of `task`, or of the caller for `None`.
    fn priority(&self, task: Option<Self::TaskHandle>) -> Priority;

    /// Handle of the calling task, `None` outside of any task.
    fn current_task(&self) -> Option<Self::TaskHandle>;

    /// Offer the CPU to other ready tasks.
    fn yield_now(&self) {
        self.delay(0);
    }

    /// Scheduler state shared by every object created on this kernel.
    fn scheduler(&self) -> &SchedulerState;

    /// Hand control to the runtime's scheduler. Target ports do not return
    /// from this; the host port returns immediately.
    fn launch_scheduler(&self);

    /// Start the scheduler exactly once.
    ///
    /// Marks [`SchedulerState`] as running before launching, because on
    /// target ports the launch never returns. Returns `false` if the
    /// scheduler was already started.
    fn start_scheduler(&self) -> bool {
        if !self.scheduler().mark_running() {
            return false;
        }
        log::debug!("scheduler started");
        self.launch_scheduler();
        true
    }
}

/// Process-wide "scheduler started" state.
///
/// One instance belongs to each runtime (a `static` on target ports, one per
/// [`HostKernel`](crate::host::HostKernel) on the host). It starts in the
/// stopped state, moves to running exactly once, and is never reset.
#[derive(Debug)]
pub struct SchedulerState {
    running: AtomicBool,
}

impl SchedulerState {
    /// A scheduler that has not been started.
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    /// Whether the scheduler has been started.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Move to the running state. Returns `true` only for the call that
    /// performed the transition.
    pub fn mark_running(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostKernel;

    #[test]
    fn test_scheduler_state_transitions_once() {
        let state = SchedulerState::new();
        assert!(!state.is_running());
        assert!(state.mark_running());
        assert!(state.is_running());
        assert!(!state.mark_running());
        assert!(state.is_running());
    }

    #[test]
    fn test_start_scheduler_is_once_only() {
        let kernel = HostKernel::new();
        assert!(!kernel.scheduler().is_running());
        assert!(kernel.start_scheduler());
        assert!(!kernel.start_scheduler());
        assert!(kernel.scheduler().is_running());
    }
}
