//! # Task Lifecycle
//!
//! Owns one execution context that calls a [`Runnable`] in a loop, and
//! guarantees that the context is torn down exactly once, without deadlock,
//! even though the runtime has no "cancel" operation.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  start_scheduler()  ┌─────────┐
//!   │ Created │ ──────────────────► │ Running │
//!   └─────────┘                     └─────────┘
//!        │                               │  run() == true,
//!        │ exit() before start           │  or exit() from the owner
//!        │                               ▼
//!        │                     ┌───────────────────┐
//!        │                     │ DeletionRequested │
//!        │                     └───────────────────┘
//!        │                               │  loop observes the flag
//!        ▼                               ▼
//!   ┌────────────────────────────────────────┐
//!   │               Terminated               │
//!   └────────────────────────────────────────┘
//! ```
//!
//! ## Teardown
//!
//! Once the scheduler runs, the owner cannot delete the context directly: it
//! might be holding a critical resource or be parked in a kernel wait. The
//! owner instead raises the deletion flag and, until the context reports
//! `Terminated`, repeatedly
//!
//! 1. resumes it (in case it is suspended),
//! 2. aborts whatever wait it is blocked in,
//! 3. sleeps for [`TEARDOWN_POLL_TICKS`] if the target does not outrank the
//!    caller, otherwise just yields.
//!
//! The context notices the flag after its current step, drops its step
//! value, publishes `Terminated` and deletes itself.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Once;

use crate::config::{
    Priority, TaskName, Ticks, DEFAULT_STACK_DEPTH, MAX_TASK_NAME_LEN, TEARDOWN_POLL_TICKS,
};
use crate::error::Error;
use crate::kernel::{Kernel, TaskEntry};
use crate::runnable::{Capabilities, Runnable};

// ---------------------------------------------------------------------------
// Task configuration
// ---------------------------------------------------------------------------

/// Creation parameters for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    /// Task name, at most [`MAX_TASK_NAME_LEN`] bytes.
    pub name: TaskName,

    /// Stack depth in the runtime's units.
    pub stack_depth: usize,

    /// Priority (higher = more important).
    pub priority: Priority,
}

impl TaskConfig {
    /// Build a configuration. Names longer than [`MAX_TASK_NAME_LEN`] bytes
    /// are truncated on a character boundary.
    pub fn new(name: &str, stack_depth: usize, priority: Priority) -> Self {
        Self {
            name: truncate_name(name),
            stack_depth,
            priority,
        }
    }

    /// Configuration with [`DEFAULT_STACK_DEPTH`].
    pub fn named(name: &str, priority: Priority) -> Self {
        Self::new(name, DEFAULT_STACK_DEPTH, priority)
    }
}

fn truncate_name(name: &str) -> TaskName {
    let mut out = TaskName::new();
    for c in name.chars() {
        if out.len() + c.len_utf8() > MAX_TASK_NAME_LEN {
            break;
        }
        // Cannot fail: capacity checked above.
        let _ = out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// Observable lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created; the scheduler has not started, so nothing has run yet.
    Created,
    /// The execution context is stepping.
    Running,
    /// Finishing: either the step function reported completion or the owner
    /// asked it to stop. No further step will start.
    DeletionRequested,
    /// The execution context stopped stepping and is gone (or going).
    Terminated,
}

/// State shared between the owner and the execution context.
struct Control<K: Kernel> {
    kernel: K,
    name: TaskName,
    /// Published by whichever side learns it first.
    handle: Once<K::TaskHandle>,
    /// Set once, by the execution context (or by a pre-scheduler teardown
    /// when no context ever ran).
    terminated: AtomicBool,
    /// Never cleared once set.
    delete_requested: AtomicBool,
}

impl<K: Kernel> Control<K> {
    #[inline]
    fn handle(&self) -> Option<K::TaskHandle> {
        self.handle.get().copied()
    }

    #[inline]
    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    #[inline]
    fn request_delete(&self) {
        self.delete_requested.store(true, Ordering::Release);
    }
}

impl<K: Kernel> Capabilities for Control<K> {
    fn suspend(&self) {
        if let Some(handle) = self.handle() {
            self.kernel.suspend_task(handle);
        }
    }

    fn resume(&self) {
        if let Some(handle) = self.handle() {
            self.kernel.resume_task(handle);
        }
    }

    fn delay(&self, ticks: Ticks) {
        self.kernel.delay(ticks);
    }

    fn abort_delay(&self) -> bool {
        self.handle()
            .is_some_and(|handle| self.kernel.abort_delay(handle))
    }

    fn priority(&self) -> Priority {
        self.handle()
            .map_or(0, |handle| self.kernel.priority(Some(handle)))
    }

    fn is_current_task(&self) -> bool {
        self.handle().is_some() && self.kernel.current_task() == self.handle()
    }

    fn deleting_in_progress(&self) -> bool {
        self.delete_requested.load(Ordering::Acquire)
    }
}

/// Body of every execution context.
fn run_task<K: Kernel, R: Runnable>(
    control: Arc<Control<K>>,
    mut runnable: R,
    handle: K::TaskHandle,
) {
    control.handle.call_once(|| handle);

    loop {
        if runnable.run(&*control) {
            control.request_delete();
            break;
        }
        if control.deleting_in_progress() {
            break;
        }
    }

    // Release the step's resources before the owner can observe termination.
    drop(runnable);
    log::debug!("task `{}` terminated", control.name);

    let kernel = control.kernel.clone();
    control.terminated.store(true, Ordering::Release);
    // Ports whose self-delete never returns would leak anything still owned
    // here.
    drop(control);
    kernel.delete_task(None);
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A managed execution context repeatedly running one step function.
///
/// Dropping a `Task` runs [`Task::exit`] and blocks until the execution
/// context has terminated.
pub struct Task<K: Kernel> {
    control: Arc<Control<K>>,
}

impl<K: Kernel> Task<K> {
    /// Create the execution context and hand it `runnable`.
    ///
    /// Stepping starts once the scheduler runs (immediately, if it already
    /// does).
    pub fn spawn<R: Runnable>(kernel: &K, config: TaskConfig, runnable: R) -> Result<Self, Error> {
        let control = Arc::new(Control {
            kernel: kernel.clone(),
            name: config.name.clone(),
            handle: Once::new(),
            terminated: AtomicBool::new(false),
            delete_requested: AtomicBool::new(false),
        });

        let shared = control.clone();
        let entry: TaskEntry<K::TaskHandle> =
            Box::new(move |handle| run_task(shared, runnable, handle));
        let handle = kernel.create_task(&config, entry)?;
        control.handle.call_once(|| handle);

        log::debug!(
            "task `{}` created (priority {}, stack {})",
            config.name,
            config.priority,
            config.stack_depth
        );
        Ok(Self { control })
    }

    /// Task name as given at creation (possibly truncated).
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Runtime handle of the execution context.
    pub fn handle(&self) -> Option<K::TaskHandle> {
        self.control.handle()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        if self.control.is_terminated() {
            TaskState::Terminated
        } else if self.control.deleting_in_progress() {
            TaskState::DeletionRequested
        } else if self.control.kernel.scheduler().is_running() {
            TaskState::Running
        } else {
            TaskState::Created
        }
    }

    /// Whether the execution context has stopped stepping.
    pub fn is_terminated(&self) -> bool {
        self.control.is_terminated()
    }

    /// Whether deletion has been requested (by the owner or by the step
    /// function finishing).
    pub fn deleting_in_progress(&self) -> bool {
        self.control.deleting_in_progress()
    }

    /// Suspend the execution context.
    pub fn suspend(&self) {
        self.control.suspend();
    }

    /// Resume the execution context if suspended.
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Block the *calling* task for `ticks`.
    pub fn delay(&self, ticks: Ticks) {
        self.control.delay(ticks);
    }

    /// Force the execution context out of its current wait.
    pub fn abort_delay(&self) -> bool {
        self.control.abort_delay()
    }

    /// Priority of the execution context.
    pub fn priority(&self) -> Priority {
        self.control.priority()
    }

    /// Whether the caller is this task's execution context.
    pub fn is_current_task(&self) -> bool {
        self.control.is_current_task()
    }

    /// Stop the execution context and wait until it has terminated.
    ///
    /// Idempotent. Called from inside the task itself it only raises the
    /// deletion flag: the loop ends after the current step.
    ///
    /// Blocks for as long as the step function neither returns nor enters an
    /// abortable kernel wait.
    pub fn exit(&self) {
        let control = &self.control;
        if control.is_terminated() {
            return;
        }
        let kernel = &control.kernel;
        let Some(handle) = control.handle() else {
            return;
        };

        if !kernel.scheduler().is_running() {
            // Nothing can be running concurrently: delete in place.
            kernel.delete_task(Some(handle));
            control.request_delete();
            control.terminated.store(true, Ordering::Release);
            log::debug!("task `{}` deleted before scheduler start", control.name);
            return;
        }

        control.request_delete();
        if control.is_current_task() {
            return;
        }

        log::debug!("tearing down task `{}`", control.name);
        let mut retries: u32 = 0;
        while !control.is_terminated() {
            kernel.resume_task(handle);
            kernel.abort_delay(handle);

            if kernel.priority(Some(handle)) <= kernel.priority(None) {
                kernel.delay(TEARDOWN_POLL_TICKS);
            } else {
                kernel.yield_now();
            }
            retries = retries.wrapping_add(1);
            log::trace!("task `{}` teardown retry {}", control.name, retries);
        }
        log::debug!("task `{}` torn down after {} retries", control.name, retries);
    }
}

impl<K: Kernel> Drop for Task<K> {
    fn drop(&mut self) {
        self.exit();
    }
}

impl<K: Kernel> fmt::Debug for Task<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.control.name)
            .field("handle", &self.control.handle())
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
