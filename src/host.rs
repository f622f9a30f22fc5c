//! # Host Runtime
//!
//! A [`Kernel`] built on `std` threads, for simulation, tests and demos.
//!
//! All kernel state lives under one mutex with one condition variable, the
//! way a single-core kernel serializes its bookkeeping. Every state change
//! wakes all waiters, which re-check their own condition.
//!
//! ## Differences from a target kernel
//!
//! - Tasks are OS threads and run in parallel. Priorities are recorded and
//!   reported but do not order execution.
//! - A created task parks at a start gate until the scheduler starts.
//!   [`Kernel::launch_scheduler`] opens the gate and returns.
//! - Suspending another task takes effect at that task's next kernel wait.
//! - Deleting another task after the scheduler started only removes its
//!   kernel record; the thread is not stopped. Self-deletion takes effect
//!   when the entry function returns.
//! - One tick is one millisecond.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{Priority, TaskName, Ticks, EXTERNAL_PRIORITY, MAX_DELAY, TICK_HZ};
use crate::error::Error;
use crate::kernel::{CountingSemaphore, Kernel, SchedulerState, TaskEntry};
use crate::task::TaskConfig;

/// Task ids are unique across every host kernel in the process, so the
/// thread-local identity below can never be mistaken for another kernel's
/// task.
static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static CURRENT: Cell<Option<HostTask>> = const { Cell::new(None) };
}

/// Handle to a task of a [`HostKernel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostTask(u32);

struct TaskRecord {
    name: TaskName,
    priority: Priority,
    suspended: bool,
    /// Inside a `take`/`delay` wait.
    blocked: bool,
    /// Set by `abort_delay`, consumed by the wait it aborted.
    aborted: bool,
}

struct SemaphoreRecord {
    count: usize,
    max: usize,
}

#[derive(Default)]
struct State {
    tasks: HashMap<HostTask, TaskRecord>,
    semaphores: HashMap<usize, SemaphoreRecord>,
    next_semaphore: usize,
}

struct Inner {
    state: Mutex<State>,
    wake: Condvar,
    scheduler: SchedulerState,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.wake.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout<'a>(&self, guard: MutexGuard<'a, State>, dur: Duration) -> MutexGuard<'a, State> {
        self.wake
            .wait_timeout(guard, dur)
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    /// The calling thread's task, if it is one of ours.
    fn current(&self, state: &State) -> Option<HostTask> {
        CURRENT
            .get()
            .filter(|task| state.tasks.contains_key(task))
    }

    fn park_while_suspended<'a>(
        &self,
        mut state: MutexGuard<'a, State>,
        me: Option<HostTask>,
    ) -> MutexGuard<'a, State> {
        while let Some(task) = me {
            match state.tasks.get(&task) {
                Some(record) if record.suspended => state = self.wait(state),
                _ => break,
            }
        }
        state
    }

    /// Block until `ready` succeeds, the timeout expires, or the wait is
    /// aborted. `ready` runs under the kernel lock.
    fn wait_for<F>(&self, timeout: Ticks, mut ready: F) -> bool
    where
        F: FnMut(&mut State) -> bool,
    {
        let deadline = (timeout != MAX_DELAY).then(|| Instant::now() + ticks_to_duration(timeout));
        let mut state = self.lock();
        let me = self.current(&state);

        let acquired = loop {
            state = self.park_while_suspended(state, me);

            let record = me.and_then(|task| state.tasks.get(&task));
            if record.is_some_and(|record| record.aborted) {
                break false;
            }
            if ready(&mut state) {
                break true;
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            if let Some(record) = me.and_then(|task| state.tasks.get_mut(&task)) {
                record.blocked = true;
            }
            state = match remaining {
                Some(remaining) => self.wait_timeout(state, remaining),
                None => self.wait(state),
            };
        };

        if let Some(record) = me.and_then(|task| state.tasks.get_mut(&task)) {
            record.blocked = false;
            record.aborted = false;
        }
        acquired
    }

    fn remove_task(&self, task: HostTask) {
        let mut state = self.lock();
        if let Some(record) = state.tasks.remove(&task) {
            log::debug!("host: task `{}` deleted", record.name);
        }
        drop(state);
        self.wake.notify_all();
    }
}

fn ticks_to_duration(ticks: Ticks) -> Duration {
    Duration::from_micros(u64::from(ticks) * 1_000_000 / u64::from(TICK_HZ))
}

/// Thread-backed kernel. Clones share the same kernel.
#[derive(Clone)]
pub struct HostKernel {
    inner: Arc<Inner>,
}

impl HostKernel {
    /// A new kernel with a stopped scheduler and no objects.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                wake: Condvar::new(),
                scheduler: SchedulerState::new(),
            }),
        }
    }

    /// Number of tasks that have not been deleted.
    pub fn task_count(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Number of live semaphores.
    pub fn semaphore_count(&self) -> usize {
        self.inner.lock().semaphores.len()
    }

    /// Whether `task` is currently parked in a `take` or `delay`.
    pub fn is_blocked(&self, task: HostTask) -> bool {
        self.inner
            .lock()
            .tasks
            .get(&task)
            .is_some_and(|record| record.blocked)
    }

    /// Whether `task` is currently suspended.
    pub fn is_suspended(&self, task: HostTask) -> bool {
        self.inner
            .lock()
            .tasks
            .get(&task)
            .is_some_and(|record| record.suspended)
    }
}

impl Default for HostKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("HostKernel")
            .field("running", &self.inner.scheduler.is_running())
            .field("tasks", &state.tasks.len())
            .field("semaphores", &state.semaphores.len())
            .finish()
    }
}

impl Kernel for HostKernel {
    type Semaphore = HostSemaphore;
    type TaskHandle = HostTask;

    fn create_semaphore(&self, max: usize, initial: usize) -> HostSemaphore {
        let mut state = self.inner.lock();
        let id = state.next_semaphore;
        state.next_semaphore += 1;
        state.semaphores.insert(
            id,
            SemaphoreRecord {
                count: initial.min(max),
                max,
            },
        );
        HostSemaphore {
            inner: self.inner.clone(),
            id,
        }
    }

    fn create_task(&self, config: &TaskConfig, entry: TaskEntry<HostTask>) -> Result<HostTask, Error> {
        let task = HostTask(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed));
        self.inner.lock().tasks.insert(
            task,
            TaskRecord {
                name: config.name.clone(),
                priority: config.priority,
                suspended: false,
                blocked: false,
                aborted: false,
            },
        );

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(config.name.to_string())
            .spawn(move || {
                CURRENT.set(Some(task));
                {
                    let mut state = inner.lock();
                    loop {
                        if !state.tasks.contains_key(&task) {
                            // Deleted before the scheduler started.
                            return;
                        }
                        if inner.scheduler.is_running() {
                            break;
                        }
                        state = inner.wait(state);
                    }
                }
                entry(task);
                inner.remove_task(task);
            });

        match spawned {
            Ok(_) => Ok(task),
            Err(err) => {
                log::warn!("host: cannot spawn thread for `{}`: {}", config.name, err);
                self.inner.lock().tasks.remove(&task);
                Err(Error::TaskCreate {
                    name: config.name.clone(),
                })
            }
        }
    }

    fn delete_task(&self, task: Option<HostTask>) {
        let target = task.or_else(|| CURRENT.get());
        if let Some(target) = target {
            self.inner.remove_task(target);
        }
    }

    fn suspend_task(&self, task: HostTask) {
        let mut state = self.inner.lock();
        let Some(record) = state.tasks.get_mut(&task) else {
            return;
        };
        record.suspended = true;
        if CURRENT.get() == Some(task) {
            drop(self.inner.park_while_suspended(state, Some(task)));
        }
    }

    fn resume_task(&self, task: HostTask) {
        let mut state = self.inner.lock();
        if let Some(record) = state.tasks.get_mut(&task) {
            record.suspended = false;
        }
        drop(state);
        self.inner.wake.notify_all();
    }

    fn delay(&self, ticks: Ticks) {
        if ticks == 0 {
            thread::yield_now();
            return;
        }
        self.inner.wait_for(ticks, |_| false);
    }

    fn abort_delay(&self, task: HostTask) -> bool {
        let mut state = self.inner.lock();
        let aborted = match state.tasks.get_mut(&task) {
            Some(record) if record.blocked => {
                record.aborted = true;
                true
            }
            _ => false,
        };
        drop(state);
        if aborted {
            self.inner.wake.notify_all();
        }
        aborted
    }

    fn priority(&self, task: Option<HostTask>) -> Priority {
        let state = self.inner.lock();
        let task = task.or_else(|| self.inner.current(&state));
        task.and_then(|task| state.tasks.get(&task))
            .map_or(EXTERNAL_PRIORITY, |record| record.priority)
    }

    fn current_task(&self) -> Option<HostTask> {
        let state = self.inner.lock();
        self.inner.current(&state)
    }

    fn yield_now(&self) {
        thread::yield_now();
    }

    fn scheduler(&self) -> &SchedulerState {
        &self.inner.scheduler
    }

    fn launch_scheduler(&self) {
        // Taken so that no gate can miss the wakeup between its check and
        // its wait.
        let state = self.inner.lock();
        drop(state);
        self.inner.wake.notify_all();
    }
}

/// Counting semaphore of a [`HostKernel`].
pub struct HostSemaphore {
    inner: Arc<Inner>,
    id: usize,
}

impl HostSemaphore {
    fn try_take(state: &mut State, id: usize) -> bool {
        match state.semaphores.get_mut(&id) {
            Some(sem) if sem.count > 0 => {
                sem.count -= 1;
                true
            }
            _ => false,
        }
    }
}

impl CountingSemaphore for HostSemaphore {
    fn take(&self, timeout: Ticks) -> bool {
        let id = self.id;
        self.inner.wait_for(timeout, |state| Self::try_take(state, id))
    }

    fn take_from_isr(&self) -> bool {
        Self::try_take(&mut self.inner.lock(), self.id)
    }

    fn give(&self) -> bool {
        let mut state = self.inner.lock();
        let given = match state.semaphores.get_mut(&self.id) {
            Some(sem) if sem.count < sem.max => {
                sem.count += 1;
                true
            }
            _ => false,
        };
        drop(state);
        if given {
            self.inner.wake.notify_all();
        }
        given
    }

    fn give_from_isr(&self) -> bool {
        self.give()
    }

    fn count(&self) -> usize {
        self.inner
            .lock()
            .semaphores
            .get(&self.id)
            .map_or(0, |sem| sem.count)
    }
}

impl Drop for HostSemaphore {
    fn drop(&mut self) {
        self.inner.lock().semaphores.remove(&self.id);
        self.inner.wake.notify_all();
    }
}

impl fmt::Debug for HostSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSemaphore")
            .field("id", &self.id)
            .field("count", &self.count())
            .finish()
    }
}
