//! # kobj — Kernel Objects for Preemptive RTOS Kernels
//!
//! Two primitives for priority-scheduled embedded runtimes:
//!
//! - [`Queue`]: a bounded FIFO usable from tasks and interrupt handlers,
//!   with blocking backpressure and O(1) critical sections.
//! - [`Task`]: a managed execution context that repeatedly runs a step
//!   function and is torn down exactly once, race-free, even though the
//!   runtime offers no "cancel" operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  Application Code                      │
//! ├───────────────────────────┬────────────────────────────┤
//! │  Bounded Queue            │  Task Lifecycle            │
//! │  queue.rs                 │  task.rs                   │
//! │  ─ push / push_from_isr   │  ─ spawn()                 │
//! │  ─ pop                    │  ─ exit() / Drop           │
//! │  ─ items_waiting()        │  ─ state()                 │
//! ├───────────────────────────┴────────────────────────────┤
//! │  Capability Contract (runnable.rs)                     │
//! │    Runnable · Capabilities · Detached                  │
//! ├──────────────────────────────┬─────────────────────────┤
//! │  Runtime Contract            │  Critical Sections      │
//! │  kernel.rs                   │  sync.rs                │
//! │  ─ Kernel · CountingSemaphore│  ─ critical_section()   │
//! │  ─ SchedulerState            │  ─ IsrCriticalSection   │
//! ├──────────────────────────────┴─────────────────────────┤
//! │  Runtime port: target RTOS, or host.rs (std threads)   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! # #[cfg(feature = "std")] {
//! use std::sync::Arc;
//! use kobj::config::MAX_DELAY;
//! use kobj::host::HostKernel;
//! use kobj::{Kernel, Queue, Task, TaskConfig};
//!
//! let kernel = HostKernel::new();
//! let queue: Arc<Queue<_, u32, 4>> = Arc::new(Queue::new(&kernel));
//!
//! let consumer = {
//!     let queue = queue.clone();
//!     Task::spawn(&kernel, TaskConfig::named("consumer", 2), move || {
//!         if let Some(n) = queue.pop(MAX_DELAY) {
//!             println!("got {n}");
//!         }
//!         false
//!     })
//!     .unwrap()
//! };
//!
//! kernel.start_scheduler();
//! queue.push(1, MAX_DELAY).unwrap();
//! drop(consumer); // aborts the pending pop and waits for termination
//! # }
//! ```
//!
//! ## Memory Model
//!
//! - Queue storage is inline (`[T; N]`); no allocation per item
//! - One `Arc` per task for the state shared with its execution context
//! - Critical sections go through the `critical-section` crate, backed by
//!   `cortex-m` on Cortex-M targets and by `std` on the host

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod kernel;
pub mod queue;
pub mod runnable;
pub mod sync;
pub mod task;

#[cfg(any(test, feature = "std"))]
pub mod host;

pub use error::Error;
pub use kernel::{CountingSemaphore, Kernel, SchedulerState};
pub use queue::Queue;
pub use runnable::{Capabilities, Detached, Runnable};
pub use task::{Task, TaskConfig, TaskState};
