//! # Pipeline Demo
//!
//! Runs on the host runtime. Three tasks share one queue:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `producer` | 2 | Pushes 0..20 with blocking backpressure, then reports done |
//! | `consumer` | 3 | Pops forever; only stops when torn down |
//! | `ticker` | 1 | Simulates an interrupt source using `push_from_isr` |
//!
//! The producer finishes on its own. The consumer is parked in an
//! indefinite `pop` when `main` drops it, which exercises the abort path of
//! the teardown protocol.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use kobj::config::{ms_to_ticks, MAX_DELAY};
use kobj::host::HostKernel;
use kobj::{Capabilities, Kernel, Queue, Runnable, Task, TaskConfig};

type Pipe = Queue<HostKernel, u32, 4>;

/// Pushes a fixed range, blocking while the queue is full.
struct Producer {
    queue: Arc<Pipe>,
    next: u32,
    end: u32,
}

impl Runnable for Producer {
    fn run(&mut self, _task: &dyn Capabilities) -> bool {
        if self.queue.push(self.next, MAX_DELAY).is_ok() {
            self.next += 1;
        }
        self.next == self.end
    }
}

/// Emits a marker value every few ticks, never blocking.
struct Ticker {
    queue: Arc<Pipe>,
    dropped: Arc<AtomicU32>,
}

impl Runnable for Ticker {
    fn run(&mut self, task: &dyn Capabilities) -> bool {
        if self.queue.push_from_isr(1000).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        task.delay(ms_to_ticks(5));
        false
    }
}

fn main() -> Result<(), kobj::Error> {
    let kernel = HostKernel::new();
    let queue: Arc<Pipe> = Arc::new(Queue::new(&kernel));
    let total = Arc::new(AtomicU32::new(0));
    let dropped = Arc::new(AtomicU32::new(0));

    let producer = Task::spawn(
        &kernel,
        TaskConfig::named("producer", 2),
        Producer {
            queue: queue.clone(),
            next: 0,
            end: 20,
        },
    )?;

    let consumer = {
        let queue = queue.clone();
        let total = total.clone();
        Task::spawn(&kernel, TaskConfig::named("consumer", 3), move || {
            if let Some(n) = queue.pop(MAX_DELAY) {
                total.fetch_add(n, Ordering::Relaxed);
            }
            false
        })?
    };

    let ticker = Task::spawn(
        &kernel,
        TaskConfig::named("ticker", 1),
        Ticker {
            queue: queue.clone(),
            dropped: dropped.clone(),
        },
    )?;

    kernel.start_scheduler();

    while !producer.is_terminated() {
        kernel.delay(ms_to_ticks(1));
    }
    println!("producer finished: {:?}", producer.state());

    drop(ticker);
    // Let the consumer drain what is left before stopping it.
    while !queue.is_empty() {
        kernel.delay(ms_to_ticks(1));
    }
    drop(consumer);

    println!(
        "consumed total = {} (ticker drops = {}), queue: {} waiting / {} free",
        total.load(Ordering::Relaxed),
        dropped.load(Ordering::Relaxed),
        queue.items_waiting(),
        queue.spaces_available(),
    );
    println!("{kernel:?}");
    Ok(())
}
