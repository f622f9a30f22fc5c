//! # Bounded Queue
//!
//! Fixed-capacity FIFO shared by any number of producers and consumers in
//! task and interrupt context.
//!
//! ## Synchronization
//!
//! Two counting semaphores guard a ring of `N` slots:
//!
//! ```text
//!   push                                          pop
//!   ────                                          ───
//!   spaces.take(timeout)  ◄── may block ──►       items.take(timeout)
//!   ┌ critical section ┐                          ┌ critical section ┐
//!   │ slots[in] = item │                          │ item = slots[out]│
//!   │ in = (in+1) % N  │                          │ out = (out+1) % N│
//!   └──────────────────┘                          └──────────────────┘
//!   items.give()                                  spaces.give()
//! ```
//!
//! Holding a permit reserves a slot (or an item) before the critical section
//! is entered, so the critical section is O(1) and never contains a wait,
//! however long the caller blocked for capacity.
//!
//! With no operation in flight, `items_waiting() + spaces_available() == N`.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

use crate::config::Ticks;
use crate::kernel::{CountingSemaphore, Kernel};
use crate::sync::{self, IsrCriticalSection};

/// Ring storage and cursors. Only touched inside a critical section.
struct Ring<T, const N: usize> {
    slots: [T; N],
    /// Write cursor.
    head: usize,
    /// Read cursor.
    tail: usize,
}

impl<T: Default, const N: usize> Ring<T, N> {
    fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| T::default()),
            head: 0,
            tail: 0,
        }
    }

    /// Store into the write slot. Caller holds a free-slot permit.
    #[inline]
    fn write(&mut self, item: T) {
        self.slots[self.head] = item;
        self.head = (self.head + 1) % N;
    }

    /// Move out of the read slot, leaving `T::default()` behind so owned
    /// resources are released now rather than on the next overwrite. Caller
    /// holds an item permit.
    #[inline]
    fn read(&mut self) -> T {
        let item = core::mem::take(&mut self.slots[self.tail]);
        self.tail = (self.tail + 1) % N;
        item
    }
}

/// Bounded multi-producer, multi-consumer queue of `N` items.
///
/// The queue owns its storage and both semaphores; it is neither `Clone` nor
/// `Copy`. Share it by reference (e.g. a `static` or an `Arc`). Dropping it
/// while another context still uses it is impossible in safe code.
pub struct Queue<K: Kernel, T, const N: usize> {
    /// Free-slot permits, initially `N`.
    spaces: K::Semaphore,
    /// Available-item permits, initially `0`.
    items: K::Semaphore,
    ring: Mutex<RefCell<Ring<T, N>>>,
}

impl<K: Kernel, T: Default, const N: usize> Queue<K, T, N> {
    const NONZERO_CAPACITY: () = assert!(N > 0, "queue capacity must be non-zero");

    /// Create an empty queue whose permits live on `kernel`.
    pub fn new(kernel: &K) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NONZERO_CAPACITY;
        Self {
            spaces: kernel.create_semaphore(N, N),
            items: kernel.create_semaphore(N, 0),
            ring: Mutex::new(RefCell::new(Ring::new())),
        }
    }

    /// Append `item`, waiting up to `timeout` ticks for a free slot.
    ///
    /// Returns the item back if no slot became free in time. `timeout == 0`
    /// never blocks.
    pub fn push(&self, item: T, timeout: Ticks) -> Result<(), T> {
        debug_assert!(
            timeout == 0 || !sync::in_interrupt(),
            "blocking push from interrupt context; use push_from_isr"
        );
        if !self.spaces.take(timeout) {
            return Err(item);
        }
        sync::critical_section(|cs| self.store(cs, item));
        self.items.give();
        Ok(())
    }

    /// Append a clone of `item`, waiting up to `timeout` ticks for a free
    /// slot. The clone is only made once a slot is reserved.
    pub fn push_cloned(&self, item: &T, timeout: Ticks) -> bool
    where
        T: Clone,
    {
        debug_assert!(
            timeout == 0 || !sync::in_interrupt(),
            "blocking push from interrupt context; use push_cloned_from_isr"
        );
        if !self.spaces.take(timeout) {
            return false;
        }
        sync::critical_section(|cs| self.store(cs, item.clone()));
        self.items.give();
        true
    }

    /// Append `item` from interrupt context. Never blocks.
    pub fn push_from_isr(&self, item: T) -> Result<(), T> {
        if !self.spaces.take_from_isr() {
            return Err(item);
        }
        {
            let guard = IsrCriticalSection::enter();
            self.store(guard.token(), item);
        }
        self.items.give_from_isr();
        Ok(())
    }

    /// Append a clone of `item` from interrupt context. Never blocks.
    pub fn push_cloned_from_isr(&self, item: &T) -> bool
    where
        T: Clone,
    {
        if !self.spaces.take_from_isr() {
            return false;
        }
        {
            let guard = IsrCriticalSection::enter();
            self.store(guard.token(), item.clone());
        }
        self.items.give_from_isr();
        true
    }

    /// Remove the oldest item, waiting up to `timeout` ticks for one to
    /// arrive.
    ///
    /// Returns `None` on timeout, or when the wait was aborted by the
    /// runtime (see [`Kernel::abort_delay`]).
    pub fn pop(&self, timeout: Ticks) -> Option<T> {
        debug_assert!(
            timeout == 0 || !sync::in_interrupt(),
            "blocking pop from interrupt context"
        );
        if !self.items.take(timeout) {
            return None;
        }
        let item = sync::critical_section(|cs| self.ring.borrow_ref_mut(cs).read());
        self.spaces.give();
        Some(item)
    }

    /// Like [`Queue::pop`], but writes into `item`. Returns `false` and
    /// leaves `item` untouched if nothing was received.
    pub fn pop_into(&self, item: &mut T, timeout: Ticks) -> bool {
        match self.pop(timeout) {
            Some(received) => {
                *item = received;
                true
            }
            None => false,
        }
    }

    #[inline]
    fn store(&self, cs: CriticalSection<'_>, item: T) {
        self.ring.borrow_ref_mut(cs).write(item);
    }
}

impl<K: Kernel, T, const N: usize> Queue<K, T, N> {
    /// Number of items that can be popped right now.
    ///
    /// Diagnostic only: the value may be stale by the time the caller acts
    /// on it, so flow control must go through `push`/`pop` timeouts.
    pub fn items_waiting(&self) -> usize {
        self.items.count()
    }

    /// Number of free slots right now. Same caveat as
    /// [`Queue::items_waiting`].
    pub fn spaces_available(&self) -> usize {
        self.spaces.count()
    }

    /// Fixed capacity `N`.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Snapshot: no items waiting.
    pub fn is_empty(&self) -> bool {
        self.items_waiting() == 0
    }

    /// Snapshot: no free slots.
    pub fn is_full(&self) -> bool {
        self.spaces_available() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_DELAY;
    use crate::host::HostKernel;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn cursors<K: Kernel, T, const N: usize>(queue: &Queue<K, T, N>) -> (usize, usize) {
        sync::critical_section(|cs| {
            let ring = queue.ring.borrow_ref(cs);
            (ring.head, ring.tail)
        })
    }

    #[test]
    fn test_capacity_four_scenario() {
        let kernel = HostKernel::new();
        let queue: Queue<_, char, 4> = Queue::new(&kernel);

        for c in ['A', 'B', 'C', 'D'] {
            assert!(queue.push(c, 0).is_ok());
        }
        assert_eq!(queue.push('E', 0), Err('E'));
        assert_eq!(queue.pop(0), Some('A'));
        assert!(queue.push('E', 0).is_ok());

        let rest: Vec<char> = core::iter::from_fn(|| queue.pop(0)).collect();
        assert_eq!(rest, ['B', 'C', 'D', 'E']);
    }

    #[test]
    fn test_empty_pop_fails_immediately() {
        let kernel = HostKernel::new();
        let queue: Queue<_, u32, 2> = Queue::new(&kernel);

        let start = Instant::now();
        assert_eq!(queue.pop(0), None);
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_push_times_out() {
        let kernel = HostKernel::new();
        let queue: Queue<_, u32, 1> = Queue::new(&kernel);
        assert!(queue.push(1, 0).is_ok());
        assert!(queue.is_full());

        let start = Instant::now();
        assert_eq!(queue.push(2, 20), Err(2));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_counts_sum_to_capacity() {
        let kernel = HostKernel::new();
        let queue: Queue<_, u8, 3> = Queue::new(&kernel);
        let ops: [bool; 9] = [true, true, false, true, true, false, false, true, false];

        for (i, push) in ops.iter().enumerate() {
            if *push {
                let _ = queue.push(i as u8, 0);
            } else {
                let _ = queue.pop(0);
            }
            assert_eq!(queue.items_waiting() + queue.spaces_available(), 3);
        }
    }

    #[test]
    fn test_cursors_wrap_after_full_cycle() {
        let kernel = HostKernel::new();
        let queue: Queue<_, u16, 5> = Queue::new(&kernel);

        for round in 0..3u16 {
            for i in 0..5 {
                assert!(queue.push(round * 10 + i, 0).is_ok());
            }
            for i in 0..5 {
                assert_eq!(queue.pop(0), Some(round * 10 + i));
            }
            assert_eq!(cursors(&queue), (0, 0));
        }
    }

    #[test]
    fn test_pop_resets_slot_to_default() {
        let kernel = HostKernel::new();
        let queue: Queue<_, Option<Arc<u32>>, 2> = Queue::new(&kernel);
        let payload = Arc::new(7);

        assert!(queue.push(Some(payload.clone()), 0).is_ok());
        assert_eq!(Arc::strong_count(&payload), 2);
        let popped = queue.pop(0).flatten();
        drop(popped);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_push_cloned_and_pop_into() {
        let kernel = HostKernel::new();
        let queue: Queue<_, String, 2> = Queue::new(&kernel);
        let msg = String::from("ping");

        assert!(queue.push_cloned(&msg, 0));
        assert!(queue.push_cloned(&msg, 0));
        assert!(!queue.push_cloned(&msg, 0));

        let mut out = String::new();
        assert!(queue.pop_into(&mut out, 0));
        assert_eq!(out, "ping");
        assert!(queue.pop_into(&mut out, 0));
        assert!(!queue.pop_into(&mut out, 0));
        assert_eq!(out, "ping");
    }

    #[test]
    fn test_isr_variants_never_block() {
        let kernel = HostKernel::new();
        let queue: Queue<_, u32, 2> = Queue::new(&kernel);

        assert!(queue.push_from_isr(1).is_ok());
        assert!(queue.push_cloned_from_isr(&2));
        assert_eq!(queue.push_from_isr(3), Err(3));
        assert!(!queue.push_cloned_from_isr(&4));
        assert_eq!(queue.pop(0), Some(1));
        assert_eq!(queue.pop(0), Some(2));
    }

    #[test]
    fn test_blocked_pop_wakes_on_push() {
        let kernel = HostKernel::new();
        let queue: Arc<Queue<_, u32, 1>> = Arc::new(Queue::new(&kernel));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop(MAX_DELAY))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(queue.push(99, 0).is_ok());
        assert_eq!(consumer.join().unwrap(), Some(99));
    }

    #[test]
    fn test_blocked_push_wakes_on_pop() {
        let kernel = HostKernel::new();
        let queue: Arc<Queue<_, u32, 1>> = Arc::new(Queue::new(&kernel));
        assert!(queue.push(1, 0).is_ok());

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2, MAX_DELAY))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.pop(0), Some(1));
        assert!(producer.join().unwrap().is_ok());
        assert_eq!(queue.pop(0), Some(2));
    }

    #[test]
    fn test_spsc_preserves_order() {
        const COUNT: u32 = 500;
        let kernel = HostKernel::new();
        let queue: Arc<Queue<_, u32, 8>> = Arc::new(Queue::new(&kernel));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..COUNT {
                    assert!(queue.push(i, MAX_DELAY).is_ok());
                }
            })
        };
        for expected in 0..COUNT {
            assert_eq!(queue.pop(MAX_DELAY), Some(expected));
        }
        producer.join().unwrap();
        assert_eq!(queue.items_waiting(), 0);
        assert_eq!(queue.spaces_available(), 8);
    }

    #[test]
    fn test_mpmc_delivers_every_item_once() {
        const PER_PRODUCER: u32 = 200;
        let kernel = HostKernel::new();
        let queue: Arc<Queue<_, u32, 4>> = Arc::new(Queue::new(&kernel));

        let producers: Vec<_> = (0..3u32)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        assert!(queue.push(p * PER_PRODUCER + i, MAX_DELAY).is_ok());
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(v) = queue.pop(100) {
                        got.push(v);
                    }
                    got
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..3 * PER_PRODUCER).collect::<Vec<_>>());
        assert_eq!(queue.items_waiting() + queue.spaces_available(), 4);
    }

    #[test]
    fn test_drop_before_scheduler_start_releases_permits() {
        let kernel = HostKernel::new();
        {
            let queue: Queue<_, u32, 3> = Queue::new(&kernel);
            assert!(queue.push(5, 0).is_ok());
            assert_eq!(kernel.semaphore_count(), 2);
        }
        assert_eq!(kernel.semaphore_count(), 0);
        assert!(!kernel.scheduler().is_running());
    }
}
