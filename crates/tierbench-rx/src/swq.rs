//! Software Queue
//!
//! Bounded single-producer/single-consumer ring between a poller and its
//! processing core. The two ends are separate non-clonable halves, so the
//! SPSC discipline is enforced by ownership.
//!
//! The queue is the only backpressure point of the pipeline: the producer
//! busy-retries instead of dropping, so a slow consumer eventually stalls
//! the poller. The retry loop checks the shutdown flag on every spin.
//!
//! Dropping the [`Producer`] closes the queue. A consumer that drains until
//! [`Consumer::is_closed`] holds has seen every item ever enqueued.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tierbench_common::Shutdown;

struct Ring<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Next slot the producer writes
    head: CachePadded<AtomicUsize>,
    /// Next slot the consumer reads
    tail: CachePadded<AtomicUsize>,
    /// Set once the producer is gone
    closed: AtomicBool,
}

// SAFETY: a slot is only touched by the producer while it is outside
// [tail, head) and only by the consumer while it is inside; the
// release/acquire pairs on head and tail hand slots across.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    #[inline(always)]
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let mut tail = *self.tail.get_mut();
        while tail != head {
            // SAFETY: slots in [tail, head) hold initialised values
            unsafe { (*self.slots[tail & self.mask].get()).assume_init_drop() };
            tail = tail.wrapping_add(1);
        }
    }
}

/// Create a queue holding at least `capacity` items (rounded up to a power
/// of two)
pub fn channel<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = capacity.max(1).next_power_of_two();
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();
    let ring = Arc::new(Ring {
        slots,
        mask: capacity - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
        closed: AtomicBool::new(false),
    });
    (
        Producer {
            ring: ring.clone(),
        },
        Consumer { ring },
    )
}

/// Writing end
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

impl<T: Send> Producer<T> {
    /// Enqueue without waiting; hands the item back when full
    #[inline]
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) == self.ring.slots.len() {
            return Err(item);
        }
        // SAFETY: the slot is outside [tail, head), nobody else touches it
        unsafe { (*self.ring.slots[head & self.ring.mask].get()).write(item) };
        self.ring.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Enqueue, spinning while full; hands the item back if shutdown is
    /// requested before it fits
    #[inline]
    pub fn push_blocking(&mut self, mut item: T, shutdown: &Shutdown) -> Result<(), T> {
        loop {
            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(back) => {
                    if !shutdown.is_running() {
                        return Err(back);
                    }
                    item = back;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Move every item of `items` into the queue in order, spinning while
    /// full. Returns the number enqueued; on shutdown the rest stay in
    /// `items` for the caller to release.
    pub fn push_burst_blocking(&mut self, items: &mut Vec<T>, shutdown: &Shutdown) -> usize {
        let mut pushed = 0;
        let mut pending = std::mem::take(items).into_iter();
        while let Some(item) = pending.next() {
            if let Err(back) = self.push_blocking(item, shutdown) {
                items.push(back);
                items.extend(pending);
                break;
            }
            pushed += 1;
        }
        pushed
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.slots.len()
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.ring.closed.store(true, Ordering::Release);
    }
}

/// Reading end
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T: Send> Consumer<T> {
    /// Dequeue the oldest item
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        // SAFETY: the slot is inside [tail, head) and initialised; the
        // producer will not reuse it until tail moves past it
        let item = unsafe { (*self.ring.slots[tail & self.ring.mask].get()).assume_init_read() };
        self.ring.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Dequeue up to `max` items into `out`; never waits
    #[inline]
    pub fn pop_burst(&mut self, out: &mut Vec<T>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.pop() {
                Some(item) => {
                    out.push(item);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The producer is gone and nothing is left to pop
    pub fn is_closed(&self) -> bool {
        // closed first: a push that precedes the drop is then visible in len
        self.ring.closed.load(Ordering::Acquire) && self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_capacity_rounds_up() {
        let (p, _c) = channel::<u32>(100);
        assert_eq!(p.capacity(), 128);
        let (p, _c) = channel::<u32>(0);
        assert_eq!(p.capacity(), 1);
    }

    #[test]
    fn test_full_queue_rejects() {
        let (mut p, mut c) = channel(2);
        assert!(p.try_push(1).is_ok());
        assert!(p.try_push(2).is_ok());
        assert_eq!(p.try_push(3), Err(3));
        assert_eq!(c.pop(), Some(1));
        assert!(p.try_push(3).is_ok());
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_drop_releases_queued_items() {
        let marker = Arc::new(());
        let (mut p, c) = channel(4);
        p.try_push(marker.clone()).unwrap();
        p.try_push(marker.clone()).unwrap();
        assert_eq!(Arc::strong_count(&marker), 3);
        drop(p);
        drop(c);
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_shutdown_unblocks_full_queue() {
        let (mut p, _c) = channel(1);
        p.try_push(0u32).unwrap();
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();

        let h = std::thread::spawn(move || {
            let start = Instant::now();
            let r = p.push_blocking(1u32, &shutdown);
            (r, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        let set_at = Instant::now();
        trigger.trigger();
        let (r, _) = h.join().unwrap();
        assert_eq!(r, Err(1));
        assert!(set_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_burst_push_keeps_leftovers_on_shutdown() {
        let (mut p, _c) = channel(2);
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut items = vec![1, 2, 3, 4];
        assert_eq!(p.push_burst_blocking(&mut items, &shutdown), 2);
        assert_eq!(items, vec![3, 4]);
    }

    #[test]
    fn test_closed_only_after_producer_drop_and_drain() {
        let (mut p, mut c) = channel(4);
        assert!(!c.is_closed());
        p.try_push(7u32).unwrap();
        drop(p);
        assert!(!c.is_closed());
        assert_eq!(c.pop(), Some(7));
        assert!(c.is_closed());
    }

    #[test]
    fn test_cross_thread_order() {
        let (mut p, mut c) = channel(64);
        let shutdown = Shutdown::new();
        let n = 100_000u64;
        let h = std::thread::spawn(move || {
            for i in 0..n {
                p.push_blocking(i, &shutdown).unwrap();
            }
        });
        let mut expected = 0;
        let mut out = Vec::new();
        while expected < n {
            out.clear();
            c.pop_burst(&mut out, 32);
            for v in &out {
                assert_eq!(*v, expected);
                expected += 1;
            }
        }
        h.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_fifo_under_interleaving(
            ops in prop::collection::vec((any::<bool>(), 1usize..8), 1..300)
        ) {
            let (mut p, mut c) = channel(16);
            let mut next = 0u32;
            let mut dequeued = Vec::new();
            for (push, n) in ops {
                if push {
                    for _ in 0..n {
                        if p.try_push(next).is_ok() {
                            next += 1;
                        }
                    }
                } else {
                    c.pop_burst(&mut dequeued, n);
                }
            }
            let expected: Vec<u32> = (0..dequeued.len() as u32).collect();
            prop_assert_eq!(dequeued, expected);
        }
    }
}
