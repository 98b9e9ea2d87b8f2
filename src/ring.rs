//! SPSC ring - bounded lock-free handoff between two threads
//!
//! A fixed-capacity circular buffer with exactly one producer and exactly
//! one consumer. [`bounded`] returns a split [`Producer`]/[`Consumer`] pair;
//! neither handle is `Clone` and both methods take `&mut self`, so the
//! single-producer/single-consumer discipline is enforced by the type system
//! rather than by convention.
//!
//! # Protocol
//!
//! - The producer owns the head index: written with `Release`, read back
//!   with `Relaxed`. The consumer owns the tail symmetrically.
//! - A successful `try_push` writes the slot *before* releasing the new
//!   head; `try_pop` acquires the head before reading the slot, so a pop
//!   always observes the exact value the matching push wrote.
//! - One slot stays empty as a sentinel to distinguish full from empty: a
//!   ring built with `n` slots holds at most `n - 1` items.
//! - Head and tail live on separate cache lines.
//! - No allocation after construction.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct Shared<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: slot access is coordinated by the head/tail indices. The producer
// only writes slots in [head, tail) exclusion and the consumer only reads
// slots the producer has released; each index has a single writer.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & self.mask
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Both handles are gone, so plain reads of the indices are fine.
        let head = self.head.load(Ordering::Relaxed);
        let mut tail = self.tail.load(Ordering::Relaxed);
        while tail != head {
            unsafe { (*self.slots[tail].get()).assume_init_drop() };
            tail = (tail + 1) & self.mask;
        }
    }
}

/// Create a bounded SPSC ring with `slots` slots (power of two, >= 2).
///
/// Usable capacity is `slots - 1`; the remaining slot is the sentinel that
/// distinguishes a full ring from an empty one.
pub fn bounded<T>(slots: usize) -> (Producer<T>, Consumer<T>) {
    assert!(
        slots.is_power_of_two() && slots >= 2,
        "ring size must be a power of two >= 2"
    );
    let shared = Arc::new(Shared {
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
        mask: slots - 1,
        slots: (0..slots)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect(),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

/// Writing half of an SPSC ring. Not `Clone`.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// Reading half of an SPSC ring. Not `Clone`.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    /// Attempt to enqueue `value`. Returns it back when the ring is full.
    #[inline]
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        let next = (head + 1) & shared.mask;
        if next == shared.tail.load(Ordering::Acquire) {
            return Err(value);
        }
        unsafe { (*shared.slots[head].get()).write(value) };
        shared.head.store(next, Ordering::Release);
        Ok(())
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usable capacity (`slots - 1`).
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }
}

impl<T> Consumer<T> {
    /// Attempt to dequeue the oldest value. Returns `None` when empty.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        if tail == shared.head.load(Ordering::Acquire) {
            return None;
        }
        let value = unsafe { (*shared.slots[tail].get()).assume_init_read() };
        shared.tail.store((tail + 1) & shared.mask, Ordering::Release);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usable capacity (`slots - 1`).
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }

    /// Most recent utilization in [0, 1].
    pub fn usage(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }
}
