//! Blocking bounded circular queue.
//!
//! # Correctness Invariants
//!
//! - **Bounded**: `0 <= count <= capacity` at all times
//! - **Lossless**: an item is either in the ring, returned by `take`, or
//!   handed back to the producer by a rejected `put`
//! - **Atomic batches**: `put_batch` waits for room for the whole batch and
//!   inserts it in one critical section, so concurrent `put`s cannot split it
//!
//! Closing the queue wakes every waiter. Producers get their items back;
//! consumers keep draining what is left and then observe an empty batch.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Returned by a put on a closed queue, carrying the rejected item(s).
#[derive(Debug, PartialEq, Eq)]
pub struct Closed<T>(pub T);

struct Ring<T> {
    slots: Box<[Option<T>]>,
    /// Next write.
    head: usize,
    /// Next read.
    tail: usize,
    count: usize,
    peak: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn free(&self) -> usize {
        self.slots.len() - self.count
    }

    fn push(&mut self, item: T) {
        debug_assert!(self.count < self.slots.len());
        debug_assert!(self.slots[self.head].is_none(), "overwriting a queued item");
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % self.slots.len();
        self.count += 1;
        self.peak = self.peak.max(self.count);
    }

    fn pop_many(&mut self, max: usize) -> Vec<T> {
        let n: usize = self.count.min(max);
        let mut out: Vec<T> = Vec::with_capacity(n);
        for _ in 0..n {
            let item: Option<T> = self.slots[self.tail].take();
            debug_assert!(item.is_some(), "counted slot {} is empty", self.tail);
            out.extend(item);
            self.tail = (self.tail + 1) % self.slots.len();
        }
        self.count -= n;
        out
    }
}

pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be > 0");
        Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                count: 0,
                peak: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest item count ever observed.
    pub fn peak(&self) -> usize {
        self.ring.lock().peak
    }

    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    /// Inserts `item`, blocking while the queue is full.
    pub fn put(&self, item: T) -> Result<(), Closed<T>> {
        let mut ring = self.ring.lock();
        while ring.free() == 0 && !ring.closed {
            self.not_full.wait(&mut ring);
        }
        if ring.closed {
            return Err(Closed(item));
        }
        ring.push(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Inserts every item of `items` in one critical section, blocking until
    /// the whole batch fits.
    ///
    /// # Panics
    ///
    /// Panics if the batch is larger than the capacity (it could never fit).
    pub fn put_batch(&self, items: Vec<T>) -> Result<(), Closed<Vec<T>>> {
        let mut ring = self.ring.lock();
        assert!(
            items.len() <= ring.slots.len(),
            "batch of {} exceeds queue capacity {}",
            items.len(),
            ring.slots.len()
        );
        while ring.free() < items.len() && !ring.closed {
            self.not_full.wait(&mut ring);
        }
        if ring.closed {
            return Err(Closed(items));
        }
        if items.is_empty() {
            return Ok(());
        }
        for item in items {
            ring.push(item);
        }
        self.not_empty.notify_all();
        Ok(())
    }

    /// Removes up to `max` items, blocking while the queue is empty.
    ///
    /// Returns fewer than `max` items when fewer are queued, and an empty
    /// batch only once the queue is closed and drained.
    pub fn take(&self, max: usize) -> Vec<T> {
        let mut ring = self.ring.lock();
        while ring.count == 0 && !ring.closed {
            self.not_empty.wait(&mut ring);
        }
        self.pop_locked(&mut ring, max)
    }

    /// Like [`take`](Self::take), giving up with an empty batch after `timeout`.
    pub fn take_timeout(&self, max: usize, timeout: Duration) -> Vec<T> {
        let deadline: Instant = Instant::now() + timeout;
        let mut ring = self.ring.lock();
        while ring.count == 0 && !ring.closed {
            if self.not_empty.wait_until(&mut ring, deadline).timed_out() {
                break;
            }
        }
        self.pop_locked(&mut ring, max)
    }

    /// Removes up to `max` items without blocking.
    pub fn try_take(&self, max: usize) -> Vec<T> {
        let mut ring = self.ring.lock();
        self.pop_locked(&mut ring, max)
    }

    /// Rejects further puts and wakes every waiter.
    pub fn close(&self) {
        let mut ring = self.ring.lock();
        ring.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    fn pop_locked(&self, ring: &mut Ring<T>, max: usize) -> Vec<T> {
        let out: Vec<T> = ring.pop_many(max);
        if !out.is_empty() {
            self.not_full.notify_all();
        }
        out
    }
}
