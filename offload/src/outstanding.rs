//! Per-caller outstanding queues.
//!
//! A caller checks out one of `K` queues, fills it with requests, and then
//! releases it, which blocks until every request it submitted has resolved.
//! The scheduler drains whichever checked-out queue has work into the ready
//! queue.
//!
//! The slot arena (`free`/`ready` flags, busy count, fairness cursor) lives
//! under one lock. Each queue keeps its own lock; the pool lock is taken
//! before a queue lock and never the other way around.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::{
    error::{Error, OffloadResult},
    queue::BoundedQueue,
    request::{Completion, RequestRef},
};

/// Interval at which an idle scheduler re-checks its running flag.
const IDLE_RECHECK: Duration = Duration::from_millis(10);

/// Handle on a checked-out outstanding queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueId(pub(crate) usize);

impl QueueId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug)]
struct SlotFlags {
    free: bool,
    ready: bool,
}

struct PoolState {
    slots: Vec<SlotFlags>,
    busy: usize,
    cursor: usize,
    closed: bool,
}

pub(crate) struct OutstandingPool {
    queues: Box<[BoundedQueue<RequestRef>]>,
    /// Requests submitted through each queue and not yet reclaimed, in
    /// submission order.
    inflight: Box<[Mutex<VecDeque<RequestRef>>]>,
    state: Mutex<PoolState>,
    slot_free: Condvar,
    work: Condvar,
}

impl OutstandingPool {
    pub(crate) fn new(queues: usize, capacity: usize) -> Self {
        Self {
            queues: (0..queues).map(|_| BoundedQueue::new(capacity)).collect(),
            inflight: (0..queues).map(|_| Mutex::new(VecDeque::new())).collect(),
            state: Mutex::new(PoolState {
                slots: vec![SlotFlags { free: true, ready: false }; queues],
                busy: 0,
                cursor: 0,
                closed: false,
            }),
            slot_free: Condvar::new(),
            work: Condvar::new(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn busy(&self) -> usize {
        self.state.lock().busy
    }

    /// Checks out a free queue, blocking while all `K` are checked out.
    pub(crate) fn acquire(&self) -> OffloadResult<QueueId> {
        let k: usize = self.queues.len();
        let mut state = self.state.lock();
        while state.busy == k && !state.closed {
            self.slot_free.wait(&mut state);
        }
        if state.closed {
            return Err(Error::NotRunning);
        }
        let start: usize = state.cursor;
        let idx: usize = (0..k)
            .map(|i| (start + i) % k)
            .find(|&i| state.slots[i].free)
            .ok_or_else(|| Error::InvalidParam(format!("busy count {} below {k} but no queue is free", state.busy)))?;
        state.slots[idx] = SlotFlags { free: false, ready: true };
        state.busy += 1;
        state.cursor = (idx + 1) % k;
        trace!(queue = idx, busy = state.busy, "outstanding queue acquired");
        Ok(QueueId(idx))
    }

    fn check_out(&self, id: QueueId) -> OffloadResult<()> {
        let state = self.state.lock();
        match state.slots.get(id.0) {
            None => Err(Error::InvalidParam(format!("queue id {} out of range 0..{}", id.0, state.slots.len()))),
            Some(flags) if flags.free => Err(Error::InvalidParam(format!("queue {} is not checked out", id.0))),
            Some(_) => Ok(()),
        }
    }

    /// Appends `req` to the checked-out queue `id`, blocking while it is full.
    ///
    /// On error nothing is left behind in the queue.
    pub(crate) fn submit(&self, id: QueueId, req: RequestRef) -> OffloadResult<()> {
        self.check_out(id)?;
        if self.queues[id.0].put(req.clone()).is_err() {
            return Err(Error::NotRunning);
        }
        self.inflight[id.0].lock().push_back(req);
        let _state = self.state.lock();
        self.work.notify_one();
        Ok(())
    }

    /// Hands the `batch_size` requests submitted through `id` to `collect`,
    /// which waits for them in submission order, then frees the queue.
    ///
    /// `batch_size` must equal the number of requests submitted since the
    /// queue was acquired; otherwise the queue stays checked out.
    pub(crate) fn release<F>(&self, id: QueueId, batch_size: usize, collect: F) -> OffloadResult<Vec<Completion>>
    where
        F: FnOnce(&[RequestRef]) -> Vec<Completion>,
    {
        self.check_out(id)?;
        let batch: Vec<RequestRef> = {
            let mut inflight = self.inflight[id.0].lock();
            if inflight.len() != batch_size {
                return Err(Error::InvalidParam(format!(
                    "batch_size={batch_size} but {} requests were submitted to queue {}",
                    inflight.len(),
                    id.0
                )));
            }
            inflight.drain(..).collect()
        };
        let outcomes: Vec<Completion> = collect(&batch);

        let mut state = self.state.lock();
        state.slots[id.0] = SlotFlags { free: true, ready: false };
        state.busy -= 1;
        self.slot_free.notify_one();
        trace!(queue = id.0, busy = state.busy, "outstanding queue released");
        Ok(outcomes)
    }

    /// Blocks until a checked-out queue has work, then takes up to `max`
    /// requests from every checked-out queue that has any, one batch per
    /// queue in fixed index order. A busy queue therefore delays the others
    /// by at most one sweep.
    ///
    /// Returns `None` once the pool is closed or `running` is cleared.
    pub(crate) fn next_sweep(&self, max: usize, running: &AtomicBool) -> Option<Vec<Vec<RequestRef>>> {
        let mut state = self.state.lock();
        loop {
            if state.closed || !running.load(Ordering::Acquire) {
                return None;
            }
            let ready: Vec<usize> = (0..state.slots.len())
                .filter(|&i| state.slots[i].ready && !self.queues[i].is_empty())
                .collect();
            if !ready.is_empty() {
                drop(state);
                return Some(
                    ready
                        .into_iter()
                        .map(|i| self.queues[i].try_take(max))
                        .filter(|batch| !batch.is_empty())
                        .collect(),
                );
            }
            self.work.wait_for(&mut state, IDLE_RECHECK);
        }
    }

    /// Rejects further acquires and submits and wakes every waiter.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for queue in self.queues.iter() {
            queue.close();
        }
        self.slot_free.notify_all();
        self.work.notify_all();
    }

    /// Removes every request still sitting in a queue, returning them.
    pub(crate) fn drain_queued(&self) -> Vec<RequestRef> {
        self.queues
            .iter()
            .flat_map(|queue| queue.try_take(queue.capacity()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, atomic::AtomicBool, mpsc},
        thread,
        time::Duration,
    };

    use super::{OutstandingPool, QueueId};
    use crate::{
        error::Error,
        request::{Completion, Request, RequestId, RequestRef},
    };

    fn request() -> RequestRef {
        Request::modexp(RequestId::new(0), 8, &[3], &[2], &[5]).unwrap()
    }

    fn wait_all(batch: &[RequestRef]) -> Vec<Completion> {
        batch.iter().map(|req| req.wait(Duration::from_millis(1))).collect()
    }

    #[test]
    fn acquire_rotates_through_queues() {
        let pool = OutstandingPool::new(3, 4);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
        pool.release(a, 0, wait_all).unwrap();
        // Resumes after the last index handed out, not at the freed one.
        assert_eq!(pool.acquire().unwrap().index(), 2);
        assert_eq!(pool.acquire().unwrap().index(), 0);
        assert_eq!(pool.busy(), 3);
    }

    #[test]
    fn acquire_blocks_while_exhausted() {
        let pool = Arc::new(OutstandingPool::new(1, 4));
        let held = pool.acquire().unwrap();
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let id = pool.acquire().unwrap();
                tx.send(id).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        pool.release(held, 0, wait_all).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), held);
        waiter.join().unwrap();
    }

    #[test]
    fn rejects_foreign_or_unknown_queues() {
        let pool = OutstandingPool::new(2, 4);
        assert!(matches!(pool.submit(QueueId(5), request()), Err(Error::InvalidParam(_))));
        assert!(matches!(pool.submit(QueueId(0), request()), Err(Error::InvalidParam(_))));
        assert!(matches!(
            pool.release(QueueId(1), 0, wait_all),
            Err(Error::InvalidParam(_))
        ));
    }

    #[test]
    fn batch_size_must_match_submissions() {
        let pool = OutstandingPool::new(1, 4);
        let id = pool.acquire().unwrap();
        pool.submit(id, request()).unwrap();
        assert!(matches!(
            pool.release(id, 2, wait_all),
            Err(Error::InvalidParam(_))
        ));
        assert_eq!(pool.busy(), 1);
    }

    fn numbered(n: u64) -> RequestRef {
        Request::modexp(RequestId::new(n), 8, &[3], &[2], &[5]).unwrap()
    }

    fn ids(batch: &[RequestRef]) -> Vec<u64> {
        batch.iter().map(|r| r.id().value()).collect()
    }

    #[test]
    fn sweep_drains_each_queue_in_order() {
        let pool = OutstandingPool::new(3, 4);
        let running = AtomicBool::new(true);
        let a = pool.acquire().unwrap();
        let _idle = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        for n in 0..3 {
            pool.submit(c, numbered(10 + n)).unwrap();
        }
        for n in 0..2 {
            pool.submit(a, numbered(n)).unwrap();
        }

        let sweep = pool.next_sweep(8, &running).unwrap();
        assert_eq!(sweep.len(), 2);
        assert_eq!(ids(&sweep[0]), vec![0, 1]);
        assert_eq!(ids(&sweep[1]), vec![10, 11, 12]);
    }

    #[test]
    fn sweep_takes_at_most_max_per_queue() {
        let pool = OutstandingPool::new(2, 8);
        let running = AtomicBool::new(true);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        for n in 0..6 {
            pool.submit(a, numbered(n)).unwrap();
        }
        pool.submit(b, numbered(100)).unwrap();

        // The busy queue yields `max` per sweep; the other is still served.
        let first = pool.next_sweep(4, &running).unwrap();
        assert_eq!(ids(&first[0]), vec![0, 1, 2, 3]);
        assert_eq!(ids(&first[1]), vec![100]);
        let second = pool.next_sweep(4, &running).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(ids(&second[0]), vec![4, 5]);
    }

    #[test]
    fn close_unblocks_scheduler_and_acquirers() {
        let pool = Arc::new(OutstandingPool::new(1, 4));
        let running = Arc::new(AtomicBool::new(true));
        let scheduler = {
            let pool = pool.clone();
            let running = running.clone();
            thread::spawn(move || pool.next_sweep(4, &running))
        };
        let held = pool.acquire().unwrap();
        thread::sleep(Duration::from_millis(20));
        pool.close();
        assert!(scheduler.join().unwrap().is_none());
        assert!(matches!(pool.acquire(), Err(Error::NotRunning)));
        assert!(matches!(pool.submit(held, request()), Err(Error::NotRunning)));
    }
}
