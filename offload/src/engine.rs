//! State shared by the context and its background workers for one
//! acquisition of the devices.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use backend::Instance;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    config::OffloadConfig,
    counters::Counters,
    error::{Error, OffloadResult},
    instances::InstancePool,
    outstanding::{OutstandingPool, QueueId},
    queue::BoundedQueue,
    request::{Completion, Deadline, Request, RequestId, RequestRef},
};

const QUIESCE_POLL: Duration = Duration::from_millis(1);

pub(crate) struct Engine<I: Instance> {
    pub(crate) config: OffloadConfig,
    pub(crate) counters: Arc<Counters>,
    pub(crate) ready: BoundedQueue<RequestRef>,
    pub(crate) outstanding: OutstandingPool,
    pub(crate) instances: InstancePool<I>,
    /// Requests submitted outside any outstanding queue, awaiting `drain`.
    direct: Mutex<VecDeque<RequestRef>>,
    pub(crate) scheduling: AtomicBool,
    dispatching: AtomicBool,
}

/// Background threads of one engine.
#[derive(Default)]
pub(crate) struct Workers {
    pub(crate) scheduler: Option<JoinHandle<()>>,
    pub(crate) dispatcher: Option<JoinHandle<()>>,
    pub(crate) pollers: Vec<JoinHandle<()>>,
}

pub(crate) fn spawn<F>(name: String, f: F) -> OffloadResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| Error::Spawn { name, source })
}

fn join(handle: JoinHandle<()>) {
    let name: String = handle.thread().name().unwrap_or("offload-worker").to_owned();
    if handle.join().is_err() {
        error!(thread = %name, "worker panicked");
    }
}

impl<I: Instance> Engine<I> {
    pub(crate) fn new(config: OffloadConfig, handles: Vec<I>) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            ready: BoundedQueue::new(config.ready_capacity),
            outstanding: OutstandingPool::new(config.outstanding_queues, config.queue_capacity),
            instances: InstancePool::new(handles),
            direct: Mutex::new(VecDeque::new()),
            scheduling: AtomicBool::new(true),
            dispatching: AtomicBool::new(true),
            config,
        }
    }

    pub(crate) fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }

    pub(crate) fn new_request(&self, bits: usize, base: &[u8], exponent: &[u8], modulus: &[u8]) -> OffloadResult<RequestRef> {
        Request::modexp(self.counters.next_request_id(), bits, base, exponent, modulus)
    }

    /// Builds a request and places it straight on the ready queue, bypassing
    /// the scheduler.
    ///
    /// The `direct` lock is held from id assignment through the put, so ids,
    /// dispatch order and `drain` order agree.
    pub(crate) fn submit_direct(&self, bits: usize, base: &[u8], exponent: &[u8], modulus: &[u8]) -> OffloadResult<RequestId> {
        let mut direct = self.direct.lock();
        let req: RequestRef = self.new_request(bits, base, exponent, modulus)?;
        if self.ready.put(req.clone()).is_err() {
            return Err(Error::NotRunning);
        }
        let id: RequestId = req.id();
        direct.push_back(req);
        Ok(id)
    }

    /// Waits for every request of `batch` against one shared ceiling.
    fn await_batch(&self, batch: &[RequestRef], deadline: Deadline) -> Vec<Completion> {
        let outcomes: Vec<Completion> = batch.iter().map(|req| req.wait_until(deadline)).collect();
        let timeouts: usize = outcomes
            .iter()
            .filter(|c| matches!(c.outcome, Err(Error::Timeout(_))))
            .count();
        if timeouts > 0 {
            warn!(timeouts, len = batch.len(), "requests timed out");
            self.counters.aborted(timeouts as u64);
        }
        outcomes
    }

    /// Waits for the oldest `count` direct submissions, in submission order.
    pub(crate) fn drain(&self, count: usize) -> OffloadResult<Vec<Completion>> {
        let batch: Vec<RequestRef> = {
            let mut direct = self.direct.lock();
            if count > direct.len() {
                return Err(Error::InvalidParam(format!(
                    "drain({count}) but only {} direct requests are outstanding",
                    direct.len()
                )));
            }
            direct.drain(..count).collect()
        };
        Ok(self.await_batch(&batch, Deadline::after(self.config.wait_timeout)))
    }

    pub(crate) fn release_batch(&self, queue: QueueId, batch_size: usize) -> OffloadResult<Vec<Completion>> {
        let deadline: Deadline = Deadline::after(self.config.wait_timeout);
        self.outstanding
            .release(queue, batch_size, |batch| self.await_batch(batch, deadline))
    }

    /// Spawns the dispatcher and one poller per instance.
    pub(crate) fn spawn_dispatch(self: &Arc<Self>, workers: &mut Workers) -> OffloadResult<()> {
        let engine = Arc::clone(self);
        workers.dispatcher = Some(spawn("offload-dispatcher".into(), move || crate::dispatcher::run(engine))?);
        for idx in 0..self.instances.len() {
            let engine = Arc::clone(self);
            let name: String = format!("offload-poller-{idx}");
            workers.pollers.push(spawn(name, move || crate::poller::run(engine, idx))?);
        }
        Ok(())
    }

    pub(crate) fn spawn_scheduler(self: &Arc<Self>, workers: &mut Workers) -> OffloadResult<()> {
        let engine = Arc::clone(self);
        workers.scheduler = Some(spawn("offload-scheduler".into(), move || crate::scheduler::run(engine))?);
        Ok(())
    }

    /// Stops every worker and instance. Requests not yet handed to hardware
    /// are failed with [`Error::Shutdown`]; jobs in flight get up to
    /// `shutdown_timeout` to retire before their instance is stopped.
    pub(crate) fn shutdown(&self, workers: Workers) {
        // Both queues close before any join: a scheduler blocked on a full
        // ready queue behind a stalled dispatcher must wake up too.
        self.scheduling.store(false, Ordering::Release);
        self.outstanding.close();
        self.dispatching.store(false, Ordering::Release);
        self.ready.close();
        workers.scheduler.into_iter().for_each(join);
        workers.dispatcher.into_iter().for_each(join);
        self.instances.deactivate();

        let mut aborted: usize = 0;
        for req in self.outstanding.drain_queued().into_iter().chain(self.ready.try_take(usize::MAX)) {
            aborted += usize::from(req.abort(Error::Shutdown, &self.counters));
        }
        if aborted > 0 {
            warn!(aborted, "aborted queued requests");
        }

        let deadline: Instant = Instant::now() + self.config.shutdown_timeout;
        let mut in_flight: usize = self.instances.in_flight();
        while in_flight > 0 && !workers.pollers.is_empty() && Instant::now() < deadline {
            thread::sleep(QUIESCE_POLL);
            in_flight = self.instances.in_flight();
        }
        if in_flight > 0 {
            warn!(in_flight, "jobs still in flight at shutdown");
        }

        self.instances.stop_polling();
        workers.pollers.into_iter().for_each(join);
        for slot in self.instances.iter() {
            if let Err(err) = slot.handle.stop() {
                warn!(instance = slot.handle.index(), %err, "failed to stop instance");
            }
        }
        debug!(stats = ?self.counters.snapshot(), "engine shut down");
    }
}
