//! Moves requests from the ready queue onto hardware instances.
//!
//! The dispatcher bounds the number of jobs the hardware holds at once:
//!
//! ```text
//! pending   = submitted - completed
//! available = max_pending - min(pending, max_pending)
//! ```
//!
//! Nothing is taken from the ready queue while `available` is below the
//! restart threshold. Otherwise at most `available` requests are taken and
//! each is submitted to the round-robin instance, retrying a busy instance up
//! to `max_retry` times before failing that request alone.

use std::{sync::Arc, thread, time::Duration};

use backend::{Instance, ModExpJob, Rejected};
use tracing::{debug, trace, warn};

use crate::{
    completion,
    engine::Engine,
    error::Error,
    instances::InstanceStatus,
    request::RequestRef,
};

/// Upper bound on a blocking take, so a cleared `dispatching` flag is noticed.
const TAKE_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Backpressure {
    max_pending: usize,
    restart_threshold: usize,
}

impl Backpressure {
    pub(crate) fn new(max_pending: usize, restart_threshold: usize) -> Self {
        Self {
            max_pending,
            restart_threshold,
        }
    }

    pub(crate) fn available(&self, pending: usize) -> usize {
        self.max_pending - pending.min(self.max_pending)
    }

    /// Number of requests that may be taken now, or `None` while the free
    /// window is below the restart threshold.
    pub(crate) fn window(&self, pending: usize) -> Option<usize> {
        let available: usize = self.available(pending);
        (available >= self.restart_threshold && available > 0).then_some(available)
    }
}

pub(crate) fn run<I: Instance>(engine: Arc<Engine<I>>) {
    let config = &engine.config;
    let backpressure = Backpressure::new(config.max_pending, config.restart_threshold);
    debug!(max_pending = config.max_pending, restart_threshold = config.restart_threshold, "dispatcher started");

    while engine.is_dispatching() {
        let pending: usize = usize::try_from(engine.counters.pending()).unwrap_or(usize::MAX);
        let Some(window) = backpressure.window(pending) else {
            thread::sleep(config.backpressure_interval);
            continue;
        };
        let batch: Vec<RequestRef> = engine.ready.take_timeout(window, TAKE_TIMEOUT);
        if batch.is_empty() {
            continue;
        }
        trace!(len = batch.len(), pending, window, "dispatching batch");
        for req in batch {
            if engine.is_dispatching() {
                dispatch(&engine, req);
            } else {
                req.abort(Error::Shutdown, &engine.counters);
            }
        }
    }
    debug!("dispatcher stopped");
}

fn dispatch<I: Instance>(engine: &Engine<I>, req: RequestRef) {
    // A request failed while queued (timed out, or aborted) has no operands left.
    let Some(operands) = req.begin_submit() else {
        trace!(id = ?req.id(), "skipping resolved request");
        return;
    };
    let mut job: ModExpJob = ModExpJob::new(operands, completion::handler(req.clone(), engine.counters.clone()));
    let max_retry: usize = engine.config.max_retry;

    loop {
        let slot = engine.instances.current();
        if !slot.is_active() {
            req.abort(Error::Shutdown, &engine.counters);
            return;
        }
        engine.counters.submitted();
        match slot.handle.submit(job) {
            Ok(()) => {
                slot.record(InstanceStatus::Accepted);
                engine.instances.advance();
                engine.counters.observe_pending();
                return;
            }
            Err(Rejected::Busy(returned)) => {
                engine.counters.unsubmitted();
                slot.record(InstanceStatus::Busy);
                if req.record_retry() > max_retry {
                    warn!(id = ?req.id(), instance = slot.handle.index(), max_retry, "retry ceiling exceeded");
                    req.abort(Error::HardwareBusy { retries: max_retry }, &engine.counters);
                    return;
                }
                if !engine.is_dispatching() {
                    req.abort(Error::Shutdown, &engine.counters);
                    return;
                }
                thread::sleep(engine.config.retry_interval);
                job = returned;
            }
            Err(Rejected::Failed(_, err)) => {
                engine.counters.unsubmitted();
                slot.record(InstanceStatus::Failed);
                warn!(id = ?req.id(), instance = slot.handle.index(), %err, "submit failed");
                engine.instances.advance();
                req.abort(err.into(), &engine.counters);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Backpressure;

    #[test]
    fn available_saturates() {
        let bp = Backpressure::new(8, 3);
        assert_eq!(bp.available(0), 8);
        assert_eq!(bp.available(5), 3);
        assert_eq!(bp.available(8), 0);
        assert_eq!(bp.available(12), 0);
    }

    #[test]
    fn window_respects_restart_threshold() {
        let bp = Backpressure::new(8, 3);
        assert_eq!(bp.window(0), Some(8));
        assert_eq!(bp.window(5), Some(3));
        assert_eq!(bp.window(6), None);
        assert_eq!(bp.window(9), None);
    }
}
