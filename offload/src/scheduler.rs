use std::sync::Arc;

use backend::Instance;
use tracing::{debug, trace, warn};

use crate::{counters::Counters, engine::Engine, error::Error, queue::Closed, request::RequestRef};

/// Republishes work from checked-out outstanding queues onto the ready queue
/// until scheduling stops. Each sweep visits the queues in index order and
/// every batch lands in the ready queue unsplit.
pub(crate) fn run<I: Instance>(engine: Arc<Engine<I>>) {
    let max: usize = engine.config.queue_capacity;
    debug!(queues = engine.outstanding.size(), max, "scheduler started");

    'sweeps: while let Some(sweep) = engine.outstanding.next_sweep(max, &engine.scheduling) {
        let mut batches = sweep.into_iter();
        while let Some(batch) = batches.next() {
            trace!(len = batch.len(), "republishing batch");
            if let Err(Closed(rejected)) = engine.ready.put_batch(batch) {
                let rest: Vec<RequestRef> = rejected.into_iter().chain(batches.flatten()).collect();
                abort(rest, &engine.counters);
                break 'sweeps;
            }
        }
    }
    debug!("scheduler stopped");
}

fn abort(rejected: Vec<RequestRef>, counters: &Counters) {
    warn!(len = rejected.len(), "ready queue closed, aborting batch");
    for req in rejected {
        req.abort(Error::Shutdown, counters);
    }
}
