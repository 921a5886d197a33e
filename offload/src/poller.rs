use std::{sync::Arc, thread};

use backend::Instance;
use tracing::{debug, trace};

use crate::engine::Engine;

/// Busy-polls instance `idx` for retired jobs until polling is switched off.
pub(crate) fn run<I: Instance>(engine: Arc<Engine<I>>, idx: usize) {
    let slot = engine.instances.slot(idx);
    let interval = engine.config.poll_interval;
    debug!(instance = slot.handle.index(), "poller started");

    let mut total: u64 = 0;
    while slot.is_polling() {
        let retired: usize = slot.handle.poll();
        if retired > 0 {
            total += retired as u64;
            trace!(instance = slot.handle.index(), retired, "polled completions");
        }
        thread::sleep(interval);
    }
    debug!(instance = slot.handle.index(), total, "poller stopped");
}
