use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::request::RequestId;

/// Monotonic engine-wide counters shared by the dispatcher and every
/// completion continuation.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    aborted: AtomicU64,
    peak_pending: AtomicU64,
    next_id: AtomicU64,
}

impl Counters {
    pub(crate) fn next_request_id(&self) -> RequestId {
        RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Counted before the hardware submit so a fast completion can never make
    /// `completed` overtake `submitted`.
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::AcqRel);
    }

    /// Undoes [`submitted`](Self::submitted) for a rejected submit.
    pub(crate) fn unsubmitted(&self) {
        self.submitted.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn completed(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn aborted(&self, count: u64) {
        self.aborted.fetch_add(count, Ordering::AcqRel);
    }

    /// Jobs submitted to hardware and not yet retired.
    pub(crate) fn pending(&self) -> u64 {
        let completed: u64 = self.completed.load(Ordering::Acquire);
        self.submitted.load(Ordering::Acquire).saturating_sub(completed)
    }

    pub(crate) fn observe_pending(&self) {
        self.peak_pending.fetch_max(self.pending(), Ordering::AcqRel);
    }

    pub(crate) fn snapshot(&self) -> Stats {
        let completed: u64 = self.completed.load(Ordering::Acquire);
        let failed: u64 = self.failed.load(Ordering::Acquire);
        let submitted: u64 = self.submitted.load(Ordering::Acquire);
        Stats {
            submitted,
            completed,
            failed,
            aborted: self.aborted.load(Ordering::Acquire),
            pending: submitted.saturating_sub(completed),
            peak_pending: self.peak_pending.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time view of the engine counters.
///
/// `completed` counts every job the hardware retired, failed ones included,
/// so `pending = submitted - completed` is the backpressure measure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub submitted: u64,
    pub completed: u64,
    /// Retired jobs the hardware reported as failed.
    pub failed: u64,
    /// Requests failed by the offload layer rather than by a hardware
    /// retirement: retry exhaustion, submit rejection, shutdown and caller
    /// timeouts.
    pub aborted: u64,
    pub pending: u64,
    pub peak_pending: u64,
}

#[cfg(test)]
mod tests {
    use super::Counters;

    #[test]
    fn pending_tracks_submitted_minus_completed() {
        let c = Counters::default();
        c.submitted();
        c.submitted();
        c.submitted();
        c.observe_pending();
        c.unsubmitted();
        c.completed();
        c.completed();
        c.failed();
        c.aborted(2);
        let stats = c.snapshot();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.aborted, 2);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.peak_pending, 3);
    }

    #[test]
    fn request_ids_are_per_engine() {
        let a = Counters::default();
        let b = Counters::default();
        assert!(a.next_request_id() < a.next_request_id());
        assert_eq!(b.next_request_id().value(), 0);
    }
}
