//! A single offload job and the monitor its submitter waits on.
//!
//! A [`Request`] is created by the calling thread, shared (through
//! [`RequestRef`]) with the scheduler, the dispatcher and the completion
//! continuation, and reclaimed by the calling thread once it observes a
//! terminal status. Status transitions:
//!
//! ```text
//! Pending -> Submitted -> Ready
//!    |           |
//!    +-----------+------> Failed
//! ```
//!
//! Terminal states are sticky: the first transition into `Ready` or `Failed`
//! wins and later completions are ignored.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use backend::{HalError, ModExpOperands, layouts::alloc_zeroed};
use parking_lot::{Condvar, Mutex};

use crate::{
    counters::Counters,
    error::{Error, OffloadResult},
};

pub type RequestRef = Arc<Request>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Submitted,
    Ready,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Ready | RequestStatus::Failed)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpKind {
    #[default]
    None,
    ModExp,
}

/// One wait ceiling shared by every request a caller collects in a single
/// drain or release.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    at: Instant,
    ceiling: Duration,
}

impl Deadline {
    pub(crate) fn after(ceiling: Duration) -> Self {
        Self {
            at: Instant::now() + ceiling,
            ceiling,
        }
    }
}

/// Terminal outcome of one request, handed back to its submitter.
#[derive(Debug)]
pub struct Completion {
    pub id: RequestId,
    pub op: OpKind,
    /// Busy rejections absorbed before the request resolved.
    pub retries: usize,
    /// The big-endian output buffer, or why the request failed.
    pub outcome: OffloadResult<Vec<u8>>,
}

impl Completion {
    pub fn is_ready(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> OffloadResult<Vec<u8>> {
        self.outcome
    }
}

struct Slot {
    status: RequestStatus,
    operands: Option<ModExpOperands>,
    output: Vec<u8>,
    error: Option<Error>,
}

pub struct Request {
    id: RequestId,
    op: OpKind,
    retries: AtomicUsize,
    slot: Mutex<Slot>,
    done: Condvar,
}

impl Request {
    /// Validates and copies the operands and allocates the output buffer.
    ///
    /// Argument errors are reported before anything is allocated.
    pub(crate) fn modexp(
        id: RequestId,
        bits: usize,
        base: &[u8],
        exponent: &[u8],
        modulus: &[u8],
    ) -> OffloadResult<RequestRef> {
        let operands: ModExpOperands = ModExpOperands::from_be_bytes(bits, base, exponent, modulus)?;
        Self::from_operands(id, operands)
    }

    pub(crate) fn from_operands(id: RequestId, operands: ModExpOperands) -> OffloadResult<RequestRef> {
        let output: Vec<u8> = alloc_zeroed(operands.len())?;
        Ok(Arc::new(Self {
            id,
            op: OpKind::ModExp,
            retries: AtomicUsize::new(0),
            slot: Mutex::new(Slot {
                status: RequestStatus::Pending,
                operands: Some(operands),
                output,
                error: None,
            }),
            done: Condvar::new(),
        }))
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn op(&self) -> OpKind {
        self.op
    }

    pub fn status(&self) -> RequestStatus {
        self.slot.lock().status
    }

    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::Acquire)
    }

    /// Records one more busy retry, returning the new count.
    pub(crate) fn record_retry(&self) -> usize {
        self.retries.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Moves the operands out for submission and marks the request
    /// `Submitted`. Returns `None` if the request is no longer pending.
    pub(crate) fn begin_submit(&self) -> Option<ModExpOperands> {
        let mut slot = self.slot.lock();
        if slot.status != RequestStatus::Pending {
            return None;
        }
        let operands = slot.operands.take()?;
        slot.status = RequestStatus::Submitted;
        Some(operands)
    }

    /// Copies a hardware result into the output buffer and marks the request
    /// `Ready`. Returns false if the request was already terminal.
    pub(crate) fn complete(&self, result: &[u8]) -> bool {
        let mut slot = self.slot.lock();
        if slot.status.is_terminal() {
            return false;
        }
        if result.len() == slot.output.len() {
            slot.output.copy_from_slice(result);
            slot.status = RequestStatus::Ready;
        } else {
            let reason: String = format!("result is {} bytes, expected {}", result.len(), slot.output.len());
            Self::fail_locked(&mut slot, Error::HardwareFailure(HalError::Operand(reason)));
        }
        self.done.notify_all();
        true
    }

    /// Marks the request `Failed`. Returns false if it was already terminal.
    pub(crate) fn fail(&self, err: Error) -> bool {
        let mut slot = self.slot.lock();
        if slot.status.is_terminal() {
            return false;
        }
        Self::fail_locked(&mut slot, err);
        self.done.notify_all();
        true
    }

    /// Fails a request the hardware never retired, counting it as aborted.
    pub(crate) fn abort(&self, err: Error, counters: &Counters) -> bool {
        let failed: bool = self.fail(err);
        if failed {
            counters.aborted(1);
        }
        failed
    }

    fn fail_locked(slot: &mut Slot, err: Error) {
        slot.status = RequestStatus::Failed;
        slot.operands = None;
        slot.error = Some(err);
    }

    /// Blocks until the request is terminal or `timeout` elapses, then hands
    /// the outcome to the caller. A timed-out request is failed with
    /// [`Error::Timeout`]; a late hardware completion is then ignored.
    pub fn wait(&self, timeout: Duration) -> Completion {
        self.wait_until(Deadline::after(timeout))
    }

    pub(crate) fn wait_until(&self, deadline: Deadline) -> Completion {
        let mut slot = self.slot.lock();
        while !slot.status.is_terminal() {
            if self.done.wait_until(&mut slot, deadline.at).timed_out() && !slot.status.is_terminal() {
                Self::fail_locked(&mut slot, Error::Timeout(deadline.ceiling));
            }
        }
        let outcome: OffloadResult<Vec<u8>> = match slot.status {
            RequestStatus::Ready => Ok(std::mem::take(&mut slot.output)),
            _ => Err(slot
                .error
                .take()
                .unwrap_or_else(|| Error::InvalidParam(format!("outcome of request {:?} already collected", self.id)))),
        };
        Completion {
            id: self.id,
            op: self.op,
            retries: self.retries(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use super::{Deadline, Request, RequestId, RequestRef, RequestStatus};
    use crate::{counters::Counters, error::Error};

    const ID: RequestId = RequestId::new(0);

    fn request() -> RequestRef {
        Request::modexp(ID, 16, &[0, 216], &[0, 3], &[0, 7]).unwrap()
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        assert!(matches!(Request::modexp(ID, 16, &[1], &[0, 3], &[0, 7]), Err(Error::InvalidParam(_))));
        assert!(matches!(Request::modexp(ID, 0, &[], &[], &[]), Err(Error::InvalidParam(_))));
        assert!(matches!(Request::modexp(ID, 16, &[0, 1], &[0, 3], &[0, 0]), Err(Error::InvalidParam(_))));
    }

    #[test]
    fn lifecycle_to_ready() {
        let req: RequestRef = request();
        assert_eq!(req.status(), RequestStatus::Pending);
        assert!(req.begin_submit().is_some());
        assert!(req.begin_submit().is_none());
        assert_eq!(req.status(), RequestStatus::Submitted);

        let waiter = {
            let req = Arc::clone(&req);
            thread::spawn(move || req.wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(10));
        assert!(req.complete(&[0, 6]));
        assert!(!req.fail(Error::Shutdown));
        let done = waiter.join().unwrap();
        assert_eq!(done.id, req.id());
        assert_eq!(done.into_result().unwrap(), vec![0, 6]);
        assert_eq!(req.status(), RequestStatus::Ready);
    }

    #[test]
    fn width_mismatch_fails() {
        let req: RequestRef = request();
        req.begin_submit();
        assert!(req.complete(&[6]));
        assert_eq!(req.status(), RequestStatus::Failed);
        assert!(matches!(
            req.wait(Duration::from_millis(1)).outcome,
            Err(Error::HardwareFailure(_))
        ));
    }

    #[test]
    fn wait_times_out_and_ignores_late_completion() {
        let req: RequestRef = request();
        req.begin_submit();
        let done = req.wait(Duration::from_millis(20));
        assert!(matches!(done.outcome, Err(Error::Timeout(_))));
        assert!(!req.complete(&[0, 6]));
        assert_eq!(req.status(), RequestStatus::Failed);
    }

    #[test]
    fn failed_before_submit_is_not_submitted() {
        let req: RequestRef = request();
        assert!(req.fail(Error::Shutdown));
        assert!(req.begin_submit().is_none());
        assert!(matches!(req.wait(Duration::from_millis(1)).outcome, Err(Error::Shutdown)));
    }

    #[test]
    fn shared_deadline_bounds_a_whole_batch() {
        let reqs: Vec<RequestRef> = (0..10).map(|_| request()).collect();
        let ceiling = Duration::from_millis(50);
        let deadline = Deadline::after(ceiling);
        let start = Instant::now();
        for req in &reqs {
            assert!(matches!(req.wait_until(deadline).outcome, Err(Error::Timeout(c)) if c == ceiling));
        }
        assert!(start.elapsed() < ceiling * 4, "took {:?}", start.elapsed());
    }

    #[test]
    fn abort_counts_only_the_first_transition() {
        let counters = Counters::default();
        let req: RequestRef = request();
        assert!(req.abort(Error::Shutdown, &counters));
        assert!(!req.abort(Error::Shutdown, &counters));
        assert_eq!(counters.snapshot().aborted, 1);
    }
}
