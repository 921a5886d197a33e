use std::sync::Arc;

use backend::{CompletionFn, HalError};
use tracing::trace;

use crate::{counters::Counters, error::Error, request::RequestRef};

/// Builds the continuation a hardware instance runs when it retires the job
/// of `req`.
///
/// The retirement is counted before the request is woken, so by the time a
/// caller observes a terminal status the pending count already excludes it.
pub(crate) fn handler(req: RequestRef, counters: Arc<Counters>) -> CompletionFn {
    Box::new(move |result: Result<Vec<u8>, HalError>| {
        counters.completed();
        match result {
            Ok(bytes) => {
                if !req.complete(&bytes) {
                    trace!(id = ?req.id(), "late completion ignored");
                }
            }
            Err(err) => {
                counters.failed();
                if !req.fail(Error::HardwareFailure(err)) {
                    trace!(id = ?req.id(), "late failure ignored");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use backend::HalError;

    use super::handler;
    use crate::{
        counters::Counters,
        error::Error,
        request::{Request, RequestId, RequestStatus},
    };

    #[test]
    fn success_fills_output_and_counts() {
        let counters = Arc::new(Counters::default());
        let req = Request::modexp(RequestId::new(0), 8, &[3], &[2], &[5]).unwrap();
        req.begin_submit();
        counters.submitted();
        handler(req.clone(), counters.clone())(Ok(vec![4]));
        assert_eq!(req.status(), RequestStatus::Ready);
        assert_eq!(req.wait(Duration::from_millis(1)).into_result().unwrap(), vec![4]);
        let stats = counters.snapshot();
        assert_eq!((stats.completed, stats.failed, stats.pending), (1, 0, 0));
    }

    #[test]
    fn failure_marks_request_failed() {
        let counters = Arc::new(Counters::default());
        let req = Request::modexp(RequestId::new(0), 8, &[3], &[2], &[5]).unwrap();
        req.begin_submit();
        counters.submitted();
        handler(req.clone(), counters.clone())(Err(HalError::InstanceStopped(0)));
        assert!(matches!(
            req.wait(Duration::from_millis(1)).outcome,
            Err(Error::HardwareFailure(HalError::InstanceStopped(0)))
        ));
        let stats = counters.snapshot();
        assert_eq!((stats.completed, stats.failed, stats.pending), (1, 1, 0));
    }
}
