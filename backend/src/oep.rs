use std::fmt;

use crate::{error::HalError, layouts::ModExpOperands};

/// Continuation invoked exactly once when the hardware retires a job, with
/// either the fixed-width big-endian result or the failure.
pub type CompletionFn = Box<dyn FnOnce(Result<Vec<u8>, HalError>) + Send + 'static>;

/// A modular exponentiation handed to an [`Instance`].
///
/// The completion continuation travels with the job, so a retired job can
/// only ever wake the request it was created for.
pub struct ModExpJob {
    operands: ModExpOperands,
    on_complete: CompletionFn,
}

impl ModExpJob {
    pub fn new(operands: ModExpOperands, on_complete: CompletionFn) -> Self {
        Self { operands, on_complete }
    }

    pub fn operands(&self) -> &ModExpOperands {
        &self.operands
    }

    /// Consumes the job and runs its continuation.
    pub fn complete(self, result: Result<Vec<u8>, HalError>) {
        (self.on_complete)(result)
    }
}

impl fmt::Debug for ModExpJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModExpJob")
            .field("bits", &self.operands.bits())
            .finish_non_exhaustive()
    }
}

/// Reason an [`Instance`] refused a job. The job is handed back so the caller
/// keeps ownership of its continuation.
#[derive(Debug)]
pub enum Rejected {
    /// Transient: every execution slot is occupied. Retry later.
    Busy(ModExpJob),
    /// Permanent for this job.
    Failed(ModExpJob, HalError),
}

/// # THIS TRAIT IS AN OPEN EXTENSION POINT
/// A hardware acceleration service: a memory pool, a service process and a
/// set of discoverable instances.
///
/// Methods are called by the offload context under its lifecycle lock, in
/// the order `init_mem_pool`, `start_service`, `discover_instances`, and torn
/// down with `stop_service`, `release_mem_pool`.
pub trait Backend: Send + Sync + 'static {
    type Instance: Instance;

    fn name(&self) -> &'static str;

    fn init_mem_pool(&self) -> Result<(), HalError>;

    fn release_mem_pool(&self);

    fn start_service(&self) -> Result<(), HalError>;

    fn stop_service(&self);

    /// Opens a handle on every instance the service exposes.
    fn discover_instances(&self) -> Result<Vec<Self::Instance>, HalError>;
}

/// # THIS TRAIT IS AN OPEN EXTENSION POINT
/// One hardware endpoint with a bounded number of parallel execution slots.
///
/// `submit` is called from a single dispatcher thread, `poll` from a single
/// poller thread, concurrently with each other.
pub trait Instance: Send + Sync + 'static {
    fn index(&self) -> usize;

    fn start(&self) -> Result<(), HalError>;

    /// Enqueues a job for execution. Must not block.
    fn submit(&self, job: ModExpJob) -> Result<(), Rejected>;

    /// Retires finished jobs, running their continuations. Returns the number
    /// of jobs retired.
    fn poll(&self) -> usize;

    /// Jobs accepted but not yet retired.
    fn in_flight(&self) -> usize;

    /// Stops the instance. Jobs still in flight are completed with
    /// [`HalError::InstanceStopped`].
    fn stop(&self) -> Result<(), HalError>;
}
