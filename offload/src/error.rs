//! Error types for the offload engine.
//!
//! Every failure a caller can observe, whether returned synchronously by a
//! submit or recorded as the terminal outcome of a request, is an [`Error`].
//! Transient hardware-busy conditions are absorbed by the dispatcher and only
//! surface as [`Error::HardwareBusy`] once the retry ceiling is exceeded.

use std::{collections::TryReserveError, time::Duration};

use backend::HalError;
use thiserror::Error;

pub type OffloadResult<T> = Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("allocation failure: {0}")]
    AllocationFailure(#[from] TryReserveError),
    #[error("hardware busy after {retries} retries")]
    HardwareBusy { retries: usize },
    #[error("hardware failure: {0}")]
    HardwareFailure(HalError),
    #[error("completion not observed within {0:?}")]
    Timeout(Duration),
    #[error("offload context is not running")]
    NotRunning,
    #[error("request aborted by shutdown")]
    Shutdown,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to spawn {name}: {source}")]
    Spawn { name: String, source: std::io::Error },
}

impl From<HalError> for Error {
    fn from(err: HalError) -> Self {
        match err {
            HalError::Operand(reason) => Error::InvalidParam(reason),
            HalError::Allocation(source) => Error::AllocationFailure(source),
            other => Error::HardwareFailure(other),
        }
    }
}

impl Error {
    /// True for outcomes that count as a hardware-side failure of the job,
    /// timeouts included.
    pub fn is_hardware_failure(&self) -> bool {
        matches!(
            self,
            Error::HardwareBusy { .. } | Error::HardwareFailure(_) | Error::Timeout(_)
        )
    }
}
