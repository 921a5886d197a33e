use std::collections::TryReserveError;

use thiserror::Error;

/// Errors raised by the hardware abstraction layer and its implementations.
#[derive(Debug, Error)]
pub enum HalError {
    #[error("invalid operand: {0}")]
    Operand(String),
    #[error("operand allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
    #[error("memory pool unavailable: {0}")]
    MemPool(&'static str),
    #[error("acceleration service unavailable: {0}")]
    ServiceUnavailable(&'static str),
    #[error("insufficient instances: required {required}, available {available}")]
    InsufficientInstances { required: usize, available: usize },
    #[error("instance {0} is not running")]
    InstanceStopped(usize),
    #[error("execution failed on instance {instance}: {reason}")]
    Execution { instance: usize, reason: String },
}
