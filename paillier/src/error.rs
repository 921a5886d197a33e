use backend::HalError;
use rug::Integer;
use thiserror::Error;

pub type PaillierResult<T> = Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Offload(#[from] offload::Error),
    #[error(transparent)]
    Backend(#[from] HalError),
    #[error("key size must be an even number of bits >= 16, got {0}")]
    KeySize(usize),
    #[error("plaintext {0} is outside [0, n)")]
    PlaintextOutOfRange(Integer),
    #[error("ciphertext is outside (0, n^2)")]
    CiphertextOutOfRange,
    #[error("{bases} bases but {exponents} exponents")]
    LengthMismatch { bases: usize, exponents: usize },
}
