//! Deterministic pseudorandom sampling based on ChaCha8, with helpers for
//! drawing large integers (uniform values, units, primes) as `rug::Integer`.

pub mod integer;
pub mod source;

pub use source::{Source, new_seed};
