//! # backend
//!
//! A trait-based Hardware Abstraction Layer (HAL) for large-integer modular
//! exponentiation, the primitive behind Paillier encryption, decryption and
//! ciphertext-by-plaintext multiplication.
//!
//! Schemes never talk to a device directly. They hand fixed-width operand
//! triples to an offload scheduler, which drives any service implementing the
//! [`oep`] (Open Extension Point) traits.
//!
//! ## Layers
//!
//! 1. **[`layouts`]** -- [`layouts::ModExpOperands`], a validated
//!    `(base, exponent, modulus)` triple of big-endian buffers of
//!    `ceil(bits / 8)` bytes, plus encode/decode helpers for `rug::Integer`.
//! 2. **[`oep`]** -- [`oep::Backend`] (memory pool, service, instance
//!    discovery) and [`oep::Instance`] (submit / poll / stop). A submit either
//!    accepts a [`oep::ModExpJob`] or hands it back through
//!    [`oep::Rejected`]; a retired job runs its own completion continuation.
//! 3. **[`mod@reference`]** -- CPU implementations used as correctness oracle
//!    and as the multi-buffered CPU path ([`reference::modexp_mb`]).
//! 4. **[`implementation`]** -- concrete services. [`implementation::CpuEmulated`]
//!    emulates a bank of accelerators with bounded execution slots, FIFO
//!    retirement and fault injection.
//!
//! ## Non-Goals
//!
//! - No constant-time guarantees.
//! - No device discovery beyond what a [`oep::Backend`] reports.

pub mod error;
pub mod implementation;
pub mod layouts;
pub mod oep;
pub mod reference;


pub use error::HalError;
pub use layouts::ModExpOperands;
pub use oep::{Backend, CompletionFn, Instance, ModExpJob, Rejected};
