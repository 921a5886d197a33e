//! # paillier
//!
//! Paillier additively homomorphic encryption with `g = n + 1`, whose modular
//! exponentiations can be offloaded to accelerator hardware.
//!
//! | Operation | Exponentiation mod `n^2` |
//! |---|---|
//! | [`PublicKey::encrypt_batch`] | `r^n` per plaintext |
//! | [`PrivateKey::decrypt_batch`] | `c^lambda` per ciphertext |
//! | [`PublicKey::mul_plain_batch`] | `c^k` per ciphertext |
//!
//! Additions ([`PublicKey::add`], [`PublicKey::add_plain`]) need none.
//! Exponentiations run on a [`ModExpEngine`]: [`CpuEngine`], [`OffloadEngine`]
//! over an [`offload::Context`], or [`HybridEngine`] splitting each batch.

pub mod ciphertext;
pub mod engine;
pub mod error;
pub mod keys;

#[cfg(test)]
mod tests;

pub use ciphertext::Ciphertext;
pub use engine::{CpuEngine, HybridEngine, ModExpEngine, OffloadEngine};
pub use error::{Error, PaillierResult};
pub use keys::{KeyPair, PrivateKey, PublicKey};
