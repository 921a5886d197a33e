//! Batched modular exponentiation back ends used by the Paillier operations.
//!
//! Every exponentiation a key operation needs (`r^n`, `c^lambda`, `c^k`, all
//! mod `n^2`) is routed through a [`ModExpEngine`], so the same code runs on
//! the CPU, on an offload [`Context`], or split between the two.

use std::{sync::Arc, thread};

use backend::{
    Backend,
    layouts::{byte_len, decode_be, encode_be},
    reference,
};
use offload::{Completion, Context, OffloadResult, QueueId};
use rug::Integer;
use tracing::{debug, trace};

use crate::error::{Error, PaillierResult};

pub trait ModExpEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `bases[i]^exponents[i] mod modulus` for every `i`.
    fn modexp(&self, bases: &[Integer], exponents: &[Integer], modulus: &Integer) -> PaillierResult<Vec<Integer>>;
}

fn check_lengths(bases: &[Integer], exponents: &[Integer]) -> PaillierResult<()> {
    if bases.len() != exponents.len() {
        return Err(Error::LengthMismatch {
            bases: bases.len(),
            exponents: exponents.len(),
        });
    }
    Ok(())
}

/// Multi-buffered CPU exponentiation.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuEngine;

impl ModExpEngine for CpuEngine {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn modexp(&self, bases: &[Integer], exponents: &[Integer], modulus: &Integer) -> PaillierResult<Vec<Integer>> {
        check_lengths(bases, exponents)?;
        Ok(reference::modexp_mb(bases, exponents, modulus)?)
    }
}

/// Sends every exponentiation of a batch through one outstanding queue of a
/// shared offload context.
pub struct OffloadEngine<B: Backend> {
    ctx: Arc<Context<B>>,
}

impl<B: Backend> Clone for OffloadEngine<B> {
    fn clone(&self) -> Self {
        Self { ctx: Arc::clone(&self.ctx) }
    }
}

impl<B: Backend> OffloadEngine<B> {
    /// The context must be acquired before the engine is used.
    pub fn new(ctx: Arc<Context<B>>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<Context<B>> {
        &self.ctx
    }

    /// Submits the batch, stopping at the first rejected submit. Returns how
    /// many requests went in and the error, if any.
    fn submit_all(
        &self,
        queue: QueueId,
        bases: &[Integer],
        exponents: &[Integer],
        modulus: &Integer,
    ) -> (usize, PaillierResult<()>) {
        let bits: usize = modulus.significant_bits() as usize;
        let len: usize = byte_len(bits);
        let modulus_be: Vec<u8> = match encode_be(modulus, len) {
            Ok(m) => m,
            Err(err) => return (0, Err(err.into())),
        };
        for (i, (base, exponent)) in bases.iter().zip(exponents).enumerate() {
            let submitted: PaillierResult<()> = encode_be(base, len)
                .and_then(|b| Ok((b, encode_be(exponent, len)?)))
                .map_err(Error::from)
                .and_then(|(b, e)| {
                    self.ctx
                        .submit_modexp_mt(queue, &b, &e, &modulus_be, bits)
                        .map(|_| ())
                        .map_err(Error::from)
                });
            if submitted.is_err() {
                return (i, submitted);
            }
        }
        (bases.len(), Ok(()))
    }
}

impl<B: Backend> ModExpEngine for OffloadEngine<B> {
    fn name(&self) -> &'static str {
        "offload"
    }

    fn modexp(&self, bases: &[Integer], exponents: &[Integer], modulus: &Integer) -> PaillierResult<Vec<Integer>> {
        check_lengths(bases, exponents)?;
        if *modulus <= 0 {
            return Err(backend::HalError::Operand(format!("modulus must be positive, got {modulus}")).into());
        }
        if bases.is_empty() {
            return Ok(Vec::new());
        }
        let queue: QueueId = self.ctx.acquire_batch_queue()?;
        let (submitted, status) = self.submit_all(queue, bases, exponents, modulus);
        // The queue is released even when a submit failed, so it is never leaked.
        let done: OffloadResult<Vec<Completion>> = self.ctx.release_batch_queue(queue, submitted);
        status?;
        trace!(queue = queue.index(), len = submitted, "offload batch resolved");
        done?
            .into_iter()
            .map(|c| Ok(decode_be(&c.into_result()?)))
            .collect()
    }
}

/// Splits each batch between an offload engine and the CPU, running both
/// halves at once.
pub struct HybridEngine<B: Backend> {
    offload: OffloadEngine<B>,
    cpu: CpuEngine,
    /// Fraction of every batch sent to the offload engine, in `[0, 1]`.
    offload_share: f64,
}

impl<B: Backend> HybridEngine<B> {
    pub fn new(offload: OffloadEngine<B>, offload_share: f64) -> Self {
        Self {
            offload,
            cpu: CpuEngine,
            offload_share: offload_share.clamp(0.0, 1.0),
        }
    }

    pub fn offload_share(&self) -> f64 {
        self.offload_share
    }

    /// Number of leading items of a batch of `len` sent to the offload engine.
    pub fn split(&self, len: usize) -> usize {
        ((len as f64 * self.offload_share).round() as usize).min(len)
    }
}

impl<B: Backend> ModExpEngine for HybridEngine<B> {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn modexp(&self, bases: &[Integer], exponents: &[Integer], modulus: &Integer) -> PaillierResult<Vec<Integer>> {
        check_lengths(bases, exponents)?;
        let at: usize = self.split(bases.len());
        let (off_b, cpu_b) = bases.split_at(at);
        let (off_e, cpu_e) = exponents.split_at(at);
        debug!(offload = at, cpu = bases.len() - at, "hybrid split");

        let (offloaded, computed) = thread::scope(|scope| {
            let handle = scope.spawn(|| self.offload.modexp(off_b, off_e, modulus));
            let computed = self.cpu.modexp(cpu_b, cpu_e, modulus);
            (handle.join(), computed)
        });
        let offloaded: Vec<Integer> = match offloaded {
            Ok(result) => result?,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        let mut out: Vec<Integer> = offloaded;
        out.extend(computed?);
        Ok(out)
    }
}
