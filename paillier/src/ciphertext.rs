//! Encryption, decryption and the additive homomorphism.
//!
//! With `g = n + 1`, `g^m = 1 + m * n mod n^2`, so the only exponentiations
//! left are `r^n` (encryption), `c^lambda` (decryption) and `c^k`
//! (multiplication by a plaintext). Batch forms send all of them to a
//! [`ModExpEngine`] at once.

use itertools::izip;
use rug::Integer;
use sampling::Source;
use tracing::instrument;

use crate::{
    engine::ModExpEngine,
    error::{Error, PaillierResult},
    keys::{PrivateKey, PublicKey},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ciphertext(Integer);

impl Ciphertext {
    pub fn value(&self) -> &Integer {
        &self.0
    }

    pub fn into_inner(self) -> Integer {
        self.0
    }
}

impl PublicKey {
    fn check_plaintext(&self, m: &Integer) -> PaillierResult<()> {
        if *m < 0 || *m >= self.n {
            return Err(Error::PlaintextOutOfRange(m.clone()));
        }
        Ok(())
    }

    /// Wraps `c`, checking `0 < c < n^2`.
    pub fn ciphertext(&self, c: Integer) -> PaillierResult<Ciphertext> {
        if c <= 0 || c >= self.n_squared {
            return Err(Error::CiphertextOutOfRange);
        }
        Ok(Ciphertext(c))
    }

    /// `1 + m * n mod n^2`
    fn g_pow(&self, m: &Integer) -> Integer {
        Integer::from(m * &self.n) + 1
    }

    pub fn encrypt<E: ModExpEngine>(&self, m: &Integer, source: &mut Source, engine: &E) -> PaillierResult<Ciphertext> {
        let mut out: Vec<Ciphertext> = self.encrypt_batch(std::slice::from_ref(m), source, engine)?;
        Ok(out.remove(0))
    }

    /// `c = g^m * r^n mod n^2` with a fresh unit `r` per plaintext.
    #[instrument(skip_all, fields(len = plaintexts.len(), engine = engine.name()))]
    pub fn encrypt_batch<E: ModExpEngine>(
        &self,
        plaintexts: &[Integer],
        source: &mut Source,
        engine: &E,
    ) -> PaillierResult<Vec<Ciphertext>> {
        plaintexts.iter().try_for_each(|m| self.check_plaintext(m))?;
        let units: Vec<Integer> = plaintexts.iter().map(|_| source.next_unit(&self.n)).collect();
        let exponents: Vec<Integer> = vec![self.n.clone(); plaintexts.len()];
        let masks: Vec<Integer> = engine.modexp(&units, &exponents, &self.n_squared)?;
        Ok(izip!(plaintexts, masks)
            .map(|(m, mask)| Ciphertext(Integer::from(self.g_pow(m) * mask) % &self.n_squared))
            .collect())
    }

    /// Homomorphic addition: decrypts to `m_a + m_b mod n`.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        Ciphertext(Integer::from(&a.0 * &b.0) % &self.n_squared)
    }

    /// Decrypts to `m_a + m mod n`.
    pub fn add_plain(&self, a: &Ciphertext, m: &Integer) -> PaillierResult<Ciphertext> {
        self.check_plaintext(m)?;
        Ok(Ciphertext(Integer::from(&a.0 * self.g_pow(m)) % &self.n_squared))
    }

    /// Decrypts to `k * m_a mod n`.
    pub fn mul_plain<E: ModExpEngine>(&self, a: &Ciphertext, k: &Integer, engine: &E) -> PaillierResult<Ciphertext> {
        let mut out: Vec<Ciphertext> = self.mul_plain_batch(std::slice::from_ref(a), std::slice::from_ref(k), engine)?;
        Ok(out.remove(0))
    }

    #[instrument(skip_all, fields(len = ciphertexts.len(), engine = engine.name()))]
    pub fn mul_plain_batch<E: ModExpEngine>(
        &self,
        ciphertexts: &[Ciphertext],
        scalars: &[Integer],
        engine: &E,
    ) -> PaillierResult<Vec<Ciphertext>> {
        scalars.iter().try_for_each(|k| self.check_plaintext(k))?;
        let bases: Vec<Integer> = ciphertexts.iter().map(|c| c.0.clone()).collect();
        let out: Vec<Integer> = engine.modexp(&bases, scalars, &self.n_squared)?;
        Ok(out.into_iter().map(Ciphertext).collect())
    }

    /// Sum of all ciphertexts, or `None` for an empty slice.
    pub fn sum<'a>(&self, ciphertexts: impl IntoIterator<Item = &'a Ciphertext>) -> Option<Ciphertext> {
        ciphertexts
            .into_iter()
            .fold(None, |acc: Option<Ciphertext>, c| match acc {
                None => Some(c.clone()),
                Some(acc) => Some(self.add(&acc, c)),
            })
    }
}

impl PrivateKey {
    pub fn decrypt<E: ModExpEngine>(&self, c: &Ciphertext, engine: &E) -> PaillierResult<Integer> {
        let mut out: Vec<Integer> = self.decrypt_batch(std::slice::from_ref(c), engine)?;
        Ok(out.remove(0))
    }

    /// `m = L(c^lambda mod n^2) * mu mod n` with `L(u) = (u - 1) / n`.
    #[instrument(skip_all, fields(len = ciphertexts.len(), engine = engine.name()))]
    pub fn decrypt_batch<E: ModExpEngine>(&self, ciphertexts: &[Ciphertext], engine: &E) -> PaillierResult<Vec<Integer>> {
        let public: &PublicKey = &self.public;
        let bases: Vec<Integer> = ciphertexts
            .iter()
            .map(|c| public.ciphertext(c.0.clone()).map(Ciphertext::into_inner))
            .collect::<PaillierResult<_>>()?;
        let exponents: Vec<Integer> = vec![self.lambda.clone(); bases.len()];
        let us: Vec<Integer> = engine.modexp(&bases, &exponents, &public.n_squared)?;
        Ok(us
            .into_iter()
            .map(|u| {
                let l: Integer = (u - 1u32) / &public.n;
                Integer::from(l * &self.mu) % &public.n
            })
            .collect())
    }
}
