use rug::Integer;
use sampling::Source;
use tracing::{debug, instrument};

use crate::error::{Error, PaillierResult};

/// Public key with generator `g = n + 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub(crate) bits: usize,
    pub(crate) n: Integer,
    pub(crate) n_squared: Integer,
}

impl PublicKey {
    pub fn new(n: Integer) -> Self {
        let n_squared: Integer = Integer::from(&n * &n);
        Self {
            bits: n.significant_bits() as usize,
            n,
            n_squared,
        }
    }

    /// Bit size of `n`.
    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn n(&self) -> &Integer {
        &self.n
    }

    pub fn n_squared(&self) -> &Integer {
        &self.n_squared
    }

    /// `g = n + 1`.
    pub fn g(&self) -> Integer {
        Integer::from(&self.n + 1)
    }
}

#[derive(Clone, Debug)]
pub struct PrivateKey {
    pub(crate) public: PublicKey,
    /// `lcm(p - 1, q - 1)`
    pub(crate) lambda: Integer,
    /// `lambda^-1 mod n`
    pub(crate) mu: Integer,
}

impl PrivateKey {
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn lambda(&self) -> &Integer {
        &self.lambda
    }

    pub fn mu(&self) -> &Integer {
        &self.mu
    }
}

#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generates a key whose modulus `n = p * q` has exactly `bits` bits.
    #[instrument(skip(source))]
    pub fn generate(bits: usize, source: &mut Source) -> PaillierResult<Self> {
        if bits < 16 || bits % 2 != 0 {
            return Err(Error::KeySize(bits));
        }
        loop {
            let p: Integer = source.next_prime(bits / 2);
            let q: Integer = source.next_prime(bits / 2);
            if p == q {
                continue;
            }
            if let Some(pair) = Self::from_primes(&p, &q) {
                debug!(bits = pair.public.bits, "generated key pair");
                return Ok(pair);
            }
        }
    }

    /// Builds the key pair of `n = p * q`, or `None` if `lambda` is not
    /// invertible mod `n`.
    pub fn from_primes(p: &Integer, q: &Integer) -> Option<Self> {
        let n: Integer = Integer::from(p * q);
        let p1: Integer = Integer::from(p - 1);
        let q1: Integer = Integer::from(q - 1);
        let lambda: Integer = p1.lcm(&q1);
        let mu: Integer = lambda.clone().invert(&n).ok()?;
        let public: PublicKey = PublicKey::new(n);
        Some(Self {
            private: PrivateKey {
                public: public.clone(),
                lambda,
                mu,
            },
            public,
        })
    }
}
