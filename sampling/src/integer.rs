use rand_core::RngCore;
use rug::{Integer, integer::Order};

use crate::source::Source;

/// Miller-Rabin rounds used when a caller asks for a verified prime.
pub const PRIME_REPS: u32 = 40;

impl Source {
    /// Returns a uniform integer in `[0, 2^bits)`.
    pub fn next_integer_bits(&mut self, bits: usize) -> Integer {
        if bits == 0 {
            return Integer::new();
        }
        let mut bytes: Vec<u8> = vec![0u8; bits.div_ceil(8)];
        self.fill_bytes(&mut bytes);
        let excess: usize = bytes.len() * 8 - bits;
        bytes[0] &= 0xffu8 >> excess;
        Integer::from_digits(&bytes, Order::Msf)
    }

    /// Returns a uniform integer in `[0, bound)` by rejection sampling.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is not positive.
    pub fn next_integer_below(&mut self, bound: &Integer) -> Integer {
        assert!(*bound > 0, "bound must be positive, got {bound}");
        let bits: usize = bound.significant_bits() as usize;
        loop {
            let x: Integer = self.next_integer_bits(bits);
            if x < *bound {
                return x;
            }
        }
    }

    /// Returns a uniform element of `(Z/nZ)*`.
    pub fn next_unit(&mut self, n: &Integer) -> Integer {
        assert!(*n > 1, "modulus must be greater than one, got {n}");
        loop {
            let x: Integer = self.next_integer_below(n);
            if x != 0 && Integer::from(x.gcd_ref(n)) == 1 {
                return x;
            }
        }
    }

    /// Returns a probable prime of exactly `bits` bits whose two leading
    /// bits are set, so that the product of two such primes has exactly
    /// `2 * bits` bits.
    pub fn next_prime(&mut self, bits: usize) -> Integer {
        assert!(bits >= 3, "prime size must be at least 3 bits, got {bits}");
        loop {
            let mut x: Integer = self.next_integer_bits(bits);
            x.set_bit((bits - 1) as u32, true);
            x.set_bit((bits - 2) as u32, true);
            x.set_bit(0, true);
            let p: Integer = x.next_prime();
            if p.significant_bits() as usize == bits {
                return p;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rug::{Integer, integer::IsPrime};

    use crate::{integer::PRIME_REPS, source::Source};

    #[test]
    fn integer_bits_stays_in_range() {
        let mut source: Source = Source::new([7u8; 32]);
        for bits in [1usize, 7, 8, 9, 63, 130] {
            for _ in 0..32 {
                let x: Integer = source.next_integer_bits(bits);
                assert!(x.significant_bits() as usize <= bits);
            }
        }
        assert_eq!(source.next_integer_bits(0), 0);
    }

    #[test]
    fn integer_below_respects_bound() {
        let mut source: Source = Source::new([1u8; 32]);
        let bound: Integer = Integer::from(1000);
        for _ in 0..256 {
            let x: Integer = source.next_integer_below(&bound);
            assert!(x >= 0 && x < bound);
        }
    }

    #[test]
    fn unit_is_coprime() {
        let mut source: Source = Source::new([2u8; 32]);
        let n: Integer = Integer::from(3 * 5 * 7 * 11);
        for _ in 0..64 {
            let u: Integer = source.next_unit(&n);
            assert_eq!(Integer::from(u.gcd_ref(&n)), 1);
        }
    }

    #[test]
    fn prime_has_exact_size() {
        let mut source: Source = Source::new([3u8; 32]);
        for bits in [16usize, 64, 128] {
            let p: Integer = source.next_prime(bits);
            assert_eq!(p.significant_bits() as usize, bits);
            assert_ne!(p.is_probably_prime(PRIME_REPS), IsPrime::No);
        }
    }
}
