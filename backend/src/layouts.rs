use rug::{Integer, integer::Order};

use crate::error::HalError;

/// Number of bytes of a fixed-width operand of `bits` bits.
#[inline]
pub fn byte_len(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Allocates a zeroed buffer of `len` bytes, reporting allocation failure
/// instead of aborting.
pub fn alloc_zeroed(len: usize) -> Result<Vec<u8>, HalError> {
    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.resize(len, 0);
    Ok(buf)
}

fn alloc_copy(src: &[u8]) -> Result<Vec<u8>, HalError> {
    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(src.len())?;
    buf.extend_from_slice(src);
    Ok(buf)
}

/// Encodes a non-negative integer as a big-endian buffer of exactly `len` bytes.
pub fn encode_be(value: &Integer, len: usize) -> Result<Vec<u8>, HalError> {
    if *value < 0 {
        return Err(HalError::Operand(format!("negative value {value} cannot be encoded")));
    }
    let digits: Vec<u8> = value.to_digits::<u8>(Order::Msf);
    if digits.len() > len {
        return Err(HalError::Operand(format!(
            "value needs {} bytes but the operand width is {len}",
            digits.len()
        )));
    }
    let mut buf: Vec<u8> = alloc_zeroed(len)?;
    buf[len - digits.len()..].copy_from_slice(&digits);
    Ok(buf)
}

/// Decodes a big-endian buffer.
#[inline]
pub fn decode_be(bytes: &[u8]) -> Integer {
    Integer::from_digits(bytes, Order::Msf)
}

/// A validated `(base, exponent, modulus)` triple of fixed-width big-endian
/// buffers, all `ceil(bits / 8)` bytes long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModExpOperands {
    bits: usize,
    base: Vec<u8>,
    exponent: Vec<u8>,
    modulus: Vec<u8>,
}

impl ModExpOperands {
    /// Copies caller buffers into a new operand triple.
    ///
    /// Every buffer must be exactly `ceil(bits / 8)` bytes and the modulus
    /// must be non-zero. Validation happens before anything is allocated.
    pub fn from_be_bytes(bits: usize, base: &[u8], exponent: &[u8], modulus: &[u8]) -> Result<Self, HalError> {
        if bits == 0 {
            return Err(HalError::Operand("bit width must be non-zero".into()));
        }
        let len: usize = byte_len(bits);
        for (name, buf) in [("base", base), ("exponent", exponent), ("modulus", modulus)] {
            if buf.len() != len {
                return Err(HalError::Operand(format!(
                    "{name} is {} bytes, expected {len} for a {bits}-bit width",
                    buf.len()
                )));
            }
        }
        if modulus.iter().all(|&b| b == 0) {
            return Err(HalError::Operand("modulus must be non-zero".into()));
        }
        Ok(Self {
            bits,
            base: alloc_copy(base)?,
            exponent: alloc_copy(exponent)?,
            modulus: alloc_copy(modulus)?,
        })
    }

    /// Encodes integers at the given bit width.
    pub fn from_integers(bits: usize, base: &Integer, exponent: &Integer, modulus: &Integer) -> Result<Self, HalError> {
        if bits == 0 {
            return Err(HalError::Operand("bit width must be non-zero".into()));
        }
        if *modulus <= 0 {
            return Err(HalError::Operand(format!("modulus must be positive, got {modulus}")));
        }
        let len: usize = byte_len(bits);
        Ok(Self {
            bits,
            base: encode_be(base, len)?,
            exponent: encode_be(exponent, len)?,
            modulus: encode_be(modulus, len)?,
        })
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Width in bytes of every operand and of the result.
    pub fn len(&self) -> usize {
        self.modulus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modulus.is_empty()
    }

    pub fn base(&self) -> &[u8] {
        &self.base
    }

    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// Decodes the triple as `(base, exponent, modulus)`.
    pub fn to_integers(&self) -> (Integer, Integer, Integer) {
        (decode_be(&self.base), decode_be(&self.exponent), decode_be(&self.modulus))
    }

    /// Encodes a result at the operand width.
    pub fn encode_result(&self, value: &Integer) -> Result<Vec<u8>, HalError> {
        encode_be(value, self.len())
    }
}

#[cfg(test)]
mod tests {
    use rug::Integer;

    use super::{ModExpOperands, byte_len, decode_be, encode_be};
    use crate::error::HalError;

    #[test]
    fn byte_len_rounds_up() {
        assert_eq!(byte_len(1), 1);
        assert_eq!(byte_len(8), 1);
        assert_eq!(byte_len(9), 2);
        assert_eq!(byte_len(1024), 128);
    }

    #[test]
    fn encode_pads_on_the_left() {
        let buf: Vec<u8> = encode_be(&Integer::from(0x0102), 4).unwrap();
        assert_eq!(buf, vec![0, 0, 1, 2]);
        assert_eq!(decode_be(&buf), 0x0102);
    }

    #[test]
    fn encode_rejects_overflow_and_negatives() {
        assert!(matches!(encode_be(&Integer::from(256), 1), Err(HalError::Operand(_))));
        assert!(matches!(encode_be(&Integer::from(-1), 8), Err(HalError::Operand(_))));
    }

    #[test]
    fn operands_validate_widths() {
        let ok: [u8; 2] = [0, 7];
        assert!(ModExpOperands::from_be_bytes(16, &ok, &ok, &ok).is_ok());
        assert!(matches!(
            ModExpOperands::from_be_bytes(16, &ok[..1], &ok, &ok),
            Err(HalError::Operand(_))
        ));
        assert!(matches!(ModExpOperands::from_be_bytes(0, &[], &[], &[]), Err(HalError::Operand(_))));
        assert!(matches!(
            ModExpOperands::from_be_bytes(16, &ok, &ok, &[0, 0]),
            Err(HalError::Operand(_))
        ));
    }

    #[test]
    fn operands_from_integers() {
        let ops: ModExpOperands =
            ModExpOperands::from_integers(1024, &Integer::from(216), &Integer::from(3), &Integer::from(7)).unwrap();
        assert_eq!(ops.len(), 128);
        assert_eq!(ops.bits(), 1024);
        let (b, e, m) = ops.to_integers();
        assert_eq!((b, e, m), (Integer::from(216), Integer::from(3), Integer::from(7)));
        assert!(ModExpOperands::from_integers(8, &Integer::from(1), &Integer::from(1), &Integer::from(0)).is_err());
    }
}
