use itertools::izip;
use rug::Integer;

use crate::{error::HalError, layouts::ModExpOperands};

/// Number of lanes processed together by the multi-buffered CPU path.
pub const MB_LANES: usize = 8;

/// Computes `base^exponent mod modulus`.
pub fn modexp(base: &Integer, exponent: &Integer, modulus: &Integer) -> Result<Integer, HalError> {
    if *modulus <= 0 {
        return Err(HalError::Operand(format!("modulus must be positive, got {modulus}")));
    }
    if *exponent < 0 {
        return Err(HalError::Operand(format!("exponent must be non-negative, got {exponent}")));
    }
    base.clone()
        .pow_mod(exponent, modulus)
        .map_err(|_| HalError::Operand("modular exponentiation is undefined for these operands".into()))
}

/// Computes the result of a fixed-width job, encoded at the operand width.
pub fn modexp_operands(operands: &ModExpOperands) -> Result<Vec<u8>, HalError> {
    let (base, exponent, modulus) = operands.to_integers();
    operands.encode_result(&modexp(&base, &exponent, &modulus)?)
}

/// Multi-buffered exponentiation: processes the inputs in groups of
/// [`MB_LANES`], every lane sharing one modulus.
///
/// # Panics
///
/// Panics if `bases` and `exponents` differ in length.
pub fn modexp_mb(bases: &[Integer], exponents: &[Integer], modulus: &Integer) -> Result<Vec<Integer>, HalError> {
    assert_eq!(
        bases.len(),
        exponents.len(),
        "bases.len()={} != exponents.len()={}",
        bases.len(),
        exponents.len()
    );
    let mut out: Vec<Integer> = Vec::with_capacity(bases.len());
    for (b_lanes, e_lanes) in izip!(bases.chunks(MB_LANES), exponents.chunks(MB_LANES)) {
        let mut lanes: [Integer; MB_LANES] = Default::default();
        for (lane, b, e) in izip!(lanes.iter_mut(), b_lanes, e_lanes) {
            *lane = modexp(b, e, modulus)?;
        }
        out.extend(lanes.into_iter().take(b_lanes.len()));
    }
    Ok(out)
}
