//! Boundary encodings for field elements
//!
//! Witness bundles carry decimal strings; proofs and log output use hex.

use halo2_base::halo2_proofs::halo2curves::bn256::Fr;
use halo2_base::utils::{biguint_to_fe, fe_to_biguint, modulus};
use num_bigint::BigUint;

use crate::error::{AttestationError, Result};

/// Parse a decimal string into a field element, rejecting values `>= p`.
pub fn decimal_to_field(dec: &str) -> Result<Fr> {
    let dec = dec.trim();
    if dec.is_empty() || !dec.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AttestationError::InvalidWitness(format!(
            "not a decimal integer: {:?}",
            dec
        )));
    }
    let value = BigUint::parse_bytes(dec.as_bytes(), 10).ok_or_else(|| {
        AttestationError::InvalidWitness(format!("not a decimal integer: {:?}", dec))
    })?;
    biguint_to_field(&value)
}

pub fn field_to_decimal(fe: &Fr) -> String {
    fe_to_biguint(fe).to_string()
}

/// Parse a batch of decimal strings, requiring an exact count.
pub fn decimals_to_fields(values: &[String], expected: usize, what: &str) -> Result<Vec<Fr>> {
    if values.len() != expected {
        return Err(AttestationError::InvalidWitness(format!(
            "{} has {} entries, expected {}",
            what,
            values.len(),
            expected
        )));
    }
    values.iter().map(|v| decimal_to_field(v)).collect()
}

pub fn fields_to_decimals(values: &[Fr]) -> Vec<String> {
    values.iter().map(field_to_decimal).collect()
}

/// Convert hex string (optional "0x" prefix, big-endian) to a field element
pub fn hex_to_field(hex: &str) -> Result<Fr> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let bytes = hex::decode(hex)
        .map_err(|e| AttestationError::InvalidWitness(format!("invalid hex: {}", e)))?;
    if bytes.len() > 32 {
        return Err(AttestationError::InvalidWitness(format!(
            "hex string too long: {} bytes",
            bytes.len()
        )));
    }
    let value = BigUint::from_bytes_be(&bytes);
    biguint_to_field(&value)
}

/// Convert field element to a 0x-prefixed, 32-byte big-endian hex string
pub fn field_to_hex(fe: &Fr) -> String {
    // Fr::to_bytes() is little-endian
    let mut bytes_be = fe.to_bytes();
    bytes_be.reverse();
    format!("0x{}", hex::encode(bytes_be))
}

pub fn biguint_to_field(value: &BigUint) -> Result<Fr> {
    if *value >= modulus::<Fr>() {
        return Err(AttestationError::InvalidWitness(format!(
            "{} is not below the field modulus",
            value
        )));
    }
    Ok(biguint_to_fe(value))
}

pub fn field_to_biguint(fe: &Fr) -> BigUint {
    fe_to_biguint(fe)
}
