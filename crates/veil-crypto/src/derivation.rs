//! Stealth-address derivations and output scanning helpers.
//!
//! Sender side: `D = r·A`; receiver side: `D = a·R`. Both sides then
//! agree on `s_i = H_s(D || varint(i))` for output `i`, which drives the
//! one-time key, the view tag, the encrypted amount and the commitment mask.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use veil_types::base58::write_varint;

use crate::{compress, decompress, hash_to_scalar, keccak256, mul_base, CryptoError};

/// Shared key derivation `secret · public`.
pub fn generate_key_derivation(
    public: &[u8; 32],
    secret: &Scalar,
) -> Result<[u8; 32], CryptoError> {
    Ok(compress(&(secret * decompress(public)?)))
}

fn with_index(prefix: &[u8], derivation: &[u8; 32], index: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(prefix.len() + 32 + 10);
    buf.extend_from_slice(prefix);
    buf.extend_from_slice(derivation);
    write_varint(&mut buf, index);
    buf
}

/// `H_s(D || varint(i))`
pub fn derivation_to_scalar(derivation: &[u8; 32], index: u64) -> Scalar {
    hash_to_scalar(&[&with_index(b"", derivation, index)])
}

/// One-time output key `Ko = H_s(D||i)·G + B`.
pub fn derive_public_key(
    derivation: &[u8; 32],
    index: u64,
    spend_public: &[u8; 32],
) -> Result<[u8; 32], CryptoError> {
    let base = decompress(spend_public)?;
    Ok(compress(&(mul_base(&derivation_to_scalar(derivation, index)) + base)))
}

/// Recover the spend key an output was sent to: `B' = Ko - H_s(D||i)·G`.
pub fn derive_subaddress_public_key(
    output_key: &[u8; 32],
    derivation: &[u8; 32],
    index: u64,
) -> Result<[u8; 32], CryptoError> {
    let ko: RistrettoPoint = decompress(output_key)?;
    Ok(compress(&(ko - mul_base(&derivation_to_scalar(derivation, index)))))
}

/// One-time secret `x = H_s(D||i) + b`, where `b` already includes any
/// subaddress offset.
pub fn derive_secret_key(derivation: &[u8; 32], index: u64, spend_secret: &Scalar) -> Scalar {
    derivation_to_scalar(derivation, index) + spend_secret
}

/// `keccak("view_tag" || D || varint(i))[0]`
pub fn derive_view_tag(derivation: &[u8; 32], index: u64) -> u8 {
    keccak256(&with_index(b"view_tag", derivation, index))[0]
}

fn amount_factor(shared_secret: &Scalar) -> [u8; 32] {
    let mut buf = Vec::with_capacity(6 + 32);
    buf.extend_from_slice(b"amount");
    buf.extend_from_slice(shared_secret.as_bytes());
    keccak256(&buf)
}

/// XOR the little-endian amount with `keccak("amount" || s)[..8]`.
pub fn encrypt_amount(amount: u64, shared_secret: &Scalar) -> [u8; 8] {
    let factor = amount_factor(shared_secret);
    let mut out = amount.to_le_bytes();
    for (b, f) in out.iter_mut().zip(factor.iter()) {
        *b ^= f;
    }
    out
}

pub fn decrypt_amount(encrypted: &[u8; 8], shared_secret: &Scalar) -> u64 {
    let factor = amount_factor(shared_secret);
    let mut out = *encrypted;
    for (b, f) in out.iter_mut().zip(factor.iter()) {
        *b ^= f;
    }
    u64::from_le_bytes(out)
}

/// Commitment mask `H_s("commitment_mask" || s)`.
pub fn commitment_mask(shared_secret: &Scalar) -> Scalar {
    hash_to_scalar(&[b"commitment_mask", shared_secret.as_bytes()])
}
