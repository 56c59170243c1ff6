//! Crypto primitives for the Veil wallet engine.
//!
//! Everything lives in the Ristretto prime-order group, so there is no
//! cofactor to clear: key images, derivations and commitments are plain
//! scalar multiplications.

use curve25519_dalek::constants::{RISTRETTO_BASEPOINT_POINT, RISTRETTO_BASEPOINT_TABLE};
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use thiserror::Error;

pub mod clsag;
pub mod commitment;
pub mod derivation;
pub mod rangeproof;
pub mod subaddress;

pub use veil_types::keccak256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid point encoding: {0}")]
    InvalidPoint(String),

    #[error("invalid ring: {0}")]
    InvalidRing(String),

    #[error("range proof error: {0}")]
    RangeProof(String),
}

/// Blake2b with variable output length (unkeyed).
pub fn blake2b_hash(data: &[u8], out_len: usize) -> Vec<u8> {
    blake2b_simd::Params::new()
        .hash_length(out_len)
        .hash(data)
        .as_bytes()
        .to_vec()
}

// ─── Points ─────────────────────────────────────────────────────────────────

pub fn decompress(bytes: &[u8; 32]) -> Result<RistrettoPoint, CryptoError> {
    CompressedRistretto(*bytes)
        .decompress()
        .ok_or_else(|| CryptoError::InvalidPoint(hex::encode(bytes)))
}

pub fn compress(p: &RistrettoPoint) -> [u8; 32] {
    p.compress().to_bytes()
}

/// `s·G`
pub fn mul_base(s: &Scalar) -> RistrettoPoint {
    s * RISTRETTO_BASEPOINT_TABLE
}

/// Public key for a secret key.
pub fn public_key(secret: &Scalar) -> [u8; 32] {
    compress(&mul_base(secret))
}

/// Hash to point: blake2b-512 of a domain-tagged input mapped onto the group.
pub fn hash_to_point(data: &[u8]) -> RistrettoPoint {
    let mut input = Vec::with_capacity(data.len() + 16);
    input.extend_from_slice(b"veil_hash_to_pt");
    input.extend_from_slice(data);
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&blake2b_hash(&input, 64));
    RistrettoPoint::from_uniform_bytes(&wide)
}

/// Second generator for amounts, with no known discrete log relative to G.
pub fn generator_h() -> RistrettoPoint {
    static H: std::sync::OnceLock<RistrettoPoint> = std::sync::OnceLock::new();
    *H.get_or_init(|| hash_to_point(RISTRETTO_BASEPOINT_POINT.compress().as_bytes()))
}

// ─── Scalars ────────────────────────────────────────────────────────────────

/// Hash to scalar: keccak256 of the concatenation, reduced mod l.
pub fn hash_to_scalar(data: &[&[u8]]) -> Scalar {
    let total: usize = data.iter().map(|d| d.len()).sum();
    let mut combined = Vec::with_capacity(total);
    for d in data {
        combined.extend_from_slice(d);
    }
    Scalar::from_bytes_mod_order(keccak256(&combined))
}

/// Reduce 32 bytes mod l.
pub fn sc_reduce(bytes: &[u8; 32]) -> Scalar {
    Scalar::from_bytes_mod_order(*bytes)
}

/// Uniformly random scalar from the thread RNG.
pub fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Key image `x·H_p(P)` for one-time key `P` with secret `x`.
pub fn key_image(secret: &Scalar, public: &[u8; 32]) -> [u8; 32] {
    compress(&(secret * hash_to_point(public)))
}
