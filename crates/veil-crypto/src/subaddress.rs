//! Subaddress key derivation.
//!
//! For index `(major, minor) != (0, 0)`:
//! `m = H_s("SubAddr\0" || a || major_le || minor_le)`, spend key
//! `D = B + m·G`, view key `C = a·D`. The primary index maps to `(B, A)`.

use curve25519_dalek::scalar::Scalar;

use crate::{compress, decompress, hash_to_scalar, mul_base, CryptoError};

/// `m` for a subaddress index; zero for the primary address.
pub fn subaddress_secret_key(view_secret: &Scalar, major: u32, minor: u32) -> Scalar {
    if major == 0 && minor == 0 {
        return Scalar::ZERO;
    }
    hash_to_scalar(&[
        b"SubAddr\0",
        view_secret.as_bytes(),
        &major.to_le_bytes(),
        &minor.to_le_bytes(),
    ])
}

/// `(spend_public, view_public)` for a subaddress index.
pub fn subaddress_keys(
    spend_public: &[u8; 32],
    view_secret: &Scalar,
    major: u32,
    minor: u32,
) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let b = decompress(spend_public)?;
    if major == 0 && minor == 0 {
        return Ok((*spend_public, compress(&mul_base(view_secret))));
    }
    let d = b + mul_base(&subaddress_secret_key(view_secret, major, minor));
    Ok((compress(&d), compress(&(view_secret * d))))
}

/// Spend public keys for a rectangle of indices, for the scan lookup table.
pub fn subaddress_spend_keys(
    spend_public: &[u8; 32],
    view_secret: &Scalar,
    majors: std::ops::Range<u32>,
    minors: std::ops::Range<u32>,
) -> Result<Vec<([u8; 32], (u32, u32))>, CryptoError> {
    let b = decompress(spend_public)?;
    let mut out = Vec::with_capacity(majors.len() * minors.len());
    for major in majors {
        for minor in minors.clone() {
            let m = subaddress_secret_key(view_secret, major, minor);
            out.push((compress(&(b + mul_base(&m))), (major, minor)));
        }
    }
    Ok(out)
}
