//! CLSAG (Compact Linkable Spontaneous Anonymous Group) ring signatures.
//!
//! One signature proves knowledge of the secret key of one ring member and
//! that the member's commitment minus the pseudo output commits to zero,
//! without revealing which member. The key image makes it linkable.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::VartimeMultiscalarMul;
use serde::{Deserialize, Serialize};

use crate::{compress, decompress, hash_to_point, hash_to_scalar, mul_base, random_scalar, CryptoError};

// ─── Domain separators (32-byte zero-padded) ────────────────────────────────

fn pad_domain(s: &[u8]) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[..s.len()].copy_from_slice(s);
    buf
}

fn clsag_agg_0() -> [u8; 32] { pad_domain(b"CLSAG_agg_0") }
fn clsag_agg_1() -> [u8; 32] { pad_domain(b"CLSAG_agg_1") }
fn clsag_round() -> [u8; 32] { pad_domain(b"CLSAG_round") }

// ─── Signature ──────────────────────────────────────────────────────────────

/// CLSAG signature: `s[0..n]`, `c1`, key image `I`, commitment image `D`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClsagSignature {
    pub s: Vec<[u8; 32]>,
    pub c1: [u8; 32],
    pub key_image: [u8; 32],
    pub commitment_image: [u8; 32],
}

/// What the signer knows about its own ring member.
pub struct ClsagSecret {
    /// Position of the real output in the ring.
    pub index: usize,
    /// One-time secret key of the real output.
    pub key: Scalar,
    /// `mask_real - mask_pseudo`, the G-opening of `C[l] - C_pseudo`.
    pub mask_delta: Scalar,
}

/// Ring data shared by signer and verifier.
struct Ring<'a> {
    keys: &'a [[u8; 32]],
    commitments: &'a [[u8; 32]],
    pseudo_output: &'a [u8; 32],
    key_points: Vec<RistrettoPoint>,
    key_hashes: Vec<RistrettoPoint>,
    c_diff: Vec<RistrettoPoint>,
}

impl<'a> Ring<'a> {
    fn new(
        keys: &'a [[u8; 32]],
        commitments: &'a [[u8; 32]],
        pseudo_output: &'a [u8; 32],
    ) -> Result<Self, CryptoError> {
        if keys.is_empty() || keys.len() != commitments.len() {
            return Err(CryptoError::InvalidRing(format!(
                "{} keys, {} commitments",
                keys.len(),
                commitments.len()
            )));
        }
        let pseudo = decompress(pseudo_output)?;
        let key_points = keys.iter().map(decompress).collect::<Result<Vec<_>, _>>()?;
        let c_diff = commitments
            .iter()
            .map(|c| decompress(c).map(|p| p - pseudo))
            .collect::<Result<Vec<_>, _>>()?;
        let key_hashes = keys.iter().map(|k| hash_to_point(k)).collect();
        Ok(Ring { keys, commitments, pseudo_output, key_points, key_hashes, c_diff })
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    /// Aggregation coefficients `(mu_P, mu_C)`.
    fn aggregate(&self, key_image: &[u8; 32], commitment_image: &[u8; 32]) -> (Scalar, Scalar) {
        let agg0 = clsag_agg_0();
        let agg1 = clsag_agg_1();
        let mut parts: Vec<&[u8]> = Vec::with_capacity(2 * self.len() + 4);
        parts.push(&agg0);
        parts.extend(self.keys.iter().map(|k| &k[..]));
        parts.extend(self.commitments.iter().map(|c| &c[..]));
        parts.push(key_image);
        parts.push(commitment_image);
        parts.push(self.pseudo_output);
        let mu_p = hash_to_scalar(&parts);
        parts[0] = &agg1;
        let mu_c = hash_to_scalar(&parts);
        (mu_p, mu_c)
    }

    fn challenge(&self, message: &[u8; 32], l: &RistrettoPoint, r: &RistrettoPoint) -> Scalar {
        let round = clsag_round();
        let l = compress(l);
        let r = compress(r);
        let mut parts: Vec<&[u8]> = Vec::with_capacity(2 * self.len() + 5);
        parts.push(&round);
        parts.extend(self.keys.iter().map(|k| &k[..]));
        parts.extend(self.commitments.iter().map(|c| &c[..]));
        parts.push(self.pseudo_output);
        parts.push(message);
        parts.push(&l);
        parts.push(&r);
        hash_to_scalar(&parts)
    }

    /// `L = s·G + c·mu_P·P[i] + c·mu_C·C[i]`, `R = s·H_p(P[i]) + c·mu_P·I + c·mu_C·D`.
    #[allow(clippy::too_many_arguments)]
    fn round_points(
        &self,
        i: usize,
        s: Scalar,
        c: Scalar,
        mu_p: Scalar,
        mu_c: Scalar,
        key_image: &RistrettoPoint,
        commitment_image: &RistrettoPoint,
    ) -> (RistrettoPoint, RistrettoPoint) {
        let c_mu_p = c * mu_p;
        let c_mu_c = c * mu_c;
        let l = RistrettoPoint::vartime_multiscalar_mul(
            [s, c_mu_p, c_mu_c],
            [RISTRETTO_BASEPOINT_POINT, self.key_points[i], self.c_diff[i]],
        );
        let r = RistrettoPoint::vartime_multiscalar_mul(
            [s, c_mu_p, c_mu_c],
            [self.key_hashes[i], *key_image, *commitment_image],
        );
        (l, r)
    }
}

// ─── Sign ───────────────────────────────────────────────────────────────────

/// Sign `message` over `ring` / `commitments` with pseudo output `pseudo_output`.
pub fn sign(
    message: &[u8; 32],
    ring_keys: &[[u8; 32]],
    commitments: &[[u8; 32]],
    pseudo_output: &[u8; 32],
    secret: &ClsagSecret,
) -> Result<ClsagSignature, CryptoError> {
    let ring = Ring::new(ring_keys, commitments, pseudo_output)?;
    let n = ring.len();
    let l = secret.index;
    if l >= n {
        return Err(CryptoError::InvalidRing(format!("secret index {} out of {}", l, n)));
    }
    if mul_base(&secret.key) != ring.key_points[l] {
        return Err(CryptoError::InvalidRing("secret key does not open ring member".into()));
    }

    let h_p = ring.key_hashes[l];
    let key_image_pt = secret.key * h_p;
    let commitment_image_pt = secret.mask_delta * h_p;
    let key_image = compress(&key_image_pt);
    let commitment_image = compress(&commitment_image_pt);
    let (mu_p, mu_c) = ring.aggregate(&key_image, &commitment_image);

    let alpha = random_scalar();
    let mut c = ring.challenge(message, &mul_base(&alpha), &(alpha * h_p));

    let mut s = vec![[0u8; 32]; n];
    let mut c1 = c;
    let mut i = (l + 1) % n;
    while i != l {
        if i == 0 {
            c1 = c;
        }
        let s_i = random_scalar();
        s[i] = s_i.to_bytes();
        let (lp, rp) = ring.round_points(i, s_i, c, mu_p, mu_c, &key_image_pt, &commitment_image_pt);
        c = ring.challenge(message, &lp, &rp);
        i = (i + 1) % n;
    }
    if l == 0 {
        c1 = c;
    }

    // Close the ring at the real index.
    s[l] = (alpha - c * (mu_p * secret.key + mu_c * secret.mask_delta)).to_bytes();

    Ok(ClsagSignature { s, c1: c1.to_bytes(), key_image, commitment_image })
}

// ─── Verify ─────────────────────────────────────────────────────────────────

pub fn verify(
    message: &[u8; 32],
    sig: &ClsagSignature,
    ring_keys: &[[u8; 32]],
    commitments: &[[u8; 32]],
    pseudo_output: &[u8; 32],
) -> bool {
    let ring = match Ring::new(ring_keys, commitments, pseudo_output) {
        Ok(r) => r,
        Err(e) => {
            log::debug!("clsag ring rejected: {}", e);
            return false;
        }
    };
    if sig.s.len() != ring.len() {
        log::debug!("clsag has {} responses for a ring of {}", sig.s.len(), ring.len());
        return false;
    }
    let (key_image_pt, commitment_image_pt) =
        match (decompress(&sig.key_image), decompress(&sig.commitment_image)) {
            (Ok(i), Ok(d)) => (i, d),
            _ => return false,
        };
    let (mu_p, mu_c) = ring.aggregate(&sig.key_image, &sig.commitment_image);

    let mut c = Scalar::from_bytes_mod_order(sig.c1);
    for (i, s_i) in sig.s.iter().enumerate() {
        let s_i = Scalar::from_bytes_mod_order(*s_i);
        let (lp, rp) = ring.round_points(i, s_i, c, mu_p, mu_c, &key_image_pt, &commitment_image_pt);
        c = ring.challenge(message, &lp, &rp);
    }
    let valid = c.to_bytes() == sig.c1;
    if !valid {
        log::debug!("clsag challenge does not close for key image {}", hex::encode(sig.key_image));
    }
    valid
}
