//! 64-bit Bulletproof range proofs over output commitments.

use bulletproofs::{BulletproofGens, RangeProof};
use curve25519_dalek::ristretto::CompressedRistretto;
use curve25519_dalek::scalar::Scalar;
use merlin::Transcript;
use std::sync::OnceLock;

use crate::commitment::pedersen_gens;
use crate::CryptoError;

const RANGE_BITS: usize = 64;
const TRANSCRIPT_LABEL: &[u8] = b"veil_output_range";

fn bp_gens() -> &'static BulletproofGens {
    static GENS: OnceLock<BulletproofGens> = OnceLock::new();
    GENS.get_or_init(|| BulletproofGens::new(RANGE_BITS, 1))
}

/// Prove `amount` in `[0, 2^64)` for `C = amount·H + mask·G`.
///
/// Returns the serialized proof and the commitment it binds to.
pub fn prove(amount: u64, mask: &Scalar) -> Result<(Vec<u8>, [u8; 32]), CryptoError> {
    let mut transcript = Transcript::new(TRANSCRIPT_LABEL);
    let (proof, commitment) = RangeProof::prove_single(
        bp_gens(),
        &pedersen_gens(),
        &mut transcript,
        amount,
        mask,
        RANGE_BITS,
    )
    .map_err(|e| CryptoError::RangeProof(e.to_string()))?;
    Ok((proof.to_bytes(), commitment.to_bytes()))
}

/// Verify a serialized proof against a compressed commitment.
pub fn verify(proof: &[u8], commitment: &[u8; 32]) -> bool {
    let proof = match RangeProof::from_bytes(proof) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("range proof does not parse: {:?}", e);
            return false;
        }
    };
    let mut transcript = Transcript::new(TRANSCRIPT_LABEL);
    let checked = proof.verify_single(
        bp_gens(),
        &pedersen_gens(),
        &mut transcript,
        &CompressedRistretto(*commitment),
        RANGE_BITS,
    );
    if let Err(e) = &checked {
        log::debug!("range proof rejected for {}: {:?}", hex::encode(commitment), e);
    }
    checked.is_ok()
}
