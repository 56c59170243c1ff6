//! Pedersen commitments `C = amount·H + mask·G`.

use bulletproofs::PedersenGens;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;

use crate::{compress, generator_h};

/// Generators in the order the range prover expects: value base first.
pub fn pedersen_gens() -> PedersenGens {
    PedersenGens { B: generator_h(), B_blinding: RISTRETTO_BASEPOINT_POINT }
}

pub fn commit_point(amount: u64, mask: &Scalar) -> RistrettoPoint {
    pedersen_gens().commit(Scalar::from(amount), *mask)
}

pub fn commit(amount: u64, mask: &Scalar) -> [u8; 32] {
    compress(&commit_point(amount, mask))
}

/// Commitment to a cleartext amount, with mask one.
pub fn zero_commit(amount: u64) -> [u8; 32] {
    commit(amount, &Scalar::ONE)
}

/// `amount·H`, used for the fee term in the balance equation.
pub fn amount_point(amount: u64) -> RistrettoPoint {
    Scalar::from(amount) * generator_h()
}
