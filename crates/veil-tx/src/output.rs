//! Stealth output construction.
//!
//! Each output gets a one-time key `Ko = H_s(D||i)·G + B`, a view tag, an
//! encrypted amount, a commitment and a range proof. When any destination is
//! a subaddress every output gets its own tx key `R_i` so the receiver's
//! `a·R_i` lands on the right derivation.

use curve25519_dalek::scalar::Scalar;
use veil_crypto::derivation::{
    commitment_mask, derivation_to_scalar, derive_public_key, derive_view_tag,
    encrypt_amount, generate_key_derivation,
};
use veil_crypto::{compress, decompress, mul_base, random_scalar, rangeproof};
use veil_types::Address;

use crate::types::TxOutput;
use crate::TxError;

/// A destination for funds in the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: Address,
    pub amount: u64,
}

impl Destination {
    pub fn new(address: Address, amount: u64) -> Self {
        Self { address, amount }
    }
}

/// Ephemeral keys of one transaction.
#[derive(Clone)]
pub struct TxKeys {
    pub tx_secret: Scalar,
    pub tx_pub_key: [u8; 32],
    pub additional_secrets: Vec<Scalar>,
    pub additional_pub_keys: Vec<[u8; 32]>,
}

impl std::fmt::Debug for TxKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxKeys")
            .field("tx_pub_key", &hex::encode(self.tx_pub_key))
            .field("additional_pub_keys", &self.additional_pub_keys.len())
            .finish_non_exhaustive()
    }
}

/// An output plus the openings only the sender knows.
#[derive(Debug, Clone)]
pub struct BuiltOutput {
    pub output: TxOutput,
    pub amount: u64,
    pub mask: Scalar,
    pub range_proof: Vec<u8>,
}

/// Build one output per destination, in the given order.
pub fn build_outputs(dests: &[Destination]) -> Result<(TxKeys, Vec<BuiltOutput>), TxError> {
    if dests.is_empty() {
        return Err(TxError::NoDestinations);
    }
    let tx_secret = random_scalar();
    let tx_pub_key = compress(&mul_base(&tx_secret));
    let per_output_keys = dests.iter().any(|d| d.address.is_subaddress());

    let mut keys = TxKeys {
        tx_secret,
        tx_pub_key,
        additional_secrets: Vec::new(),
        additional_pub_keys: Vec::new(),
    };
    let mut outputs = Vec::with_capacity(dests.len());

    for (i, dest) in dests.iter().enumerate() {
        let addr = &dest.address;
        let secret = if per_output_keys {
            let r_i = random_scalar();
            let r_pub = if addr.is_subaddress() {
                compress(&(r_i * decompress(&addr.spend_public_key)?))
            } else {
                compress(&mul_base(&r_i))
            };
            keys.additional_secrets.push(r_i);
            keys.additional_pub_keys.push(r_pub);
            r_i
        } else {
            tx_secret
        };

        let index = i as u64;
        let derivation = generate_key_derivation(&addr.view_public_key, &secret)?;
        let shared = derivation_to_scalar(&derivation, index);
        let mask = commitment_mask(&shared);
        let (range_proof, commitment) = rangeproof::prove(dest.amount, &mask)?;

        outputs.push(BuiltOutput {
            output: TxOutput {
                public_key: derive_public_key(&derivation, index, &addr.spend_public_key)?,
                view_tag: derive_view_tag(&derivation, index),
                encrypted_amount: encrypt_amount(dest.amount, &shared),
                commitment,
            },
            amount: dest.amount,
            mask,
            range_proof,
        });
    }

    log::debug!(
        "built {} outputs ({} additional tx keys)",
        outputs.len(),
        keys.additional_pub_keys.len()
    );
    Ok((keys, outputs))
}
