//! Typed transaction structures.
//!
//! A transaction is a prefix (inputs, stealth outputs, tx public keys) plus
//! the RingCT part (fee, pseudo outputs, range proofs, one CLSAG per input).
//! The blob is the bincode encoding of the whole structure and the tx hash
//! is Keccak-256 of the blob.

use serde::{Deserialize, Serialize};
use veil_crypto::clsag::ClsagSignature;
use veil_types::{keccak256, ChainInput, ChainOutput, ChainTx};

use crate::TxError;

pub const TX_VERSION: u8 = 2;

/// Complete transaction (prefix + RingCT signatures).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub prefix: TxPrefix,
    pub rct: RctSignatures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPrefix {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub tx_pub_key: [u8; 32],
    /// One per output when any destination is a subaddress, else empty.
    pub additional_pub_keys: Vec<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Ring member global indices, relative: first absolute, then deltas.
    pub key_offsets: Vec<u64>,
    pub key_image: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub public_key: [u8; 32],
    pub view_tag: u8,
    pub encrypted_amount: [u8; 8],
    pub commitment: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RctSignatures {
    pub fee: u64,
    /// One per input, same order.
    pub pseudo_outs: Vec<[u8; 32]>,
    /// One per output, same order.
    pub range_proofs: Vec<Vec<u8>>,
    /// One per input, same order.
    pub clsags: Vec<ClsagSignature>,
}

/// Sorted absolute global indices to the relative form stored in inputs.
pub fn absolute_to_relative(indices: &[u64]) -> Vec<u64> {
    let mut prev = 0;
    indices
        .iter()
        .map(|&idx| {
            let delta = idx.saturating_sub(prev);
            prev = idx;
            delta
        })
        .collect()
}

pub fn relative_to_absolute(offsets: &[u64]) -> Result<Vec<u64>, TxError> {
    let mut acc = 0u64;
    offsets
        .iter()
        .map(|&off| {
            acc = acc
                .checked_add(off)
                .ok_or_else(|| TxError::Invalid("key offset overflow".into()))?;
            Ok(acc)
        })
        .collect()
}

impl TxPrefix {
    pub fn hash(&self) -> Result<[u8; 32], TxError> {
        let bytes = bincode::serialize(self).map_err(|e| TxError::Serialize(e.to_string()))?;
        Ok(keccak256(&bytes))
    }
}

impl Transaction {
    pub fn to_bytes(&self) -> Result<Vec<u8>, TxError> {
        bincode::serialize(self).map_err(|e| TxError::Serialize(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TxError> {
        bincode::deserialize(data).map_err(|e| TxError::Parse(e.to_string()))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, TxError> {
        let bytes = hex::decode(hex_str).map_err(|e| TxError::Parse(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Keccak-256 of the blob.
    pub fn tx_hash(&self) -> Result<[u8; 32], TxError> {
        Ok(keccak256(&self.to_bytes()?))
    }

    pub fn prefix_hash(&self) -> Result<[u8; 32], TxError> {
        self.prefix.hash()
    }

    /// The message every CLSAG in the transaction signs:
    /// `H(prefix_hash || H(fee || pseudo_outs) || H(range_proofs))`.
    pub fn signing_message(&self) -> Result<[u8; 32], TxError> {
        let mut base = Vec::with_capacity(8 + 32 * self.rct.pseudo_outs.len());
        base.extend_from_slice(&self.rct.fee.to_le_bytes());
        for p in &self.rct.pseudo_outs {
            base.extend_from_slice(p);
        }
        let mut proofs = Vec::new();
        for proof in &self.rct.range_proofs {
            proofs.extend_from_slice(proof);
        }

        let mut msg = Vec::with_capacity(96);
        msg.extend_from_slice(&self.prefix_hash()?);
        msg.extend_from_slice(&keccak256(&base));
        msg.extend_from_slice(&keccak256(&proofs));
        Ok(keccak256(&msg))
    }

    pub fn input_count(&self) -> usize {
        self.prefix.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.prefix.outputs.len()
    }

    pub fn key_images(&self) -> Vec<[u8; 32]> {
        self.prefix.inputs.iter().map(|i| i.key_image).collect()
    }

    /// The wallet-side view of this transaction once a daemon has assigned
    /// `output_indices` to its outputs.
    pub fn to_chain_tx(&self, output_indices: &[u64]) -> Result<ChainTx, TxError> {
        if output_indices.len() != self.prefix.outputs.len() {
            return Err(TxError::Invalid(format!(
                "{} outputs but {} output indices",
                self.prefix.outputs.len(),
                output_indices.len()
            )));
        }
        let inputs = self
            .prefix
            .inputs
            .iter()
            .map(|input| {
                Ok(ChainInput {
                    key_image: input.key_image,
                    ring: relative_to_absolute(&input.key_offsets)?,
                })
            })
            .collect::<Result<Vec<_>, TxError>>()?;
        let outputs = self
            .prefix
            .outputs
            .iter()
            .zip(output_indices)
            .map(|(out, &global_index)| ChainOutput {
                global_index,
                public_key: out.public_key,
                view_tag: Some(out.view_tag),
                encrypted_amount: out.encrypted_amount,
                amount: 0,
                commitment: out.commitment,
            })
            .collect();
        Ok(ChainTx {
            hash: self.tx_hash()?,
            unlock_time: self.prefix.unlock_time,
            is_coinbase: false,
            tx_pub_key: Some(self.prefix.tx_pub_key),
            additional_pub_keys: self.prefix.additional_pub_keys.clone(),
            inputs,
            outputs,
        })
    }
}
