//! Chain data as handed to the wallet by a daemon.
//!
//! These are wallet-side views: only the fields needed for output detection,
//! spend detection and reorg handling are kept.

use crate::serde_hex;
use serde::{Deserialize, Serialize};

/// One block with the transactions the wallet needs to scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub height: u64,
    #[serde(with = "serde_hex")]
    pub hash: [u8; 32],
    #[serde(with = "serde_hex")]
    pub prev_hash: [u8; 32],
    pub timestamp: u64,
    /// Coinbase first, then the block's transactions in block order.
    pub txs: Vec<ChainTx>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTx {
    #[serde(with = "serde_hex")]
    pub hash: [u8; 32],
    pub unlock_time: u64,
    pub is_coinbase: bool,
    #[serde(with = "serde_hex::option", default)]
    pub tx_pub_key: Option<[u8; 32]>,
    /// One per output when present.
    #[serde(with = "serde_hex::vec", default)]
    pub additional_pub_keys: Vec<[u8; 32]>,
    pub inputs: Vec<ChainInput>,
    pub outputs: Vec<ChainOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInput {
    #[serde(with = "serde_hex")]
    pub key_image: [u8; 32],
    /// Absolute global indices of the ring members.
    pub ring: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOutput {
    pub global_index: u64,
    #[serde(with = "serde_hex")]
    pub public_key: [u8; 32],
    pub view_tag: Option<u8>,
    /// Zero for coinbase outputs, whose amount is in the clear.
    #[serde(with = "serde_hex")]
    pub encrypted_amount: [u8; 8],
    /// Cleartext amount of a coinbase output.
    #[serde(default)]
    pub amount: u64,
    #[serde(with = "serde_hex")]
    pub commitment: [u8; 32],
}

/// A ring member fetched by global index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingMember {
    pub global_index: u64,
    #[serde(with = "serde_hex")]
    pub public_key: [u8; 32],
    #[serde(with = "serde_hex")]
    pub commitment: [u8; 32],
}

impl ChainTx {
    /// The tx public key used to derive output `index`.
    pub fn derivation_key(&self, index: usize) -> Option<[u8; 32]> {
        self.additional_pub_keys.get(index).copied().or(self.tx_pub_key)
    }
}
