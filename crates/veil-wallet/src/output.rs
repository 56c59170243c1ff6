//! Wallet-side records of owned outputs.

use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};
use std::fmt;
use veil_types::constants::MAX_BLOCK_NUMBER;
use veil_types::serde_hex;

/// `(tx_hash, output_index)`. Stable across reorgs; ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputId {
    #[serde(with = "serde_hex")]
    pub tx_hash: [u8; 32],
    pub output_index: u32,
}

impl OutputId {
    pub fn new(tx_hash: [u8; 32], output_index: u32) -> Self {
        Self { tx_hash, output_index }
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.tx_hash), self.output_index)
    }
}

/// `(major, minor)`; `(0, 0)` is the primary address.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SubaddressIndex {
    pub major: u32,
    pub minor: u32,
}

impl SubaddressIndex {
    pub const PRIMARY: SubaddressIndex = SubaddressIndex { major: 0, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn is_primary(&self) -> bool {
        *self == Self::PRIMARY
    }
}

impl fmt::Display for SubaddressIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.major, self.minor)
    }
}

/// An output the wallet owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedOutput {
    pub id: OutputId,
    pub global_index: u64,
    pub amount: u64,
    pub subaddress: SubaddressIndex,
    #[serde(with = "serde_hex")]
    pub public_key: [u8; 32],
    #[serde(with = "serde_hex")]
    pub commitment: [u8; 32],
    #[serde(with = "serde_hex")]
    pub mask: [u8; 32],
    /// The tx public key this output was derived from.
    #[serde(with = "serde_hex")]
    pub tx_pub_key: [u8; 32],
    /// Absent for view-only wallets.
    #[serde(with = "serde_hex::option", default)]
    pub key_image: Option<[u8; 32]>,
    pub height: u64,
    pub unlock_time: u64,
    pub is_coinbase: bool,
    pub spent: bool,
    pub spent_height: Option<u64>,
}

impl OwnedOutput {
    pub fn mask_scalar(&self) -> Scalar {
        Scalar::from_bytes_mod_order(self.mask)
    }

    /// Spendable at `wallet_height` with the chain tip at `tip_timestamp`:
    /// at least `confirmations` blocks deep, and past its unlock time, read
    /// as a height below `MAX_BLOCK_NUMBER` and as a UNIX time above.
    pub fn is_unlocked(&self, wallet_height: u64, tip_timestamp: u64, confirmations: u64) -> bool {
        if wallet_height.saturating_sub(self.height) < confirmations {
            return false;
        }
        match self.unlock_time {
            0 => true,
            t if t < MAX_BLOCK_NUMBER => wallet_height >= t,
            t => tip_timestamp >= t,
        }
    }
}
