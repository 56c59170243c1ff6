//! Core types and constants for the Veil wallet engine.
//!
//! This crate provides the foundational types shared by every other crate:
//! network identifiers, amount helpers, CryptoNote base58, address encoding,
//! mnemonic seed phrases, and the chain data model handed out by the daemon.

pub mod address;
pub mod base58;
pub mod chain;
pub mod constants;
pub mod mnemonic;
pub mod serde_hex;

pub use address::{Address, AddressError, AddressKind};
pub use chain::{BlockData, ChainInput, ChainOutput, ChainTx, RingMember};
pub use constants::Network;

use tiny_keccak::{Hasher, Keccak};

/// Keccak-256 (original padding, not SHA3), the hash behind every
/// checksum, transaction id and hash-to-scalar in the system.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut keccak = Keccak::v256();
    let mut output = [0u8; 32];
    keccak.update(data);
    keccak.finalize(&mut output);
    output
}
