//! Veil transaction construction, signing and verification.
//!
//! Provides typed transaction structures with a binary blob encoding, stealth
//! output construction, decoy ring member selection, fee estimation, and a
//! builder that produces fully signed transactions. Low-level crypto is
//! delegated to veil-crypto.

pub mod builder;
pub mod decoy;
pub mod fee;
pub mod output;
pub mod sign;
pub mod types;
pub mod verify;

pub use builder::{PreparedInput, TransactionBuilder, UnsignedTransaction};
pub use decoy::DecoySelector;
pub use fee::{estimate_tx_fee, FeePriority};
pub use output::{Destination, TxKeys};
pub use sign::sign_transaction;
pub use types::{RctSignatures, Transaction, TxInput, TxOutput, TxPrefix};
pub use verify::verify_transaction;

use thiserror::Error;
use veil_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum TxError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("invalid transaction: {0}")]
    Invalid(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("insufficient inputs: need {need}, have {have}")]
    InsufficientInputs { need: u64, have: u64 },

    #[error("no destinations specified")]
    NoDestinations,

    #[error("change of {0} with no change address")]
    NoChangeAddress(u64),

    #[error("ring size mismatch: expected {expected}, got {got}")]
    RingSizeMismatch { expected: usize, got: usize },

    #[error("decoy selection failed: {0}")]
    DecoySelection(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
