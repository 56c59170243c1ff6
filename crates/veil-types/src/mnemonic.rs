//! Mnemonic seed phrases.
//!
//! A wallet seed is 32 bytes of entropy, written as a 24-word English BIP-39
//! phrase. The final word carries the checksum. A raw 64-character hex seed is
//! accepted anywhere a phrase is.

use bip39::{Language, Mnemonic};
use thiserror::Error;

/// Number of words in a phrase that encodes a 32-byte seed.
pub const SEED_WORDS: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MnemonicError {
    #[error("expected {SEED_WORDS} words, got {0}")]
    WrongWordCount(usize),

    #[error("invalid mnemonic: {0}")]
    Invalid(String),

    #[error("seed must be 32 bytes, got {0}")]
    InvalidSeedLength(usize),
}

/// Encode a 32-byte seed as a 24-word phrase.
pub fn seed_to_mnemonic(seed: &[u8; 32]) -> Result<String, MnemonicError> {
    let mnemonic =
        Mnemonic::from_entropy(seed).map_err(|e| MnemonicError::Invalid(e.to_string()))?;
    Ok(mnemonic.to_string())
}

/// Decode a 24-word phrase to its 32-byte seed.
///
/// Case and surrounding whitespace are ignored.
pub fn mnemonic_to_seed(phrase: &str) -> Result<[u8; 32], MnemonicError> {
    let normalized = phrase
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>();
    if normalized.len() != SEED_WORDS {
        return Err(MnemonicError::WrongWordCount(normalized.len()));
    }

    let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized.join(" "))
        .map_err(|e| MnemonicError::Invalid(e.to_string()))?;

    let entropy = mnemonic.to_entropy();
    let seed: [u8; 32] = entropy
        .as_slice()
        .try_into()
        .map_err(|_| MnemonicError::InvalidSeedLength(entropy.len()))?;
    Ok(seed)
}

/// Accept either a phrase or a 64-character hex seed.
pub fn parse_seed(input: &str) -> Result<[u8; 32], MnemonicError> {
    let trimmed = input.trim();
    if trimmed.len() == 64 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        let bytes = hex::decode(trimmed).map_err(|e| MnemonicError::Invalid(e.to_string()))?;
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        return Ok(seed);
    }
    mnemonic_to_seed(trimmed)
}
