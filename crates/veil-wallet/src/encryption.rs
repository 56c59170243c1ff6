//! Cache file encryption.
//!
//! Argon2id stretches the password into an AES-256-GCM key. The file is
//! self-describing apart from the password:
//!
//! ```text
//! magic "VEIL" (4) | version (1) | salt (32) | nonce (12) | ciphertext+tag
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::error::WalletError;

const MAGIC: &[u8; 4] = b"VEIL";
const VERSION: u8 = 1;
const SALT_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const HEADER_SIZE: usize = MAGIC.len() + 1 + SALT_SIZE + NONCE_SIZE;

const ARGON2_M_COST: u32 = 19_456;
const ARGON2_T_COST: u32 = 2;
const ARGON2_P_COST: u32 = 1;

fn derive_key(password: &[u8], salt: &[u8]) -> Result<[u8; 32], WalletError> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(32))
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    let mut key = [0u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plaintext` into a complete cache file image.
#[allow(deprecated)] // aes-gcm 0.10 uses generic-array 0.x
pub fn encrypt_cache(plaintext: &[u8], password: &[u8]) -> Result<Vec<u8>, WalletError> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce_bytes);

    let key_bytes = derive_key(password, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Whether `data` starts like a cache file.
pub fn is_cache_file(data: &[u8]) -> bool {
    data.len() >= HEADER_SIZE && data.starts_with(MAGIC)
}

/// Decrypt a cache file image. A wrong password or any tampering gives
/// `DecryptionFailed`.
#[allow(deprecated)] // aes-gcm 0.10 uses generic-array 0.x
pub fn decrypt_cache(data: &[u8], password: &[u8]) -> Result<Vec<u8>, WalletError> {
    if data.len() < HEADER_SIZE {
        return Err(WalletError::InvalidFile("file too short".into()));
    }
    if !data.starts_with(MAGIC) {
        return Err(WalletError::InvalidFile("not a wallet cache".into()));
    }
    let version = data[MAGIC.len()];
    if version != VERSION {
        return Err(WalletError::InvalidFile(format!("unsupported cache version {}", version)));
    }
    let salt_start = MAGIC.len() + 1;
    let nonce_start = salt_start + SALT_SIZE;
    let salt = &data[salt_start..nonce_start];
    let nonce_bytes = &data[nonce_start..HEADER_SIZE];

    let key_bytes = derive_key(password, salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), &data[HEADER_SIZE..])
        .map_err(|_| WalletError::DecryptionFailed)
}
