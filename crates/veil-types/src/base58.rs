//! CryptoNote block Base58 and LEB128 varints.
//!
//! Input is cut into 8-byte blocks; each full block maps to exactly 11
//! characters and a trailing partial block maps through `ENCODED_LEN`.
//! This keeps the encoded length a pure function of the input length,
//! unlike Bitcoin's big-number Base58.

use crate::constants::CHECKSUM_SIZE;
use crate::keccak256;
use thiserror::Error;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

const BLOCK: usize = 8;
const ENCODED_BLOCK: usize = 11;

/// Encoded length for a block of `n` bytes, `n` in `0..=8`.
const ENCODED_LEN: [usize; BLOCK + 1] = [0, 2, 3, 5, 6, 7, 9, 10, 11];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Base58Error {
    #[error("invalid character {0:?} at offset {1}")]
    InvalidCharacter(char, usize),

    #[error("trailing block of {0} characters cannot be decoded")]
    InvalidLength(usize),

    #[error("block {0} overflows its byte width")]
    Overflow(usize),

    #[error("payload too short for a checksum ({0} bytes)")]
    TooShort(usize),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("malformed varint")]
    Varint,
}

fn digit_value(ch: u8) -> Option<u64> {
    ALPHABET.iter().position(|&a| a == ch).map(|p| p as u64)
}

/// Byte width of an encoded block of `chars` characters.
fn decoded_len(chars: usize) -> Option<usize> {
    ENCODED_LEN.iter().position(|&n| n == chars)
}

fn encode_block(block: &[u8], out: &mut Vec<u8>) {
    let width = ENCODED_LEN[block.len()];
    let mut num = block.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
    let start = out.len();
    out.resize(start + width, ALPHABET[0]);
    for slot in out[start..].iter_mut().rev() {
        *slot = ALPHABET[(num % 58) as usize];
        num /= 58;
        if num == 0 {
            break;
        }
    }
}

fn decode_block(block: &[u8], offset: usize, out: &mut Vec<u8>) -> Result<(), Base58Error> {
    let mut num: u128 = 0;
    for (i, &ch) in block.iter().enumerate() {
        let digit = digit_value(ch).ok_or(Base58Error::InvalidCharacter(ch as char, offset + i))?;
        num = num * 58 + digit as u128;
    }

    let width = decoded_len(block.len()).ok_or(Base58Error::InvalidLength(block.len()))?;
    if num >> (8 * width) != 0 {
        return Err(Base58Error::Overflow(offset / ENCODED_BLOCK));
    }

    let bytes = (num as u64).to_be_bytes();
    out.extend_from_slice(&bytes[BLOCK - width..]);
    Ok(())
}

/// Encode binary data to CryptoNote Base58.
pub fn encode(data: &[u8]) -> String {
    let mut out = Vec::with_capacity(data.len() / BLOCK * ENCODED_BLOCK + ENCODED_BLOCK);
    for chunk in data.chunks(BLOCK) {
        encode_block(chunk, &mut out);
    }
    out.into_iter().map(char::from).collect()
}

/// Decode a CryptoNote Base58 string.
pub fn decode(encoded: &str) -> Result<Vec<u8>, Base58Error> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / ENCODED_BLOCK * BLOCK + BLOCK);
    for (i, chunk) in bytes.chunks(ENCODED_BLOCK).enumerate() {
        decode_block(chunk, i * ENCODED_BLOCK, &mut out)?;
    }
    Ok(out)
}

/// Append `value` as an unsigned LEB128 varint.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    write_varint(&mut out, value);
    out
}

/// Read a varint from the front of `data`, returning `(value, consumed)`.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize), Base58Error> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(10).enumerate() {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Base58Error::Varint)
}

/// `base58(varint(tag) || payload || keccak(...)[..4])`
pub fn encode_check(tag: u64, payload: &[u8]) -> String {
    let mut buf = encode_varint(tag);
    buf.extend_from_slice(payload);
    let checksum = keccak256(&buf);
    buf.extend_from_slice(&checksum[..CHECKSUM_SIZE]);
    encode(&buf)
}

/// Inverse of [`encode_check`]; verifies the checksum.
pub fn decode_check(encoded: &str) -> Result<(u64, Vec<u8>), Base58Error> {
    let raw = decode(encoded)?;
    if raw.len() <= CHECKSUM_SIZE {
        return Err(Base58Error::TooShort(raw.len()));
    }
    let (body, checksum) = raw.split_at(raw.len() - CHECKSUM_SIZE);
    if keccak256(body)[..CHECKSUM_SIZE] != *checksum {
        return Err(Base58Error::ChecksumMismatch);
    }
    let (tag, used) = decode_varint(body)?;
    Ok((tag, body[used..].to_vec()))
}
