//! Address parsing, validation, and creation.
//!
//! An address is `base58(varint(prefix) || spend_pub || view_pub || checksum)`.
//! The prefix encodes both the network and whether the address is a
//! subaddress; the keys themselves are not validated as curve points here.

use crate::base58::{self, Base58Error};
use crate::constants::{prefix_info, Network, KEY_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address must be a non-empty string")]
    Empty,

    #[error("base58 decode error: {0}")]
    Base58(#[from] Base58Error),

    #[error("unknown address prefix: {0}")]
    UnknownPrefix(u64),

    #[error("invalid data length: expected {expected} bytes, got {actual}")]
    InvalidDataLength { expected: usize, actual: usize },

    #[error("address is for {found}, wallet is on {expected}")]
    WrongNetwork { expected: Network, found: Network },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    Standard,
    Subaddress,
}

/// A decoded wallet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub network: Network,
    pub kind: AddressKind,
    pub spend_public_key: [u8; KEY_SIZE],
    pub view_public_key: [u8; KEY_SIZE],
}

impl Address {
    pub fn new(
        network: Network,
        kind: AddressKind,
        spend_public_key: [u8; KEY_SIZE],
        view_public_key: [u8; KEY_SIZE],
    ) -> Self {
        Self { network, kind, spend_public_key, view_public_key }
    }

    pub fn is_subaddress(&self) -> bool {
        self.kind == AddressKind::Subaddress
    }

    /// Parse and additionally require the address to belong to `network`.
    pub fn parse_for(network: Network, s: &str) -> Result<Self, AddressError> {
        let addr: Address = s.parse()?;
        if addr.network != network {
            return Err(AddressError::WrongNetwork { expected: network, found: addr.network });
        }
        Ok(addr)
    }

    fn prefix(&self) -> u64 {
        self.network.address_prefix(self.is_subaddress())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        let (tag, data) = base58::decode_check(s)?;
        let (network, subaddress) = prefix_info(tag).ok_or(AddressError::UnknownPrefix(tag))?;

        if data.len() != 2 * KEY_SIZE {
            return Err(AddressError::InvalidDataLength {
                expected: 2 * KEY_SIZE,
                actual: data.len(),
            });
        }

        let mut spend_public_key = [0u8; KEY_SIZE];
        let mut view_public_key = [0u8; KEY_SIZE];
        spend_public_key.copy_from_slice(&data[..KEY_SIZE]);
        view_public_key.copy_from_slice(&data[KEY_SIZE..]);

        let kind = if subaddress { AddressKind::Subaddress } else { AddressKind::Standard };
        Ok(Address { network, kind, spend_public_key, view_public_key })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = [0u8; 2 * KEY_SIZE];
        payload[..KEY_SIZE].copy_from_slice(&self.spend_public_key);
        payload[KEY_SIZE..].copy_from_slice(&self.view_public_key);
        f.write_str(&base58::encode_check(self.prefix(), &payload))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
