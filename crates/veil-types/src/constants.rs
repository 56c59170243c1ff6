//! Network identifiers, address prefixes, and protocol constants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Network Types
// =============================================================================

/// Network type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Stagenet,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported network type: {0:?}")]
pub struct UnknownNetwork(pub String);

impl Network {
    pub const ALL: [Network; 3] = [Network::Mainnet, Network::Testnet, Network::Stagenet];

    /// Canonical upper-case name, as accepted in wallet configs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "MAINNET",
            Network::Testnet => "TESTNET",
            Network::Stagenet => "STAGENET",
        }
    }

    /// Address prefix for the given address kind on this network.
    pub fn address_prefix(&self, subaddress: bool) -> u64 {
        let prefixes = network_prefixes(*self);
        if subaddress {
            prefixes.subaddress
        } else {
            prefixes.standard
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MAINNET" => Ok(Network::Mainnet),
            "TESTNET" => Ok(Network::Testnet),
            "STAGENET" => Ok(Network::Stagenet),
            _ => Err(UnknownNetwork(s.to_string())),
        }
    }
}

// =============================================================================
// Address Prefixes
// =============================================================================

/// Varint address prefixes for one network.
#[derive(Debug, Clone, Copy)]
pub struct NetworkPrefixes {
    pub standard: u64,
    pub subaddress: u64,
}

const MAINNET_PREFIXES: NetworkPrefixes = NetworkPrefixes { standard: 18, subaddress: 42 };
const TESTNET_PREFIXES: NetworkPrefixes = NetworkPrefixes { standard: 53, subaddress: 63 };
const STAGENET_PREFIXES: NetworkPrefixes = NetworkPrefixes { standard: 24, subaddress: 36 };

pub fn network_prefixes(network: Network) -> &'static NetworkPrefixes {
    match network {
        Network::Mainnet => &MAINNET_PREFIXES,
        Network::Testnet => &TESTNET_PREFIXES,
        Network::Stagenet => &STAGENET_PREFIXES,
    }
}

/// Resolve a varint prefix to `(network, is_subaddress)`.
pub fn prefix_info(prefix: u64) -> Option<(Network, bool)> {
    Network::ALL.iter().find_map(|&net| {
        let p = network_prefixes(net);
        if p.standard == prefix {
            Some((net, false))
        } else if p.subaddress == prefix {
            Some((net, true))
        } else {
            None
        }
    })
}

// =============================================================================
// Key and Data Sizes
// =============================================================================

/// Size of a public/private key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the address checksum in bytes.
pub const CHECKSUM_SIZE: usize = 4;

// =============================================================================
// Unlock Rules
// =============================================================================

/// Unlock times below this value are block heights, above are UNIX timestamps.
pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

/// Confirmations an output needs before it may be spent.
pub const DEFAULT_UNLOCK_CONFIRMATIONS: u64 = 10;

/// Blocks a coinbase output stays locked for.
pub const MINED_MONEY_UNLOCK_WINDOW: u64 = 60;

// =============================================================================
// Transactions
// =============================================================================

/// Default ring size (15 decoys + 1 real).
pub const DEFAULT_RING_SIZE: usize = 16;

/// Change below this amount is folded into the fee.
pub const DEFAULT_DUST_THRESHOLD: u64 = 1_000_000;

/// Per-byte base fee in atomic units.
pub const FEE_PER_BYTE: u64 = 20;

/// Fees are rounded up to a multiple of this value.
pub const FEE_QUANTIZATION: u64 = 10_000;

// =============================================================================
// Amount Helpers
// =============================================================================

/// Atomic units per coin (10^12).
pub const COIN: u64 = 1_000_000_000_000;

/// Number of decimal places for display.
pub const DISPLAY_DECIMAL_POINT: usize = 12;

/// Format an atomic amount as a human-readable string (e.g. `1.5`).
pub fn format_amount(atomic: u64) -> String {
    let whole = atomic / COIN;
    let frac = atomic % COIN;
    if frac == 0 {
        return format!("{}.0", whole);
    }
    let frac_str = format!("{:0width$}", frac, width = DISPLAY_DECIMAL_POINT);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

/// Parse a human-readable amount string to atomic units.
pub fn parse_amount(s: &str) -> Option<u64> {
    let s = s.trim();
    let (whole_str, frac_str) = s.split_once('.').unwrap_or((s, ""));

    let whole: u64 = whole_str.parse().ok()?;
    if frac_str.len() > DISPLAY_DECIMAL_POINT {
        return None;
    }
    let frac: u64 = if frac_str.is_empty() {
        0
    } else {
        format!("{:0<width$}", frac_str, width = DISPLAY_DECIMAL_POINT)
            .parse()
            .ok()?
    };

    whole.checked_mul(COIN)?.checked_add(frac)
}
