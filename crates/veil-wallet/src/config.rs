//! Wallet configuration.
//!
//! Plain serde structs with defaults, loadable from a JSON file:
//!
//! ```json
//! {
//!   "seed": "abandon ability ...",
//!   "network_type": "TESTNET",
//!   "server": { "uri": "http://127.0.0.1:28081" },
//!   "restore_height": 0,
//!   "options": { "sync_range_size": 100 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use veil_rpc::{ports, RpcConfig};
use veil_types::constants::{
    DEFAULT_DUST_THRESHOLD, DEFAULT_RING_SIZE, DEFAULT_UNLOCK_CONFIRMATIONS,
};
use veil_types::Network;

use crate::error::WalletError;
use crate::store::DEFAULT_REORG_WINDOW;

/// Where the daemon lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConnection {
    pub uri: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DaemonConnection {
    /// A local daemon on the network's default port.
    pub fn for_network(network: Network) -> Self {
        let port = match network {
            Network::Mainnet => ports::DAEMON_MAINNET,
            Network::Testnet => ports::DAEMON_TESTNET,
            Network::Stagenet => ports::DAEMON_STAGENET,
        };
        Self { uri: format!("http://127.0.0.1:{}", port), username: None, password: None }
    }

    pub fn to_rpc_config(&self) -> RpcConfig {
        RpcConfig {
            url: self.uri.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            ..Default::default()
        }
    }
}

impl Default for DaemonConnection {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

/// Tunables. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletOptions {
    /// Blocks fetched and applied per scan step.
    pub sync_range_size: u64,
    pub unlock_confirmations: u64,
    /// Smallest destination amount; change below it goes to the fee.
    pub dust_threshold: u64,
    pub ring_size: usize,
    /// Accounts generated past the highest used one.
    pub major_lookahead: u32,
    /// Minor indices generated past the highest used one, per account.
    pub minor_lookahead: u32,
    /// Block hashes kept for fork-point search.
    pub reorg_window: u64,
}

impl Default for WalletOptions {
    fn default() -> Self {
        Self {
            sync_range_size: 100,
            unlock_confirmations: DEFAULT_UNLOCK_CONFIRMATIONS,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            ring_size: DEFAULT_RING_SIZE,
            major_lookahead: 1,
            minor_lookahead: 50,
            reorg_window: DEFAULT_REORG_WINDOW,
        }
    }
}

impl WalletOptions {
    fn validate(&self) -> Result<(), WalletError> {
        if self.sync_range_size == 0 {
            return Err(WalletError::Other("sync_range_size must be at least 1".into()));
        }
        if self.ring_size == 0 {
            return Err(WalletError::Other("ring_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// 24-word mnemonic or 64-character hex seed.
    pub seed: String,
    /// Encrypted cache file. No cache when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub password: String,
    pub network_type: String,
    #[serde(default)]
    pub server: Option<DaemonConnection>,
    #[serde(default)]
    pub restore_height: u64,
    #[serde(default)]
    pub options: WalletOptions,
}

impl WalletConfig {
    pub fn new(seed: impl Into<String>, network: Network) -> Self {
        Self {
            seed: seed.into(),
            path: None,
            password: String::new(),
            network_type: network.as_str().to_string(),
            server: None,
            restore_height: 0,
            options: WalletOptions::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WalletError::InvalidFile(format!("wallet config: {}", e)))?;
        config.network()?;
        config.options.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn network(&self) -> Result<Network, WalletError> {
        Ok(self.network_type.parse()?)
    }

    /// The configured daemon, or a local one on the network's port.
    pub fn daemon(&self) -> Result<DaemonConnection, WalletError> {
        match &self.server {
            Some(server) => Ok(server.clone()),
            None => Ok(DaemonConnection::for_network(self.network()?)),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), WalletError> {
        self.network()?;
        self.options.validate()
    }
}
