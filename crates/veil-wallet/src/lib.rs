//! Wallet engine for the Veil privacy coin.
//!
//! Ties key management, chain scanning, the output store, balances,
//! transaction construction and sync orchestration together behind
//! [`Wallet`].
//!
//! # Example
//!
//! ```ignore
//! use veil_wallet::{Wallet, WalletConfig, TxConfig};
//! use veil_types::Network;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), veil_wallet::WalletError> {
//!     let seed = hex::encode(veil_wallet::KeyManager::random_seed());
//!     let wallet = Wallet::open(WalletConfig::new(seed, Network::Testnet))?;
//!     wallet.sync().await?;
//!     println!("balance: {}", wallet.get_balance(0)?);
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod balance;
pub mod config;
pub mod encryption;
pub mod error;
pub mod keys;
pub mod output;
pub mod scanner;
pub mod store;
pub mod sync;
pub mod transfer;
pub mod utxo;
pub mod wallet;

pub use balance::BalanceTracker;
pub use config::{DaemonConnection, WalletConfig, WalletOptions};
pub use error::WalletError;
pub use keys::{KeyManager, WalletType};
pub use output::{OutputId, OwnedOutput, SubaddressIndex};
pub use scanner::{ChainScanner, RangeStats, ScanOutcome};
pub use store::{OutputStore, StoreSnapshot};
pub use sync::{CancelHandle, SyncEvent, SyncOrchestrator, SyncProgress, SyncReport, SyncStatus};
pub use transfer::{PendingTx, TxBuilder, TxConfig, TxDestination, TxSet};
pub use veil_tx::FeePriority;
pub use wallet::Wallet;
