//! The wallet facade.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use veil_rpc::{DaemonClient, DaemonRpc};

use crate::balance::BalanceTracker;
use crate::config::WalletConfig;
use crate::encryption::{decrypt_cache, encrypt_cache};
use crate::error::WalletError;
use crate::keys::{KeyManager, WalletType};
use crate::output::OwnedOutput;
use crate::scanner::ChainScanner;
use crate::store::{OutputStore, StoreExport, StoreSnapshot};
use crate::sync::{CancelHandle, DaemonMonitor, SyncEvent, SyncHandles, SyncOrchestrator, SyncReport, SyncStatus};
use crate::transfer::{TxBuilder, TxConfig, TxSet};

/// Plaintext of the encrypted cache. Holds no key material.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    primary_address: String,
    store: StoreExport,
}

pub struct Wallet {
    config: WalletConfig,
    keys: Arc<KeyManager>,
    store: Arc<OutputStore>,
    balances: BalanceTracker,
    transfers: TxBuilder,
    monitor: DaemonMonitor,
    handles: SyncHandles,
    orchestrator: tokio::sync::Mutex<SyncOrchestrator>,
}

impl Wallet {
    /// Open a wallet against the configured HTTP daemon.
    pub fn open(config: WalletConfig) -> Result<Self, WalletError> {
        let daemon = DaemonRpc::with_config(config.daemon()?.to_rpc_config())?;
        Self::with_daemon(config, Arc::new(daemon))
    }

    /// Open a wallet against any daemon client. Loads the cache file at
    /// `config.path` when one exists.
    pub fn with_daemon(config: WalletConfig, daemon: Arc<dyn DaemonClient>) -> Result<Self, WalletError> {
        config.validate()?;
        let keys = Arc::new(KeyManager::from_seed_str(&config.seed, config.network()?)?);
        let opts = config.options.clone();
        let store = Arc::new(OutputStore::new(config.restore_height, opts.reorg_window));

        if let Some(path) = config.path.as_deref().filter(|p| p.exists()) {
            load_cache(path, config.password.as_bytes(), &keys, &store)?;
        }

        let scanner = ChainScanner::new(
            keys.clone(),
            store.clone(),
            daemon.clone(),
            opts.major_lookahead,
            opts.minor_lookahead,
        )?;
        let handles = SyncHandles::default();
        let orchestrator = SyncOrchestrator::new(
            scanner,
            store.clone(),
            daemon.clone(),
            handles.clone(),
            opts.sync_range_size,
        );

        log::info!(
            "opened {:?} wallet {} at height {}",
            keys.wallet_type(),
            keys.primary_address(),
            store.wallet_height()?
        );
        Ok(Self {
            balances: BalanceTracker::new(store.clone(), opts.unlock_confirmations),
            transfers: TxBuilder::new(keys.clone(), store.clone(), daemon.clone(), opts),
            monitor: DaemonMonitor::new(daemon),
            handles,
            orchestrator: tokio::sync::Mutex::new(orchestrator),
            config,
            keys,
            store,
        })
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn wallet_type(&self) -> WalletType {
        self.keys.wallet_type()
    }

    pub fn balances(&self) -> &BalanceTracker {
        &self.balances
    }

    // Sync.

    /// Scan up to the daemon's height. Concurrent calls run one at a time.
    pub async fn sync(&self) -> Result<SyncReport, WalletError> {
        self.orchestrator.lock().await.sync().await
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handles.cancel_handle()
    }

    pub fn sync_status(&self) -> Result<SyncStatus, WalletError> {
        self.handles.status()
    }

    pub fn add_listener(&self) -> Result<UnboundedReceiver<SyncEvent>, WalletError> {
        self.handles.add_listener()
    }

    // Balances and addresses.

    pub fn get_balance(&self, account: u32) -> Result<u64, WalletError> {
        self.balances.account_balance(account)
    }

    pub fn get_unlocked_balance(&self, account: u32) -> Result<u64, WalletError> {
        self.balances.unlocked_account_balance(account)
    }

    pub fn get_primary_address(&self) -> String {
        self.keys.primary_address().to_string()
    }

    pub fn get_address(&self, account: u32, minor: u32) -> Result<String, WalletError> {
        Ok(self.keys.address(account, minor)?.to_string())
    }

    /// Blocks scanned so far.
    pub fn get_height(&self) -> Result<u64, WalletError> {
        self.store.wallet_height()
    }

    // Daemon.

    pub async fn get_daemon_height(&self) -> Result<u64, WalletError> {
        self.monitor.daemon_height().await
    }

    pub async fn is_connected_to_daemon(&self) -> bool {
        self.monitor.is_connected().await
    }

    pub fn get_daemon_connection(&self) -> String {
        self.monitor.daemon_connection()
    }

    pub async fn is_daemon_synced(&self) -> Result<bool, WalletError> {
        self.monitor.is_daemon_synced().await
    }

    pub async fn is_daemon_trusted(&self) -> Result<bool, WalletError> {
        self.monitor.is_daemon_trusted().await
    }

    // Transfers.

    pub async fn create_tx(&self, config: &TxConfig) -> Result<TxSet, WalletError> {
        self.transfers.create_tx(config).await
    }

    pub async fn relay_tx(&self, set: &TxSet) -> Result<Vec<[u8; 32]>, WalletError> {
        self.transfers.relay_tx(set).await
    }

    pub fn release_tx(&self, set: &TxSet) -> Result<(), WalletError> {
        self.transfers.release_tx(set)
    }

    // State.

    pub fn outputs(&self) -> Result<Vec<OwnedOutput>, WalletError> {
        self.store.outputs()
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, WalletError> {
        self.store.snapshot()
    }

    pub fn mnemonic(&self) -> Result<String, WalletError> {
        self.keys.to_mnemonic()
    }

    /// Write the encrypted cache to `config.path`.
    pub fn save(&self) -> Result<(), WalletError> {
        let path = self
            .config
            .path
            .as_deref()
            .ok_or_else(|| WalletError::Other("no cache path configured".into()))?;
        let cache = CacheFile { primary_address: self.get_primary_address(), store: self.store.export()? };
        let plaintext = serde_json::to_vec(&cache).map_err(|e| WalletError::Storage(e.to_string()))?;
        let sealed = encrypt_cache(&plaintext, self.config.password.as_bytes())?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, sealed)?;
        std::fs::rename(&tmp, path)?;
        log::debug!("saved wallet cache to {}", path.display());
        Ok(())
    }
}

fn load_cache(path: &Path, password: &[u8], keys: &KeyManager, store: &OutputStore) -> Result<(), WalletError> {
    let plaintext = decrypt_cache(&std::fs::read(path)?, password)?;
    let cache: CacheFile = serde_json::from_slice(&plaintext)
        .map_err(|e| WalletError::InvalidFile(format!("cache contents: {}", e)))?;
    if cache.primary_address != keys.primary_address().to_string() {
        return Err(WalletError::InvalidFile("cache belongs to a different wallet".into()));
    }
    store.import(cache.store)?;
    log::debug!("loaded wallet cache from {}", path.display());
    Ok(())
}
