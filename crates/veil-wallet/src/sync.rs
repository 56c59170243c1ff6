//! Sync orchestration.
//!
//! Drives the scanner range by range from the wallet height to the daemon
//! tip, reporting progress to listeners. Cancellation and status live in
//! shared handles so they stay usable while a sync is running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use veil_rpc::DaemonClient;

use crate::error::WalletError;
use crate::scanner::{ChainScanner, ScanOutcome};
use crate::store::OutputStore;

/// Times an in-range linkage break is refetched before giving up.
pub const MAX_REORG_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Scanning,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgress {
    /// Wallet height after the range.
    pub height: u64,
    pub start_height: u64,
    /// Daemon height the sync runs to.
    pub end_height: u64,
    pub percent_done: f64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub start_height: u64,
    pub end_height: u64,
    pub ranges: usize,
    pub outputs_found: usize,
    pub spends_detected: usize,
    pub reorgs: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Progress(SyncProgress),
    Reorg { fork_height: Option<u64> },
    Complete(SyncReport),
    Error(String),
}

/// Stops a running sync before its next range.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// State shared between the orchestrator and its owner.
#[derive(Debug, Clone)]
pub struct SyncHandles {
    status: Arc<Mutex<SyncStatus>>,
    listeners: Arc<Mutex<Vec<UnboundedSender<SyncEvent>>>>,
    cancel: CancelHandle,
}

impl Default for SyncHandles {
    fn default() -> Self {
        Self {
            status: Arc::new(Mutex::new(SyncStatus::Idle)),
            listeners: Arc::new(Mutex::new(Vec::new())),
            cancel: CancelHandle::default(),
        }
    }
}

impl SyncHandles {
    pub fn status(&self) -> Result<SyncStatus, WalletError> {
        Ok(self.status.lock().map_err(|e| WalletError::Storage(e.to_string()))?.clone())
    }

    fn set_status(&self, status: SyncStatus) -> Result<(), WalletError> {
        *self.status.lock().map_err(|e| WalletError::Storage(e.to_string()))? = status;
        Ok(())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn add_listener(&self) -> Result<UnboundedReceiver<SyncEvent>, WalletError> {
        let (tx, rx) = unbounded_channel();
        self.listeners.lock().map_err(|e| WalletError::Storage(e.to_string()))?.push(tx);
        Ok(rx)
    }

    /// Send to every listener without waiting; drop the closed ones.
    fn emit(&self, event: SyncEvent) -> Result<(), WalletError> {
        let mut listeners = self.listeners.lock().map_err(|e| WalletError::Storage(e.to_string()))?;
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
        Ok(())
    }
}

/// Daemon status queries, independent of any running sync.
#[derive(Clone)]
pub struct DaemonMonitor {
    daemon: Arc<dyn DaemonClient>,
}

impl DaemonMonitor {
    pub fn new(daemon: Arc<dyn DaemonClient>) -> Self {
        Self { daemon }
    }

    pub async fn daemon_height(&self) -> Result<u64, WalletError> {
        Ok(self.daemon.get_height().await?)
    }

    pub async fn is_connected(&self) -> bool {
        match self.daemon.get_height().await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("daemon {} unreachable: {}", self.daemon.describe(), e);
                false
            }
        }
    }

    pub async fn is_daemon_synced(&self) -> Result<bool, WalletError> {
        Ok(self.daemon.is_synced().await?)
    }

    pub async fn is_daemon_trusted(&self) -> Result<bool, WalletError> {
        Ok(self.daemon.is_trusted().await?)
    }

    pub fn daemon_connection(&self) -> String {
        self.daemon.describe()
    }
}

/// `(height - start) / (target - start)` as a percentage in `[0, 100]`.
pub fn percent_done(start: u64, height: u64, target: u64) -> f64 {
    if target <= start {
        return 100.0;
    }
    let done = height.saturating_sub(start) as f64 / (target - start) as f64 * 100.0;
    done.clamp(0.0, 100.0)
}

pub struct SyncOrchestrator {
    scanner: ChainScanner,
    store: Arc<OutputStore>,
    daemon: Arc<dyn DaemonClient>,
    handles: SyncHandles,
    range_size: u64,
}

impl SyncOrchestrator {
    pub fn new(
        scanner: ChainScanner,
        store: Arc<OutputStore>,
        daemon: Arc<dyn DaemonClient>,
        handles: SyncHandles,
        range_size: u64,
    ) -> Self {
        Self { scanner, store, daemon, handles, range_size: range_size.max(1) }
    }

    pub fn handles(&self) -> &SyncHandles {
        &self.handles
    }

    /// Scan from the wallet height to the daemon's current height.
    ///
    /// A failure leaves every fully scanned range applied; calling `sync`
    /// again resumes from there.
    pub async fn sync(&mut self) -> Result<SyncReport, WalletError> {
        self.handles.cancel.reset();
        self.handles.set_status(SyncStatus::Scanning)?;
        match self.run().await {
            Ok(report) => {
                self.handles.set_status(SyncStatus::Idle)?;
                self.handles.emit(SyncEvent::Complete(report.clone()))?;
                Ok(report)
            }
            Err(e) => {
                let msg = e.to_string();
                log::warn!("sync failed: {}", msg);
                self.handles.set_status(SyncStatus::Error(msg.clone()))?;
                self.handles.emit(SyncEvent::Error(msg))?;
                Err(e)
            }
        }
    }

    async fn run(&mut self) -> Result<SyncReport, WalletError> {
        let target = self.daemon.get_height().await?;
        let start = self.store.wallet_height()?;
        let mut report = SyncReport { start_height: start, end_height: start, ..Default::default() };
        log::info!("syncing from {} to {}", start, target);

        let mut height = start;
        if height >= target {
            if let Some(ScanOutcome::Reorged { fork_height }) = self.scanner.check_tip().await? {
                report.reorgs += 1;
                height = self.store.wallet_height()?;
                log::info!("tip replaced, resuming from {}", height);
                self.handles.emit(SyncEvent::Reorg { fork_height })?;
            }
        }

        let mut retries = 0;
        // Reorgs that did not move the wallet height down.
        let mut stalled = 0;
        while height < target {
            if self.handles.cancel.is_cancelled() {
                log::info!("sync cancelled at height {}", height);
                report.cancelled = true;
                break;
            }
            let end = height.saturating_add(self.range_size).min(target) - 1;
            match self.scanner.scan_range(height, end).await {
                Ok(ScanOutcome::Applied(stats)) => {
                    retries = 0;
                    stalled = 0;
                    height = end + 1;
                    report.ranges += 1;
                    report.outputs_found += stats.outputs_found;
                    report.spends_detected += stats.spends_detected;
                    self.handles.emit(SyncEvent::Progress(SyncProgress {
                        height,
                        start_height: start,
                        end_height: target,
                        percent_done: percent_done(start, height, target),
                        message: format!("scanned blocks {} to {}", stats.start, stats.end),
                    }))?;
                }
                Ok(ScanOutcome::Reorged { fork_height }) => {
                    let resumed = self.store.wallet_height()?;
                    if resumed >= height {
                        stalled += 1;
                        if stalled > MAX_REORG_RETRIES {
                            return Err(WalletError::ReorgDetected { height });
                        }
                    } else {
                        stalled = 0;
                    }
                    report.reorgs += 1;
                    height = resumed;
                    log::info!("reorg, resuming from {}", height);
                    self.handles.emit(SyncEvent::Reorg { fork_height })?;
                }
                Err(WalletError::ReorgDetected { height: at }) if retries < MAX_REORG_RETRIES => {
                    retries += 1;
                    log::warn!("chain changed while fetching at {}, refetching ({})", at, retries);
                }
                Err(e) => return Err(e),
            }
        }
        report.end_height = height;
        Ok(report)
    }
}
