//! Balances derived from store snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::WalletError;
use crate::output::OwnedOutput;
use crate::store::{OutputStore, StoreSnapshot};

/// Total and unlocked balances, per account and per subaddress.
///
/// Every query reads one snapshot, so the figures it returns are mutually
/// consistent. Outputs reserved by a pending transaction still count until
/// the spend appears on chain.
#[derive(Debug, Clone)]
pub struct BalanceTracker {
    store: Arc<OutputStore>,
    unlock_confirmations: u64,
}

impl BalanceTracker {
    pub fn new(store: Arc<OutputStore>, unlock_confirmations: u64) -> Self {
        Self { store, unlock_confirmations }
    }

    pub fn unlock_confirmations(&self) -> u64 {
        self.unlock_confirmations
    }

    fn sum<F>(&self, filter: F) -> Result<u64, WalletError>
    where
        F: Fn(&StoreSnapshot, &OwnedOutput) -> bool,
    {
        let snap = self.store.snapshot()?;
        Ok(snap.unspent().filter(|o| filter(&snap, o)).map(|o| o.amount).sum())
    }

    fn unlocked(&self, snap: &StoreSnapshot, output: &OwnedOutput) -> bool {
        output.is_unlocked(snap.wallet_height, snap.tip_timestamp, self.unlock_confirmations)
    }

    pub fn total_balance(&self) -> Result<u64, WalletError> {
        self.sum(|_, _| true)
    }

    pub fn unlocked_balance(&self) -> Result<u64, WalletError> {
        self.sum(|snap, o| self.unlocked(snap, o))
    }

    pub fn account_balance(&self, major: u32) -> Result<u64, WalletError> {
        self.sum(|_, o| o.subaddress.major == major)
    }

    pub fn unlocked_account_balance(&self, major: u32) -> Result<u64, WalletError> {
        self.sum(|snap, o| o.subaddress.major == major && self.unlocked(snap, o))
    }

    /// Unspent totals per minor index of account `major`. Minors with no
    /// unspent outputs are absent.
    pub fn subaddress_balances(&self, major: u32) -> Result<BTreeMap<u32, u64>, WalletError> {
        let snap = self.store.snapshot()?;
        let mut balances = BTreeMap::new();
        for o in snap.unspent().filter(|o| o.subaddress.major == major) {
            *balances.entry(o.subaddress.minor).or_insert(0) += o.amount;
        }
        Ok(balances)
    }
}
