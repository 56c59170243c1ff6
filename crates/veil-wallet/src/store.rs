//! The output ledger and sync state.
//!
//! One `RwLock` guards everything. The scanner is the only writer of chain
//! state and applies a whole range in one critical section; transfers
//! select and reserve inputs in one critical section. Readers take an owned
//! `StoreSnapshot`. No network call ever happens while the lock is held.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use veil_types::serde_hex;

use crate::error::WalletError;
use crate::output::{OutputId, OwnedOutput, SubaddressIndex};

/// Block records kept below the wallet height, for fork-point search.
pub const DEFAULT_REORG_WINDOW: u64 = 720;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    #[serde(with = "serde_hex")]
    pub hash: [u8; 32],
    pub timestamp: u64,
}

/// Everything one scanned range changes, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct RangeUpdate {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub blocks: Vec<(u64, BlockRecord)>,
    pub outputs: Vec<OwnedOutput>,
    /// `(key_image, spending_height)`, in chain order.
    pub spends: Vec<([u8; 32], u64)>,
}

/// A point-in-time copy of the store. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub outputs: BTreeMap<OutputId, OwnedOutput>,
    pub blocks: BTreeMap<u64, BlockRecord>,
    pub wallet_height: u64,
    pub restore_height: u64,
    pub tip_timestamp: u64,
    pub reserved: BTreeSet<OutputId>,
}

impl StoreSnapshot {
    pub fn unspent(&self) -> impl Iterator<Item = &OwnedOutput> {
        self.outputs.values().filter(|o| !o.spent)
    }

    pub fn total_balance(&self) -> u64 {
        self.unspent().map(|o| o.amount).sum()
    }
}

/// Serialized form for the wallet cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreExport {
    pub outputs: Vec<OwnedOutput>,
    pub blocks: BTreeMap<u64, BlockRecord>,
    pub wallet_height: u64,
    pub restore_height: u64,
    pub pruned_timestamp: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    outputs: BTreeMap<OutputId, OwnedOutput>,
    key_images: HashMap<[u8; 32], OutputId>,
    /// One-time public key to output.
    public_keys: HashMap<[u8; 32], OutputId>,
    blocks: BTreeMap<u64, BlockRecord>,
    wallet_height: u64,
    restore_height: u64,
    /// Largest timestamp among pruned block records.
    pruned_timestamp: u64,
    reserved: BTreeSet<OutputId>,
}

impl StoreState {
    fn tip_timestamp(&self) -> u64 {
        self.blocks
            .values()
            .map(|b| b.timestamp)
            .max()
            .unwrap_or(0)
            .max(self.pruned_timestamp)
    }

    /// A second output under an already known one-time key shares its key
    /// image, so at most one of the two is spendable. The known output is
    /// kept when it is spent or worth at least as much; otherwise the new
    /// one replaces it.
    fn insert_or_update(&mut self, output: OwnedOutput) {
        if let Some(&known) = self.public_keys.get(&output.public_key) {
            if known != output.id {
                let keep_known = self
                    .outputs
                    .get(&known)
                    .is_some_and(|o| o.spent || o.amount >= output.amount);
                let kept = if keep_known { known } else { output.id };
                log::warn!("output {} reuses the one-time key of {}, keeping {}", output.id, known, kept);
                if keep_known {
                    return;
                }
                self.remove(&known);
            }
        }
        if let Some(ki) = output.key_image {
            self.key_images.insert(ki, output.id);
        }
        self.public_keys.insert(output.public_key, output.id);
        self.outputs.insert(output.id, output);
    }

    fn remove(&mut self, id: &OutputId) -> Option<OwnedOutput> {
        let out = self.outputs.remove(id)?;
        if let Some(ki) = out.key_image {
            self.key_images.remove(&ki);
        }
        self.public_keys.remove(&out.public_key);
        self.reserved.remove(id);
        Some(out)
    }

    fn mark_spent(&mut self, key_image: &[u8; 32], height: u64) -> Option<OutputId> {
        let id = *self.key_images.get(key_image)?;
        let output = self.outputs.get_mut(&id)?;
        output.spent = true;
        output.spent_height = Some(height);
        self.reserved.remove(&id);
        Some(id)
    }

    fn prune(&mut self, window: u64) {
        let keep_from = self.wallet_height.saturating_sub(window);
        let kept = self.blocks.split_off(&keep_from);
        let pruned = std::mem::replace(&mut self.blocks, kept);
        if let Some(ts) = pruned.values().map(|b| b.timestamp).max() {
            self.pruned_timestamp = self.pruned_timestamp.max(ts);
        }
    }

    fn reset(&mut self) {
        let restore_height = self.restore_height;
        *self = StoreState { restore_height, wallet_height: restore_height, ..Default::default() };
    }
}

/// Read-only access to the store inside a write critical section.
pub struct StoreView<'a> {
    state: &'a StoreState,
}

impl StoreView<'_> {
    pub fn outputs(&self) -> impl Iterator<Item = &OwnedOutput> {
        self.state.outputs.values()
    }

    pub fn wallet_height(&self) -> u64 {
        self.state.wallet_height
    }

    pub fn tip_timestamp(&self) -> u64 {
        self.state.tip_timestamp()
    }

    pub fn is_reserved(&self, id: &OutputId) -> bool {
        self.state.reserved.contains(id)
    }
}

#[derive(Debug)]
pub struct OutputStore {
    state: RwLock<StoreState>,
    reorg_window: u64,
}

impl OutputStore {
    pub fn new(restore_height: u64, reorg_window: u64) -> Self {
        let state = StoreState { restore_height, wallet_height: restore_height, ..Default::default() };
        Self { state: RwLock::new(state), reorg_window: reorg_window.max(1) }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, WalletError> {
        self.state.read().map_err(|e| WalletError::Storage(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, WalletError> {
        self.state.write().map_err(|e| WalletError::Storage(e.to_string()))
    }

    pub fn wallet_height(&self) -> Result<u64, WalletError> {
        Ok(self.read()?.wallet_height)
    }

    pub fn restore_height(&self) -> Result<u64, WalletError> {
        Ok(self.read()?.restore_height)
    }

    pub fn block_hash(&self, height: u64) -> Result<Option<[u8; 32]>, WalletError> {
        Ok(self.read()?.blocks.get(&height).map(|b| b.hash))
    }

    /// Stored `(height, hash)` pairs below `height`, highest first.
    pub fn block_hashes_below(&self, height: u64) -> Result<Vec<(u64, [u8; 32])>, WalletError> {
        Ok(self.read()?.blocks.range(..height).rev().map(|(h, b)| (*h, b.hash)).collect())
    }

    /// Running max of scanned block timestamps.
    pub fn tip_timestamp(&self) -> Result<u64, WalletError> {
        Ok(self.read()?.tip_timestamp())
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, WalletError> {
        let state = self.read()?;
        Ok(StoreSnapshot {
            outputs: state.outputs.clone(),
            blocks: state.blocks.clone(),
            wallet_height: state.wallet_height,
            restore_height: state.restore_height,
            tip_timestamp: state.tip_timestamp(),
            reserved: state.reserved.clone(),
        })
    }

    /// Owned outputs, ordered by id.
    pub fn outputs(&self) -> Result<Vec<OwnedOutput>, WalletError> {
        Ok(self.read()?.outputs.values().cloned().collect())
    }

    pub fn key_images(&self) -> Result<HashSet<[u8; 32]>, WalletError> {
        Ok(self.read()?.key_images.keys().copied().collect())
    }

    pub fn used_subaddresses(&self) -> Result<BTreeSet<SubaddressIndex>, WalletError> {
        Ok(self.read()?.outputs.values().map(|o| o.subaddress).collect())
    }

    pub fn insert_or_update(&self, output: OwnedOutput) -> Result<(), WalletError> {
        self.write()?.insert_or_update(output);
        Ok(())
    }

    /// Mark the output with `key_image` spent at `height`. Clears its
    /// reservation. Returns the output's id when the key image is ours.
    pub fn mark_spent(&self, key_image: &[u8; 32], height: u64) -> Result<Option<OutputId>, WalletError> {
        Ok(self.write()?.mark_spent(key_image, height))
    }

    /// Apply a scanned range: outputs, then spends, then block records and
    /// the new wallet height. The range must start at the wallet height.
    pub fn apply_range(&self, update: RangeUpdate) -> Result<(), WalletError> {
        let mut state = self.write()?;
        if update.start != state.wallet_height {
            return Err(WalletError::Storage(format!(
                "range starts at {} but wallet height is {}",
                update.start, state.wallet_height
            )));
        }
        if update.end < update.start {
            return Err(WalletError::Storage("empty range".into()));
        }
        for output in update.outputs {
            state.insert_or_update(output);
        }
        for (ki, height) in &update.spends {
            state.mark_spent(ki, *height);
        }
        for (height, record) in update.blocks {
            state.blocks.insert(height, record);
        }
        state.wallet_height = update.end + 1;
        state.prune(self.reorg_window);
        Ok(())
    }

    /// Undo everything above `height`: outputs found there disappear, spends
    /// recorded there are unmarked, and the wallet resumes at `height + 1`.
    pub fn rollback_above(&self, height: u64) -> Result<(), WalletError> {
        let mut state = self.write()?;
        let removed: Vec<OutputId> = state
            .outputs
            .values()
            .filter(|o| o.height > height)
            .map(|o| o.id)
            .collect();
        for id in &removed {
            state.remove(id);
        }
        for out in state.outputs.values_mut() {
            if out.spent_height.is_some_and(|h| h > height) {
                out.spent = false;
                out.spent_height = None;
            }
        }
        state.blocks.split_off(&(height + 1));
        state.wallet_height = (height + 1).max(state.restore_height);
        log::info!(
            "rolled back above height {} ({} outputs removed)",
            height,
            removed.len()
        );
        Ok(())
    }

    /// Forget all chain state and resume at the restore height.
    pub fn reset_to_restore_height(&self) -> Result<(), WalletError> {
        let mut state = self.write()?;
        state.reset();
        log::info!("store reset to restore height {}", state.restore_height);
        Ok(())
    }

    pub fn is_reserved(&self, id: &OutputId) -> Result<bool, WalletError> {
        Ok(self.read()?.reserved.contains(id))
    }

    /// Reserve all of `ids` or none: each must be known, unspent and free.
    pub fn reserve(&self, ids: &[OutputId]) -> Result<(), WalletError> {
        let mut state = self.write()?;
        reserve_in(&mut state, ids)
    }

    pub fn release(&self, ids: &[OutputId]) -> Result<(), WalletError> {
        let mut state = self.write()?;
        for id in ids {
            state.reserved.remove(id);
        }
        Ok(())
    }

    /// Run `select` and reserve what it picks, in one critical section.
    pub fn select_and_reserve<T, F>(&self, select: F) -> Result<T, WalletError>
    where
        F: FnOnce(&StoreView<'_>) -> Result<(Vec<OutputId>, T), WalletError>,
    {
        let mut state = self.write()?;
        let (ids, result) = select(&StoreView { state: &state })?;
        reserve_in(&mut state, &ids)?;
        Ok(result)
    }

    pub fn export(&self) -> Result<StoreExport, WalletError> {
        let state = self.read()?;
        Ok(StoreExport {
            outputs: state.outputs.values().cloned().collect(),
            blocks: state.blocks.clone(),
            wallet_height: state.wallet_height,
            restore_height: state.restore_height,
            pruned_timestamp: state.pruned_timestamp,
        })
    }

    /// Replace the contents with an export. Reservations are not persisted.
    pub fn import(&self, export: StoreExport) -> Result<(), WalletError> {
        if export.wallet_height < export.restore_height {
            return Err(WalletError::InvalidFile("wallet height below restore height".into()));
        }
        let mut state = self.write()?;
        *state = StoreState {
            blocks: export.blocks,
            wallet_height: export.wallet_height,
            restore_height: export.restore_height,
            pruned_timestamp: export.pruned_timestamp,
            ..Default::default()
        };
        for output in export.outputs {
            state.insert_or_update(output);
        }
        Ok(())
    }
}

fn reserve_in(state: &mut StoreState, ids: &[OutputId]) -> Result<(), WalletError> {
    for id in ids {
        match state.outputs.get(id) {
            None => return Err(WalletError::Other(format!("unknown output {}", id))),
            Some(o) if o.spent => return Err(WalletError::Other(format!("output {} is spent", id))),
            Some(_) if state.reserved.contains(id) => {
                return Err(WalletError::Other(format!("output {} is already reserved", id)))
            }
            Some(_) => {}
        }
    }
    let unique: BTreeSet<OutputId> = ids.iter().copied().collect();
    if unique.len() != ids.len() {
        return Err(WalletError::Other("duplicate output in reservation".into()));
    }
    state.reserved.extend(unique);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::test_support::output;

    fn record(n: u8) -> BlockRecord {
        BlockRecord { hash: [n; 32], timestamp: 1_000 + n as u64 }
    }

    fn update(start: u64, end: u64, outputs: Vec<OwnedOutput>, spends: Vec<([u8; 32], u64)>) -> RangeUpdate {
        RangeUpdate {
            start,
            end,
            blocks: (start..=end).map(|h| (h, record(h as u8))).collect(),
            outputs,
            spends,
        }
    }

    fn assert_balance_invariant(store: &OutputStore) {
        let snap = store.snapshot().unwrap();
        let sum: u64 = snap.outputs.values().filter(|o| !o.spent).map(|o| o.amount).sum();
        assert_eq!(snap.total_balance(), sum);
    }

    #[test]
    fn test_apply_range() {
        let store = OutputStore::new(0, 720);
        store.apply_range(update(0, 4, vec![output(1, 100, 2)], vec![])).unwrap();
        assert_eq!(store.wallet_height().unwrap(), 5);
        assert_eq!(store.block_hash(4).unwrap(), Some([4; 32]));
        assert_eq!(store.tip_timestamp().unwrap(), 1_004);
        assert_eq!(store.snapshot().unwrap().total_balance(), 100);

        // Spend it in the next range.
        let ki = output(1, 100, 2).key_image.unwrap();
        store.apply_range(update(5, 6, vec![], vec![(ki, 6)])).unwrap();
        let snap = store.snapshot().unwrap();
        let out = snap.outputs.values().next().unwrap();
        assert!(out.spent);
        assert_eq!(out.spent_height, Some(6));
        assert_eq!(snap.total_balance(), 0);
        assert_balance_invariant(&store);
    }

    #[test]
    fn test_duplicate_one_time_key() {
        let store = OutputStore::new(0, 720);
        let small = output(1, 10_000, 2);
        let mut large = output(2, 25_000, 3);
        large.public_key = small.public_key;
        large.key_image = small.key_image;
        let ki = small.key_image.unwrap();

        // The larger duplicate replaces the smaller one.
        store.apply_range(update(0, 4, vec![small.clone(), large.clone()], vec![])).unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.outputs.len(), 1);
        assert_eq!(snap.total_balance(), 25_000);
        assert_eq!(store.mark_spent(&ki, 5).unwrap(), Some(large.id));
        assert_eq!(store.snapshot().unwrap().total_balance(), 0);

        // A smaller duplicate arriving later is dropped.
        let store = OutputStore::new(0, 720);
        store.insert_or_update(large.clone()).unwrap();
        store.insert_or_update(small.clone()).unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.outputs.keys().copied().collect::<Vec<_>>(), vec![large.id]);
        assert_eq!(snap.total_balance(), 25_000);
        assert_balance_invariant(&store);

        // A spent output is never replaced.
        let store = OutputStore::new(0, 720);
        store.insert_or_update(small.clone()).unwrap();
        store.mark_spent(&ki, 3).unwrap();
        store.insert_or_update(large).unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.outputs.keys().copied().collect::<Vec<_>>(), vec![small.id]);
        assert_eq!(snap.total_balance(), 0);
    }

    #[test]
    fn test_apply_range_must_be_contiguous() {
        let store = OutputStore::new(10, 720);
        assert!(store.apply_range(update(0, 4, vec![], vec![])).is_err());
        store.apply_range(update(10, 12, vec![], vec![])).unwrap();
        assert!(store.apply_range(update(12, 14, vec![], vec![])).is_err());
        assert_eq!(store.wallet_height().unwrap(), 13);
    }

    #[test]
    fn test_spend_in_same_range() {
        let store = OutputStore::new(0, 720);
        let out = output(1, 100, 2);
        let ki = out.key_image.unwrap();
        store.apply_range(update(0, 5, vec![out], vec![(ki, 4)])).unwrap();
        assert_eq!(store.snapshot().unwrap().total_balance(), 0);
    }

    #[test]
    fn test_rollback_above() {
        let store = OutputStore::new(0, 720);
        let early = output(1, 100, 2);
        let late = output(2, 50, 8);
        let ki = early.key_image.unwrap();
        store.apply_range(update(0, 9, vec![early, late], vec![(ki, 7)])).unwrap();
        store.reserve(&[output(2, 50, 8).id]).unwrap();

        store.rollback_above(5).unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.wallet_height, 6);
        assert_eq!(snap.outputs.len(), 1);
        assert!(!snap.outputs.values().next().unwrap().spent);
        assert!(snap.reserved.is_empty());
        assert_eq!(snap.blocks.keys().last(), Some(&5));
        assert_eq!(snap.total_balance(), 100);
        assert!(!store.key_images().unwrap().contains(&output(2, 50, 8).key_image.unwrap()));
        assert_balance_invariant(&store);
    }

    #[test]
    fn test_reset_to_restore_height() {
        let store = OutputStore::new(3, 720);
        store.apply_range(update(3, 9, vec![output(1, 100, 4)], vec![])).unwrap();
        store.reset_to_restore_height().unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.wallet_height, 3);
        assert_eq!(snap.restore_height, 3);
        assert!(snap.outputs.is_empty() && snap.blocks.is_empty());
    }

    #[test]
    fn test_reserve_all_or_nothing() {
        let store = OutputStore::new(0, 720);
        let a = output(1, 100, 1);
        let b = output(2, 100, 1);
        store.apply_range(update(0, 2, vec![a.clone(), b.clone()], vec![])).unwrap();

        store.reserve(&[a.id]).unwrap();
        assert!(store.reserve(&[b.id, a.id]).is_err());
        assert!(!store.is_reserved(&b.id).unwrap());
        assert!(store.reserve(&[b.id, b.id]).is_err());
        assert!(store.reserve(&[OutputId::new([9; 32], 0)]).is_err());

        store.release(&[a.id]).unwrap();
        store.reserve(&[a.id, b.id]).unwrap();
        assert!(store.is_reserved(&a.id).unwrap() && store.is_reserved(&b.id).unwrap());
    }

    #[test]
    fn test_mark_spent_clears_reservation() {
        let store = OutputStore::new(0, 720);
        let a = output(1, 100, 1);
        store.insert_or_update(a.clone()).unwrap();
        store.reserve(&[a.id]).unwrap();
        assert_eq!(store.mark_spent(&a.key_image.unwrap(), 3).unwrap(), Some(a.id));
        assert!(!store.is_reserved(&a.id).unwrap());
        assert_eq!(store.mark_spent(&[0; 32], 3).unwrap(), None);
    }

    #[test]
    fn test_select_and_reserve() {
        let store = OutputStore::new(0, 720);
        let a = output(1, 100, 1);
        store.insert_or_update(a.clone()).unwrap();
        let picked = store
            .select_and_reserve(|view| {
                let ids: Vec<OutputId> =
                    view.outputs().filter(|o| !view.is_reserved(&o.id)).map(|o| o.id).collect();
                Ok((ids.clone(), ids.len()))
            })
            .unwrap();
        assert_eq!(picked, 1);
        assert!(store.is_reserved(&a.id).unwrap());

        let again = store
            .select_and_reserve(|view| {
                let ids: Vec<OutputId> =
                    view.outputs().filter(|o| !view.is_reserved(&o.id)).map(|o| o.id).collect();
                Ok((ids.clone(), ids.len()))
            })
            .unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn test_prune_keeps_tip_timestamp() {
        let store = OutputStore::new(0, 3);
        store.apply_range(update(0, 9, vec![], vec![])).unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.blocks.keys().copied().collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(snap.tip_timestamp, 1_009);

        // Pruned timestamps still count after a rollback below the window.
        store.rollback_above(6).unwrap();
        assert_eq!(store.tip_timestamp().unwrap(), 1_006);
    }

    #[test]
    fn test_export_import() {
        let store = OutputStore::new(0, 720);
        store.apply_range(update(0, 4, vec![output(1, 100, 2), output(2, 5, 3)], vec![])).unwrap();
        store.reserve(&[output(1, 100, 2).id]).unwrap();
        let export = store.export().unwrap();

        let json = serde_json::to_string(&export).unwrap();
        let other = OutputStore::new(0, 720);
        other.import(serde_json::from_str(&json).unwrap()).unwrap();
        let (a, b) = (store.snapshot().unwrap(), other.snapshot().unwrap());
        assert_eq!(a.outputs, b.outputs);
        assert_eq!(a.blocks, b.blocks);
        assert_eq!(a.wallet_height, b.wallet_height);
        assert!(b.reserved.is_empty());
        assert_eq!(other.key_images().unwrap().len(), 2);
    }
}
