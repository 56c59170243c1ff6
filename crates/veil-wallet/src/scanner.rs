//! Chain scanning.
//!
//! `scan_range` fetches a block range without holding any store lock,
//! validates how it links to what the store already has, turns it into a
//! `RangeUpdate` and applies that in one write. A parent-hash mismatch with
//! the stored chain rolls the store back to the fork point instead.

use curve25519_dalek::scalar::Scalar;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use veil_crypto::commitment::{commit, zero_commit};
use veil_crypto::derivation::{
    commitment_mask, decrypt_amount, derivation_to_scalar, derive_subaddress_public_key,
    derive_view_tag,
};
use veil_rpc::DaemonClient;
use veil_types::{BlockData, ChainOutput, ChainTx};

use crate::account::SubaddressRegistry;
use crate::error::WalletError;
use crate::keys::KeyManager;
use crate::output::{OutputId, OwnedOutput};
use crate::store::{BlockRecord, OutputStore, RangeUpdate};

/// Counters for one applied range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeStats {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub outputs_found: usize,
    pub spends_detected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Applied(RangeStats),
    /// The stored chain diverged from the daemon's. The store now resumes at
    /// `fork_height + 1`, or at the restore height when no common block was
    /// retained.
    Reorged { fork_height: Option<u64> },
}

pub struct ChainScanner {
    keys: Arc<KeyManager>,
    store: Arc<OutputStore>,
    daemon: Arc<dyn DaemonClient>,
    registry: SubaddressRegistry,
}

impl ChainScanner {
    pub fn new(
        keys: Arc<KeyManager>,
        store: Arc<OutputStore>,
        daemon: Arc<dyn DaemonClient>,
        major_gap: u32,
        minor_gap: u32,
    ) -> Result<Self, WalletError> {
        let mut registry = SubaddressRegistry::new(&keys, major_gap, minor_gap)?;
        registry.rebuild(store.used_subaddresses()?)?;
        Ok(Self { keys, store, daemon, registry })
    }

    pub fn registry(&self) -> &SubaddressRegistry {
        &self.registry
    }

    /// Scan `[from, to]` and apply it. `from` must be the wallet height.
    pub async fn scan_range(&mut self, from: u64, to: u64) -> Result<ScanOutcome, WalletError> {
        let wallet_height = self.store.wallet_height()?;
        if from != wallet_height || to < from {
            return Err(WalletError::Storage(format!(
                "cannot scan {}..={} at wallet height {}",
                from, to, wallet_height
            )));
        }

        let blocks = self.daemon.get_blocks(from, to).await?;
        check_heights(&blocks, from, to)?;

        if from > 0 {
            if let Some(stored) = self.store.block_hash(from - 1)? {
                if blocks[0].prev_hash != stored {
                    log::warn!("block {} does not extend the stored chain", from);
                    return self.handle_reorg(from).await;
                }
            }
        }
        for pair in blocks.windows(2) {
            if pair[1].prev_hash != pair[0].hash {
                return Err(WalletError::ReorgDetected { height: pair[1].height });
            }
        }

        let known = self.store.key_images()?;
        let mut registry = self.registry.clone();
        let update = scan_blocks(&self.keys, &mut registry, &known, &blocks)?;
        let stats = RangeStats {
            start: from,
            end: to,
            outputs_found: update.outputs.len(),
            spends_detected: update.spends.len(),
        };
        self.store.apply_range(update)?;
        self.registry = registry;

        if stats.outputs_found > 0 || stats.spends_detected > 0 {
            log::info!(
                "scanned {}..={}: {} outputs, {} spends",
                from,
                to,
                stats.outputs_found,
                stats.spends_detected
            );
        } else {
            log::debug!("scanned {}..={}", from, to);
        }
        Ok(ScanOutcome::Applied(stats))
    }

    /// Compare the stored tip with the daemon's block at the same height.
    /// A replaced tip that did not make the chain longer is only visible
    /// here, since there is nothing new to fetch.
    pub async fn check_tip(&mut self) -> Result<Option<ScanOutcome>, WalletError> {
        let wallet_height = self.store.wallet_height()?;
        if wallet_height == 0 {
            return Ok(None);
        }
        let Some(stored) = self.store.block_hash(wallet_height - 1)? else {
            return Ok(None);
        };
        if self.daemon.get_block_hash(wallet_height - 1).await? == stored {
            return Ok(None);
        }
        log::warn!("block {} was replaced on the daemon", wallet_height - 1);
        self.handle_reorg(wallet_height).await.map(Some)
    }

    /// Find the highest stored block the daemon still agrees with and roll
    /// back to it.
    async fn handle_reorg(&mut self, from: u64) -> Result<ScanOutcome, WalletError> {
        let mut fork_height = None;
        for (height, hash) in self.store.block_hashes_below(from)? {
            if self.daemon.get_block_hash(height).await? == hash {
                fork_height = Some(height);
                break;
            }
        }
        match fork_height {
            Some(height) => self.store.rollback_above(height)?,
            None => {
                log::warn!("no common block retained, rescanning from the restore height");
                self.store.reset_to_restore_height()?;
            }
        }
        self.registry.rebuild(self.store.used_subaddresses()?)?;
        Ok(ScanOutcome::Reorged { fork_height })
    }
}

fn check_heights(blocks: &[BlockData], from: u64, to: u64) -> Result<(), WalletError> {
    let expected = (to - from + 1) as usize;
    if blocks.len() != expected {
        return Err(WalletError::Connection(format!(
            "daemon returned {} blocks for {}..={}",
            blocks.len(),
            from,
            to
        )));
    }
    for (block, height) in blocks.iter().zip(from..) {
        if block.height != height {
            return Err(WalletError::Connection(format!(
                "daemon returned block {} where {} was expected",
                block.height, height
            )));
        }
    }
    Ok(())
}

/// Turn fetched blocks into a store update. Pure apart from widening
/// `registry` as subaddresses are found in use.
pub(crate) fn scan_blocks(
    keys: &KeyManager,
    registry: &mut SubaddressRegistry,
    known_key_images: &HashSet<[u8; 32]>,
    blocks: &[BlockData],
) -> Result<RangeUpdate, WalletError> {
    let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
        return Err(WalletError::Storage("no blocks to scan".into()));
    };
    let mut update = RangeUpdate { start: first.height, end: last.height, ..Default::default() };
    let mut found_key_images: HashSet<[u8; 32]> = HashSet::new();

    for block in blocks {
        for tx in &block.txs {
            for input in &tx.inputs {
                let ki = input.key_image;
                if known_key_images.contains(&ki) || found_key_images.contains(&ki) {
                    update.spends.push((ki, block.height));
                }
            }
            for output in scan_tx(keys, registry, tx, block.height)? {
                if let Some(ki) = output.key_image {
                    found_key_images.insert(ki);
                }
                update.outputs.push(output);
            }
        }
        update
            .blocks
            .push((block.height, BlockRecord { hash: block.hash, timestamp: block.timestamp }));
    }
    Ok(update)
}

fn scan_tx(
    keys: &KeyManager,
    registry: &mut SubaddressRegistry,
    tx: &ChainTx,
    height: u64,
) -> Result<Vec<OwnedOutput>, WalletError> {
    let mut derivations: HashMap<[u8; 32], Option<[u8; 32]>> = HashMap::new();
    let mut found = Vec::new();

    for (i, out) in tx.outputs.iter().enumerate() {
        let Some(tx_pub_key) = tx.derivation_key(i) else { continue };
        let derivation = *derivations
            .entry(tx_pub_key)
            .or_insert_with(|| keys.derivation(&tx_pub_key).ok());
        let Some(derivation) = derivation else { continue };

        let index = i as u64;
        if out.view_tag.is_some_and(|tag| tag != derive_view_tag(&derivation, index)) {
            continue;
        }
        let Ok(spend_key) = derive_subaddress_public_key(&out.public_key, &derivation, index) else {
            continue;
        };
        let Some(subaddress) = registry.lookup(&spend_key) else { continue };

        let shared = derivation_to_scalar(&derivation, index);
        let Some((amount, mask, commitment)) = open_amount(tx, out, &shared) else {
            log::warn!(
                "output {} of tx {} has a commitment that does not open, skipping",
                i,
                hex::encode(tx.hash)
            );
            continue;
        };

        let id = OutputId::new(tx.hash, i as u32);
        let key_image = if keys.can_spend() {
            Some(keys.key_image(&id, &tx_pub_key, subaddress, &out.public_key)?)
        } else {
            None
        };
        registry.mark_used(subaddress)?;

        found.push(OwnedOutput {
            id,
            global_index: out.global_index,
            amount,
            subaddress,
            public_key: out.public_key,
            commitment,
            mask: mask.to_bytes(),
            tx_pub_key,
            key_image,
            height,
            unlock_time: tx.unlock_time,
            is_coinbase: tx.is_coinbase,
            spent: false,
            spent_height: None,
        });
    }
    Ok(found)
}

/// Amount, mask and commitment of an owned output. Coinbase amounts are
/// in the clear and committed with a unit mask.
fn open_amount(tx: &ChainTx, out: &ChainOutput, shared: &Scalar) -> Option<(u64, Scalar, [u8; 32])> {
    if tx.is_coinbase {
        return Some((out.amount, Scalar::ONE, zero_commit(out.amount)));
    }
    let amount = decrypt_amount(&out.encrypted_amount, shared);
    let mask = commitment_mask(shared);
    (commit(amount, &mask) == out.commitment).then_some((amount, mask, out.commitment))
}
