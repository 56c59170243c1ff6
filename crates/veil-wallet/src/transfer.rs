//! Transaction creation, relay and release.
//!
//! Inputs are selected and reserved in one store critical section, so two
//! concurrent `create_tx` calls never pick the same output. Everything after
//! that (ring member fetches, building, signing, relay) runs without the
//! lock, and any failure there releases the reservation again.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use veil_rpc::{DaemonClient, RpcError};
use veil_tx::{
    sign_transaction, Destination, DecoySelector, FeePriority, PreparedInput, TransactionBuilder,
};
use veil_types::{Address, RingMember};

use crate::config::WalletOptions;
use crate::error::WalletError;
use crate::keys::KeyManager;
use crate::output::{OutputId, OwnedOutput};
use crate::store::OutputStore;
use crate::utxo::{select_inputs, Selection, SelectionParams};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxDestination {
    pub address: String,
    pub amount: u64,
}

impl TxDestination {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self { address: address.into(), amount }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    pub destinations: Vec<TxDestination>,
    pub priority: FeePriority,
    /// Relay as soon as the transaction is built.
    pub relay: bool,
    /// Account to spend from.
    pub account: u32,
    /// Overrides the wallet's ring size.
    pub ring_size: Option<usize>,
}

impl TxConfig {
    pub fn to(address: impl Into<String>, amount: u64) -> Self {
        Self { destinations: vec![TxDestination::new(address, amount)], ..Default::default() }
    }
}

/// One signed transaction and what it spends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: [u8; 32],
    pub blob: Vec<u8>,
    pub fee: u64,
    pub spent_outputs: Vec<OutputId>,
    pub input_total: u64,
    pub destination_total: u64,
    pub change_amount: u64,
    pub num_outputs: usize,
}

/// The result of `create_tx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSet {
    pub txs: Vec<PendingTx>,
}

impl TxSet {
    pub fn fee(&self) -> u64 {
        self.txs.iter().map(|t| t.fee).sum()
    }

    /// Hex blobs, comma separated.
    pub fn get_serialized(&self) -> String {
        self.txs.iter().map(|t| hex::encode(&t.blob)).collect::<Vec<_>>().join(",")
    }

    /// Hex hashes, comma separated.
    pub fn tx_hash(&self) -> String {
        self.txs.iter().map(|t| hex::encode(t.hash)).collect::<Vec<_>>().join(",")
    }

    pub fn spent_outputs(&self) -> Vec<OutputId> {
        self.txs.iter().flat_map(|t| t.spent_outputs.iter().copied()).collect()
    }
}

pub struct TxBuilder {
    keys: Arc<KeyManager>,
    store: Arc<OutputStore>,
    daemon: Arc<dyn DaemonClient>,
    options: WalletOptions,
}

impl TxBuilder {
    pub fn new(
        keys: Arc<KeyManager>,
        store: Arc<OutputStore>,
        daemon: Arc<dyn DaemonClient>,
        options: WalletOptions,
    ) -> Self {
        Self { keys, store, daemon, options }
    }

    fn parse_destinations(&self, dests: &[TxDestination]) -> Result<Vec<Destination>, WalletError> {
        if dests.is_empty() {
            return Err(WalletError::InvalidDestination("no destinations".into()));
        }
        let network = self.keys.network();
        dests
            .iter()
            .map(|d| {
                let address = Address::parse_for(network, &d.address)
                    .map_err(|e| WalletError::InvalidDestination(format!("{}: {}", d.address, e)))?;
                if d.amount == 0 {
                    return Err(WalletError::InvalidDestination(format!("{}: zero amount", d.address)));
                }
                if d.amount < self.options.dust_threshold {
                    return Err(WalletError::DustOutput {
                        amount: d.amount,
                        threshold: self.options.dust_threshold,
                    });
                }
                Ok(Destination::new(address, d.amount))
            })
            .collect()
    }

    /// Build and sign a transaction, relaying it when `config.relay` is set.
    /// When that relay fails the inputs are released and the set is dropped.
    pub async fn create_tx(&self, config: &TxConfig) -> Result<TxSet, WalletError> {
        if !self.keys.can_spend() {
            return Err(WalletError::ViewOnly("create transactions".into()));
        }
        let dests = self.parse_destinations(&config.destinations)?;
        let destination_total = dests
            .iter()
            .try_fold(0u64, |acc, d| acc.checked_add(d.amount))
            .ok_or_else(|| WalletError::InvalidDestination("amount overflow".into()))?;
        let ring_size = config.ring_size.unwrap_or(self.options.ring_size).max(1);

        let params = SelectionParams {
            destination_total,
            num_destinations: dests.len(),
            ring_size,
            priority: config.priority,
            dust_threshold: self.options.dust_threshold,
        };
        let confirmations = self.options.unlock_confirmations;
        let account = config.account;
        let (selection, inputs, wallet_height) = self.store.select_and_reserve(|view| {
            let candidates: Vec<&OwnedOutput> = view
                .outputs()
                .filter(|o| {
                    !o.spent
                        && o.key_image.is_some()
                        && o.subaddress.major == account
                        && !view.is_reserved(&o.id)
                        && o.is_unlocked(view.wallet_height(), view.tip_timestamp(), confirmations)
                })
                .collect();
            let selection = select_inputs(&candidates, &params)?;
            let inputs: Vec<OwnedOutput> = candidates
                .iter()
                .filter(|o| selection.ids.contains(&o.id))
                .map(|o| (*o).clone())
                .collect();
            Ok((selection.ids.clone(), (selection, inputs, view.wallet_height())))
        })?;
        log::debug!(
            "reserved {} inputs ({} atomic units) for {} destinations",
            selection.ids.len(),
            selection.input_total,
            dests.len()
        );

        let built = self
            .build_signed(&selection, &inputs, dests, account, ring_size, config.priority, wallet_height)
            .await;
        let pending = match built {
            Ok(pending) => pending,
            Err(e) => {
                self.store.release(&selection.ids)?;
                return Err(e);
            }
        };

        let set = TxSet { txs: vec![pending] };
        log::info!("created tx {} with fee {}", set.tx_hash(), set.fee());
        if config.relay {
            // The caller never sees an unrelayed set, so nothing may stay reserved.
            if let Err(e) = self.relay_tx(&set).await {
                self.store.release(&set.spent_outputs())?;
                return Err(e);
            }
        }
        Ok(set)
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_signed(
        &self,
        selection: &Selection,
        inputs: &[OwnedOutput],
        dests: Vec<Destination>,
        account: u32,
        ring_size: usize,
        priority: FeePriority,
        wallet_height: u64,
    ) -> Result<PendingTx, WalletError> {
        let destination_total: u64 = dests.iter().map(|d| d.amount).sum();
        let num_destinations = dests.len();

        let distribution = self.daemon.get_output_distribution(wallet_height.saturating_sub(1)).await?;
        let selector = DecoySelector::new(distribution)?;

        let mut prepared = Vec::with_capacity(inputs.len());
        for input in inputs {
            let (indices, real_index) = selector.build_ring(input.global_index, ring_size)?;
            let ring = self.daemon.get_outputs(&indices).await?;
            check_ring(input, &indices, &ring, real_index)?;
            prepared.push(PreparedInput {
                secret_key: self.keys.output_secret_key(
                    &input.tx_pub_key,
                    input.id.output_index as u64,
                    input.subaddress,
                )?,
                amount: input.amount,
                mask: input.mask_scalar(),
                ring,
                real_index,
            });
        }

        let unsigned = TransactionBuilder::new()
            .add_inputs(prepared)
            .set_change_address(self.keys.address(account, 0)?)
            .set_fee(selection.fee)
            .set_priority(priority);
        let unsigned = dests.into_iter().fold(unsigned, |b, d| b.add_destination(d)).build()?;
        if unsigned.change != selection.change {
            return Err(WalletError::Other(format!(
                "built change {} differs from selected change {}",
                unsigned.change, selection.change
            )));
        }
        let tx = sign_transaction(unsigned)?;

        Ok(PendingTx {
            hash: tx.tx_hash()?,
            blob: tx.to_bytes()?,
            fee: selection.fee,
            spent_outputs: selection.ids.clone(),
            input_total: selection.input_total,
            destination_total,
            change_amount: selection.change,
            num_outputs: selection.num_outputs(num_destinations),
        })
    }

    /// Relay every transaction in `set`. A rejection releases the inputs
    /// of the rejected transaction and of any not yet relayed; a connection
    /// error keeps them reserved so the caller can retry.
    pub async fn relay_tx(&self, set: &TxSet) -> Result<Vec<[u8; 32]>, WalletError> {
        let mut hashes = Vec::with_capacity(set.txs.len());
        for (n, tx) in set.txs.iter().enumerate() {
            match self.daemon.relay(&tx.blob).await {
                Ok(hash) => {
                    if hash != tx.hash {
                        log::warn!(
                            "daemon reported hash {} for tx {}",
                            hex::encode(hash),
                            hex::encode(tx.hash)
                        );
                    }
                    log::info!("relayed tx {}", hex::encode(tx.hash));
                    hashes.push(tx.hash);
                }
                Err(RpcError::Rejected { reason }) => {
                    log::warn!("tx {} rejected: {}", hex::encode(tx.hash), reason);
                    let unrelayed: Vec<OutputId> = set.txs[n..]
                        .iter()
                        .flat_map(|t| t.spent_outputs.iter().copied())
                        .collect();
                    self.store.release(&unrelayed)?;
                    return Err(WalletError::RelayRejected { reason });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(hashes)
    }

    /// Give the inputs of an unrelayed set back to selection.
    pub fn release_tx(&self, set: &TxSet) -> Result<(), WalletError> {
        self.store.release(&set.spent_outputs())
    }
}

/// The daemon must hand back the ring that was asked for, with our output
/// at `real_index` exactly as we recorded it.
fn check_ring(
    input: &OwnedOutput,
    indices: &[u64],
    ring: &[RingMember],
    real_index: usize,
) -> Result<(), WalletError> {
    if ring.len() != indices.len()
        || ring.iter().zip(indices).any(|(m, i)| m.global_index != *i)
    {
        return Err(WalletError::Connection("daemon returned a different ring".into()));
    }
    let real = &ring[real_index];
    if real.public_key != input.public_key || real.commitment != input.commitment {
        return Err(WalletError::Connection(format!(
            "daemon output {} does not match owned output {}",
            input.global_index, input.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(seed: u8, fee: u64) -> PendingTx {
        PendingTx {
            hash: [seed; 32],
            blob: vec![seed, seed],
            fee,
            spent_outputs: vec![OutputId::new([seed; 32], 0)],
            input_total: 0,
            destination_total: 0,
            change_amount: 0,
            num_outputs: 1,
        }
    }

    #[test]
    fn test_tx_set_serialization() {
        let single = TxSet { txs: vec![pending(1, 10)] };
        assert_eq!(single.get_serialized(), "0101");
        assert_eq!(single.tx_hash(), "01".repeat(32));

        let pair = TxSet { txs: vec![pending(1, 10), pending(2, 5)] };
        assert_eq!(pair.get_serialized(), "0101,0202");
        assert_eq!(pair.tx_hash(), format!("{},{}", "01".repeat(32), "02".repeat(32)));
        assert_eq!(pair.fee(), 15);
        assert_eq!(pair.spent_outputs().len(), 2);
    }

    #[test]
    fn test_tx_config_serde_defaults() {
        let config: TxConfig =
            serde_json::from_str(r#"{ "destinations": [{ "address": "x", "amount": 5 }] }"#).unwrap();
        assert_eq!(config.priority, FeePriority::Normal);
        assert!(!config.relay);
        assert_eq!(config.account, 0);
        assert_eq!(config, TxConfig::to("x", 5));
    }

    #[test]
    fn test_check_ring() {
        let mut input = crate::output::test_support::output(3, 10, 1);
        input.global_index = 7;
        let member = |i: u64, key: u8| RingMember { global_index: i, public_key: [key; 32], commitment: [key; 32] };
        let ring = vec![member(2, 9), member(7, 3)];
        assert!(check_ring(&input, &[2, 7], &ring, 1).is_ok());
        assert!(check_ring(&input, &[2, 8], &ring, 1).is_err());
        assert!(check_ring(&input, &[2, 7], &ring, 0).is_err());
        assert!(check_ring(&input, &[2, 7, 9], &ring, 1).is_err());
    }
}
