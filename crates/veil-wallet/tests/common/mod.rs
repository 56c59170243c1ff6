//! In-memory daemon for wallet integration tests.
//!
//! Every block carries a coinbase to a throwaway key so rings have decoys.
//! Funding helpers queue transactions for the next mined block; `relay`
//! verifies real transactions and puts them in the mempool.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use veil_crypto::commitment::zero_commit;
use veil_crypto::{compress, keccak256, mul_base, random_scalar};
use veil_rpc::{DaemonClient, RpcError};
use veil_tx::output::build_outputs;
use veil_tx::types::relative_to_absolute;
use veil_tx::{verify_transaction, Destination, Transaction};
use veil_types::{Address, BlockData, ChainInput, ChainOutput, ChainTx, Network, RingMember};
use veil_wallet::{CancelHandle, KeyManager, Wallet, WalletConfig, WalletOptions};

pub const NETWORK: Network = Network::Testnet;
pub const GENESIS_TIME: u64 = 1_600_000_000;
pub const BLOCK_TIME: u64 = 120;
const FILLER_REWARD: u64 = 1_000;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn random_point() -> [u8; 32] {
    compress(&mul_base(&random_scalar()))
}

#[derive(Default)]
struct Chain {
    blocks: Vec<BlockData>,
    /// Cumulative output count after each block.
    distribution: Vec<u64>,
    outputs: Vec<RingMember>,
    spent: HashSet<[u8; 32]>,
    queued: Vec<ChainTx>,
    mempool: Vec<Transaction>,
    next_coinbase: Option<(Address, u64)>,
    branch: u8,
    offline: bool,
    fail_from: Option<u64>,
    reject_next: Option<String>,
    cancel_at: Option<(u64, CancelHandle)>,
    /// Fetches left that come back with a broken parent link.
    broken_fetches: u32,
    /// Every fetch not starting at genesis names a parent the daemon's own
    /// block hashes disagree with.
    misparented: bool,
    relay_down: bool,
    relayed: Vec<[u8; 32]>,
}

impl Chain {
    fn filler_coinbase(&self, height: u64) -> ChainTx {
        ChainTx {
            hash: keccak256(&[b"coinbase".as_slice(), &height.to_le_bytes(), &[self.branch]].concat()),
            unlock_time: height + 60,
            is_coinbase: true,
            tx_pub_key: Some(random_point()),
            additional_pub_keys: vec![],
            inputs: vec![],
            outputs: vec![ChainOutput {
                global_index: 0,
                public_key: random_point(),
                view_tag: None,
                encrypted_amount: [0; 8],
                amount: FILLER_REWARD,
                commitment: [0; 32],
            }],
        }
    }

    fn mine_one(&mut self) {
        let height = self.blocks.len() as u64;
        let coinbase = match self.next_coinbase.take() {
            Some((address, amount)) => coinbase_to(&address, amount, height),
            None => self.filler_coinbase(height),
        };

        let mut txs = vec![coinbase];
        txs.append(&mut self.queued);
        for tx in std::mem::take(&mut self.mempool) {
            // Global indices are assigned below with everything else.
            txs.push(tx.to_chain_tx(&vec![0; tx.output_count()]).expect("mempool tx converts"));
        }

        for tx in &mut txs {
            for input in &tx.inputs {
                self.spent.insert(input.key_image);
            }
            for out in &mut tx.outputs {
                out.global_index = self.outputs.len() as u64;
                let commitment = if tx.is_coinbase { zero_commit(out.amount) } else { out.commitment };
                self.outputs.push(RingMember {
                    global_index: out.global_index,
                    public_key: out.public_key,
                    commitment,
                });
            }
        }

        let prev_hash = self.blocks.last().map(|b| b.hash).unwrap_or([0; 32]);
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&height.to_le_bytes());
        preimage.push(self.branch);
        preimage.extend_from_slice(&prev_hash);
        for tx in &txs {
            preimage.extend_from_slice(&tx.hash);
        }
        self.blocks.push(BlockData {
            height,
            hash: keccak256(&preimage),
            prev_hash,
            timestamp: GENESIS_TIME + BLOCK_TIME * height,
            txs,
        });
        self.distribution.push(self.outputs.len() as u64);
    }
}

fn coinbase_to(address: &Address, amount: u64, height: u64) -> ChainTx {
    let (keys, built) = build_outputs(&[Destination::new(*address, amount)]).expect("coinbase output");
    ChainTx {
        hash: keccak256(&[b"funded coinbase".as_slice(), &height.to_le_bytes(), &keys.tx_pub_key].concat()),
        unlock_time: height + 60,
        is_coinbase: true,
        tx_pub_key: Some(keys.tx_pub_key),
        additional_pub_keys: keys.additional_pub_keys,
        inputs: vec![],
        outputs: built
            .iter()
            .map(|o| ChainOutput {
                global_index: 0,
                public_key: o.output.public_key,
                view_tag: Some(o.output.view_tag),
                encrypted_amount: [0; 8],
                amount,
                commitment: [0; 32],
            })
            .collect(),
    }
}

/// Shared, cheaply cloned mock daemon.
#[derive(Clone, Default)]
pub struct MockDaemon {
    chain: Arc<Mutex<Chain>>,
}

impl MockDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain with `n` filler blocks.
    pub fn with_blocks(n: u64) -> Self {
        let daemon = Self::new();
        daemon.mine(n);
        daemon
    }

    fn chain(&self) -> std::sync::MutexGuard<'_, Chain> {
        self.chain.lock().unwrap()
    }

    pub fn mine(&self, n: u64) {
        let mut chain = self.chain();
        for _ in 0..n {
            chain.mine_one();
        }
    }

    pub fn height(&self) -> u64 {
        self.chain().blocks.len() as u64
    }

    /// Queue a regular transaction paying `amount` to each address, mined in
    /// the next block. Returns its hash.
    pub fn fund(&self, dests: &[(Address, u64)]) -> [u8; 32] {
        let dests: Vec<Destination> = dests.iter().map(|(a, v)| Destination::new(*a, *v)).collect();
        let (keys, built) = build_outputs(&dests).expect("funding outputs");
        let hash = keccak256(&[b"funding".as_slice(), &keys.tx_pub_key].concat());
        self.chain().queued.push(ChainTx {
            hash,
            unlock_time: 0,
            is_coinbase: false,
            tx_pub_key: Some(keys.tx_pub_key),
            additional_pub_keys: keys.additional_pub_keys,
            inputs: vec![ChainInput { key_image: random_point(), ring: vec![0] }],
            outputs: built
                .iter()
                .map(|o| ChainOutput {
                    global_index: 0,
                    public_key: o.output.public_key,
                    view_tag: Some(o.output.view_tag),
                    encrypted_amount: o.output.encrypted_amount,
                    amount: 0,
                    commitment: o.output.commitment,
                })
                .collect(),
        });
        hash
    }

    /// Queue a bare input spending `key_image`, mined in the next block.
    pub fn spend_key_image(&self, key_image: [u8; 32]) {
        let hash = keccak256(&[b"spend".as_slice(), &key_image].concat());
        self.chain().queued.push(ChainTx {
            hash,
            unlock_time: 0,
            is_coinbase: false,
            tx_pub_key: Some(random_point()),
            additional_pub_keys: vec![],
            inputs: vec![ChainInput { key_image, ring: vec![0] }],
            outputs: vec![],
        });
    }

    /// Pay the next block's coinbase to `address`.
    pub fn fund_coinbase(&self, address: Address, amount: u64) {
        self.chain().next_coinbase = Some((address, amount));
    }

    /// Drop every block from `fork_height` up; later blocks form a new branch.
    pub fn reorg(&self, fork_height: u64) {
        let mut chain = self.chain();
        let keep = fork_height as usize;
        chain.blocks.truncate(keep);
        chain.distribution.truncate(keep);
        let outputs = chain.distribution.last().copied().unwrap_or(0) as usize;
        chain.outputs.truncate(outputs);
        chain.spent = chain
            .blocks
            .iter()
            .flat_map(|b| b.txs.iter().flat_map(|t| t.inputs.iter().map(|i| i.key_image)))
            .collect();
        chain.mempool.clear();
        chain.queued.clear();
        chain.branch = chain.branch.wrapping_add(1);
    }

    pub fn set_offline(&self, offline: bool) {
        self.chain().offline = offline;
    }

    /// Fail `get_blocks` for any range reaching `height`.
    pub fn fail_blocks_from(&self, height: Option<u64>) {
        self.chain().fail_from = height;
    }

    pub fn reject_next_relay(&self, reason: &str) {
        self.chain().reject_next = Some(reason.to_string());
    }

    /// Trip `handle` when a range containing `height` is fetched.
    pub fn cancel_when_fetching(&self, height: u64, handle: CancelHandle) {
        self.chain().cancel_at = Some((height, handle));
    }

    /// Make the next `n` multi-block fetches link inconsistently.
    pub fn misparent_fetches(&self, on: bool) {
        self.chain().misparented = on;
    }

    /// Fail only `relay`, with a connection error.
    pub fn set_relay_down(&self, down: bool) {
        self.chain().relay_down = down;
    }

    pub fn break_next_fetches(&self, n: u32) {
        self.chain().broken_fetches = n;
    }

    pub fn mempool_len(&self) -> usize {
        self.chain().mempool.len()
    }

    pub fn relayed(&self) -> Vec<[u8; 32]> {
        self.chain().relayed.clone()
    }

    pub fn is_spent(&self, key_image: &[u8; 32]) -> bool {
        self.chain().spent.contains(key_image)
    }
}

fn offline() -> RpcError {
    RpcError::Connection("daemon offline".into())
}

#[async_trait]
impl DaemonClient for MockDaemon {
    async fn get_height(&self) -> Result<u64, RpcError> {
        let chain = self.chain();
        if chain.offline {
            return Err(offline());
        }
        Ok(chain.blocks.len() as u64)
    }

    async fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<BlockData>, RpcError> {
        let mut chain = self.chain();
        if chain.offline || chain.fail_from.is_some_and(|h| end >= h) {
            return Err(offline());
        }
        if end < start || end >= chain.blocks.len() as u64 {
            return Err(RpcError::InvalidResponse(format!("no blocks {}..={}", start, end)));
        }
        if let Some((height, handle)) = &chain.cancel_at {
            if (start..=end).contains(height) {
                handle.cancel();
            }
        }
        let mut blocks = chain.blocks[start as usize..=end as usize].to_vec();
        if chain.broken_fetches > 0 && blocks.len() > 1 {
            chain.broken_fetches -= 1;
            blocks[1].prev_hash = [0xee; 32];
        }
        if chain.misparented && start > 0 {
            blocks[0].prev_hash = [0xee; 32];
        }
        Ok(blocks)
    }

    async fn get_block_hash(&self, height: u64) -> Result<[u8; 32], RpcError> {
        let chain = self.chain();
        if chain.offline {
            return Err(offline());
        }
        chain
            .blocks
            .get(height as usize)
            .map(|b| b.hash)
            .ok_or_else(|| RpcError::InvalidResponse(format!("no block {}", height)))
    }

    async fn is_synced(&self) -> Result<bool, RpcError> {
        if self.chain().offline {
            return Err(offline());
        }
        Ok(true)
    }

    async fn is_trusted(&self) -> Result<bool, RpcError> {
        if self.chain().offline {
            return Err(offline());
        }
        Ok(false)
    }

    async fn relay(&self, blob: &[u8]) -> Result<[u8; 32], RpcError> {
        let mut chain = self.chain();
        if chain.offline || chain.relay_down {
            return Err(offline());
        }
        if let Some(reason) = chain.reject_next.take() {
            return Err(RpcError::Rejected { reason });
        }
        let reject = |reason: String| RpcError::Rejected { reason };
        let tx = Transaction::from_bytes(blob).map_err(|e| reject(e.to_string()))?;

        let pending: HashSet<[u8; 32]> = chain.mempool.iter().flat_map(|t| t.key_images()).collect();
        if tx.key_images().iter().any(|ki| chain.spent.contains(ki) || pending.contains(ki)) {
            return Err(reject("double spend".into()));
        }
        let mut rings = Vec::new();
        for input in &tx.prefix.inputs {
            let indices = relative_to_absolute(&input.key_offsets).map_err(|e| reject(e.to_string()))?;
            let ring = indices
                .iter()
                .map(|&i| chain.outputs.get(i as usize).cloned())
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| reject("unknown ring member".into()))?;
            rings.push(ring);
        }
        verify_transaction(&tx, &rings).map_err(|e| reject(e.to_string()))?;

        let hash = tx.tx_hash().map_err(|e| reject(e.to_string()))?;
        chain.mempool.push(tx);
        chain.relayed.push(hash);
        Ok(hash)
    }

    async fn get_output_distribution(&self, to_height: u64) -> Result<Vec<u64>, RpcError> {
        let chain = self.chain();
        if chain.offline {
            return Err(offline());
        }
        if to_height as usize >= chain.distribution.len() {
            return Err(RpcError::InvalidResponse(format!("no distribution to {}", to_height)));
        }
        Ok(chain.distribution[..=to_height as usize].to_vec())
    }

    async fn get_outputs(&self, global_indices: &[u64]) -> Result<Vec<RingMember>, RpcError> {
        let chain = self.chain();
        if chain.offline {
            return Err(offline());
        }
        global_indices
            .iter()
            .map(|&i| {
                chain
                    .outputs
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| RpcError::InvalidResponse(format!("no output {}", i)))
            })
            .collect()
    }

    fn describe(&self) -> String {
        "mock daemon".to_string()
    }
}

/// A seed distinct per `n`, as hex.
pub fn seed(n: u8) -> String {
    hex::encode([n; 32])
}

pub fn config(seed_n: u8) -> WalletConfig {
    let mut config = WalletConfig::new(seed(seed_n), NETWORK);
    config.options = WalletOptions { sync_range_size: 10, ..Default::default() };
    config
}

pub fn wallet(seed_n: u8, daemon: &MockDaemon) -> Wallet {
    Wallet::with_daemon(config(seed_n), Arc::new(daemon.clone())).unwrap()
}

pub fn address_of(seed_n: u8) -> Address {
    KeyManager::from_seed_str(&seed(seed_n), NETWORK).unwrap().primary_address()
}
