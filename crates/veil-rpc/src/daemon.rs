//! Daemon interface and its HTTP implementation.
//!
//! `DaemonClient` is the narrow surface the wallet engine needs from a node.
//! `DaemonRpc` implements it over the daemon's JSON and JSON-RPC endpoints.

use crate::client::{RpcClient, RpcConfig};
use crate::error::RpcError;
use crate::parse::{hex_to_32, parse_tx};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use veil_types::{keccak256, BlockData, ChainTx, RingMember};

// =============================================================================
// DaemonClient
// =============================================================================

/// What the wallet engine asks of a full node.
///
/// Heights are block counts: `get_height() == d` means the top block is `d - 1`.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    async fn get_height(&self) -> Result<u64, RpcError>;

    /// Blocks `start..=end`, ascending.
    async fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<BlockData>, RpcError>;

    async fn get_block_hash(&self, height: u64) -> Result<[u8; 32], RpcError>;

    async fn is_synced(&self) -> Result<bool, RpcError>;

    async fn is_trusted(&self) -> Result<bool, RpcError>;

    /// Submit a serialized transaction, returning its hash.
    async fn relay(&self, blob: &[u8]) -> Result<[u8; 32], RpcError>;

    /// Cumulative output counts per block, for blocks `0..=to_height`.
    async fn get_output_distribution(&self, to_height: u64) -> Result<Vec<u64>, RpcError>;

    async fn get_outputs(&self, global_indices: &[u64]) -> Result<Vec<RingMember>, RpcError>;

    /// Human-readable connection descriptor.
    fn describe(&self) -> String;
}

// =============================================================================
// Response Types
// =============================================================================

/// Daemon `/get_info` response.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonInfo {
    pub height: u64,
    #[serde(default)]
    pub target_height: u64,
    #[serde(default)]
    pub synchronized: bool,
    #[serde(default)]
    pub untrusted: bool,
    #[serde(default)]
    pub top_block_hash: String,
    #[serde(default)]
    pub mainnet: bool,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub stagenet: bool,
    pub status: String,
}

/// Block header from RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    pub timestamp: u64,
    #[serde(default)]
    pub num_txes: u64,
}

/// Full block response from `get_block`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockResult {
    pub block_header: BlockHeader,
    pub miner_tx_hash: String,
    #[serde(default)]
    pub tx_hashes: Vec<String>,
    pub status: String,
}

/// Transaction entry from `/get_transactions`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEntry {
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default)]
    pub as_json: Option<String>,
    #[serde(default)]
    pub block_height: u64,
    #[serde(default)]
    pub in_pool: bool,
    #[serde(default)]
    pub output_indices: Vec<u64>,
}

/// Output info from `/get_outs`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputInfo {
    pub key: String,
    pub mask: String,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub height: u64,
}

/// Output distribution entry.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputDistribution {
    pub amount: u64,
    #[serde(default)]
    pub start_height: u64,
    pub distribution: Vec<u64>,
    #[serde(default)]
    pub base: u64,
}

/// Send raw transaction response.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRawTxResult {
    pub status: String,
    #[serde(default)]
    pub double_spend: bool,
    #[serde(default)]
    pub fee_too_low: bool,
    #[serde(default)]
    pub invalid_input: bool,
    #[serde(default)]
    pub invalid_output: bool,
    #[serde(default)]
    pub too_big: bool,
    #[serde(default)]
    pub overspend: bool,
    #[serde(default)]
    pub not_relayed: bool,
    #[serde(default)]
    pub reason: String,
}

impl SendRawTxResult {
    /// Best available explanation for a non-OK status.
    pub fn rejection_reason(&self) -> String {
        if !self.reason.is_empty() {
            return self.reason.clone();
        }
        let flags = [
            (self.double_spend, "double spend"),
            (self.fee_too_low, "fee too low"),
            (self.invalid_input, "invalid input"),
            (self.invalid_output, "invalid output"),
            (self.too_big, "too big"),
            (self.overspend, "overspend"),
            (self.not_relayed, "not relayed"),
        ];
        let reasons: Vec<&str> = flags.iter().filter(|(set, _)| *set).map(|(_, r)| *r).collect();
        if reasons.is_empty() {
            self.status.clone()
        } else {
            reasons.join(", ")
        }
    }
}

/// Request for a specific output by amount and global index.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRequest {
    pub amount: u64,
    pub index: u64,
}

// =============================================================================
// DaemonRpc
// =============================================================================

/// Async RPC client for the daemon.
pub struct DaemonRpc {
    client: RpcClient,
}

impl DaemonRpc {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Ok(Self { client: RpcClient::new(url)? })
    }

    pub fn with_config(config: RpcConfig) -> Result<Self, RpcError> {
        Ok(Self { client: RpcClient::with_config(config)? })
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub async fn get_info(&self) -> Result<DaemonInfo, RpcError> {
        let val = self.client.post("/get_info", &json!({})).await?;
        Ok(serde_json::from_value(val)?)
    }

    pub async fn get_block(&self, height: u64) -> Result<BlockResult, RpcError> {
        let val = self.client.call("get_block", json!({ "height": height })).await?;
        Ok(serde_json::from_value(val)?)
    }

    pub async fn get_transactions(&self, tx_hashes: &[&str]) -> Result<Vec<TransactionEntry>, RpcError> {
        let val = self
            .client
            .post(
                "/get_transactions",
                &json!({ "txs_hashes": tx_hashes, "decode_as_json": true }),
            )
            .await?;
        let txs = val
            .get("txs")
            .ok_or(RpcError::NoResult { context: "get_transactions(txs)".into() })?;
        Ok(serde_json::from_value(txs.clone())?)
    }

    pub async fn send_raw_transaction(&self, tx_as_hex: &str) -> Result<SendRawTxResult, RpcError> {
        let val = self
            .client
            .post(
                "/send_raw_transaction",
                &json!({ "tx_as_hex": tx_as_hex, "do_not_relay": false }),
            )
            .await?;
        Ok(serde_json::from_value(val)?)
    }

    pub async fn get_outs(&self, outputs: &[OutputRequest]) -> Result<Vec<OutputInfo>, RpcError> {
        let val = self
            .client
            .post("/get_outs", &json!({ "outputs": outputs, "get_txid": false }))
            .await?;
        let outs = val.get("outs").ok_or(RpcError::NoResult { context: "get_outs".into() })?;
        Ok(serde_json::from_value(outs.clone())?)
    }

    /// Fetch and translate one block with all its transactions.
    async fn fetch_block(&self, height: u64) -> Result<BlockData, RpcError> {
        let block = self.get_block(height).await?;
        let header = &block.block_header;
        if header.height != height {
            return Err(RpcError::InvalidResponse(format!(
                "asked for block {}, got {}",
                height, header.height
            )));
        }

        let hash = hex_to_32(&header.hash)
            .ok_or_else(|| RpcError::InvalidResponse(format!("bad block hash at {}", height)))?;
        let prev_hash = hex_to_32(&header.prev_hash)
            .ok_or_else(|| RpcError::InvalidResponse(format!("bad prev hash at {}", height)))?;

        let mut hashes: Vec<&str> = Vec::with_capacity(block.tx_hashes.len() + 1);
        hashes.push(&block.miner_tx_hash);
        hashes.extend(block.tx_hashes.iter().map(String::as_str));

        let entries = self.get_transactions(&hashes).await?;
        if entries.len() != hashes.len() {
            return Err(RpcError::InvalidResponse(format!(
                "block {}: asked for {} transactions, got {}",
                height,
                hashes.len(),
                entries.len()
            )));
        }

        let mut txs: Vec<ChainTx> = Vec::with_capacity(entries.len());
        for (entry, hash_hex) in entries.iter().zip(hashes.iter()) {
            let tx_hash = hex_to_32(hash_hex)
                .ok_or_else(|| RpcError::InvalidResponse(format!("bad tx hash {}", hash_hex)))?;
            let as_json = entry
                .as_json
                .as_deref()
                .ok_or_else(|| RpcError::InvalidResponse(format!("tx {} without json", hash_hex)))?;
            let tx_json: Value = serde_json::from_str(as_json)?;
            txs.push(parse_tx(&tx_json, tx_hash, &entry.output_indices)?);
        }

        log::debug!("fetched block {} with {} txs", height, txs.len());
        Ok(BlockData { height, hash, prev_hash, timestamp: header.timestamp, txs })
    }
}

#[async_trait]
impl DaemonClient for DaemonRpc {
    async fn get_height(&self) -> Result<u64, RpcError> {
        let val = self.client.post("/get_height", &json!({})).await?;
        val.get("height")
            .and_then(|v| v.as_u64())
            .ok_or(RpcError::NoResult { context: "get_height".into() })
    }

    async fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<BlockData>, RpcError> {
        let mut blocks = Vec::with_capacity(end.saturating_sub(start) as usize + 1);
        for height in start..=end {
            blocks.push(self.fetch_block(height).await?);
        }
        Ok(blocks)
    }

    async fn get_block_hash(&self, height: u64) -> Result<[u8; 32], RpcError> {
        let val = self.client.call("on_get_block_hash", json!([height])).await?;
        val.as_str()
            .and_then(hex_to_32)
            .ok_or(RpcError::NoResult { context: format!("on_get_block_hash({})", height) })
    }

    async fn is_synced(&self) -> Result<bool, RpcError> {
        Ok(self.get_info().await?.synchronized)
    }

    async fn is_trusted(&self) -> Result<bool, RpcError> {
        Ok(!self.get_info().await?.untrusted)
    }

    async fn relay(&self, blob: &[u8]) -> Result<[u8; 32], RpcError> {
        let result = self.send_raw_transaction(&hex::encode(blob)).await?;
        if result.status != "OK" {
            let reason = result.rejection_reason();
            log::warn!("daemon rejected transaction: {}", reason);
            return Err(RpcError::Rejected { reason });
        }
        Ok(keccak256(blob))
    }

    async fn get_output_distribution(&self, to_height: u64) -> Result<Vec<u64>, RpcError> {
        let params = json!({
            "amounts": [0],
            "from_height": 0,
            "to_height": to_height,
            "cumulative": true,
            "binary": false,
        });
        let val = self.client.call("get_output_distribution", params).await?;
        let dists: Vec<OutputDistribution> = serde_json::from_value(
            val.get("distributions")
                .cloned()
                .ok_or(RpcError::NoResult { context: "get_output_distribution".into() })?,
        )?;
        let dist = dists
            .into_iter()
            .find(|d| d.amount == 0)
            .ok_or(RpcError::NoResult { context: "get_output_distribution(0)".into() })?;
        if dist.start_height != 0 {
            return Err(RpcError::InvalidResponse(format!(
                "distribution starts at {}, expected 0",
                dist.start_height
            )));
        }
        Ok(dist.distribution)
    }

    async fn get_outputs(&self, global_indices: &[u64]) -> Result<Vec<RingMember>, RpcError> {
        let requests: Vec<OutputRequest> =
            global_indices.iter().map(|&index| OutputRequest { amount: 0, index }).collect();
        let outs = self.get_outs(&requests).await?;
        if outs.len() != global_indices.len() {
            return Err(RpcError::InvalidResponse(format!(
                "asked for {} outputs, got {}",
                global_indices.len(),
                outs.len()
            )));
        }
        outs.iter()
            .zip(global_indices)
            .map(|(out, &global_index)| {
                Ok(RingMember {
                    global_index,
                    public_key: hex_to_32(&out.key)
                        .ok_or_else(|| RpcError::InvalidResponse("bad output key".into()))?,
                    commitment: hex_to_32(&out.mask)
                        .ok_or_else(|| RpcError::InvalidResponse("bad output mask".into()))?,
                })
            })
            .collect()
    }

    fn describe(&self) -> String {
        match &self.client.config().username {
            Some(user) => format!("{} (user {})", self.client.url(), user),
            None => self.client.url().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_rpc_creation() {
        let daemon = DaemonRpc::new("http://localhost:18081").unwrap();
        assert_eq!(daemon.client().url(), "http://localhost:18081");
        assert_eq!(daemon.describe(), "http://localhost:18081");
    }

    #[test]
    fn test_describe_with_user() {
        let daemon = DaemonRpc::with_config(RpcConfig {
            url: "http://node:18081".into(),
            username: Some("alice".into()),
            password: Some("pw".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(daemon.describe(), "http://node:18081 (user alice)");
    }

    #[test]
    fn test_output_request_serialize() {
        let req = OutputRequest { amount: 0, index: 42 };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["amount"], 0);
        assert_eq!(json["index"], 42);
    }

    #[test]
    fn test_daemon_info_deserialize() {
        let json = json!({
            "height": 12345,
            "target_height": 12345,
            "synchronized": true,
            "untrusted": false,
            "mainnet": true,
            "status": "OK"
        });
        let info: DaemonInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.height, 12345);
        assert!(info.synchronized);
        assert!(!info.untrusted);
    }

    #[test]
    fn test_block_result_deserialize() {
        let json = json!({
            "block_header": {
                "height": 100,
                "hash": "ab".repeat(32),
                "prev_hash": "cd".repeat(32),
                "timestamp": 1700000000,
                "num_txes": 1
            },
            "miner_tx_hash": "ef".repeat(32),
            "tx_hashes": ["01".repeat(32)],
            "status": "OK"
        });
        let block: BlockResult = serde_json::from_value(json).unwrap();
        assert_eq!(block.block_header.height, 100);
        assert_eq!(block.tx_hashes.len(), 1);
    }

    #[test]
    fn test_rejection_reason() {
        let json = json!({ "status": "Failed", "double_spend": true, "fee_too_low": true });
        let result: SendRawTxResult = serde_json::from_value(json).unwrap();
        assert_eq!(result.rejection_reason(), "double spend, fee too low");

        let json = json!({ "status": "Failed", "reason": "bad ring" });
        let result: SendRawTxResult = serde_json::from_value(json).unwrap();
        assert_eq!(result.rejection_reason(), "bad ring");

        let json = json!({ "status": "Failed" });
        let result: SendRawTxResult = serde_json::from_value(json).unwrap();
        assert_eq!(result.rejection_reason(), "Failed");
    }
}
