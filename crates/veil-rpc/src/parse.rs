//! Translate the daemon's `decode_as_json` transactions into chain data.
//!
//! The daemon renders transactions in the CryptoNote JSON layout:
//!
//! ```json
//! {
//!   "version": 2,
//!   "unlock_time": 0,
//!   "vin": [{ "key": { "amount": 0, "key_offsets": [12, 3], "k_image": "hex" } }],
//!   "vout": [{ "amount": 0, "target": { "tagged_key": { "key": "hex", "view_tag": "a1" } } }],
//!   "extra": [1, 32 key bytes..., 4, n, 32*n key bytes...],
//!   "rct_signatures": { "type": 6, "txnFee": 30000, "ecdhInfo": [{ "amount": "hex" }], "outPk": ["hex"] }
//! }
//! ```
//!
//! Coinbase transactions carry a single `{"gen": {"height": h}}` input and
//! cleartext output amounts.

use crate::error::RpcError;
use serde_json::Value;
use veil_types::base58::decode_varint;
use veil_types::{ChainInput, ChainOutput, ChainTx};

const TX_EXTRA_PADDING: u8 = 0x00;
const TX_EXTRA_PUBKEY: u8 = 0x01;
const TX_EXTRA_NONCE: u8 = 0x02;
const TX_EXTRA_ADDITIONAL_PUBKEYS: u8 = 0x04;

fn invalid(msg: impl Into<String>) -> RpcError {
    RpcError::InvalidResponse(msg.into())
}

pub fn hex_to_32(s: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(s).ok()?;
    bytes.as_slice().try_into().ok()
}

/// Keys found in a tx extra field.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExtraKeys {
    pub tx_pub_key: Option<[u8; 32]>,
    pub additional: Vec<[u8; 32]>,
}

/// Walk the extra TLV stream. Parsing stops at the first unknown tag,
/// keeping whatever was read so far.
pub fn parse_extra(extra: &[u8]) -> ExtraKeys {
    let mut keys = ExtraKeys::default();
    let mut pos = 0;
    while pos < extra.len() {
        let tag = extra[pos];
        pos += 1;
        match tag {
            TX_EXTRA_PADDING => continue,
            TX_EXTRA_PUBKEY => {
                let Some(key) = extra.get(pos..pos + 32) else { break };
                if keys.tx_pub_key.is_none() {
                    keys.tx_pub_key = key.try_into().ok();
                }
                pos += 32;
            }
            TX_EXTRA_NONCE => {
                let Some(&len) = extra.get(pos) else { break };
                pos += 1 + len as usize;
            }
            TX_EXTRA_ADDITIONAL_PUBKEYS => {
                let Ok((count, used)) = decode_varint(&extra[pos..]) else { break };
                pos += used;
                let mut additional = Vec::with_capacity(count.min(256) as usize);
                for _ in 0..count {
                    let Some(key) = extra.get(pos..pos + 32) else { return keys };
                    let mut k = [0u8; 32];
                    k.copy_from_slice(key);
                    additional.push(k);
                    pos += 32;
                }
                keys.additional = additional;
            }
            _ => break,
        }
    }
    keys
}

fn extra_bytes(tx: &Value) -> Vec<u8> {
    tx.get("extra")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|n| n as u8)).collect())
        .unwrap_or_default()
}

fn parse_input(vin: &Value) -> Result<Option<ChainInput>, RpcError> {
    if vin.get("gen").is_some() {
        return Ok(None);
    }
    let key = vin.get("key").ok_or_else(|| invalid("input is neither gen nor key"))?;
    let key_image = key
        .get("k_image")
        .and_then(|v| v.as_str())
        .and_then(hex_to_32)
        .ok_or_else(|| invalid("input without key image"))?;

    // Offsets are relative: the first is absolute, each next one a delta.
    let offsets = key
        .get("key_offsets")
        .and_then(|v| v.as_array())
        .ok_or_else(|| invalid("input without key offsets"))?;
    let mut ring = Vec::with_capacity(offsets.len());
    let mut acc = 0u64;
    for off in offsets {
        let delta = off.as_u64().ok_or_else(|| invalid("non-integer key offset"))?;
        acc = acc.checked_add(delta).ok_or_else(|| invalid("key offset overflow"))?;
        ring.push(acc);
    }
    Ok(Some(ChainInput { key_image, ring }))
}

fn output_key(out: &Value) -> Option<([u8; 32], Option<u8>)> {
    let target = out.get("target")?;
    if let Some(tagged) = target.get("tagged_key") {
        let key = hex_to_32(tagged.get("key")?.as_str()?)?;
        let view_tag = tagged
            .get("view_tag")
            .and_then(|v| v.as_str())
            .and_then(|s| hex::decode(s).ok())
            .and_then(|b| b.first().copied());
        return Some((key, view_tag));
    }
    let key = hex_to_32(target.get("key")?.as_str()?)?;
    Some((key, None))
}

/// Parse one transaction. `output_indices` are the global indices the daemon
/// assigned to its outputs, in output order.
pub fn parse_tx(tx: &Value, hash: [u8; 32], output_indices: &[u64]) -> Result<ChainTx, RpcError> {
    let unlock_time = tx.get("unlock_time").and_then(|v| v.as_u64()).unwrap_or(0);

    let vin = tx
        .get("vin")
        .and_then(|v| v.as_array())
        .ok_or_else(|| invalid("transaction without vin"))?;
    let is_coinbase = vin.iter().any(|i| i.get("gen").is_some());
    let mut inputs = Vec::with_capacity(vin.len());
    for input in vin {
        if let Some(parsed) = parse_input(input)? {
            inputs.push(parsed);
        }
    }

    let vout = tx
        .get("vout")
        .and_then(|v| v.as_array())
        .ok_or_else(|| invalid("transaction without vout"))?;
    if output_indices.len() != vout.len() {
        return Err(invalid(format!(
            "{} outputs but {} output indices",
            vout.len(),
            output_indices.len()
        )));
    }

    let rct = tx.get("rct_signatures");
    let ecdh_info = rct.and_then(|r| r.get("ecdhInfo")).and_then(|e| e.as_array());
    let out_pk = rct.and_then(|r| r.get("outPk")).and_then(|e| e.as_array());

    let mut outputs = Vec::with_capacity(vout.len());
    for (i, out) in vout.iter().enumerate() {
        let (public_key, view_tag) =
            output_key(out).ok_or_else(|| invalid(format!("output {} has no key", i)))?;

        let (amount, encrypted_amount, commitment) = if is_coinbase {
            let amount = out.get("amount").and_then(|v| v.as_u64()).unwrap_or(0);
            (amount, [0u8; 8], [0u8; 32])
        } else {
            let enc = ecdh_info
                .and_then(|info| info.get(i))
                .and_then(|e| e.get("amount"))
                .and_then(|a| a.as_str())
                .and_then(|s| hex::decode(s).ok())
                .and_then(|b| <[u8; 8]>::try_from(b.get(..8)?).ok())
                .ok_or_else(|| invalid(format!("output {} has no encrypted amount", i)))?;
            let commitment = out_pk
                .and_then(|pks| pks.get(i))
                .and_then(|v| v.as_str())
                .and_then(hex_to_32)
                .ok_or_else(|| invalid(format!("output {} has no commitment", i)))?;
            (0, enc, commitment)
        };

        outputs.push(ChainOutput {
            global_index: output_indices[i],
            public_key,
            view_tag,
            encrypted_amount,
            amount,
            commitment,
        });
    }

    let extra = parse_extra(&extra_bytes(tx));
    Ok(ChainTx {
        hash,
        unlock_time,
        is_coinbase,
        tx_pub_key: extra.tx_pub_key,
        additional_pub_keys: extra.additional,
        inputs,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extra_with(pubkey: [u8; 32], additional: &[[u8; 32]]) -> Vec<u8> {
        let mut extra = vec![TX_EXTRA_PUBKEY];
        extra.extend_from_slice(&pubkey);
        extra.extend_from_slice(&[TX_EXTRA_NONCE, 2, 0xaa, 0xbb]);
        if !additional.is_empty() {
            extra.push(TX_EXTRA_ADDITIONAL_PUBKEYS);
            extra.push(additional.len() as u8);
            for k in additional {
                extra.extend_from_slice(k);
            }
        }
        extra
    }

    #[test]
    fn test_parse_extra() {
        let extra = extra_with([1; 32], &[[2; 32], [3; 32]]);
        let keys = parse_extra(&extra);
        assert_eq!(keys.tx_pub_key, Some([1; 32]));
        assert_eq!(keys.additional, vec![[2; 32], [3; 32]]);
    }

    #[test]
    fn test_parse_extra_truncated() {
        let mut extra = extra_with([1; 32], &[]);
        extra.extend_from_slice(&[TX_EXTRA_PUBKEY, 9, 9]);
        let keys = parse_extra(&extra);
        assert_eq!(keys.tx_pub_key, Some([1; 32]));
        assert!(parse_extra(&[TX_EXTRA_PUBKEY, 1, 2]).tx_pub_key.is_none());
    }

    #[test]
    fn test_parse_regular_tx() {
        let tx = json!({
            "version": 2,
            "unlock_time": 0,
            "vin": [{ "key": { "amount": 0, "key_offsets": [100, 5, 7], "k_image": hex::encode([7u8; 32]) } }],
            "vout": [
                { "amount": 0, "target": { "tagged_key": { "key": hex::encode([8u8; 32]), "view_tag": "5c" } } },
                { "amount": 0, "target": { "tagged_key": { "key": hex::encode([9u8; 32]), "view_tag": "01" } } }
            ],
            "extra": extra_with([1; 32], &[]),
            "rct_signatures": {
                "type": 6,
                "txnFee": 30000,
                "ecdhInfo": [{ "amount": "0102030405060708" }, { "amount": "1112131415161718" }],
                "outPk": [hex::encode([0xc1u8; 32]), hex::encode([0xc2u8; 32])]
            }
        });
        let parsed = parse_tx(&tx, [0xee; 32], &[40, 41]).unwrap();
        assert!(!parsed.is_coinbase);
        assert_eq!(parsed.inputs[0].ring, vec![100, 105, 112]);
        assert_eq!(parsed.inputs[0].key_image, [7; 32]);
        assert_eq!(parsed.outputs.len(), 2);
        assert_eq!(parsed.outputs[0].view_tag, Some(0x5c));
        assert_eq!(parsed.outputs[1].global_index, 41);
        assert_eq!(parsed.outputs[1].encrypted_amount, [0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]);
        assert_eq!(parsed.outputs[0].commitment, [0xc1; 32]);
        assert_eq!(parsed.tx_pub_key, Some([1; 32]));
    }

    #[test]
    fn test_parse_coinbase() {
        let tx = json!({
            "version": 2,
            "unlock_time": 70,
            "vin": [{ "gen": { "height": 10 } }],
            "vout": [{ "amount": 600000000000u64, "target": { "key": hex::encode([4u8; 32]) } }],
            "extra": extra_with([2; 32], &[]),
            "rct_signatures": { "type": 0 }
        });
        let parsed = parse_tx(&tx, [0xaa; 32], &[3]).unwrap();
        assert!(parsed.is_coinbase);
        assert!(parsed.inputs.is_empty());
        assert_eq!(parsed.unlock_time, 70);
        assert_eq!(parsed.outputs[0].amount, 600_000_000_000);
        assert_eq!(parsed.outputs[0].view_tag, None);
    }

    #[test]
    fn test_index_count_mismatch() {
        let tx = json!({
            "vin": [{ "gen": { "height": 1 } }],
            "vout": [{ "amount": 1, "target": { "key": hex::encode([4u8; 32]) } }],
        });
        assert!(matches!(parse_tx(&tx, [0; 32], &[]), Err(RpcError::InvalidResponse(_))));
    }
}
