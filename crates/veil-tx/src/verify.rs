//! Structural and cryptographic verification of a signed transaction.
//!
//! Checks everything a wallet or a test daemon can check given the ring
//! members: shape, ring indices, range proofs, commitment balance, and one
//! valid CLSAG per input bound to the input's key image.

use std::collections::HashSet;

use veil_crypto::commitment::amount_point;
use veil_crypto::{clsag, decompress, rangeproof};
use veil_types::RingMember;

use crate::types::{relative_to_absolute, Transaction};
use crate::TxError;

fn invalid(msg: impl Into<String>) -> TxError {
    TxError::Invalid(msg.into())
}

/// Verify `tx` against the ring members each input references, in input order.
pub fn verify_transaction(tx: &Transaction, rings: &[Vec<RingMember>]) -> Result<(), TxError> {
    let inputs = &tx.prefix.inputs;
    let outputs = &tx.prefix.outputs;
    let rct = &tx.rct;

    if inputs.is_empty() || outputs.is_empty() {
        return Err(invalid("transaction needs inputs and outputs"));
    }
    if rct.pseudo_outs.len() != inputs.len()
        || rct.clsags.len() != inputs.len()
        || rings.len() != inputs.len()
    {
        return Err(invalid("input, pseudo output, signature and ring counts differ"));
    }
    if rct.range_proofs.len() != outputs.len() {
        return Err(invalid("one range proof per output required"));
    }
    if !tx.prefix.additional_pub_keys.is_empty()
        && tx.prefix.additional_pub_keys.len() != outputs.len()
    {
        return Err(invalid("additional tx keys do not match outputs"));
    }

    let mut seen = HashSet::new();
    for input in inputs {
        if !seen.insert(input.key_image) {
            return Err(invalid("duplicate key image"));
        }
    }

    for (i, (out, proof)) in outputs.iter().zip(&rct.range_proofs).enumerate() {
        if !rangeproof::verify(proof, &out.commitment) {
            return Err(invalid(format!("range proof {} does not verify", i)));
        }
    }

    let mut pseudo_sum = amount_point(0);
    for p in &rct.pseudo_outs {
        pseudo_sum += decompress(p)?;
    }
    let mut out_sum = amount_point(rct.fee);
    for out in outputs {
        out_sum += decompress(&out.commitment)?;
    }
    if pseudo_sum != out_sum {
        return Err(invalid("commitments do not balance"));
    }

    let message = tx.signing_message()?;
    for (n, ((input, ring), (sig, pseudo))) in inputs
        .iter()
        .zip(rings)
        .zip(rct.clsags.iter().zip(&rct.pseudo_outs))
        .enumerate()
    {
        let indices = relative_to_absolute(&input.key_offsets)?;
        if indices.len() != ring.len()
            || indices.iter().zip(ring).any(|(&idx, m)| idx != m.global_index)
        {
            return Err(invalid(format!("input {} ring does not match its offsets", n)));
        }
        if sig.key_image != input.key_image {
            return Err(invalid(format!("input {} signature is for another key image", n)));
        }
        let keys: Vec<[u8; 32]> = ring.iter().map(|m| m.public_key).collect();
        let commitments: Vec<[u8; 32]> = ring.iter().map(|m| m.commitment).collect();
        if !clsag::verify(&message, sig, &keys, &commitments, pseudo) {
            return Err(invalid(format!("input {} signature does not verify", n)));
        }
    }
    Ok(())
}
