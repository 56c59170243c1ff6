//! Transaction signing pipeline.
//!
//! Takes an `UnsignedTransaction` (from the builder) and produces a fully
//! signed `Transaction` by:
//!   1. Choosing pseudo-output masks so that `Σ pseudo = Σ out + fee·H`
//!   2. Computing the message every ring signature signs
//!   3. Signing each input with a CLSAG over its ring

use curve25519_dalek::scalar::Scalar;
use veil_crypto::clsag::{self, ClsagSecret};
use veil_crypto::commitment::commit;
use veil_crypto::random_scalar;

use crate::builder::UnsignedTransaction;
use crate::types::{RctSignatures, Transaction};
use crate::TxError;

/// Random masks for all but the last input; the last one balances the
/// output masks so the blinding factors cancel.
fn pseudo_masks(num_inputs: usize, output_mask_sum: Scalar) -> Vec<Scalar> {
    let mut masks: Vec<Scalar> = (1..num_inputs).map(|_| random_scalar()).collect();
    let partial: Scalar = masks.iter().sum();
    masks.push(output_mask_sum - partial);
    masks
}

/// Sign an unsigned transaction, producing a fully signed `Transaction`.
pub fn sign_transaction(unsigned: UnsignedTransaction) -> Result<Transaction, TxError> {
    let UnsignedTransaction { prefix, inputs, outputs, fee, .. } = unsigned;
    if inputs.is_empty() {
        return Err(TxError::Signing("no inputs to sign".into()));
    }
    if outputs.is_empty() {
        return Err(TxError::Signing("no outputs".into()));
    }

    let output_mask_sum: Scalar = outputs.iter().map(|o| o.mask).sum();
    let masks = pseudo_masks(inputs.len(), output_mask_sum);
    let pseudo_outs: Vec<[u8; 32]> = inputs
        .iter()
        .zip(&masks)
        .map(|(input, mask)| commit(input.amount, mask))
        .collect();

    let mut tx = Transaction {
        prefix,
        rct: RctSignatures {
            fee,
            pseudo_outs,
            range_proofs: outputs.into_iter().map(|o| o.range_proof).collect(),
            clsags: Vec::with_capacity(inputs.len()),
        },
    };
    let message = tx.signing_message()?;

    for (n, (input, pseudo_mask)) in inputs.iter().zip(&masks).enumerate() {
        let ring_keys: Vec<[u8; 32]> = input.ring.iter().map(|m| m.public_key).collect();
        let commitments: Vec<[u8; 32]> = input.ring.iter().map(|m| m.commitment).collect();
        let secret = ClsagSecret {
            index: input.real_index,
            key: input.secret_key,
            mask_delta: input.mask - pseudo_mask,
        };
        let sig = clsag::sign(&message, &ring_keys, &commitments, &tx.rct.pseudo_outs[n], &secret)
            .map_err(|e| TxError::Signing(format!("input {}: {}", n, e)))?;
        if sig.key_image != tx.prefix.inputs[n].key_image {
            return Err(TxError::Signing(format!("input {} key image mismatch", n)));
        }
        tx.rct.clsags.push(sig);
    }

    log::debug!("signed tx with {} inputs", tx.rct.clsags.len());
    Ok(tx)
}
