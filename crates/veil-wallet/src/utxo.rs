//! Input selection.
//!
//! Largest-first accumulation with ties broken by ascending `OutputId`. The
//! fee depends on the input count, so it is re-estimated after every input
//! until the selected total covers destinations plus the fee for exactly
//! that many inputs.

use veil_tx::{estimate_tx_fee, FeePriority};

use crate::error::WalletError;
use crate::output::{OutputId, OwnedOutput};

/// Hard cap on inputs per transaction.
pub const MAX_TX_INPUTS: usize = 64;

/// What to select for.
#[derive(Debug, Clone, Copy)]
pub struct SelectionParams {
    pub destination_total: u64,
    pub num_destinations: usize,
    pub ring_size: usize,
    pub priority: FeePriority,
    pub dust_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub ids: Vec<OutputId>,
    pub input_total: u64,
    /// Includes any change folded in as dust.
    pub fee: u64,
    pub change: u64,
}

impl Selection {
    pub fn num_outputs(&self, num_destinations: usize) -> usize {
        num_destinations + (self.change > 0) as usize
    }
}

/// Pick inputs from `candidates`, which must already be filtered to
/// spendable outputs.
pub fn select_inputs(candidates: &[&OwnedOutput], params: &SelectionParams) -> Result<Selection, WalletError> {
    let mut ordered: Vec<&OwnedOutput> = candidates.to_vec();
    ordered.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.id.cmp(&b.id)));
    let available: u64 = ordered.iter().map(|o| o.amount).sum();

    // Change output is assumed until the final shape is known.
    let num_outputs = params.num_destinations + 1;
    let fee_for = |inputs: usize| estimate_tx_fee(inputs, num_outputs, params.ring_size, params.priority);

    let mut ids = Vec::new();
    let mut input_total = 0u64;
    for output in &ordered {
        if ids.len() == MAX_TX_INPUTS {
            let need = params.destination_total.saturating_add(fee_for(MAX_TX_INPUTS));
            if available >= need {
                return Err(WalletError::TooManyInputs { max: MAX_TX_INPUTS });
            }
            return Err(WalletError::InsufficientFunds { need, have: available });
        }
        ids.push(output.id);
        input_total = input_total.saturating_add(output.amount);
        let need = params.destination_total.saturating_add(fee_for(ids.len()));
        if input_total >= need {
            return Ok(finish(ids, input_total, need - params.destination_total, params));
        }
    }

    let need = params
        .destination_total
        .saturating_add(fee_for(ordered.len().clamp(1, MAX_TX_INPUTS)));
    Err(WalletError::InsufficientFunds { need, have: available })
}

fn finish(ids: Vec<OutputId>, input_total: u64, fee: u64, params: &SelectionParams) -> Selection {
    let change = input_total - params.destination_total - fee;
    if change > 0 && change < params.dust_threshold {
        log::debug!("folding dust change {} into the fee", change);
        return Selection { ids, input_total, fee: fee + change, change: 0 };
    }
    Selection { ids, input_total, fee, change }
}
