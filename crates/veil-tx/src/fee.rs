//! Fee estimation from transaction shape.
//!
//! The size estimate follows the blob layout in `types`: a fixed prefix and
//! RingCT overhead, a per-input cost that grows with the ring, and a
//! per-output cost dominated by the range proof. The fee is
//! `size × FEE_PER_BYTE × priority`, rounded up to `FEE_QUANTIZATION`.

use serde::{Deserialize, Serialize};
use veil_types::constants::{DEFAULT_RING_SIZE, FEE_PER_BYTE, FEE_QUANTIZATION};

/// Serialized size of one 64-bit Bulletproof.
pub const RANGE_PROOF_SIZE: usize = 672;

/// Fee priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePriority {
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

impl FeePriority {
    /// Priority multiplier applied to the base fee.
    pub fn multiplier(&self) -> u64 {
        match self {
            FeePriority::Low => 1,
            FeePriority::Normal => 5,
            FeePriority::High => 25,
            FeePriority::Highest => 1000,
        }
    }
}

/// Estimate the blob size of a transaction.
pub fn estimate_tx_size(num_inputs: usize, num_outputs: usize, ring_size: usize) -> usize {
    // Prefix: version, unlock time, counts, tx public key.
    let mut size = 1 + 8 + 8 + 8 + 32 + 8;

    // RingCT base: fee and the three vector lengths.
    size += 8 + 3 * 8;

    let per_input = 8            // key offsets length
        + ring_size * 8          // key offsets
        + 32                     // key image
        + 8 + ring_size * 32     // CLSAG s values
        + 32 + 32 + 32           // c1, key image, commitment image
        + 32; // pseudo output
    size += num_inputs * per_input;

    let per_output = 32          // one-time key
        + 1                      // view tag
        + 8                      // encrypted amount
        + 32                     // commitment
        + 32                     // additional tx key, when present
        + 8 + RANGE_PROOF_SIZE;
    size += num_outputs * per_output;

    size
}

fn round_up(value: u64, quantum: u64) -> u64 {
    value.div_ceil(quantum) * quantum
}

/// Estimate the fee for a transaction of the given shape.
pub fn estimate_tx_fee(
    num_inputs: usize,
    num_outputs: usize,
    ring_size: usize,
    priority: FeePriority,
) -> u64 {
    let size = estimate_tx_size(num_inputs, num_outputs, ring_size) as u64;
    round_up(size * FEE_PER_BYTE * priority.multiplier(), FEE_QUANTIZATION)
}

/// Quick fee estimate with the default ring size at Normal priority.
pub fn estimate_fee_simple(num_inputs: usize, num_outputs: usize) -> u64 {
    estimate_tx_fee(num_inputs, num_outputs, DEFAULT_RING_SIZE, FeePriority::Normal)
}
