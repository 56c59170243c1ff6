//! Decoy (ring member) selection using a gamma distribution.
//!
//! Output ages are drawn from the gamma distribution of Miller et al., which
//! models real-world spending patterns. On chains too young for the sampler
//! to land in range, selection falls back to uniform picks over the usable
//! outputs, and rings shrink to however many outputs exist.

use crate::TxError;
use rand::Rng;

/// Number of recent blocks whose outputs are not offered as decoys.
pub const SPENDABLE_AGE: usize = 10;

/// Gamma distribution shape parameter (Miller et al.).
const GAMMA_SHAPE: f64 = 19.28;

/// Gamma distribution scale parameter (1 / 1.61).
const GAMMA_SCALE: f64 = 1.0 / 1.61;

/// Recent spend window in seconds.
const RECENT_SPEND_WINDOW: f64 = 1800.0;

/// Average time between blocks in seconds.
const DIFFICULTY_TARGET: f64 = 120.0;

/// Gamma draws per wanted decoy before switching to uniform picks.
const GAMMA_ATTEMPTS_PER_DECOY: usize = 20;

/// Selects decoy ring members from the global output distribution.
#[derive(Debug, Clone)]
pub struct DecoySelector {
    /// Cumulative output counts per block (from `get_output_distribution`).
    offsets: Vec<u64>,
    /// Outputs old enough to serve as decoys: `[0, num_usable)`.
    num_usable: u64,
    /// Average seconds per output.
    average_output_time: f64,
}

impl DecoySelector {
    /// Create a selector from the cumulative distribution, one entry per block.
    pub fn new(offsets: Vec<u64>) -> Result<Self, TxError> {
        if offsets.last().copied().unwrap_or(0) == 0 {
            return Err(TxError::DecoySelection("no outputs on chain".into()));
        }
        let usable_len = offsets.len().saturating_sub(SPENDABLE_AGE);
        let num_usable = match usable_len {
            0 => 0,
            n => offsets[n - 1],
        };
        let average_output_time = if num_usable == 0 {
            f64::INFINITY
        } else {
            (usable_len as f64) * DIFFICULTY_TARGET / (num_usable as f64)
        };

        Ok(Self { offsets, num_usable, average_output_time })
    }

    pub fn num_usable(&self) -> u64 {
        self.num_usable
    }

    /// The ring size actually achievable for `real_index`: `requested`
    /// capped at the real output plus every usable decoy.
    pub fn ring_size_for(&self, real_index: u64, requested: usize) -> usize {
        let mut available = self.num_usable;
        if real_index < self.num_usable {
            available -= 1;
        }
        let decoys = (requested.max(1) - 1).min(available as usize);
        decoys + 1
    }

    /// Pick `ring_size_for(real_index, ring_size) - 1` distinct decoys,
    /// excluding `real_index`. The caller inserts the real output and sorts.
    pub fn pick_decoys(&self, real_index: u64, ring_size: usize) -> Vec<u64> {
        let num_decoys = self.ring_size_for(real_index, ring_size) - 1;
        let mut rng = rand::thread_rng();
        let mut decoys = Vec::with_capacity(num_decoys);

        let accept = |idx: u64, decoys: &Vec<u64>| {
            idx != real_index && idx < self.num_usable && !decoys.contains(&idx)
        };

        let mut attempts = 0;
        while decoys.len() < num_decoys && attempts < num_decoys * GAMMA_ATTEMPTS_PER_DECOY {
            attempts += 1;
            let idx = self.sample_output_index(&mut rng);
            if accept(idx, &decoys) {
                decoys.push(idx);
            }
        }

        if decoys.len() < num_decoys {
            log::debug!(
                "gamma sampling found {}/{} decoys over {} outputs, falling back to uniform",
                decoys.len(),
                num_decoys,
                self.num_usable
            );
            attempts = 0;
            while decoys.len() < num_decoys && attempts < num_decoys * 100 {
                attempts += 1;
                let idx = rng.gen_range(0..self.num_usable);
                if accept(idx, &decoys) {
                    decoys.push(idx);
                }
            }
            // Tiny sets: take what is left in order.
            let mut idx = 0;
            while decoys.len() < num_decoys && idx < self.num_usable {
                if accept(idx, &decoys) {
                    decoys.push(idx);
                }
                idx += 1;
            }
        }

        decoys
    }

    /// Build a complete sorted ring for one input.
    ///
    /// Returns `(ring_indices, real_position)` where `ring_indices` is sorted
    /// ascending and `real_position` is the index of the real output within it.
    pub fn build_ring(&self, real_index: u64, ring_size: usize) -> Result<(Vec<u64>, usize), TxError> {
        let mut ring = self.pick_decoys(real_index, ring_size);
        ring.push(real_index);
        ring.sort_unstable();
        let real_pos = ring
            .iter()
            .position(|&x| x == real_index)
            .ok_or_else(|| TxError::DecoySelection("real output missing from ring".into()))?;
        Ok((ring, real_pos))
    }

    /// Sample a single output index using the gamma distribution. Returns
    /// `num_usable` when the sample falls outside the chain.
    fn sample_output_index<R: Rng>(&self, rng: &mut R) -> u64 {
        let x = gamma_sample(GAMMA_SHAPE, GAMMA_SCALE, rng);
        let y = x.exp();

        let time_offset = if y > RECENT_SPEND_WINDOW {
            y - RECENT_SPEND_WINDOW
        } else {
            rng.gen::<f64>() * RECENT_SPEND_WINDOW
        };

        let output_offset = (time_offset / self.average_output_time) as u64;
        if output_offset >= self.num_usable {
            return self.num_usable;
        }

        // "Time ago" to ascending index.
        let idx = self.num_usable - 1 - output_offset;
        self.localize_output(idx, rng)
    }

    /// Pick uniformly among the outputs of the block containing `target`.
    fn localize_output<R: Rng>(&self, target: u64, rng: &mut R) -> u64 {
        let usable_len = self.offsets.len() - SPENDABLE_AGE;

        // offsets[b] is the count through block b, so block b holds
        // [offsets[b-1], offsets[b]).
        let block = self.offsets[..usable_len].partition_point(|&c| c <= target);
        if block >= usable_len {
            return target;
        }
        let block_start = if block == 0 { 0 } else { self.offsets[block - 1] };
        let block_end = self.offsets[block];
        if block_end <= block_start {
            return target;
        }
        block_start + rng.gen_range(0..block_end - block_start)
    }
}

// ─── Gamma Distribution Sampler (Marsaglia & Tsang) ──────────────────────────

/// Sample from Gamma(shape, scale) using Marsaglia & Tsang's method.
fn gamma_sample<R: Rng>(shape: f64, scale: f64, rng: &mut R) -> f64 {
    if shape < 1.0 {
        // Gamma(a) = Gamma(a+1) * U^(1/a).
        let g = gamma_sample(shape + 1.0, 1.0, rng);
        let u: f64 = rng.gen();
        return g * u.powf(1.0 / shape) * scale;
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        let x = standard_normal(rng);
        let v = 1.0 + c * x;
        if v <= 0.0 {
            continue;
        }

        let v = v * v * v;
        let u: f64 = rng.gen();
        let x2 = x * x;

        if u < 1.0 - 0.0331 * x2 * x2 {
            return d * v * scale;
        }
        if u.ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
            return d * v * scale;
        }
    }
}

/// Standard normal sample using the Box-Muller transform.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // gen() is in [0, 1); keep ln away from zero.
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
