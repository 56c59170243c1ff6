//! Transaction builder.
//!
//! Assembles prepared inputs, destinations, change and fee into an
//! `UnsignedTransaction` whose prefix is final (outputs built, key images
//! computed). `sign_transaction` turns it into a signed `Transaction`.

use curve25519_dalek::scalar::Scalar;
use rand::seq::SliceRandom;
use veil_crypto::{key_image, mul_base, compress};
use veil_types::{Address, RingMember};

use crate::fee::{self, FeePriority};
use crate::output::{build_outputs, BuiltOutput, Destination, TxKeys};
use crate::types::{absolute_to_relative, TxInput, TxPrefix, TX_VERSION};
use crate::TxError;

/// A prepared input for spending.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    /// One-time secret key of the output being spent.
    pub secret_key: Scalar,
    pub amount: u64,
    /// Commitment blinding factor of the output being spent.
    pub mask: Scalar,
    /// Ring members, sorted ascending by global index.
    pub ring: Vec<RingMember>,
    /// Position of the real output within `ring`.
    pub real_index: usize,
}

impl PreparedInput {
    fn validate(&self, n: usize) -> Result<(), TxError> {
        if self.real_index >= self.ring.len() {
            return Err(TxError::RingSizeMismatch {
                expected: self.real_index + 1,
                got: self.ring.len(),
            });
        }
        if self.ring.windows(2).any(|w| w[0].global_index >= w[1].global_index) {
            return Err(TxError::Invalid(format!("input {} ring is not strictly ascending", n)));
        }
        if compress(&mul_base(&self.secret_key)) != self.ring[self.real_index].public_key {
            return Err(TxError::Invalid(format!(
                "input {} secret key does not open its ring member",
                n
            )));
        }
        Ok(())
    }
}

/// Built (unsigned) transaction ready for signing.
#[derive(Debug)]
pub struct UnsignedTransaction {
    pub prefix: TxPrefix,
    pub inputs: Vec<PreparedInput>,
    /// Outputs in prefix order, with their openings.
    pub outputs: Vec<BuiltOutput>,
    pub tx_keys: TxKeys,
    pub fee: u64,
    pub change: u64,
}

/// Builder for constructing Veil transactions.
#[derive(Default)]
pub struct TransactionBuilder {
    inputs: Vec<PreparedInput>,
    destinations: Vec<Destination>,
    change_address: Option<Address>,
    fee: Option<u64>,
    priority: FeePriority,
    unlock_time: u64,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prepared input to spend.
    pub fn add_input(mut self, input: PreparedInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn add_inputs(mut self, inputs: Vec<PreparedInput>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Add a destination (recipient).
    pub fn add_destination(mut self, dest: Destination) -> Self {
        self.destinations.push(dest);
        self
    }

    /// Where any change goes. Required when inputs exceed destinations + fee.
    pub fn set_change_address(mut self, address: Address) -> Self {
        self.change_address = Some(address);
        self
    }

    /// Use an explicit fee instead of estimating one from `priority`.
    pub fn set_fee(mut self, fee: u64) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn set_priority(mut self, priority: FeePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn set_unlock_time(mut self, unlock_time: u64) -> Self {
        self.unlock_time = unlock_time;
        self
    }

    /// Validate, compute change, build outputs and key images.
    pub fn build(self) -> Result<UnsignedTransaction, TxError> {
        if self.destinations.is_empty() {
            return Err(TxError::NoDestinations);
        }
        if self.inputs.is_empty() {
            return Err(TxError::InsufficientInputs { need: 1, have: 0 });
        }
        for (n, input) in self.inputs.iter().enumerate() {
            input.validate(n)?;
        }

        let overflow = || TxError::Invalid("amount overflow".into());
        let input_total = self
            .inputs
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.amount))
            .ok_or_else(overflow)?;
        let dest_total = self
            .destinations
            .iter()
            .try_fold(0u64, |acc, d| acc.checked_add(d.amount))
            .ok_or_else(overflow)?;

        let fee = match self.fee {
            Some(fee) => fee,
            None => {
                let ring_size = self.inputs[0].ring.len();
                let outputs = self.destinations.len() + self.change_address.is_some() as usize;
                fee::estimate_tx_fee(self.inputs.len(), outputs, ring_size, self.priority)
            }
        };

        let need = dest_total.checked_add(fee).ok_or_else(overflow)?;
        if input_total < need {
            return Err(TxError::InsufficientInputs { need, have: input_total });
        }
        let change = input_total - need;

        let mut dests = self.destinations;
        if change > 0 {
            let address = self.change_address.ok_or(TxError::NoChangeAddress(change))?;
            dests.push(Destination::new(address, change));
        }
        // Output order must not reveal which one is change.
        dests.shuffle(&mut rand::thread_rng());

        let (tx_keys, outputs) = build_outputs(&dests)?;

        let prefix_inputs = self
            .inputs
            .iter()
            .map(|input| {
                let real = &input.ring[input.real_index];
                let indices: Vec<u64> = input.ring.iter().map(|m| m.global_index).collect();
                TxInput {
                    key_offsets: absolute_to_relative(&indices),
                    key_image: key_image(&input.secret_key, &real.public_key),
                }
            })
            .collect();

        let prefix = TxPrefix {
            version: TX_VERSION,
            unlock_time: self.unlock_time,
            inputs: prefix_inputs,
            outputs: outputs.iter().map(|o| o.output.clone()).collect(),
            tx_pub_key: tx_keys.tx_pub_key,
            additional_pub_keys: tx_keys.additional_pub_keys.clone(),
        };

        log::debug!(
            "built unsigned tx: {} inputs, {} outputs, fee {}, change {}",
            prefix.inputs.len(),
            prefix.outputs.len(),
            fee,
            change
        );

        Ok(UnsignedTransaction { prefix, inputs: self.inputs, outputs, tx_keys, fee, change })
    }
}
