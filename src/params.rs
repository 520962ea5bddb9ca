//! Chain-wide consensus constants.
//!
//! A single `ChainParams` value is threaded through the core instead of
//! process-wide statics so tests can run tiny delegate sets and short slots.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainParams {
    /// Size of the elected delegate set.
    pub total_delegates: usize,
    /// Slot length in seconds.
    pub block_interval: u64,
    /// Hard serialized-size ceiling for a block.
    pub max_block_size: u64,
    /// Ceiling on the sum of per-transaction VM run steps in one block.
    pub max_block_run_step: u64,
    /// Fuel rate used until the chain has enough history for the controller.
    pub init_fuel_rate: u64,
    /// Controller output floor.
    pub min_fuel_rate: u64,
    pub max_block_signature_size: usize,
    /// Block nonces are drawn from [0, max_nonce).
    pub max_nonce: u32,
    /// Fee-per-kb floor below which a transaction counts as free.
    pub min_relay_tx_fee: u64,
    pub protocol_version: u32,
    /// Reward-transaction version the verifier accepts.
    pub tx_version: u32,
    /// Default look-back window for the fuel-rate controller.
    pub burn_window: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            total_delegates: 11,
            block_interval: 10,
            max_block_size: 4_000_000,
            max_block_run_step: 40_000_000,
            init_fuel_rate: 100,
            min_fuel_rate: 1,
            max_block_signature_size: 100,
            max_nonce: 1000,
            min_relay_tx_fee: 1_000,
            protocol_version: 1,
            tx_version: 1,
            burn_window: 100,
        }
    }
}
