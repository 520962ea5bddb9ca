//! Block assembly: pack mempool transactions under size, fee, and run-step
//! budgets, then settle the reward.
//!
//! Candidates are drained from a max-heap ordered by fee-per-kb (priority
//! score breaks ties). A transaction that does not fit is skipped, not
//! fatal: a smaller one behind it may still fit. Every candidate executes
//! speculatively on scratch views that are only absorbed into the working
//! caches when it is accepted.

use crate::chain::ChainView;
use crate::consensus::fuel::fuel_rate_for_next;
use crate::execution::TxExecutor;
use crate::mempool::MempoolEntry;
use crate::params::ChainParams;
use crate::state::{AccountCache, AccountScratch, ContractScratch, ContractStore, TxCache};
use crate::types::{fuel_charge, Block, BlockHeader, Hash32, RewardTx};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use thiserror::Error;
use tracing::{debug, info};

/// Packing budgets after clamping the configured values to sane ranges.
#[derive(Clone, Copy, Debug)]
pub struct BlockLimits {
    /// Assembly ceiling in bytes.
    pub max_size: u64,
    /// Bytes reserved for high-priority inclusion regardless of fee.
    pub priority_size: u64,
    /// Below this size, free transactions are still admitted.
    pub min_size: u64,
    /// Look-back window for the fuel-rate controller.
    pub burn_window: u64,
}

impl BlockLimits {
    pub fn clamped(
        max_size: u64,
        priority_size: u64,
        min_size: u64,
        burn_window: u64,
        params: &ChainParams,
    ) -> Self {
        let max_size = max_size.clamp(1_000, params.max_block_size - 1_000);
        Self {
            max_size,
            priority_size: priority_size.min(max_size),
            min_size: min_size.min(max_size),
            burn_window: burn_window.max(1),
        }
    }

    pub fn defaults(params: &ChainParams) -> Self {
        Self::clamped(
            params.max_block_size - 1_000,
            27_000,
            0,
            params.burn_window,
            params,
        )
    }
}

/// Heap entry for candidate ordering. The priority score is flat by design
/// (1000 / size), so fee-per-kb dominates.
#[derive(Clone, Debug)]
pub struct TxPriority {
    pub priority: f64,
    pub fee_per_kb: f64,
    pub entry: MempoolEntry,
}

impl TxPriority {
    fn new(entry: MempoolEntry, fuel_rate: u64) -> Self {
        let size = entry.tx.serialized_size();
        let charge = fuel_charge(entry.run_step, fuel_rate);
        let net_fee = entry.tx.fee as i64 - charge as i64;
        Self {
            priority: 1000.0 / size as f64,
            fee_per_kb: net_fee as f64 / (size as f64 / 1000.0),
            entry,
        }
    }
}

impl PartialEq for TxPriority {
    fn eq(&self, other: &Self) -> bool {
        self.fee_per_kb == other.fee_per_kb && self.priority == other.priority
    }
}
impl Eq for TxPriority {}
impl PartialOrd for TxPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TxPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fee_per_kb
            .partial_cmp(&other.fee_per_kb)
            .unwrap_or(Ordering::Equal)
            .then(self.priority.partial_cmp(&other.priority).unwrap_or(Ordering::Equal))
    }
}

#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub block: Block,
    pub total_fees: u64,
    pub total_fuel: u64,
    pub total_run_step: u64,
    pub block_size: u64,
}

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("no chain tip to build on")]
    NoTip,
    #[error("packed fees {fees} below total fuel {fuel}")]
    FeeUnderflow { fees: u64, fuel: u64 },
}

/// Candidate entries for the heap: everything in the snapshot that is not
/// already confirmed.
fn priority_queue(
    snapshot: &[MempoolEntry],
    tx_cache: &TxCache,
    fuel_rate: u64,
) -> BinaryHeap<TxPriority> {
    snapshot
        .iter()
        .filter(|e| !tx_cache.have_tx(&e.tx.hash()))
        .map(|e| TxPriority::new(e.clone(), fuel_rate))
        .collect()
}

/// Build a candidate block on the current tip.
///
/// `accounts` and `contracts` are the caller's working copies; accepted
/// transactions are flushed into them so later candidates observe earlier
/// effects, exactly as the verifier will replay them.
#[allow(clippy::too_many_arguments)]
pub fn create_new_block(
    chain: &dyn ChainView,
    accounts: &mut AccountCache,
    contracts: &mut ContractStore,
    tx_cache: &TxCache,
    snapshot: &[MempoolEntry],
    executor: &dyn TxExecutor,
    params: &ChainParams,
    limits: &BlockLimits,
    now: u64,
) -> Result<BlockTemplate, AssembleError> {
    let tip = chain.tip_index().ok_or(AssembleError::NoTip)?;
    let next_height = tip.height + 1;
    let fuel_rate = fuel_rate_for_next(chain, Some(&tip), params, limits.burn_window);

    // Shell with the reward placeholder at body position 0.
    let mut block = Block {
        header: BlockHeader {
            height: next_height,
            prev_hash: tip.hash,
            merkle_root: Hash32::zero(),
            time: 0,
            nonce: 0,
            fuel_rate,
            fuel: 0,
            signature: Default::default(),
        },
        reward_tx: RewardTx::placeholder(params.tx_version),
        txs: Vec::new(),
    };

    let mut heap = priority_queue(snapshot, tx_cache, fuel_rate);

    let mut block_size = block.serialized_size();
    let mut total_fees: u64 = 0;
    let mut total_fuel: u64 = 0;
    let mut total_run_step: u64 = 0;

    while let Some(TxPriority { fee_per_kb, entry, .. }) = heap.pop() {
        let tx_size = entry.tx.serialized_size();

        if block_size + tx_size >= limits.max_size {
            debug!(tx = %entry.tx.hash().to_hex(), tx_size, block_size, "skip: over max size");
            continue;
        }
        // Past the minimum block size, free transactions are no longer
        // worth the room.
        if fee_per_kb < params.min_relay_tx_fee as f64 && block_size + tx_size >= limits.min_size {
            debug!(tx = %entry.tx.hash().to_hex(), fee_per_kb, "skip: free tx past min size");
            continue;
        }

        let mut tx = entry.tx.clone();
        tx.fuel_rate = fuel_rate;

        let mut view = AccountScratch::new(accounts);
        let mut scripts = ContractScratch::new(contracts);
        let index = block.txs.len() as u32 + 1;
        let outcome = match executor.execute_tx(&tx, index, next_height, tx_cache, &mut view, &mut scripts) {
            Ok(out) => out,
            Err(e) => {
                debug!(tx = %tx.hash().to_hex(), error = %e, "skip: execution failed");
                continue;
            }
        };
        // Inclusive ceiling: a transaction landing exactly on the limit is
        // rejected too.
        if total_run_step + outcome.run_step >= params.max_block_run_step {
            debug!(
                tx = %tx.hash().to_hex(),
                run_step = outcome.run_step,
                total_run_step,
                "skip: run step budget"
            );
            continue;
        }

        let account_overlay = view.into_overlay();
        let contract_overlay = scripts.into_overlay();
        accounts.absorb(account_overlay);
        contracts.absorb(contract_overlay);

        let charge = fuel_charge(outcome.run_step, fuel_rate);
        total_fees += tx.fee;
        total_fuel += charge;
        total_run_step += outcome.run_step;
        block_size += tx_size;
        debug!(
            tx = %tx.hash().to_hex(),
            charge,
            run_step = outcome.run_step,
            total_fuel,
            fuel_rate,
            "packed tx"
        );
        block.txs.push(tx);
    }

    if total_fees < total_fuel {
        return Err(AssembleError::FeeUnderflow { fees: total_fees, fuel: total_fuel });
    }
    block.reward_tx.set_reward_value(total_fees - total_fuel);
    block.reward_tx.set_height(next_height);
    block.header.fuel = total_fuel;
    // Never reuse the tip's timestamp, even when the clock has not moved.
    block.header.time = now.max(tip.time + 1);

    info!(
        height = next_height,
        txs = block.txs.len(),
        size = block_size,
        fuel = total_fuel,
        fees = total_fees,
        "assembled block template"
    );

    Ok(BlockTemplate { block, total_fees, total_fuel, total_run_step, block_size })
}
