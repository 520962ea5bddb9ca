//! Incoming-block verification.
//!
//! Re-runs the producer's selection rules against the same state snapshot:
//! delegate load + shuffle, slot ownership, single-slot exclusion, merkle
//! and signature checks, and (optionally) full body execution with fuel
//! reconciliation. Any failure carries a structured reason the caller can
//! log or feed into peer banning.

use crate::chain::BlockReader;
use crate::consensus::delegates::{
    current_delegate, load_delegates, shuffle_delegates, DelegateError,
};
use crate::crypto::ed25519::verify_signature;
use crate::execution::{ExecError, TxExecutor};
use crate::params::ChainParams;
use crate::state::{AccountCache, AccountScratch, ContractScratch, ContractStore, TxCache};
use crate::types::{fuel_charge, Block, Hash32, RegId};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("nonce {nonce} exceeds maximum {max}")]
    BadNonce { nonce: u32, max: u32 },
    #[error("merkle root does not match body")]
    MerkleMismatch,
    #[error("previous block {0:?} unavailable")]
    UnknownPrev(Hash32),
    #[error("delegate {0} produced two blocks within one slot interval")]
    SlotReuse(RegId),
    #[error("reward account {0} not found")]
    MissingRewardAccount(RegId),
    #[error("block signed by {got}, slot belongs to {want}")]
    WrongDelegate { got: RegId, want: RegId },
    #[error("block signature size {0} out of range")]
    BadSignatureSize(usize),
    #[error("block signature verifies under neither delegate key")]
    BadSignature,
    #[error("reward tx version {got}, supported {want}")]
    BadTxVersion { got: u32, want: u32 },
    #[error("transaction {0:?} already confirmed")]
    DuplicateTx(Hash32),
    #[error("block run steps {total} exceed limit {max}")]
    RunStepOverflow { total: u64, max: u64 },
    #[error("transaction at index {index} failed: {source}")]
    ExecFailed { index: usize, source: ExecError },
    #[error("header fuel {header} does not match computed {computed}")]
    FuelMismatch { header: u64, computed: u64 },
    #[error(transparent)]
    Delegates(#[from] DelegateError),
}

/// Verify `block` against the delegate schedule and, when `run_tx` is set,
/// replay its body on scratch views over the supplied caches.
///
/// Execution side effects stay in the scratches and are discarded here; the
/// block-acceptance path re-applies them when it connects the block.
#[allow(clippy::too_many_arguments)]
pub fn verify_pos_block<C: BlockReader>(
    block: &Block,
    chain: &C,
    accounts: &AccountCache,
    contracts: &ContractStore,
    tx_cache: &TxCache,
    executor: &dyn TxExecutor,
    params: &ChainParams,
    run_tx: bool,
) -> Result<(), VerifyError> {
    let mut delegates = load_delegates(accounts, contracts, params)?;
    shuffle_delegates(block.header.height, params, &mut delegates);
    let expected = current_delegate(block.header.time, &delegates, params).clone();

    if block.header.nonce > params.max_nonce {
        return Err(VerifyError::BadNonce { nonce: block.header.nonce, max: params.max_nonce });
    }
    if block.header.merkle_root != block.build_merkle_root() {
        return Err(VerifyError::MerkleMismatch);
    }

    if block.header.prev_hash != chain.genesis_hash() {
        let prev = chain
            .read_block(&block.header.prev_hash)
            .map_err(|_| VerifyError::UnknownPrev(block.header.prev_hash))?;
        let prev_producer = prev.reward_tx.producer_reg_id();
        let prev_delegate = accounts
            .get_account(&prev_producer)
            .ok_or(VerifyError::MissingRewardAccount(prev_producer))?;
        if block.header.time.saturating_sub(prev.header.time) < params.block_interval
            && prev_delegate.reg_id == expected.reg_id
        {
            warn!(height = block.header.height, delegate = %expected.reg_id, "slot reuse rejected");
            return Err(VerifyError::SlotReuse(expected.reg_id));
        }
    }

    let producer = block.reward_tx.producer_reg_id();
    let account = accounts
        .get_account(&producer)
        .ok_or(VerifyError::MissingRewardAccount(producer))?;
    if account.reg_id != expected.reg_id {
        return Err(VerifyError::WrongDelegate { got: account.reg_id, want: expected.reg_id });
    }

    let sig = &block.header.signature;
    if sig.is_empty() || sig.len() > params.max_block_signature_size {
        return Err(VerifyError::BadSignatureSize(sig.len()));
    }
    let digest = block.signature_hash();
    let under_main = verify_signature(&account.pub_key, &digest.0, sig).is_ok();
    let under_miner = account
        .miner_pub_key
        .as_ref()
        .map(|pk| verify_signature(pk, &digest.0, sig).is_ok())
        .unwrap_or(false);
    if !under_main && !under_miner {
        return Err(VerifyError::BadSignature);
    }

    if block.reward_tx.version() != params.tx_version {
        return Err(VerifyError::BadTxVersion {
            got: block.reward_tx.version(),
            want: params.tx_version,
        });
    }

    if run_tx {
        run_body(block, accounts, contracts, tx_cache, executor, params)?;
    }

    Ok(())
}

/// Replay the body in order on a single scratch pair so each transaction
/// observes its predecessors, then reconcile total fuel with the header.
fn run_body(
    block: &Block,
    accounts: &AccountCache,
    contracts: &ContractStore,
    tx_cache: &TxCache,
    executor: &dyn TxExecutor,
    params: &ChainParams,
) -> Result<(), VerifyError> {
    let mut view = AccountScratch::new(accounts);
    let mut scripts = ContractScratch::new(contracts);
    let mut total_fuel: u64 = 0;
    let mut total_run_step: u64 = 0;

    for (i, tx) in block.txs.iter().enumerate() {
        let index = i + 1;
        if tx_cache.have_tx(&tx.hash()) {
            return Err(VerifyError::DuplicateTx(tx.hash()));
        }
        let mut tx = tx.clone();
        tx.fuel_rate = block.header.fuel_rate;
        let outcome = executor
            .execute_tx(&tx, index as u32, block.header.height, tx_cache, &mut view, &mut scripts)
            .map_err(|source| VerifyError::ExecFailed { index, source })?;

        total_run_step += outcome.run_step;
        if total_run_step > params.max_block_run_step {
            return Err(VerifyError::RunStepOverflow {
                total: total_run_step,
                max: params.max_block_run_step,
            });
        }
        total_fuel += fuel_charge(outcome.run_step, block.header.fuel_rate);
    }

    if total_fuel != block.header.fuel {
        return Err(VerifyError::FuelMismatch { header: block.header.fuel, computed: total_fuel });
    }
    Ok(())
}
