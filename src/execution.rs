//! Transaction execution seam.
//!
//! The core never interprets transaction payloads itself: the assembler and
//! the verifier hand each transaction to a [`TxExecutor`] together with
//! scratch views, and consume the reported run-step count. Producer and
//! verifier must observe identical outcomes for identical inputs, so
//! executors are required to be deterministic.

use crate::crypto::ed25519::verify_signature;
use crate::state::{AccountScratch, ContractScratch, TxCache};
use crate::types::{derive_key_id, Height, RegId, Tx, SYMB_BASE};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug)]
pub struct TxOutcome {
    /// VM work units consumed; the caller converts to fuel at the block's
    /// fuel rate.
    pub run_step: u64,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown sender account {0}")]
    UnknownSender(RegId),
    #[error("unknown receiver {0}")]
    UnknownReceiver(String),
    #[error("sender key does not match account")]
    KeyMismatch,
    #[error("bad transaction signature")]
    BadSignature,
    #[error("expired at height {height}, valid until {valid_height}")]
    Expired { height: Height, valid_height: Height },
    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u64, have: u64 },
}

pub trait TxExecutor: Send + Sync {
    /// Execute `tx` at body position `index` in a block at `height`,
    /// speculatively against the scratch views. On error the caller drops
    /// the scratches; side effects must only go through them.
    fn execute_tx(
        &self,
        tx: &Tx,
        index: u32,
        height: Height,
        tx_cache: &TxCache,
        view: &mut AccountScratch<'_>,
        contracts: &mut ContractScratch<'_>,
    ) -> Result<TxOutcome, ExecError>;
}

/// Per-byte run-step surcharge for transactions carrying contract payloads.
const PAYLOAD_STEP_COST: u64 = 10;

/// The crate's concrete executor: base-coin transfers with an optional
/// contract-data payload. Run steps are a pure function of the serialized
/// transaction, which keeps producer and verifier bit-exact.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferExecutor;

impl TxExecutor for TransferExecutor {
    fn execute_tx(
        &self,
        tx: &Tx,
        index: u32,
        height: Height,
        _tx_cache: &TxCache,
        view: &mut AccountScratch<'_>,
        contracts: &mut ContractScratch<'_>,
    ) -> Result<TxOutcome, ExecError> {
        if height > tx.valid_height {
            return Err(ExecError::Expired { height, valid_height: tx.valid_height });
        }

        let mut sender = view
            .get_account(&tx.txuid)
            .ok_or(ExecError::UnknownSender(tx.txuid))?;
        if derive_key_id(&tx.pubkey) != sender.key_id {
            return Err(ExecError::KeyMismatch);
        }
        verify_signature(&tx.pubkey, &tx.sign_bytes(), &tx.signature)
            .map_err(|_| ExecError::BadSignature)?;

        let need = tx.value.saturating_add(tx.fee);
        let have = sender.free_balance(SYMB_BASE);
        if have < need {
            return Err(ExecError::InsufficientBalance { need, have });
        }

        let mut receiver = view
            .get_account_by_key(&tx.to)
            .ok_or_else(|| ExecError::UnknownReceiver(tx.to.to_hex()))?;

        // The fee is not credited anywhere: it accrues to the block reward.
        sender.sub_free(SYMB_BASE, need);
        if receiver.reg_id == sender.reg_id {
            sender.add_free(SYMB_BASE, tx.value);
        } else {
            receiver.add_free(SYMB_BASE, tx.value);
            view.set_account(receiver);
        }
        view.set_account(sender);

        let mut run_step = tx.serialized_size();
        if !tx.payload.is_empty() {
            run_step += tx.payload.len() as u64 * PAYLOAD_STEP_COST;
            let mut key = b"app_".to_vec();
            key.extend_from_slice(tx.hash().to_hex().as_bytes());
            contracts.set(key, tx.payload.clone());
        }

        debug!(index, height, run_step, tx = %tx.hash().to_hex(), "executed tx");
        Ok(TxOutcome { run_step })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ed25519::Ed25519Keypair;
    use crate::state::{AccountCache, ContractStore};
    use crate::types::{Account, KeyId};

    fn funded(seed: u64, reg_height: u32, balance: u64) -> (Account, Ed25519Keypair) {
        let kp = Ed25519Keypair::from_seed_u64(seed);
        let mut a = Account::new(RegId::new(reg_height, 0), kp.public_key());
        a.add_free(SYMB_BASE, balance);
        (a, kp)
    }

    fn signed_tx(kp: &Ed25519Keypair, from: RegId, to: KeyId, value: u64, fee: u64) -> Tx {
        let mut tx = Tx {
            txuid: from,
            to,
            value,
            fee,
            valid_height: 1_000,
            payload: vec![],
            fuel_rate: 0,
            pubkey: kp.public_key(),
            signature: Default::default(),
        };
        tx.signature = kp.sign(&tx.sign_bytes());
        tx
    }

    #[test]
    fn transfer_moves_value_and_burns_fee() {
        let (alice, alice_kp) = funded(1, 1, 1_000);
        let (bob, _) = funded(2, 2, 0);
        let mut cache = AccountCache::new();
        cache.set_account(alice.clone());
        cache.set_account(bob.clone());
        let store = ContractStore::new();
        let tx_cache = TxCache::new();

        let tx = signed_tx(&alice_kp, alice.reg_id, bob.key_id, 300, 50);
        let mut view = AccountScratch::new(&cache);
        let mut contracts = ContractScratch::new(&store);
        let out = TransferExecutor
            .execute_tx(&tx, 1, 10, &tx_cache, &mut view, &mut contracts)
            .unwrap();
        assert_eq!(out.run_step, tx.serialized_size());

        assert_eq!(view.get_account(&alice.reg_id).unwrap().free_balance(SYMB_BASE), 650);
        assert_eq!(view.get_account(&bob.reg_id).unwrap().free_balance(SYMB_BASE), 300);
    }

    #[test]
    fn payload_costs_extra_steps_and_writes_contract_data() {
        let (alice, alice_kp) = funded(1, 1, 1_000);
        let (bob, _) = funded(2, 2, 0);
        let mut cache = AccountCache::new();
        cache.set_account(alice.clone());
        cache.set_account(bob.clone());
        let store = ContractStore::new();

        let mut tx = signed_tx(&alice_kp, alice.reg_id, bob.key_id, 0, 10);
        tx.payload = vec![7; 16];
        tx.signature = alice_kp.sign(&tx.sign_bytes());

        let mut view = AccountScratch::new(&cache);
        let mut contracts = ContractScratch::new(&store);
        let out = TransferExecutor
            .execute_tx(&tx, 1, 10, &TxCache::new(), &mut view, &mut contracts)
            .unwrap();
        assert_eq!(out.run_step, tx.serialized_size() + 160);
        assert_eq!(contracts.scan_prefix(b"app_").len(), 1);
    }

    #[test]
    fn rejects_bad_signature_and_shortfall() {
        let (alice, alice_kp) = funded(1, 1, 100);
        let (bob, bob_kp) = funded(2, 2, 0);
        let mut cache = AccountCache::new();
        cache.set_account(alice.clone());
        cache.set_account(bob.clone());
        let store = ContractStore::new();

        // Signed by the wrong key.
        let mut tx = signed_tx(&alice_kp, alice.reg_id, bob.key_id, 10, 1);
        tx.signature = bob_kp.sign(&tx.sign_bytes());
        let mut view = AccountScratch::new(&cache);
        let mut contracts = ContractScratch::new(&store);
        assert!(matches!(
            TransferExecutor.execute_tx(&tx, 1, 10, &TxCache::new(), &mut view, &mut contracts),
            Err(ExecError::BadSignature)
        ));

        // Value + fee exceeds the balance.
        let tx = signed_tx(&alice_kp, alice.reg_id, bob.key_id, 90, 20);
        let mut view = AccountScratch::new(&cache);
        let mut contracts = ContractScratch::new(&store);
        assert!(matches!(
            TransferExecutor.execute_tx(&tx, 1, 10, &TxCache::new(), &mut view, &mut contracts),
            Err(ExecError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn rejects_expired() {
        let (alice, alice_kp) = funded(1, 1, 100);
        let (bob, _) = funded(2, 2, 0);
        let mut cache = AccountCache::new();
        cache.set_account(alice.clone());
        cache.set_account(bob.clone());
        let store = ContractStore::new();

        let mut tx = signed_tx(&alice_kp, alice.reg_id, bob.key_id, 1, 1);
        tx.valid_height = 5;
        tx.signature = alice_kp.sign(&tx.sign_bytes());
        let mut view = AccountScratch::new(&cache);
        let mut contracts = ContractScratch::new(&store);
        assert!(matches!(
            TransferExecutor.execute_tx(&tx, 1, 10, &TxCache::new(), &mut view, &mut contracts),
            Err(ExecError::Expired { .. })
        ));
    }
}
