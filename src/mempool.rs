//! Mempool snapshot source for the assembler.
//!
//! The pool is a plain hash-keyed map plus a monotonically increasing
//! `transactions_updated` counter; the producer snapshots the counter before
//! assembling and abandons the cycle when it moves. Admission re-executes
//! the transaction elsewhere (node-side) and records the resulting run-step
//! count with the entry so fee-per-kb ordering can price fuel without
//! re-running anything.

use crate::types::{Hash32, Height, Tx};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Tx,
    pub arrival_height: Height,
    /// Run steps observed when the transaction was admitted.
    pub run_step: u64,
}

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction already in pool")]
    Duplicate,
    #[error("transaction size {size} exceeds limit {limit}")]
    Oversized { size: u64, limit: u64 },
    #[error("mempool full")]
    Full,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MempoolMetrics {
    pub admitted: u64,
    pub rejected_dup: u64,
    pub rejected_oversize: u64,
    pub rejected_full: u64,
    pub removed_confirmed: u64,
}

pub struct Mempool {
    entries: HashMap<Hash32, MempoolEntry>,
    capacity: usize,
    max_tx_size: u64,
    updated: u64,
    pub metrics: MempoolMetrics,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(100_000, 100_000)
    }
}

impl Mempool {
    pub fn new(capacity: usize, max_tx_size: u64) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            max_tx_size,
            updated: 0,
            metrics: MempoolMetrics::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter bumped on every mutation; the producer compares snapshots of
    /// this to detect churn mid-cycle.
    pub fn transactions_updated(&self) -> u64 {
        self.updated
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn push(&mut self, tx: Tx, arrival_height: Height, run_step: u64) -> Result<(), MempoolError> {
        let size = tx.serialized_size();
        if size > self.max_tx_size {
            self.metrics.rejected_oversize += 1;
            return Err(MempoolError::Oversized { size, limit: self.max_tx_size });
        }
        let hash = tx.hash();
        if self.entries.contains_key(&hash) {
            self.metrics.rejected_dup += 1;
            return Err(MempoolError::Duplicate);
        }
        if self.entries.len() >= self.capacity {
            self.metrics.rejected_full += 1;
            return Err(MempoolError::Full);
        }
        self.entries.insert(hash, MempoolEntry { tx, arrival_height, run_step });
        self.updated += 1;
        self.metrics.admitted += 1;
        Ok(())
    }

    /// Owned copy of the pool for the packing pass; does not bump the
    /// updated counter.
    pub fn snapshot(&self) -> Vec<MempoolEntry> {
        self.entries.values().cloned().collect()
    }

    /// Drop transactions confirmed by an accepted block.
    pub fn remove_confirmed(&mut self, hashes: &[Hash32]) {
        for h in hashes {
            if self.entries.remove(h).is_some() {
                self.updated += 1;
                self.metrics.removed_confirmed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{PublicKeyBytes, SignatureBytes};
    use crate::types::{KeyId, RegId};

    fn tx(n: u8) -> Tx {
        Tx {
            txuid: RegId::new(n as u32, 0),
            to: KeyId([n; 20]),
            value: 1,
            fee: 1,
            valid_height: 100,
            payload: vec![],
            fuel_rate: 0,
            pubkey: PublicKeyBytes(vec![n; 32]),
            signature: SignatureBytes(vec![0; 64]),
        }
    }

    #[test]
    fn push_bumps_counter_snapshot_does_not() {
        let mut pool = Mempool::default();
        pool.push(tx(1), 5, 100).unwrap();
        pool.push(tx(2), 5, 100).unwrap();
        assert_eq!(pool.transactions_updated(), 2);
        let snap = pool.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(pool.transactions_updated(), 2);
    }

    #[test]
    fn duplicate_rejected() {
        let mut pool = Mempool::default();
        pool.push(tx(1), 5, 100).unwrap();
        assert!(matches!(pool.push(tx(1), 6, 100), Err(MempoolError::Duplicate)));
        assert_eq!(pool.metrics.rejected_dup, 1);
    }

    #[test]
    fn remove_confirmed_prunes_and_counts() {
        let mut pool = Mempool::default();
        pool.push(tx(1), 5, 100).unwrap();
        pool.push(tx(2), 5, 100).unwrap();
        let before = pool.transactions_updated();
        pool.remove_confirmed(&[tx(1).hash(), tx(9).hash()]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.transactions_updated(), before + 1);
    }

    #[test]
    fn capacity_enforced() {
        let mut pool = Mempool::new(1, 100_000);
        pool.push(tx(1), 5, 100).unwrap();
        assert!(matches!(pool.push(tx(2), 5, 100), Err(MempoolError::Full)));
    }
}
