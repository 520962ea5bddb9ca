//! Mining key wallet.
//!
//! The producer only needs three things from the wallet: does it hold any
//! key eligible to mine, can it fetch the keypair for a delegate's address,
//! and can it sign a block digest — preferring the dedicated miner key when
//! the delegate registered one.

use crate::crypto::ed25519::Ed25519Keypair;
use crate::crypto::SignatureBytes;
use crate::types::KeyId;
use parking_lot::RwLock;
use std::collections::HashMap;

struct WalletKey {
    main: Ed25519Keypair,
    miner: Option<Ed25519Keypair>,
}

#[derive(Default)]
pub struct Wallet {
    keys: RwLock<HashMap<KeyId, WalletKey>>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a keypair (and optional dedicated miner keypair) under the
    /// address derived from the main public key.
    pub fn insert_key(&self, main: Ed25519Keypair, miner: Option<Ed25519Keypair>) -> KeyId {
        let key_id = main.key_id();
        self.keys.write().insert(key_id, WalletKey { main, miner });
        key_id
    }

    pub fn has_any_mining_key(&self) -> bool {
        !self.keys.read().is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.keys.read().len()
    }

    /// Fetch the keypair for `key_id`. With `want_miner` set, only a
    /// registered miner keypair satisfies the request; callers fall back to
    /// a second call with `want_miner = false`.
    pub fn get_key(&self, key_id: &KeyId, want_miner: bool) -> Option<Ed25519Keypair> {
        let keys = self.keys.read();
        let entry = keys.get(key_id)?;
        if want_miner {
            entry.miner.clone()
        } else {
            Some(entry.main.clone())
        }
    }

    /// Whether this wallet can sign for `key_id` at all.
    pub fn holds_key(&self, key_id: &KeyId) -> bool {
        self.keys.read().contains_key(key_id)
    }

    /// Sign `digest` with the key registered under `key_id`, using the miner
    /// keypair when `prefer_miner` is set and one exists.
    pub fn sign(&self, key_id: &KeyId, digest: &[u8], prefer_miner: bool) -> Option<SignatureBytes> {
        let keys = self.keys.read();
        let entry = keys.get(key_id)?;
        let keypair = if prefer_miner {
            entry.miner.as_ref().unwrap_or(&entry.main)
        } else {
            &entry.main
        };
        Some(keypair.sign(digest))
    }
}
