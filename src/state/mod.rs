//! Layered state caches.
//!
//! The block-acceptance path owns the live caches; the assembler and the
//! verifier work on scratch overlays so speculative execution never touches
//! live state. Reads fall through the overlay to the base; a successful
//! packing step absorbs the overlay back into the working cache, a failed
//! one simply drops it.

use crate::types::{Account, Hash32, KeyId, RegId};
use std::collections::{BTreeMap, HashMap, HashSet};

// ── Accounts ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct AccountCache {
    accounts: HashMap<RegId, Account>,
    by_key: HashMap<KeyId, RegId>,
}

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_account(&self, id: &RegId) -> Option<Account> {
        self.accounts.get(id).cloned()
    }

    pub fn get_account_by_key(&self, key_id: &KeyId) -> Option<Account> {
        self.by_key.get(key_id).and_then(|id| self.get_account(id))
    }

    pub fn set_account(&mut self, account: Account) {
        self.by_key.insert(account.key_id, account.reg_id);
        self.accounts.insert(account.reg_id, account);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Merge a scratch overlay produced by [`AccountScratch::into_overlay`].
    pub fn absorb(&mut self, overlay: HashMap<RegId, Account>) {
        for (_, account) in overlay {
            self.set_account(account);
        }
    }
}

pub struct AccountScratch<'a> {
    base: &'a AccountCache,
    overlay: HashMap<RegId, Account>,
    overlay_by_key: HashMap<KeyId, RegId>,
}

impl<'a> AccountScratch<'a> {
    pub fn new(base: &'a AccountCache) -> Self {
        Self { base, overlay: HashMap::new(), overlay_by_key: HashMap::new() }
    }

    pub fn get_account(&self, id: &RegId) -> Option<Account> {
        self.overlay.get(id).cloned().or_else(|| self.base.get_account(id))
    }

    pub fn get_account_by_key(&self, key_id: &KeyId) -> Option<Account> {
        if let Some(id) = self.overlay_by_key.get(key_id) {
            return self.overlay.get(id).cloned();
        }
        self.base.get_account_by_key(key_id)
    }

    pub fn set_account(&mut self, account: Account) {
        self.overlay_by_key.insert(account.key_id, account.reg_id);
        self.overlay.insert(account.reg_id, account);
    }

    pub fn is_dirty(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// Consume the scratch; the caller hands the overlay to
    /// [`AccountCache::absorb`] to commit, or drops it to discard.
    pub fn into_overlay(self) -> HashMap<RegId, Account> {
        self.overlay
    }
}

// ── Contract store ────────────────────────────────────────────────────────

/// Ordered contract/state key space. Delegate vote keys live here under the
/// `delegate_` prefix; executors write app data under their own prefixes.
#[derive(Clone, Debug, Default)]
pub struct ContractStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.data.insert(key, value);
    }

    /// Ascending (key, value) pairs under `prefix`.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn absorb(&mut self, overlay: BTreeMap<Vec<u8>, Vec<u8>>) {
        self.data.extend(overlay);
    }
}

pub struct ContractScratch<'a> {
    base: &'a ContractStore,
    overlay: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl<'a> ContractScratch<'a> {
    pub fn new(base: &'a ContractStore) -> Self {
        Self { base, overlay: BTreeMap::new() }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.overlay.get(key).cloned().or_else(|| self.base.get(key))
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.overlay.insert(key, value);
    }

    /// Merged ascending scan; overlay entries shadow base entries.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.scan_prefix(prefix).into_iter().collect();
        for (k, v) in self.overlay.range(prefix.to_vec()..) {
            if !k.starts_with(prefix) {
                break;
            }
            merged.insert(k.clone(), v.clone());
        }
        merged.into_iter().collect()
    }

    pub fn into_overlay(self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.overlay
    }
}

// ── Confirmed-transaction cache ───────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct TxCache {
    confirmed: HashSet<Hash32>,
}

impl TxCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn have_tx(&self, hash: &Hash32) -> bool {
        self.confirmed.contains(hash)
    }

    pub fn add_tx(&mut self, hash: Hash32) {
        self.confirmed.insert(hash);
    }

    pub fn remove_tx(&mut self, hash: &Hash32) {
        self.confirmed.remove(hash);
    }

    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }
}

// ── Delegate vote keys ────────────────────────────────────────────────────

pub const DELEGATE_PREFIX: &[u8] = b"delegate_";
const VOTES_HEX_WIDTH: usize = 16;

/// Vote-table key: `delegate_` + 16-char hex of the bitwise complement of
/// the vote count + `_` + reg id. Ascending lexicographic order over these
/// keys yields descending votes.
pub fn delegate_vote_key(votes: u64, reg_id: &RegId) -> Vec<u8> {
    format!("delegate_{:016x}_{}", !votes, reg_id).into_bytes()
}

/// Recover `(votes, reg_id)` from a vote-table key.
pub fn decode_delegate_vote_key(key: &[u8]) -> Option<(u64, RegId)> {
    let rest = key.strip_prefix(DELEGATE_PREFIX)?;
    if rest.len() < VOTES_HEX_WIDTH + 2 {
        return None;
    }
    let (hex_part, tail) = rest.split_at(VOTES_HEX_WIDTH);
    let inverted = u64::from_str_radix(std::str::from_utf8(hex_part).ok()?, 16).ok()?;
    let tail = tail.strip_prefix(b"_")?;
    let reg_id = std::str::from_utf8(tail).ok()?.parse().ok()?;
    Some((!inverted, reg_id))
}
