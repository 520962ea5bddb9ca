//! Delegate registry and the slot schedule.
//!
//! The elected set is read from the contract store's vote table, whose keys
//! encode votes in inverted fixed-width hex so an ascending prefix scan
//! yields descending vote order. The per-round shuffle is a deterministic
//! permutation seeded from the block height; producer and verifier must walk
//! it identically, including the quirk that the position index advances in
//! both the inner and outer loop.

use crate::params::ChainParams;
use crate::state::{
    decode_delegate_vote_key, delegate_vote_key, AccountCache, ContractStore, DELEGATE_PREFIX,
};
use crate::types::{hash_bytes, Account, Height, RegId};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("delegate table has {got} usable keys, expected {want}")]
    TooFew { got: usize, want: usize },
    #[error("malformed delegate vote key {0}")]
    BadKey(String),
    #[error("delegate account {0} missing from account cache")]
    MissingAccount(RegId),
    #[error("vote mismatch for {reg_id}: key says {key_votes}, account has {acct_votes}")]
    VoteMismatch { reg_id: RegId, key_votes: u64, acct_votes: u64 },
}

impl DelegateError {
    /// Missing accounts and irreconcilable vote counts mean the state view
    /// itself is corrupt; callers must stop producing rather than retry.
    pub fn is_corruption(&self) -> bool {
        matches!(self, DelegateError::MissingAccount(_) | DelegateError::VoteMismatch { .. })
    }
}

/// Read the elected delegate set: the first `total_delegates` entries of the
/// vote table, each cross-checked against its account.
pub fn load_delegates(
    accounts: &AccountCache,
    contracts: &ContractStore,
    params: &ChainParams,
) -> Result<Vec<Account>, DelegateError> {
    let want = params.total_delegates;
    let keys = contracts.scan_prefix(DELEGATE_PREFIX);
    if keys.len() < want {
        return Err(DelegateError::TooFew { got: keys.len(), want });
    }

    let mut delegates = Vec::with_capacity(want);
    for (key, _value) in keys.into_iter().take(want) {
        let (votes, reg_id) = decode_delegate_vote_key(&key)
            .ok_or_else(|| DelegateError::BadKey(String::from_utf8_lossy(&key).into_owned()))?;
        let account = accounts
            .get_account(&reg_id)
            .ok_or(DelegateError::MissingAccount(reg_id))?;
        if account.received_votes != votes {
            return Err(DelegateError::VoteMismatch {
                reg_id,
                key_votes: votes,
                acct_votes: account.received_votes,
            });
        }
        delegates.push(account);
    }
    Ok(delegates)
}

/// Write the vote-table keys for a delegate set. Genesis and test setup use
/// this; `load_delegates` afterwards recovers the set in vote order.
pub fn save_delegates(delegates: &[Account], contracts: &mut ContractStore) {
    for account in delegates {
        contracts.set(delegate_vote_key(account.received_votes, &account.reg_id), Vec::new());
    }
}

/// Deterministically permute the delegate list for the round containing
/// `height`.
///
/// The seed is the chain hash of the decimal form of `ceil(height / N)`.
/// Up to four 64-bit little-endian words are drawn per seed; word `x`
/// swaps position `i` with `word mod N`. The cursor advances with every
/// swap and once more when a group ends, so the position after each group
/// of four takes no swap of its own (for N = 11 that is positions 4 and
/// 9). After each group the seed is rehashed as `H(seed || seed)`. The
/// double advance is inherited behaviour; both sides of the protocol must
/// walk it exactly.
pub fn shuffle_delegates(height: Height, params: &ChainParams, delegates: &mut [Account]) {
    let n = params.total_delegates.min(delegates.len());
    if n == 0 {
        return;
    }
    let rounds = height / n as u64 + u64::from(height % n as u64 > 0);
    let mut seed = hash_bytes(rounds.to_string().as_bytes());

    let mut i = 0usize;
    while i < n {
        let mut x = 0usize;
        while x < 4 && i < n {
            let mut word = [0u8; 8];
            word.copy_from_slice(&seed.0[x * 8..x * 8 + 8]);
            let new_index = (u64::from_le_bytes(word) % n as u64) as usize;
            delegates.swap(new_index, i);
            i += 1;
            x += 1;
        }
        let mut doubled = [0u8; 64];
        doubled[..32].copy_from_slice(&seed.0);
        doubled[32..].copy_from_slice(&seed.0);
        seed = hash_bytes(&doubled);
        // Outer-loop advance: skips one position per group.
        i += 1;
    }
}

/// Index of the delegate on duty at `time`.
pub fn slot_index(time: u64, params: &ChainParams) -> usize {
    let slot = time / params.block_interval;
    (slot % params.total_delegates as u64) as usize
}

/// The shuffled delegate whose slot covers `time`.
pub fn current_delegate<'a>(
    time: u64,
    delegates: &'a [Account],
    params: &ChainParams,
) -> &'a Account {
    let index = slot_index(time, params);
    let delegate = &delegates[index];
    debug!(time, index, delegate = %delegate.reg_id, "slot delegate");
    delegate
}
