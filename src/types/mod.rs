use crate::crypto::{PublicKeyBytes, SignatureBytes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type Height = u64;

/// Base coin symbol. The multi-asset reward transaction keys its map with
/// symbols; everything else in the core moves the base coin.
pub const SYMB_BASE: &str = "VELD";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

pub fn hash_bytes(b: &[u8]) -> Hash32 {
    let h = blake3::hash(b);
    let mut out = [0u8; 32];
    out.copy_from_slice(h.as_bytes());
    Hash32(out)
}

/// Compact on-chain identity: the height the registration confirmed at and
/// the transaction index within that block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegId {
    pub height: u32,
    pub index: u16,
}

impl RegId {
    pub fn new(height: u32, index: u16) -> Self {
        Self { height, index }
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 && self.index == 0
    }
}

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.height, self.index)
    }
}

#[derive(Debug, Error)]
#[error("malformed reg id: {0}")]
pub struct ParseRegIdError(String);

impl FromStr for RegId {
    type Err = ParseRegIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, i) = s.split_once('-').ok_or_else(|| ParseRegIdError(s.into()))?;
        Ok(Self {
            height: h.parse().map_err(|_| ParseRegIdError(s.into()))?,
            index: i.parse().map_err(|_| ParseRegIdError(s.into()))?,
        })
    }
}

/// 20-byte address hash of a public key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId(pub [u8; 20]);

impl KeyId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Address derivation: leading 20 bytes of the blake3 hash of the raw key.
pub fn derive_key_id(pk: &PublicKeyBytes) -> KeyId {
    let h = blake3::hash(&pk.0);
    let mut out = [0u8; 20];
    out.copy_from_slice(&h.as_bytes()[..20]);
    KeyId(out)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub reg_id: RegId,
    pub key_id: KeyId,
    pub pub_key: PublicKeyBytes,
    /// Optional dedicated block-signing key. When set and valid it is the
    /// preferred signer for blocks produced by this account.
    pub miner_pub_key: Option<PublicKeyBytes>,
    pub received_votes: u64,
    pub balances: BTreeMap<String, u64>,
}

impl Account {
    pub fn new(reg_id: RegId, pub_key: PublicKeyBytes) -> Self {
        Self {
            reg_id,
            key_id: derive_key_id(&pub_key),
            pub_key,
            miner_pub_key: None,
            received_votes: 0,
            balances: BTreeMap::new(),
        }
    }

    pub fn free_balance(&self, symbol: &str) -> u64 {
        self.balances.get(symbol).copied().unwrap_or(0)
    }

    pub fn add_free(&mut self, symbol: &str, amount: u64) {
        let b = self.balances.entry(symbol.to_string()).or_insert(0);
        *b = b.saturating_add(amount);
    }

    /// Debit `amount` of `symbol`; fails if the free balance is short.
    pub fn sub_free(&mut self, symbol: &str, amount: u64) -> bool {
        match self.balances.get_mut(symbol) {
            Some(b) if *b >= amount => {
                *b -= amount;
                true
            }
            _ => false,
        }
    }
}

/// Per-transaction VM charge at a given price.
#[inline]
pub fn fuel_charge(run_step: u64, fuel_rate: u64) -> u64 {
    run_step.saturating_mul(fuel_rate) / 100
}

/// A user transaction. `fuel_rate` is stamped by the assembler/verifier
/// immediately before execution and is excluded from the hash and the
/// signature, like the wire serialization's transient fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tx {
    pub txuid: RegId,
    pub to: KeyId,
    pub value: u64,
    pub fee: u64,
    pub valid_height: Height,
    pub payload: Vec<u8>,
    pub fuel_rate: u64,
    pub pubkey: PublicKeyBytes,
    pub signature: SignatureBytes,
}

impl Tx {
    /// Deterministic content bytes covered by both the hash and the sender
    /// signature.
    ///
    /// Format: "VELD_TX" || reg_height(4 LE) || reg_index(2 LE) || to(20) ||
    ///         value(8 LE) || fee(8 LE) || valid_height(8 LE) ||
    ///         payload_len(4 LE) || payload
    pub fn sign_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(7 + 4 + 2 + 20 + 8 * 3 + 4 + self.payload.len());
        buf.extend_from_slice(b"VELD_TX");
        buf.extend_from_slice(&self.txuid.height.to_le_bytes());
        buf.extend_from_slice(&self.txuid.index.to_le_bytes());
        buf.extend_from_slice(&self.to.0);
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&self.fee.to_le_bytes());
        buf.extend_from_slice(&self.valid_height.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn hash(&self) -> Hash32 {
        hash_bytes(&self.sign_bytes())
    }

    pub fn serialized_size(&self) -> u64 {
        serialized_size(self)
    }
}

pub const REWARD_IMMATURE: i32 = 0;
pub const REWARD_MATURE: i32 = -1;

#[derive(Debug, Error)]
pub enum RewardError {
    #[error("invalid reward apply index {0}")]
    BadIndex(i32),
}

/// The distinguished transaction at body position 0. It carries no signature
/// of its own; the block signature authenticates it.
///
/// Two variants exist on the wire: the original single-asset reward and the
/// multi-asset form carrying a per-symbol map plus inflation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RewardTx {
    Single {
        txuid: RegId,
        height: Height,
        reward_value: u64,
        version: u32,
    },
    Multi {
        txuid: RegId,
        height: Height,
        reward_fees: BTreeMap<String, u64>,
        inflated_bcoins: u64,
        version: u32,
    },
}

impl RewardTx {
    /// Empty single-asset reward shell used while assembling.
    pub fn placeholder(version: u32) -> Self {
        RewardTx::Single {
            txuid: RegId::default(),
            height: 0,
            reward_value: 0,
            version,
        }
    }

    pub fn producer_reg_id(&self) -> RegId {
        match self {
            RewardTx::Single { txuid, .. } | RewardTx::Multi { txuid, .. } => *txuid,
        }
    }

    pub fn set_producer(&mut self, id: RegId) {
        match self {
            RewardTx::Single { txuid, .. } | RewardTx::Multi { txuid, .. } => *txuid = id,
        }
    }

    pub fn set_height(&mut self, h: Height) {
        match self {
            RewardTx::Single { height, .. } | RewardTx::Multi { height, .. } => *height = h,
        }
    }

    pub fn set_reward_value(&mut self, value: u64) {
        match self {
            RewardTx::Single { reward_value, .. } => *reward_value = value,
            RewardTx::Multi { reward_fees, .. } => {
                reward_fees.insert(SYMB_BASE.to_string(), value);
            }
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            RewardTx::Single { version, .. } | RewardTx::Multi { version, .. } => *version,
        }
    }

    /// Per-symbol view of the reward; the single-asset variant maps onto the
    /// base symbol.
    pub fn reward_map(&self) -> BTreeMap<String, u64> {
        match self {
            RewardTx::Single { reward_value, .. } => {
                BTreeMap::from([(SYMB_BASE.to_string(), *reward_value)])
            }
            RewardTx::Multi { reward_fees, .. } => reward_fees.clone(),
        }
    }

    /// Apply the reward to the producer account. Index 0 is the immature
    /// phase (inclusion, no balance change); -1 is maturity (credit).
    pub fn apply(&self, index: i32, account: &mut Account) -> Result<(), RewardError> {
        match index {
            REWARD_IMMATURE => Ok(()),
            REWARD_MATURE => {
                for (symbol, amount) in self.reward_map() {
                    account.add_free(&symbol, amount);
                }
                if let RewardTx::Multi { inflated_bcoins, .. } = self {
                    account.add_free(SYMB_BASE, *inflated_bcoins);
                }
                Ok(())
            }
            other => Err(RewardError::BadIndex(other)),
        }
    }

    /// Deterministic hash over the reward content.
    ///
    /// Format: "VELD_RWD" || tag(1) || reg_height(4 LE) || reg_index(2 LE) ||
    ///         height(8 LE) || version(4 LE) || per-variant fields
    pub fn hash(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(b"VELD_RWD");
        match self {
            RewardTx::Single { txuid, height, reward_value, version } => {
                buf.push(0);
                buf.extend_from_slice(&txuid.height.to_le_bytes());
                buf.extend_from_slice(&txuid.index.to_le_bytes());
                buf.extend_from_slice(&height.to_le_bytes());
                buf.extend_from_slice(&version.to_le_bytes());
                buf.extend_from_slice(&reward_value.to_le_bytes());
            }
            RewardTx::Multi { txuid, height, reward_fees, inflated_bcoins, version } => {
                buf.push(1);
                buf.extend_from_slice(&txuid.height.to_le_bytes());
                buf.extend_from_slice(&txuid.index.to_le_bytes());
                buf.extend_from_slice(&height.to_le_bytes());
                buf.extend_from_slice(&version.to_le_bytes());
                buf.extend_from_slice(&(reward_fees.len() as u32).to_le_bytes());
                for (symbol, amount) in reward_fees {
                    buf.extend_from_slice(&(symbol.len() as u16).to_le_bytes());
                    buf.extend_from_slice(symbol.as_bytes());
                    buf.extend_from_slice(&amount.to_le_bytes());
                }
                buf.extend_from_slice(&inflated_bcoins.to_le_bytes());
            }
        }
        hash_bytes(&buf)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: Height,
    pub prev_hash: Hash32,
    pub merkle_root: Hash32,
    /// Seconds since epoch.
    pub time: u64,
    pub nonce: u32,
    pub fuel_rate: u64,
    /// Sum of per-transaction fuel charges at `fuel_rate`.
    pub fuel: u64,
    pub signature: SignatureBytes,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub reward_tx: RewardTx,
    pub txs: Vec<Tx>,
}

impl Block {
    /// Digest the block signature covers. Fixed binary header encoding,
    /// signature excluded.
    ///
    /// Format: "VELD_BLK" || height(8 LE) || prev(32) || merkle(32) ||
    ///         time(8 LE) || nonce(4 LE) || fuel_rate(8 LE) || fuel(8 LE)
    pub fn signature_hash(&self) -> Hash32 {
        let h = &self.header;
        let mut buf = Vec::with_capacity(8 + 8 + 32 + 32 + 8 + 4 + 8 + 8);
        buf.extend_from_slice(b"VELD_BLK");
        buf.extend_from_slice(&h.height.to_le_bytes());
        buf.extend_from_slice(&h.prev_hash.0);
        buf.extend_from_slice(&h.merkle_root.0);
        buf.extend_from_slice(&h.time.to_le_bytes());
        buf.extend_from_slice(&h.nonce.to_le_bytes());
        buf.extend_from_slice(&h.fuel_rate.to_le_bytes());
        buf.extend_from_slice(&h.fuel.to_le_bytes());
        hash_bytes(&buf)
    }

    /// Block identity: the signature digest plus the signature itself.
    pub fn hash(&self) -> Hash32 {
        let sig_hash = self.signature_hash();
        let mut buf = Vec::with_capacity(32 + self.header.signature.len());
        buf.extend_from_slice(&sig_hash.0);
        buf.extend_from_slice(&self.header.signature.0);
        hash_bytes(&buf)
    }

    /// Ordered hashes of the full body: reward transaction first.
    pub fn body_tx_hashes(&self) -> Vec<Hash32> {
        let mut hashes = Vec::with_capacity(1 + self.txs.len());
        hashes.push(self.reward_tx.hash());
        hashes.extend(self.txs.iter().map(Tx::hash));
        hashes
    }

    pub fn build_merkle_root(&self) -> Hash32 {
        crate::merkle::merkle_root(&self.body_tx_hashes())
    }

    /// Reward transaction included.
    pub fn tx_count(&self) -> usize {
        1 + self.txs.len()
    }

    pub fn serialized_size(&self) -> u64 {
        serialized_size(self)
    }
}

/// Canonical serialized size; deterministic for a fixed type layout.
pub fn serialized_size<T: Serialize>(v: &T) -> u64 {
    bincode::serialized_size(v).unwrap_or(0)
}
