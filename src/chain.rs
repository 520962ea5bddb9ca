//! In-memory chain state.
//!
//! The reorg engine and on-disk block storage live outside this crate; the
//! producer and verifier only need the narrow contracts modelled here:
//! [`ChainView`] for header-index walks, [`BlockReader`] for fetching full
//! blocks, and `process_block` as the acceptance path. The in-memory
//! [`Chain`] implements all three and is what the node binary and the tests
//! drive.

use crate::consensus::delegates::save_delegates;
use crate::consensus::verifier::{verify_pos_block, VerifyError};
use crate::execution::TxExecutor;
use crate::params::ChainParams;
use crate::state::{AccountCache, AccountScratch, ContractScratch, ContractStore, TxCache};
use crate::types::{Account, Block, BlockHeader, Hash32, Height, RewardTx, REWARD_IMMATURE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::info;

/// Slim header index kept per block; enough for slot checks and the fuel
/// controller's look-back walk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockIndex {
    pub height: Height,
    pub time: u64,
    pub fuel: u64,
    pub fuel_rate: u64,
    pub hash: Hash32,
    pub prev_hash: Hash32,
}

pub trait ChainView {
    fn tip_index(&self) -> Option<BlockIndex>;
    fn index_by_hash(&self, hash: &Hash32) -> Option<BlockIndex>;
}

pub trait BlockReader {
    fn read_block(&self, hash: &Hash32) -> Result<Block, ChainError>;
    fn genesis_hash(&self) -> Hash32;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkKind {
    Main,
    Test,
    Regtest,
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unknown block {0:?}")]
    UnknownBlock(Hash32),
    #[error("block does not extend the current tip")]
    StaleTip,
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("connect failed after verification: {0}")]
    ConnectFailed(String),
}

pub struct Chain {
    params: ChainParams,
    blocks: HashMap<Hash32, Block>,
    indexes: HashMap<Hash32, BlockIndex>,
    by_height: BTreeMap<Height, Hash32>,
    genesis: Hash32,
    tip: Hash32,
    pub accounts: AccountCache,
    pub contracts: ContractStore,
    pub tx_cache: TxCache,
}

impl Chain {
    /// Bootstrap a chain whose genesis elects `delegates` (their accounts
    /// are registered and their vote keys written).
    pub fn with_genesis(params: ChainParams, delegates: &[Account], genesis_time: u64) -> Self {
        let mut accounts = AccountCache::new();
        let mut contracts = ContractStore::new();
        for account in delegates {
            accounts.set_account(account.clone());
        }
        save_delegates(delegates, &mut contracts);

        let mut genesis_block = Block {
            header: BlockHeader {
                height: 0,
                prev_hash: Hash32::zero(),
                merkle_root: Hash32::zero(),
                time: genesis_time,
                nonce: 0,
                fuel_rate: params.init_fuel_rate,
                fuel: 0,
                signature: Default::default(),
            },
            reward_tx: RewardTx::placeholder(params.tx_version),
            txs: Vec::new(),
        };
        genesis_block.header.merkle_root = genesis_block.build_merkle_root();
        let genesis_hash = genesis_block.hash();

        let index = BlockIndex {
            height: 0,
            time: genesis_time,
            fuel: 0,
            fuel_rate: params.init_fuel_rate,
            hash: genesis_hash,
            prev_hash: Hash32::zero(),
        };

        let mut chain = Self {
            params,
            blocks: HashMap::new(),
            indexes: HashMap::new(),
            by_height: BTreeMap::new(),
            genesis: genesis_hash,
            tip: genesis_hash,
            accounts,
            contracts,
            tx_cache: TxCache::new(),
        };
        chain.blocks.insert(genesis_hash, genesis_block);
        chain.indexes.insert(genesis_hash, index);
        chain.by_height.insert(0, genesis_hash);
        chain
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn height(&self) -> Height {
        self.indexes[&self.tip].height
    }

    pub fn tip_hash(&self) -> Hash32 {
        self.tip
    }

    pub fn block_hash_at(&self, height: Height) -> Option<Hash32> {
        self.by_height.get(&height).copied()
    }

    /// Verify and connect a block extending the current tip. Returns the
    /// confirmed transaction hashes so the caller can prune its mempool.
    pub fn process_block(
        &mut self,
        block: &Block,
        executor: &dyn TxExecutor,
    ) -> Result<Vec<Hash32>, ChainError> {
        if block.header.prev_hash != self.tip {
            return Err(ChainError::StaleTip);
        }
        verify_pos_block(
            block,
            &*self,
            &self.accounts,
            &self.contracts,
            &self.tx_cache,
            executor,
            &self.params,
            true,
        )?;
        self.connect(block, executor)
    }

    /// Apply a verified block to live state and advance the tip.
    fn connect(
        &mut self,
        block: &Block,
        executor: &dyn TxExecutor,
    ) -> Result<Vec<Hash32>, ChainError> {
        let mut view = AccountScratch::new(&self.accounts);
        let mut scripts = ContractScratch::new(&self.contracts);

        for (i, tx) in block.txs.iter().enumerate() {
            let mut tx = tx.clone();
            tx.fuel_rate = block.header.fuel_rate;
            executor
                .execute_tx(
                    &tx,
                    i as u32 + 1,
                    block.header.height,
                    &self.tx_cache,
                    &mut view,
                    &mut scripts,
                )
                .map_err(|e| ChainError::ConnectFailed(e.to_string()))?;
        }

        // Reward is applied immature on inclusion; maturity credit happens
        // outside this crate.
        let producer = block.reward_tx.producer_reg_id();
        let mut producer_account = view
            .get_account(&producer)
            .ok_or_else(|| ChainError::ConnectFailed(format!("producer {producer} missing")))?;
        block
            .reward_tx
            .apply(REWARD_IMMATURE, &mut producer_account)
            .map_err(|e| ChainError::ConnectFailed(e.to_string()))?;
        view.set_account(producer_account);

        let account_overlay = view.into_overlay();
        let contract_overlay = scripts.into_overlay();
        self.accounts.absorb(account_overlay);
        self.contracts.absorb(contract_overlay);

        let mut confirmed = Vec::with_capacity(block.tx_count());
        confirmed.push(block.reward_tx.hash());
        for tx in &block.txs {
            confirmed.push(tx.hash());
        }
        for h in &confirmed {
            self.tx_cache.add_tx(*h);
        }

        let hash = block.hash();
        let index = BlockIndex {
            height: block.header.height,
            time: block.header.time,
            fuel: block.header.fuel,
            fuel_rate: block.header.fuel_rate,
            hash,
            prev_hash: block.header.prev_hash,
        };
        self.blocks.insert(hash, block.clone());
        self.indexes.insert(hash, index);
        self.by_height.insert(block.header.height, hash);
        self.tip = hash;

        info!(
            height = block.header.height,
            hash = %hash.to_hex(),
            txs = block.txs.len(),
            fuel = block.header.fuel,
            "connected block"
        );
        Ok(confirmed)
    }
}

impl ChainView for Chain {
    fn tip_index(&self) -> Option<BlockIndex> {
        self.indexes.get(&self.tip).cloned()
    }

    fn index_by_hash(&self, hash: &Hash32) -> Option<BlockIndex> {
        self.indexes.get(hash).cloned()
    }
}

impl BlockReader for Chain {
    fn read_block(&self, hash: &Hash32) -> Result<Block, ChainError> {
        self.blocks.get(hash).cloned().ok_or(ChainError::UnknownBlock(*hash))
    }

    fn genesis_hash(&self) -> Hash32 {
        self.genesis
    }
}
