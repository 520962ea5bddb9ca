//! The block producer.
//!
//! A single dedicated OS thread waits for its slot, assembles a candidate
//! block from a mempool snapshot, signs it with the on-duty delegate's key,
//! and submits it through the acceptance path. Cancellation is cooperative:
//! the token is checked at every loop iteration and sleep wake-up. Locks
//! are always acquired chain → wallet → mempool, never reversed.

use crate::chain::{BlockIndex, Chain, ChainView, BlockReader, NetworkKind};
use crate::consensus::assembler::{create_new_block, BlockLimits, BlockTemplate};
use crate::consensus::delegates::{current_delegate, load_delegates, shuffle_delegates};
use crate::execution::TxExecutor;
use crate::mempool::Mempool;
use crate::metrics::MinerMetrics;
use crate::params::ChainParams;
use crate::types::{Account, Block, Hash32};
use crate::wallet::Wallet;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// How many recently mined block descriptors are retained.
pub const RING_CAPACITY: usize = 100;

/// Wall-clock budget for one assemble-and-mine cycle.
const MINE_BUDGET_SECS: u64 = 60;

/// Tip older than this counts as stale for the liveness gate.
const STALE_TIP_SECS: u64 = 3600;

const SLOT_TICK: Duration = Duration::from_millis(100);
const PEER_WAIT: Duration = Duration::from_secs(1);

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Mined-block ring ──────────────────────────────────────────────────────

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MinedBlockInfo {
    pub time: u64,
    pub nonce: u32,
    pub height: u64,
    pub total_fuel: u64,
    pub fuel_rate: u64,
    pub total_fees: u64,
    /// User transactions only; the reward transaction is not counted.
    pub tx_count: u64,
    pub block_size: u64,
    pub hash: Hash32,
    pub prev_hash: Hash32,
}

impl MinedBlockInfo {
    pub fn reward(&self) -> u64 {
        self.total_fees - self.total_fuel
    }

    fn from_template(block: &Block, template: &BlockTemplate) -> Self {
        Self {
            time: block.header.time,
            nonce: block.header.nonce,
            height: block.header.height,
            total_fuel: block.header.fuel,
            fuel_rate: block.header.fuel_rate,
            total_fees: template.total_fees,
            tx_count: block.txs.len() as u64,
            block_size: template.block_size,
            hash: block.hash(),
            prev_hash: block.header.prev_hash,
        }
    }
}

/// Bounded ring of recently mined block descriptors, newest first. Only the
/// producer pushes; readers snapshot-copy.
#[derive(Default)]
pub struct MinedBlockRing {
    inner: Mutex<VecDeque<MinedBlockInfo>>,
}

impl MinedBlockRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, info: MinedBlockInfo) {
        let mut ring = self.inner.lock();
        ring.push_front(info);
        ring.truncate(RING_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Up to `count` entries, newest first.
    pub fn snapshot(&self, count: usize) -> Vec<MinedBlockInfo> {
        self.inner.lock().iter().take(count).cloned().collect()
    }
}

// ── Cancellation ──────────────────────────────────────────────────────────

/// Cooperative cancellation token checked at every documented interruption
/// point.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Producer context ──────────────────────────────────────────────────────

/// Everything the producer thread needs, passed explicitly instead of
/// process-wide statics.
pub struct MinerContext {
    pub params: ChainParams,
    pub limits: BlockLimits,
    pub chain: Arc<RwLock<Chain>>,
    pub mempool: Arc<Mutex<Mempool>>,
    pub wallet: Arc<Wallet>,
    pub executor: Arc<dyn TxExecutor>,
    pub network: NetworkKind,
    /// Connected peer count, maintained by the network layer.
    pub peers: Arc<AtomicUsize>,
    /// Bypass the stale-tip liveness gate.
    pub gen_block_force: bool,
    pub cancel: CancelToken,
    /// Set while the producer loop is running.
    pub active: Arc<AtomicBool>,
    pub ring: Arc<MinedBlockRing>,
    pub metrics: Option<Arc<MinerMetrics>>,
}

/// Spawn the producer on its own named thread.
pub fn spawn_miner(ctx: MinerContext) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("veld-miner".into())
        .spawn(move || run_miner(ctx))
}

fn run_miner(ctx: MinerContext) {
    if !ctx.wallet.has_any_mining_key() {
        error!("no key for mining, miner terminated");
        return;
    }

    ctx.active.store(true, Ordering::SeqCst);
    info!("miner started");

    while !ctx.cancel.is_cancelled() {
        if !wait_for_liveness(&ctx) {
            break;
        }

        let tx_updated = ctx.mempool.lock().transactions_updated();

        let assembled = {
            let chain = ctx.chain.read();
            let snapshot = {
                let pool = ctx.mempool.lock();
                if let Some(m) = &ctx.metrics {
                    m.mempool_size.set(pool.len() as i64);
                }
                pool.snapshot()
            };
            let Some(tip) = chain.tip_index() else {
                drop(chain);
                thread::sleep(PEER_WAIT);
                continue;
            };
            // Working copies layered over live state; nothing touches the
            // live caches until process_block succeeds.
            let mut accounts = chain.accounts.clone();
            let mut contracts = chain.contracts.clone();
            let tx_cache = chain.tx_cache.clone();
            create_new_block(
                &*chain,
                &mut accounts,
                &mut contracts,
                &tx_cache,
                &snapshot,
                ctx.executor.as_ref(),
                &ctx.params,
                &ctx.limits,
                unix_now(),
            )
            .map(|template| (template, tip))
        };

        let (template, tip) = match assembled {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "block assembly failed");
                thread::sleep(PEER_WAIT);
                continue;
            }
        };
        if let Some(m) = &ctx.metrics {
            m.fuel_rate.set(template.block.header.fuel_rate as i64);
        }

        let mut block = template.block.clone();
        if !mine_block(&ctx, &mut block, &tip, tx_updated, &template) {
            if let Some(m) = &ctx.metrics {
                m.blocks_abandoned.inc();
            }
        }
    }

    ctx.active.store(false, Ordering::SeqCst);
    info!("miner terminated");
}

/// Outside regtest, hold off while there are no peers or the tip is stale
/// (unless forced). Returns false on cancellation.
fn wait_for_liveness(ctx: &MinerContext) -> bool {
    if ctx.network == NetworkKind::Regtest {
        return true;
    }
    loop {
        if ctx.cancel.is_cancelled() {
            return false;
        }
        let no_peers = ctx.peers.load(Ordering::SeqCst) == 0;
        let tip_stale = {
            let chain = ctx.chain.read();
            chain
                .tip_index()
                .map(|tip| tip.height > 1 && unix_now().saturating_sub(tip.time) > STALE_TIP_SECS)
                .unwrap_or(false)
        };
        if !(no_peers || (tip_stale && !ctx.gen_block_force)) {
            return true;
        }
        thread::sleep(PEER_WAIT);
    }
}

/// Inner mining loop for one assembled template. Returns true when a block
/// was produced and accepted; false abandons the cycle (stale tip, not our
/// slot, churn, timeout, cancellation).
fn mine_block(
    ctx: &MinerContext,
    block: &mut Block,
    tip: &BlockIndex,
    tx_updated: u64,
    template: &BlockTemplate,
) -> bool {
    let start = unix_now();
    let mut last_time = u64::MAX;

    loop {
        if ctx.cancel.is_cancelled() {
            return false;
        }
        if ctx.network != NetworkKind::Regtest && ctx.peers.load(Ordering::SeqCst) == 0 {
            return false;
        }
        if ctx.chain.read().tip_hash() != tip.hash {
            debug!("tip moved, abandoning candidate");
            return false;
        }

        // Wait for the slot to open: a fresh second, at least one interval
        // past the previous block.
        loop {
            let t = unix_now();
            if t != last_time && t.saturating_sub(tip.time) >= ctx.params.block_interval {
                last_time = t;
                break;
            }
            thread::sleep(SLOT_TICK);
            if ctx.cancel.is_cancelled() {
                return false;
            }
        }

        let delegates = {
            let chain = ctx.chain.read();
            load_delegates(&chain.accounts, &chain.contracts, &ctx.params)
        };
        let mut delegates = match delegates {
            Ok(d) => d,
            Err(e) if e.is_corruption() => {
                error!(error = %e, "delegate state corrupt, stopping miner");
                ctx.cancel.cancel();
                return false;
            }
            Err(e) => {
                warn!(error = %e, "delegate load failed");
                return false;
            }
        };
        shuffle_delegates(block.header.height, &ctx.params, &mut delegates);

        let current_time = unix_now();
        let delegate = current_delegate(current_time, &delegates, &ctx.params).clone();
        if !ctx.wallet.holds_key(&delegate.key_id) {
            debug!(delegate = %delegate.reg_id, "slot belongs to another delegate");
            return false;
        }

        let signed = {
            let chain = ctx.chain.read(); // chain → wallet
            if chain.height() + 1 != block.header.height {
                return false;
            }
            create_block_reward(&chain, &ctx.wallet, current_time, &delegate, block, &ctx.params)
        };

        if signed {
            return submit_block(ctx, block, template);
        }

        if ctx.mempool.lock().transactions_updated() != tx_updated
            || unix_now().saturating_sub(start) > MINE_BUDGET_SECS
        {
            return false;
        }
    }
}

/// Fill in the reward transaction, nonce, time and merkle root, then sign.
/// Refuses to produce when the previous block came from the same delegate
/// inside one slot interval.
fn create_block_reward(
    chain: &Chain,
    wallet: &Wallet,
    current_time: u64,
    delegate: &Account,
    block: &mut Block,
    params: &ChainParams,
) -> bool {
    if block.header.prev_hash != chain.genesis_hash() {
        let prev = match chain.read_block(&block.header.prev_hash) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to read previous block");
                return false;
            }
        };
        let prev_producer = prev.reward_tx.producer_reg_id();
        let Some(prev_delegate) = chain.accounts.get_account(&prev_producer) else {
            warn!(producer = %prev_producer, "previous producer account missing");
            return false;
        };
        if current_time.saturating_sub(prev.header.time) < params.block_interval
            && prev_delegate.reg_id == delegate.reg_id
        {
            warn!(delegate = %delegate.reg_id, "one delegate cannot produce twice in the same slot");
            return false;
        }
    }

    block.header.nonce = rand::thread_rng().gen_range(0..params.max_nonce);
    block.reward_tx.set_producer(delegate.reg_id);
    block.reward_tx.set_height(block.header.height);
    block.header.time = current_time;
    block.header.merkle_root = block.build_merkle_root();

    let digest = block.signature_hash();
    let prefer_miner = delegate.miner_pub_key.is_some();
    match wallet.sign(&delegate.key_id, &digest.0, prefer_miner) {
        Some(sig) => {
            block.header.signature = sig;
            true
        }
        None => {
            warn!(delegate = %delegate.reg_id, "wallet failed to sign block");
            false
        }
    }
}

fn submit_block(ctx: &MinerContext, block: &Block, template: &BlockTemplate) -> bool {
    let result = {
        let mut chain = ctx.chain.write();
        chain.process_block(block, ctx.executor.as_ref())
    };
    match result {
        Ok(confirmed) => {
            ctx.mempool.lock().remove_confirmed(&confirmed);
            let info = MinedBlockInfo::from_template(block, template);
            info!(
                height = info.height,
                txs = info.tx_count,
                reward = info.reward(),
                hash = %info.hash.to_hex(),
                "produced block"
            );
            if let Some(m) = &ctx.metrics {
                m.blocks_produced.inc();
                m.txs_per_block.observe(info.tx_count as f64);
                m.fuel_per_block.observe(info.total_fuel as f64);
            }
            ctx.ring.push(info);
            true
        }
        Err(e) => {
            warn!(error = %e, "own block not accepted");
            if let Some(m) = &ctx.metrics {
                m.blocks_rejected.inc();
            }
            false
        }
    }
}
