//! VELD regtest node.
//!
//! Spins up an in-memory chain with a seeded delegate set, holds every
//! delegate key in the local wallet, runs the producer thread, and feeds a
//! stream of demo transfers through the mempool. Exits after producing the
//! requested number of blocks and prints the mined-block ring.

use clap::Parser;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use veld::chain::{Chain, NetworkKind};
use veld::config::NodeConfig;
use veld::consensus::assembler::BlockLimits;
use veld::consensus::producer::{spawn_miner, CancelToken, MinedBlockRing, MinerContext};
use veld::crypto::ed25519::Ed25519Keypair;
use veld::execution::{TransferExecutor, TxExecutor};
use veld::mempool::Mempool;
use veld::metrics::MinerMetrics;
use veld::params::ChainParams;
use veld::state::{AccountScratch, ContractScratch};
use veld::types::{Account, RegId, Tx, SYMB_BASE};
use veld::wallet::Wallet;

#[derive(Parser, Debug)]
#[command(name = "veld-node", version, about = "VELD regtest node")]
struct Args {
    /// Path to TOML config file (CLI flags override file values)
    #[arg(long, default_value = "./veld.toml")]
    config: String,

    /// Write an example config to the given path and exit
    #[arg(long)]
    write_example_config: Option<String>,

    /// Stop after this many produced blocks
    #[arg(long, default_value_t = 5)]
    generate: u64,

    /// Delegates in the regtest genesis set
    #[arg(long, default_value_t = 3)]
    delegates: usize,

    /// Slot length in seconds
    #[arg(long, default_value_t = 1)]
    interval: u64,

    // Overrides for the [miner] section, matching the config option names.
    #[arg(long = "blockmaxsize")]
    block_max_size: Option<u64>,
    #[arg(long = "blockprioritysize")]
    block_priority_size: Option<u64>,
    #[arg(long = "blockminsize")]
    block_min_size: Option<u64>,
    #[arg(long = "blocksizeforburn")]
    blocksize_for_burn: Option<u64>,
    #[arg(long = "genblockforce")]
    gen_block_force: bool,
}

/// Regtest genesis: `n` delegates with descending votes, every key held by
/// the local wallet, each funded for demo transfers.
fn seed_genesis(n: usize, wallet: &Wallet) -> (Vec<Account>, Vec<Ed25519Keypair>) {
    let mut delegates = Vec::with_capacity(n);
    let mut keys = Vec::with_capacity(n);
    for i in 0..n {
        let main = Ed25519Keypair::from_seed_u64(1_000 + i as u64);
        let miner = Ed25519Keypair::from_seed_u64(2_000 + i as u64);
        wallet.insert_key(main.clone(), Some(miner.clone()));

        let mut account = Account::new(RegId::new(1, i as u16), main.public_key());
        account.miner_pub_key = Some(miner.public_key());
        account.received_votes = 1_000_000 - i as u64; // descending
        account.add_free(SYMB_BASE, 1_000_000_000);
        delegates.push(account);
        keys.push(main);
    }
    (delegates, keys)
}

/// Build a signed transfer from delegate `from` to delegate `to`.
fn demo_transfer(
    from: &Account,
    from_key: &Ed25519Keypair,
    to: &Account,
    value: u64,
    fee: u64,
    valid_height: u64,
    tag: u64,
) -> Tx {
    let mut tx = Tx {
        txuid: from.reg_id,
        to: to.key_id,
        value,
        fee,
        valid_height,
        // Unique payload so repeated transfers hash differently.
        payload: tag.to_le_bytes().to_vec(),
        fuel_rate: 0,
        pubkey: from_key.public_key(),
        signature: Default::default(),
    };
    tx.signature = from_key.sign(&tx.sign_bytes());
    tx
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.write_example_config {
        NodeConfig::write_example(path)?;
        println!("wrote example config to {path}");
        return Ok(());
    }

    let mut cfg = NodeConfig::load(&args.config)?;
    if let Some(v) = args.block_max_size {
        cfg.miner.block_max_size = v;
    }
    if let Some(v) = args.block_priority_size {
        cfg.miner.block_priority_size = v;
    }
    if let Some(v) = args.block_min_size {
        cfg.miner.block_min_size = v;
    }
    if let Some(v) = args.blocksize_for_burn {
        cfg.miner.blocksize_for_burn = v;
    }
    if args.gen_block_force {
        cfg.miner.gen_block_force = true;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.node.log_level.clone())),
        )
        .init();

    let params = ChainParams {
        total_delegates: args.delegates,
        block_interval: args.interval,
        ..ChainParams::default()
    };
    let limits = BlockLimits::clamped(
        cfg.miner.block_max_size,
        cfg.miner.block_priority_size,
        cfg.miner.block_min_size,
        cfg.miner.blocksize_for_burn,
        &params,
    );

    let wallet = Arc::new(Wallet::new());
    let (delegates, keys) = seed_genesis(args.delegates, &wallet);
    let genesis_time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let chain = Arc::new(RwLock::new(Chain::with_genesis(
        params.clone(),
        &delegates,
        genesis_time,
    )));
    let mempool = Arc::new(Mutex::new(Mempool::new(
        cfg.mempool.capacity,
        cfg.mempool.max_tx_size,
    )));
    let executor: Arc<dyn TxExecutor> = Arc::new(TransferExecutor);
    let metrics = MinerMetrics::new().ok().map(Arc::new);
    let ring = Arc::new(MinedBlockRing::new());
    let cancel = CancelToken::new();

    let ctx = MinerContext {
        params: params.clone(),
        limits,
        chain: chain.clone(),
        mempool: mempool.clone(),
        wallet: wallet.clone(),
        executor: executor.clone(),
        network: NetworkKind::Regtest,
        peers: Arc::new(AtomicUsize::new(0)),
        gen_block_force: cfg.miner.gen_block_force,
        cancel: cancel.clone(),
        active: Arc::new(AtomicBool::new(false)),
        ring: ring.clone(),
        metrics: metrics.clone(),
    };

    info!(
        delegates = args.delegates,
        interval = args.interval,
        target = args.generate,
        "starting regtest producer"
    );
    let handle = spawn_miner(ctx)?;

    // Feed demo transfers and wait for the target height.
    let mut tag: u64 = 0;
    loop {
        let height = chain.read().height();
        if height >= args.generate {
            break;
        }

        // A couple of paying transfers between delegates per tick.
        for _ in 0..2 {
            tag += 1;
            let from = &delegates[(tag as usize) % delegates.len()];
            let to = &delegates[(tag as usize + 1) % delegates.len()];
            let key = &keys[(tag as usize) % keys.len()];
            let tx = demo_transfer(from, key, to, 100, 10_000, args.generate + 100, tag);
            // Price the entry the way admission would: run the executor
            // against the live view to learn the run-step count.
            let run_step = {
                let chain = chain.read();
                let mut view = AccountScratch::new(&chain.accounts);
                let mut contracts = ContractScratch::new(&chain.contracts);
                executor
                    .execute_tx(&tx, 1, height + 1, &chain.tx_cache, &mut view, &mut contracts)
                    .map(|o| o.run_step)
            };
            match run_step {
                Ok(run_step) => {
                    if let Err(e) = mempool.lock().push(tx, height, run_step) {
                        warn!(error = %e, "demo tx rejected");
                    }
                }
                Err(e) => warn!(error = %e, "demo tx does not execute"),
            }
        }

        std::thread::sleep(Duration::from_millis(200));
    }

    cancel.cancel();
    let _ = handle.join();

    let mined = ring.snapshot(args.generate as usize);
    println!("{}", serde_json::to_string_pretty(&mined)?);
    if let Some(m) = &metrics {
        print!("{}", m.render());
    }
    Ok(())
}
