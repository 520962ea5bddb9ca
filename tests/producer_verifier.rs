//! Producer/verifier parity and the slot-exclusion rule.
//!
//! Run with: cargo test --test producer_verifier

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use veld::chain::{Chain, NetworkKind};
use veld::consensus::assembler::{create_new_block, BlockLimits, BlockTemplate};
use veld::consensus::delegates::{current_delegate, load_delegates, shuffle_delegates};
use veld::consensus::producer::{spawn_miner, CancelToken, MinedBlockRing, MinerContext};
use veld::consensus::verifier::{verify_pos_block, VerifyError};
use veld::crypto::ed25519::Ed25519Keypair;
use veld::execution::{TransferExecutor, TxExecutor};
use veld::mempool::Mempool;
use veld::params::ChainParams;
use veld::state::{AccountScratch, ContractScratch};
use veld::types::{Account, Block, RegId, Tx, SYMB_BASE};
use veld::wallet::Wallet;

struct TestNet {
    params: ChainParams,
    chain: Chain,
    wallet: Wallet,
    delegates: Vec<Account>,
    keys: Vec<Ed25519Keypair>,
}

/// Chain with `n` delegates, every key held by the wallet, each funded.
fn testnet(n: usize, interval: u64, genesis_time: u64) -> TestNet {
    let params = ChainParams {
        total_delegates: n,
        block_interval: interval,
        ..ChainParams::default()
    };
    let wallet = Wallet::new();
    let mut delegates = Vec::new();
    let mut keys = Vec::new();
    for i in 0..n {
        let main = Ed25519Keypair::from_seed_u64(100 + i as u64);
        let miner = Ed25519Keypair::from_seed_u64(200 + i as u64);
        wallet.insert_key(main.clone(), Some(miner.clone()));
        let mut a = Account::new(RegId::new(1, i as u16), main.public_key());
        a.miner_pub_key = Some(miner.public_key());
        a.received_votes = 10_000 - i as u64;
        a.add_free(SYMB_BASE, 1_000_000);
        delegates.push(a);
        keys.push(main);
    }
    let chain = Chain::with_genesis(params.clone(), &delegates, genesis_time);
    TestNet { params, chain, wallet, delegates, keys }
}

fn transfer(net: &TestNet, from: usize, to: usize, value: u64, fee: u64, tag: u64) -> Tx {
    let mut tx = Tx {
        txuid: net.delegates[from].reg_id,
        to: net.delegates[to].key_id,
        value,
        fee,
        valid_height: 1_000,
        payload: tag.to_le_bytes().to_vec(),
        fuel_rate: 0,
        pubkey: net.keys[from].public_key(),
        signature: Default::default(),
    };
    tx.signature = net.keys[from].sign(&tx.sign_bytes());
    tx
}

fn admit(net: &TestNet, pool: &mut Mempool, tx: Tx) {
    let run_step = {
        let mut view = AccountScratch::new(&net.chain.accounts);
        let mut contracts = ContractScratch::new(&net.chain.contracts);
        TransferExecutor
            .execute_tx(&tx, 1, net.chain.height() + 1, &net.chain.tx_cache, &mut view, &mut contracts)
            .expect("admission execution")
            .run_step
    };
    pool.push(tx, net.chain.height(), run_step).expect("mempool push");
}

/// Assemble on the tip and finish the block the way the producer does:
/// pick the slot delegate for `time`, fill the reward identity, rebuild the
/// merkle root and sign.
fn produce_at(net: &TestNet, pool: &Mempool, time: u64) -> (Block, BlockTemplate) {
    let limits = BlockLimits::defaults(&net.params);
    let mut accounts = net.chain.accounts.clone();
    let mut contracts = net.chain.contracts.clone();
    let template = create_new_block(
        &net.chain,
        &mut accounts,
        &mut contracts,
        &net.chain.tx_cache,
        &pool.snapshot(),
        &TransferExecutor,
        &net.params,
        &limits,
        time,
    )
    .expect("assembly");

    let mut block = template.block.clone();
    let mut delegates =
        load_delegates(&net.chain.accounts, &net.chain.contracts, &net.params).expect("delegates");
    shuffle_delegates(block.header.height, &net.params, &mut delegates);
    let delegate = current_delegate(time, &delegates, &net.params).clone();

    block.header.nonce = 7;
    block.reward_tx.set_producer(delegate.reg_id);
    block.reward_tx.set_height(block.header.height);
    block.header.time = time;
    block.header.merkle_root = block.build_merkle_root();
    let digest = block.signature_hash();
    let sig = net
        .wallet
        .sign(&delegate.key_id, &digest.0, delegate.miner_pub_key.is_some())
        .expect("wallet sign");
    block.header.signature = sig;
    (block, template)
}

fn verify(net: &TestNet, block: &Block) -> Result<(), VerifyError> {
    verify_pos_block(
        block,
        &net.chain,
        &net.chain.accounts,
        &net.chain.contracts,
        &net.chain.tx_cache,
        &TransferExecutor,
        &net.params,
        true,
    )
}

// ── Parity ────────────────────────────────────────────────────────────────

/// P7: anything the producer emits, the verifier accepts under the same
/// state snapshot, and the acceptance path connects it.
#[test]
fn produced_block_verifies_and_connects() {
    let mut net = testnet(3, 10, 100);
    let mut pool = Mempool::default();
    admit(&net, &mut pool, transfer(&net, 0, 1, 500, 10_000, 1));
    admit(&net, &mut pool, transfer(&net, 1, 2, 300, 10_000, 2));

    let (block, template) = produce_at(&net, &pool, 110);
    verify(&net, &block).expect("verifier must accept our own block");

    let confirmed = net
        .chain
        .process_block(&block, &TransferExecutor)
        .expect("acceptance");
    assert_eq!(confirmed.len(), 3); // reward + 2 transfers
    assert_eq!(net.chain.height(), 1);

    // Reward conservation (P3).
    assert!(template.total_fees >= template.total_fuel);
    let reward = template.total_fees - template.total_fuel;
    assert_eq!(block.reward_tx.reward_map()[SYMB_BASE], reward);

    // Transfers landed on live state.
    let receiver = net.chain.accounts.get_account(&net.delegates[2].reg_id).unwrap();
    assert_eq!(receiver.free_balance(SYMB_BASE), 1_000_000 + 300);
}

#[test]
fn verifier_rejects_wrong_delegate() {
    let net = testnet(3, 10, 100);
    let pool = Mempool::default();
    let (mut block, _) = produce_at(&net, &pool, 110);

    let mut delegates =
        load_delegates(&net.chain.accounts, &net.chain.contracts, &net.params).unwrap();
    shuffle_delegates(block.header.height, &net.params, &mut delegates);
    let on_duty = current_delegate(block.header.time, &delegates, &net.params).reg_id;
    let imposter = delegates.iter().find(|d| d.reg_id != on_duty).unwrap().clone();

    block.reward_tx.set_producer(imposter.reg_id);
    block.header.merkle_root = block.build_merkle_root();
    let digest = block.signature_hash();
    block.header.signature = net
        .wallet
        .sign(&imposter.key_id, &digest.0, true)
        .unwrap();

    assert!(matches!(verify(&net, &block), Err(VerifyError::WrongDelegate { .. })));
}

#[test]
fn verifier_rejects_tampering() {
    let net = testnet(3, 10, 100);
    let pool = Mempool::default();

    // Merkle mismatch.
    let (mut block, _) = produce_at(&net, &pool, 110);
    block.reward_tx.set_reward_value(999);
    assert!(matches!(verify(&net, &block), Err(VerifyError::MerkleMismatch)));

    // Nonce out of range.
    let (mut block, _) = produce_at(&net, &pool, 110);
    block.header.nonce = net.params.max_nonce + 1;
    assert!(matches!(verify(&net, &block), Err(VerifyError::BadNonce { .. })));

    // Header fuel that execution cannot reproduce.
    let (mut block, _) = produce_at(&net, &pool, 110);
    block.header.fuel += 1;
    block.header.merkle_root = block.build_merkle_root();
    let digest = block.signature_hash();
    let mut delegates =
        load_delegates(&net.chain.accounts, &net.chain.contracts, &net.params).unwrap();
    shuffle_delegates(block.header.height, &net.params, &mut delegates);
    let delegate = current_delegate(block.header.time, &delegates, &net.params).clone();
    block.header.signature = net.wallet.sign(&delegate.key_id, &digest.0, true).unwrap();
    assert!(matches!(verify(&net, &block), Err(VerifyError::FuelMismatch { .. })));

    // Garbage signature.
    let (mut block, _) = produce_at(&net, &pool, 110);
    block.header.signature.0[0] ^= 0xff;
    assert!(matches!(verify(&net, &block), Err(VerifyError::BadSignature)));
}

#[test]
fn verifier_rejects_confirmed_duplicates() {
    let mut net = testnet(3, 10, 100);
    let mut pool = Mempool::default();
    let tx = transfer(&net, 0, 1, 500, 10_000, 1);
    admit(&net, &mut pool, tx.clone());

    let (block, _) = produce_at(&net, &pool, 110);
    let confirmed = net.chain.process_block(&block, &TransferExecutor).unwrap();
    pool.remove_confirmed(&confirmed);

    // Re-submitting the same body on the new tip must trip the tx cache.
    let mut replay = block.clone();
    replay.header.height = 2;
    replay.header.prev_hash = net.chain.tip_hash();
    replay.header.time = block.header.time + net.params.block_interval;
    let mut delegates =
        load_delegates(&net.chain.accounts, &net.chain.contracts, &net.params).unwrap();
    shuffle_delegates(2, &net.params, &mut delegates);
    let delegate = current_delegate(replay.header.time, &delegates, &net.params).clone();
    replay.reward_tx.set_producer(delegate.reg_id);
    replay.header.merkle_root = replay.build_merkle_root();
    let digest = replay.signature_hash();
    replay.header.signature = net.wallet.sign(&delegate.key_id, &digest.0, true).unwrap();

    assert!(matches!(verify(&net, &replay), Err(VerifyError::DuplicateTx(_))));
}

// ── Single-slot exclusion (I6 / P5) ──────────────────────────────────────

/// With a single delegate every slot belongs to it; a second block inside
/// the same interval must be rejected, one interval later accepted.
#[test]
fn same_delegate_cannot_fill_one_slot_twice() {
    let mut net = testnet(1, 10, 100);
    let pool = Mempool::default();

    let (block1, _) = produce_at(&net, &pool, 110);
    net.chain.process_block(&block1, &TransferExecutor).unwrap();

    // 5 seconds later: same slot interval, same delegate.
    let (early, _) = produce_at(&net, &pool, 115);
    assert!(matches!(verify(&net, &early), Err(VerifyError::SlotReuse(_))));

    // One full interval later it is fine again.
    let (late, _) = produce_at(&net, &pool, 120);
    verify(&net, &late).expect("next slot must be accepted");
}

// ── Producer thread on regtest ────────────────────────────────────────────

#[test]
fn miner_thread_produces_blocks_on_regtest() {
    let net = testnet(3, 1, unix_now());
    let params = net.params.clone();
    let chain = Arc::new(RwLock::new(net.chain));
    let wallet = Arc::new(net.wallet);
    let mempool = Arc::new(Mutex::new(Mempool::default()));
    let ring = Arc::new(MinedBlockRing::new());
    let cancel = CancelToken::new();

    let ctx = MinerContext {
        params: params.clone(),
        limits: BlockLimits::defaults(&params),
        chain: chain.clone(),
        mempool: mempool.clone(),
        wallet,
        executor: Arc::new(TransferExecutor),
        network: NetworkKind::Regtest,
        peers: Arc::new(AtomicUsize::new(0)),
        gen_block_force: false,
        cancel: cancel.clone(),
        active: Arc::new(AtomicBool::new(false)),
        ring: ring.clone(),
        metrics: None,
    };
    let handle = spawn_miner(ctx).expect("spawn");

    let deadline = Instant::now() + Duration::from_secs(30);
    while ring.len() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }
    cancel.cancel();
    handle.join().expect("join miner");

    assert!(ring.len() >= 2, "expected at least two produced blocks");
    assert!(chain.read().height() >= 2);
    let snap = ring.snapshot(10);
    // Newest first, consecutive heights.
    for pair in snap.windows(2) {
        assert_eq!(pair[0].height, pair[1].height + 1);
        assert_eq!(pair[0].prev_hash, pair[1].hash);
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
