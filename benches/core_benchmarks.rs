//! Criterion benchmarks for VELD core operations.
//!
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use veld::chain::Chain;
use veld::consensus::assembler::{create_new_block, BlockLimits};
use veld::consensus::delegates::shuffle_delegates;
use veld::crypto::{PublicKeyBytes, SignatureBytes};
use veld::execution::{ExecError, TxExecutor, TxOutcome};
use veld::mempool::MempoolEntry;
use veld::merkle::merkle_root;
use veld::params::ChainParams;
use veld::state::{AccountScratch, ContractScratch, TxCache};
use veld::types::{hash_bytes, Account, Hash32, Height, KeyId, RegId, Tx};

// ── Helpers ──────────────────────────────────────────────────────────────

fn delegate_set(n: usize) -> Vec<Account> {
    (0..n)
        .map(|i| {
            let mut a = Account::new(
                RegId::new(i as u32 + 1, 0),
                PublicKeyBytes(vec![i as u8; 32]),
            );
            a.received_votes = 1_000 + i as u64;
            a
        })
        .collect()
}

fn mempool_entries(n: usize) -> Vec<MempoolEntry> {
    (0..n)
        .map(|i| {
            let tx = Tx {
                txuid: RegId::new(i as u32 + 10, 0),
                to: KeyId([i as u8; 20]),
                value: 0,
                fee: 10_000 + i as u64,
                valid_height: 1_000,
                payload: vec![0; 64],
                fuel_rate: 0,
                pubkey: PublicKeyBytes(vec![i as u8; 32]),
                signature: SignatureBytes(vec![0; 64]),
            };
            MempoolEntry { tx, arrival_height: 0, run_step: 100 }
        })
        .collect()
}

struct NoopExecutor;

impl TxExecutor for NoopExecutor {
    fn execute_tx(
        &self,
        _tx: &Tx,
        _index: u32,
        _height: Height,
        _tx_cache: &TxCache,
        _view: &mut AccountScratch<'_>,
        _contracts: &mut ContractScratch<'_>,
    ) -> Result<TxOutcome, ExecError> {
        Ok(TxOutcome { run_step: 100 })
    }
}

// ── Shuffle ──────────────────────────────────────────────────────────────

fn bench_shuffle(c: &mut Criterion) {
    let mut group = c.benchmark_group("shuffle");
    for n in [11usize, 21, 101] {
        let params = ChainParams { total_delegates: n, ..ChainParams::default() };
        let base = delegate_set(n);
        group.bench_with_input(BenchmarkId::new("delegates", n), &n, |b, _| {
            b.iter(|| {
                let mut list = base.clone();
                shuffle_delegates(black_box(1_000_003), &params, &mut list);
                list
            })
        });
    }
    group.finish();
}

// ── Merkle ───────────────────────────────────────────────────────────────

fn bench_merkle(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle");
    for n in [16usize, 256, 1024] {
        let leaves: Vec<Hash32> = (0..n).map(|i| hash_bytes(&(i as u64).to_le_bytes())).collect();
        group.bench_with_input(BenchmarkId::new("body", n), &n, |b, _| {
            b.iter(|| merkle_root(black_box(&leaves)))
        });
    }
    group.finish();
}

// ── Assembly ─────────────────────────────────────────────────────────────

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembly");
    let params = ChainParams { total_delegates: 11, ..ChainParams::default() };
    let chain = Chain::with_genesis(params.clone(), &delegate_set(11), 100);
    let limits = BlockLimits::defaults(&params);

    for n in [100usize, 1_000] {
        let snapshot = mempool_entries(n);
        group.bench_with_input(BenchmarkId::new("mempool", n), &n, |b, _| {
            b.iter(|| {
                let mut accounts = chain.accounts.clone();
                let mut contracts = chain.contracts.clone();
                create_new_block(
                    &chain,
                    &mut accounts,
                    &mut contracts,
                    &chain.tx_cache,
                    black_box(&snapshot),
                    &NoopExecutor,
                    &params,
                    &limits,
                    200,
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_shuffle, bench_merkle, bench_assembly);
criterion_main!(benches);
