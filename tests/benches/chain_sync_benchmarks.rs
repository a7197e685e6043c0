//! # Chain Sync Benchmarks
//!
//! | Area | Operation |
//! |------|-----------|
//! | Consensus | Plurality vote over a status round |
//! | Envelope | Header encode/decode, request framing |
//! | Server | GetBlocks response assembly |
//! | Archive | Snapshot pack and bounded unpack |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;

use qc_13_chain_sync::adapters::{pack, unpack};
use qc_13_chain_sync::{
    decode_header, encode_header, encode_request, find_consensus, BincodeCodec, BlockCodec,
    ChainSnapshot, ChainState, ChainSyncConfig, CheckpointInfo, LocalChainState, PeerStatus,
    ResponseHeader, SnapshotStore, SyncBlock, SyncRequest, SyncServer,
};

// ============================================================================
// Consensus
// ============================================================================

fn bench_find_consensus(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-13-consensus");
    let mut rng = rand::thread_rng();

    for peers in [8usize, 64, 512] {
        let statuses: Vec<PeerStatus> = (0..peers)
            .map(|i| {
                let height = 1_000 + rng.gen_range(0..4u64);
                let mut hash = [0u8; 32];
                hash[..8].copy_from_slice(&height.to_le_bytes());
                PeerStatus::new(
                    format!("peer-{}", i),
                    height,
                    hash,
                    CheckpointInfo::new(960, [0x44; 32]),
                )
            })
            .collect();

        group.throughput(Throughput::Elements(peers as u64));
        group.bench_with_input(BenchmarkId::new("find_consensus", peers), &statuses, |b, s| {
            b.iter(|| black_box(find_consensus(s)))
        });
    }
    group.finish();
}

// ============================================================================
// Envelope
// ============================================================================

fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-13-envelope");
    let header = ResponseHeader {
        payload_len: 1 << 20,
        current_height: 123_456,
        checkpoint_height: 123_000,
        latest_block_hash: [0xAB; 32],
        checkpoint_hash: [0xCD; 32],
    };

    group.bench_function("header_roundtrip", |b| {
        b.iter(|| {
            let raw = encode_header(black_box(&header));
            black_box(decode_header(&raw).ok())
        })
    });

    let request = SyncRequest::get_blocks(10_000, 10_099, true).with_offset(4_096);
    group.bench_function("frame_request", |b| {
        b.iter(|| black_box(encode_request(black_box(&request)).ok()))
    });
    group.finish();
}

// ============================================================================
// Server
// ============================================================================

fn bench_get_blocks_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-13-server");
    group.measurement_time(Duration::from_secs(5));

    let tmp = tempfile::TempDir::new().unwrap();
    let config = ChainSyncConfig {
        max_blocks_per_request: 100,
        ..ChainSyncConfig::for_testing(tmp.path())
    };
    let chain = LocalChainState::in_memory().unwrap();
    let mut prev = chain.last_block_hash();
    for index in 1..=500u64 {
        let block = SyncBlock::new(index, prev, vec![7; 64], vec![0x5A; 256]);
        let raw = BincodeCodec.encode_block(&block).unwrap();
        chain.apply_finalized_block(&block, &raw).unwrap();
        prev = block.hash;
    }
    let server = SyncServer::new(Arc::new(chain), &config);

    for span in [10u64, 100] {
        let request = SyncRequest::get_blocks(200, 200 + span - 1, true);
        group.throughput(Throughput::Elements(span));
        group.bench_with_input(BenchmarkId::new("respond", span), &request, |b, r| {
            b.iter(|| black_box(server.respond(r).ok()))
        });
    }
    group.finish();
}

// ============================================================================
// Archive
// ============================================================================

fn bench_archive(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-13-archive");
    group.measurement_time(Duration::from_secs(5));

    let tmp = tempfile::TempDir::new().unwrap();
    let config = ChainSyncConfig::for_testing(tmp.path());
    let store = SnapshotStore::new(config.snapshots_dir(), config.snapshots_trash_dir());
    let mut snapshot = ChainSnapshot::default();
    for i in 0..2_000u64 {
        snapshot.utxo_set.insert(format!("coinbase-{}", i), vec![0x33; 48]);
        snapshot.stake_spectrum.insert(format!("addr-{}", i % 200), i);
    }
    for height in [100, 200, 300] {
        store.save(height, &snapshot).unwrap();
    }

    let packed = pack(tmp.path(), &["snapshots"]).unwrap();
    group.throughput(Throughput::Bytes(packed.len() as u64));
    group.bench_function("pack_snapshots", |b| {
        b.iter(|| black_box(pack(tmp.path(), &["snapshots"]).ok()))
    });

    let dest = tempfile::TempDir::new().unwrap();
    group.bench_function("unpack_snapshots", |b| {
        b.iter(|| black_box(unpack(&packed, dest.path(), config.max_payload_bytes).ok()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_find_consensus,
    bench_envelope,
    bench_get_blocks_response,
    bench_archive
);
criterion_main!(benches);
