//! # Chain Sync Simulator
//!
//! Wires a seeded node and a fresh node together over the in-process
//! transport and lets the fresh node sync, through a checkpoint archive when
//! the gap is large enough.
//!
//! ```text
//! QC_SYNC_DATA_DIR=/tmp/qc-sim QC_SYNC_SIM_BLOCKS=1500 cargo run --bin qc-sync-sim
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use qc_13_chain_sync::{
    adapters::genesis_block, BincodeCodec, BlockCodec, ChainState, ChainSyncConfig,
    ChainSyncService, CheckpointState, LocalChainState, MemoryTransport, SyncBlock, SyncCommand,
    SyncServer,
};

const DEFAULT_BLOCKS: u64 = 1_500;
const SEED_PEER: &str = "seed";

/// Extend `chain` with deterministic blocks up to `target`.
fn grow_chain(chain: &LocalChainState, target: u64) -> Result<()> {
    let mut prev = chain.last_block_hash();
    for index in chain.current_height() + 1..=target {
        let producer = vec![(index % 7) as u8; 4];
        let block = SyncBlock::new(index, prev, producer, index.to_le_bytes().to_vec());
        let raw = BincodeCodec.encode_block(&block)?;
        chain
            .apply_finalized_block(&block, &raw)
            .with_context(|| format!("applying seed block {}", index))?;
        prev = block.hash;
    }
    Ok(())
}

fn node_config(base: &ChainSyncConfig, name: &str) -> ChainSyncConfig {
    ChainSyncConfig {
        data_dir: base.data_dir.join(name),
        ..base.clone()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let base = ChainSyncConfig::from_env();
    base.validate()?;
    let blocks = match std::env::var("QC_SYNC_SIM_BLOCKS") {
        Ok(value) => value.parse().context("QC_SYNC_SIM_BLOCKS must be an integer")?,
        Err(_) => DEFAULT_BLOCKS,
    };

    // Seed node: a grown chain serving blocks and a published checkpoint.
    let seed_config = node_config(&base, "seed");
    let seed_checkpoint = CheckpointState::open(seed_config.clone())?;
    let seed_chain = Arc::new(LocalChainState::open(&seed_config)?);
    grow_chain(&seed_chain, blocks)?;
    if let Some(info) = seed_checkpoint.build_from_snapshots(false)? {
        info!("Seed publishes checkpoint at height {}", info.height);
    }
    info!(
        "Seed node at height {} (genesis {})",
        seed_chain.current_height(),
        hex::encode(&genesis_block().hash[..8])
    );

    // Fresh node syncing from the seed.
    let fresh_config = node_config(&base, "fresh");
    let checkpoint = CheckpointState::open(fresh_config.clone())?;
    let fresh_chain = Arc::new(LocalChainState::open(&fresh_config)?);
    let transport = Arc::new(MemoryTransport::new());
    transport.register(
        SEED_PEER,
        Arc::new(SyncServer::new(seed_chain.clone(), &seed_config)),
    );

    let service = ChainSyncService::new(fresh_config, transport, fresh_chain.clone(), checkpoint);
    let handle = service.handle();
    let mut restart = service.subscribe_restart();
    let (commands, command_rx) = tokio::sync::mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(service.run(command_rx, shutdown_rx));
    commands
        .send(SyncCommand::PeerConnected(SEED_PEER.to_string()))
        .await?;

    info!("Syncing. Press Ctrl+C to stop.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = restart.changed() => {
                warn!("Sync requested a node restart");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let height = fresh_chain.current_height();
                info!("Fresh node at {} / {} (syncing: {})", height, blocks, handle.is_syncing());
                if height >= seed_chain.current_height() {
                    info!("Fresh node caught up");
                    break;
                }
            }
        }
    }

    // Graceful shutdown
    let _ = shutdown_tx.send(true);
    task.await?;
    Ok(())
}
