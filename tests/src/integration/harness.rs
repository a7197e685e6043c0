//! Shared fixtures for the node-to-node scenarios.

use std::sync::Arc;

use qc_13_chain_sync::{
    BincodeCodec, BlockCodec, ChainState, ChainSyncConfig, ChainSyncService, CheckpointInfo,
    CheckpointState, Hash, LocalChainState, MemoryTransport, SyncBlock, SyncServer,
};
use tempfile::TempDir;

/// Blocks `from..=to` on top of `prev`, produced by `producer`.
pub fn blocks(from: u64, to: u64, mut prev: Hash, producer: u8) -> Vec<SyncBlock> {
    (from..=to)
        .map(|index| {
            let block = SyncBlock::new(index, prev, vec![producer; 8], index.to_le_bytes().to_vec());
            prev = block.hash;
            block
        })
        .collect()
}

/// A node with its own data directory.
pub struct TestNode {
    pub dir: TempDir,
    pub config: ChainSyncConfig,
    pub chain: Arc<LocalChainState>,
    pub checkpoint: Option<CheckpointState>,
}

impl TestNode {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut ChainSyncConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = ChainSyncConfig::for_testing(dir.path());
        tweak(&mut config);
        // Checkpoint state first: it hands leftover blocks back to the live dirs.
        let checkpoint = CheckpointState::open(config.clone()).unwrap();
        let chain = Arc::new(LocalChainState::open(&config).unwrap());
        Self {
            dir,
            config,
            chain,
            checkpoint: Some(checkpoint),
        }
    }

    pub fn apply(&self, blocks: &[SyncBlock]) {
        for block in blocks {
            let raw = BincodeCodec.encode_block(block).unwrap();
            self.chain.apply_finalized_block(block, &raw).unwrap();
        }
    }

    /// Extend the chain to `height` with blocks from `producer`.
    pub fn grow(&self, height: u64, producer: u8) {
        let next = self.chain.current_height() + 1;
        self.apply(&blocks(next, height, self.chain.last_block_hash(), producer));
    }

    /// Publish the live snapshots as this node's checkpoint.
    pub fn publish_checkpoint(&self) -> Option<CheckpointInfo> {
        self.checkpoint
            .as_ref()
            .and_then(|cp| cp.build_from_snapshots(false).unwrap())
    }

    pub fn server(&self) -> Arc<SyncServer<LocalChainState>> {
        Arc::new(SyncServer::new(self.chain.clone(), &self.config))
    }

    /// Hand the checkpoint state to a sync service dialing through `transport`.
    pub fn service(
        &mut self,
        transport: Arc<MemoryTransport>,
    ) -> ChainSyncService<MemoryTransport, LocalChainState> {
        let checkpoint = self.checkpoint.take().unwrap();
        ChainSyncService::new(self.config.clone(), transport, self.chain.clone(), checkpoint)
    }
}
