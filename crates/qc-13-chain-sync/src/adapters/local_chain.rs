//! Reference chain state.
//!
//! A small but complete `ChainState`: finalized blocks and block-info
//! records (in memory or in the live batch-chunked directories), a toy
//! ledger effect per block, and periodic snapshots with retention. The node
//! runtime plugs its real chain state in through the same port.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::block_dir::BlockDirectory;
use super::codec::BincodeCodec;
use super::snapshot_store::SnapshotStore;
use crate::config::ChainSyncConfig;
use crate::domain::{ApplyError, ChainSnapshot, ChainSyncError, Hash, SyncBlock};
use crate::ports::{BlockCodec, ChainState};

/// Per-block metadata served alongside blocks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block index.
    pub index: u64,
    /// Block hash.
    pub hash: Hash,
    /// Previous block hash.
    pub prev_hash: Hash,
    /// Encoded block size.
    pub size: u64,
}

/// The genesis block every node starts from.
pub fn genesis_block() -> SyncBlock {
    SyncBlock::new(0, [0u8; 32], b"qc-genesis".to_vec(), Vec::new())
}

enum BlockBackend {
    Memory(BTreeMap<u64, (Vec<u8>, Vec<u8>)>),
    Disk {
        blocks: BlockDirectory,
        infos: BlockDirectory,
    },
}

impl BlockBackend {
    fn put(&mut self, index: u64, raw: &[u8], info: &[u8]) -> Result<(), ApplyError> {
        match self {
            BlockBackend::Memory(map) => {
                map.insert(index, (raw.to_vec(), info.to_vec()));
                Ok(())
            }
            BlockBackend::Disk { blocks, infos } => blocks
                .write(index, raw)
                .and_then(|_| infos.write(index, info))
                .map_err(|e| ApplyError::Retryable(e.to_string())),
        }
    }

    fn block(&self, index: u64) -> Option<Vec<u8>> {
        match self {
            BlockBackend::Memory(map) => map.get(&index).map(|(b, _)| b.clone()),
            BlockBackend::Disk { blocks, .. } => blocks.read(index).ok().flatten(),
        }
    }

    fn info(&self, index: u64) -> Option<Vec<u8>> {
        match self {
            BlockBackend::Memory(map) => map.get(&index).map(|(_, i)| i.clone()),
            BlockBackend::Disk { infos, .. } => infos.read(index).ok().flatten(),
        }
    }

    fn truncate_above(&mut self, height: u64) -> Result<(), ApplyError> {
        match self {
            BlockBackend::Memory(map) => {
                let _ = map.split_off(&(height + 1));
                Ok(())
            }
            BlockBackend::Disk { blocks, infos } => blocks
                .remove_above(height)
                .and_then(|_| infos.remove_above(height))
                .map(|_| ())
                .map_err(|e| ApplyError::Retryable(e.to_string())),
        }
    }
}

struct Inner {
    backend: BlockBackend,
    height: u64,
    last_hash: Hash,
    state: ChainSnapshot,
}

struct SnapshotPolicy {
    store: SnapshotStore,
    interval: u64,
    keep: usize,
}

/// Reference `ChainState` implementation.
pub struct LocalChainState {
    inner: RwLock<Inner>,
    snapshots: Option<SnapshotPolicy>,
    codec: BincodeCodec,
}

impl LocalChainState {
    /// Chain held entirely in memory, starting at genesis, no snapshots.
    pub fn in_memory() -> Result<Self, ChainSyncError> {
        let chain = Self {
            inner: RwLock::new(Inner {
                backend: BlockBackend::Memory(BTreeMap::new()),
                height: 0,
                last_hash: [0u8; 32],
                state: ChainSnapshot::default(),
            }),
            snapshots: None,
            codec: BincodeCodec,
        };
        chain.reload()?;
        Ok(chain)
    }

    /// Chain persisted in the live directories of `config`, snapshotting
    /// every `snapshot_interval` blocks.
    ///
    /// On reopen the node re-derives from disk: the newest snapshot at or
    /// below the stored tip is restored and blocks above it are dropped so
    /// they get applied again.
    pub fn open(config: &ChainSyncConfig) -> Result<Self, ChainSyncError> {
        let blocks = BlockDirectory::new(config.blocks_dir(), config.blocks_per_batch);
        let infos = BlockDirectory::new(config.blocks_info_dir(), config.blocks_per_batch);
        let store = SnapshotStore::new(config.snapshots_dir(), config.snapshots_trash_dir());
        let codec = BincodeCodec;

        let chain = Self {
            inner: RwLock::new(Inner {
                backend: BlockBackend::Disk { blocks, infos },
                height: 0,
                last_hash: [0u8; 32],
                state: ChainSnapshot::default(),
            }),
            snapshots: Some(SnapshotPolicy {
                store,
                interval: config.snapshot_interval,
                keep: config.snapshots_to_keep,
            }),
            codec,
        };
        chain.reload()?;
        Ok(chain)
    }

    /// Re-derive height and state from the live directories.
    pub fn reload(&self) -> Result<(), ChainSyncError> {
        let mut inner = self.inner.write();
        let tip = match &inner.backend {
            BlockBackend::Disk { blocks, .. } => blocks.highest_contiguous()?,
            BlockBackend::Memory(map) => map.keys().next_back().copied(),
        };

        let Some(tip) = tip else {
            let genesis = genesis_block();
            let raw = self.codec.encode_block(&genesis)?;
            inner.backend.put(0, &raw, &encode_info(&genesis, raw.len() as u64)?)?;
            inner.height = 0;
            inner.last_hash = genesis.hash;
            inner.state = ChainSnapshot::default();
            info!("[qc-13] Initialized chain at genesis");
            return Ok(());
        };

        let restore_point = match &self.snapshots {
            Some(policy) => policy
                .store
                .list_heights()?
                .into_iter()
                .filter(|h| *h <= tip)
                .next_back()
                .map(|h| policy.store.load(h).map(|s| (h, s)))
                .transpose()?,
            None => None,
        };
        let (mut height, mut state) = restore_point.unwrap_or((0, ChainSnapshot::default()));
        let raw = inner
            .backend
            .block(height)
            .ok_or_else(|| ChainSyncError::Checkpoint(format!("Block {} missing", height)))?;
        let mut last_hash = self.codec.decode_block(&raw)?.hash;

        // Replay what the snapshot does not cover; stop at the first block
        // that no longer links.
        for index in height + 1..=tip {
            let block = match inner.backend.block(index).map(|raw| self.codec.decode_block(&raw)) {
                Some(Ok(block)) if block.prev_hash == last_hash && block.index == index => block,
                _ => {
                    warn!("[qc-13] Stored block {} does not link, truncating", index);
                    break;
                }
            };
            Self::apply_effects(&mut state, &block);
            height = index;
            last_hash = block.hash;
        }

        inner.backend.truncate_above(height)?;
        inner.last_hash = last_hash;
        inner.height = height;
        inner.state = state;
        info!("[qc-13] Reloaded chain at height {} (stored tip {})", height, tip);
        Ok(())
    }

    fn apply_effects(state: &mut ChainSnapshot, block: &SyncBlock) {
        let producer = hex::encode(&block.signature);
        state
            .utxo_set
            .insert(format!("coinbase-{}", block.index), block.hash.to_vec());
        *state.stake_spectrum.entry(producer.clone()).or_insert(0) += 1;
        state.known_addresses.entry(producer).or_insert(block.index);
    }
}

fn encode_info(block: &SyncBlock, size: u64) -> Result<Vec<u8>, ChainSyncError> {
    Ok(bincode::serialize(&BlockInfo {
        index: block.index,
        hash: block.hash,
        prev_hash: block.prev_hash,
        size,
    })?)
}

impl ChainState for LocalChainState {
    fn current_height(&self) -> u64 {
        self.inner.read().height
    }

    fn last_block_hash(&self) -> Hash {
        self.inner.read().last_hash
    }

    fn apply_finalized_block(&self, block: &SyncBlock, raw: &[u8]) -> Result<(), ApplyError> {
        let mut inner = self.inner.write();
        if block.index != inner.height + 1 {
            return Err(ApplyError::Retryable(format!(
                "Expected block {}, got {}",
                inner.height + 1,
                block.index
            )));
        }
        if block.prev_hash != inner.last_hash {
            return Err(ApplyError::Fatal(format!(
                "Block {} does not extend the local tip",
                block.index
            )));
        }
        if !block.verify_proof_hash() {
            return Err(ApplyError::Retryable(format!(
                "Block {} has an invalid proof hash",
                block.index
            )));
        }

        let info = encode_info(block, raw.len() as u64).map_err(|e| ApplyError::Retryable(e.to_string()))?;
        inner.backend.put(block.index, raw, &info)?;
        Self::apply_effects(&mut inner.state, block);
        inner.height = block.index;
        inner.last_hash = block.hash;

        if let Some(policy) = &self.snapshots {
            let saved = policy
                .store
                .maybe_save(block.index, policy.interval, &inner.state)
                .and_then(|saved| match saved {
                    true => policy.store.enforce_retention(policy.keep).map(|_| ()),
                    false => Ok(()),
                });
            if let Err(e) = saved {
                warn!("[qc-13] Snapshot at {} failed: {}", block.index, e);
            }
        }
        debug!("[qc-13] Applied block {}", block.index);
        Ok(())
    }

    fn get_range_of_blocks(&self, start: u64, end: u64) -> Vec<Vec<u8>> {
        let inner = self.inner.read();
        (start..=end.min(inner.height))
            .map_while(|i| inner.backend.block(i))
            .collect()
    }

    fn get_range_of_block_info(&self, start: u64, end: u64) -> Vec<Vec<u8>> {
        let inner = self.inner.read();
        (start..=end.min(inner.height))
            .map_while(|i| inner.backend.info(i))
            .collect()
    }

    fn capture_state(&self) -> ChainSnapshot {
        self.inner.read().state.clone()
    }

    fn restore_state(&self, height: u64, snapshot: ChainSnapshot) -> Result<(), ApplyError> {
        let mut inner = self.inner.write();
        let raw = inner
            .backend
            .block(height)
            .ok_or_else(|| ApplyError::Retryable(format!("No block at height {}", height)))?;
        let block = self
            .codec
            .decode_block(&raw)
            .map_err(|e| ApplyError::Fatal(e.to_string()))?;
        inner.backend.truncate_above(height)?;
        inner.height = height;
        inner.last_hash = block.hash;
        inner.state = snapshot;
        Ok(())
    }
}
