//! # Checkpoint State
//!
//! On-disk side of checkpoint bootstrapping. `ActiveCheckpoint` decides which
//! transitions are legal; this type owns the checkpoint working directory and
//! is the only writer there.
//!
//! ```text
//! <data_dir>/checkpoint/snapshots/<height>/...
//! <data_dir>/checkpoint/blocks/<batch>/<index>.bin
//! <data_dir>/checkpoint/blocks-info/<batch>/<index>.bin
//! ```
//!
//! Deploy swaps these three directories with the live ones.

use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::adapters::{
    pack, snapshot_content_hash, unpack, ArchiveStore, BincodeCodec, BlockDirectory,
};
use crate::adapters::block_dir::remove_dir_if_exists;
use crate::adapters::snapshot_store::list_snapshot_heights;
use crate::config::ChainSyncConfig;
use crate::domain::{
    ActiveCheckpoint, BlockCheck, ChainSyncError, CheckpointInfo, CheckpointPhase, Hash, SyncBlock,
};
use crate::ports::BlockCodec;

const BLOCKS: &str = "blocks";
const BLOCKS_INFO: &str = "blocks-info";
const SNAPSHOTS: &str = "snapshots";

/// Result of offering one block to a filling checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ingest {
    /// Block stored; more are needed.
    Accepted,
    /// Block stored and the checkpoint reached its last snapshot.
    Ready,
    /// Wrong index; nothing was written.
    OutOfOrder {
        /// Index the checkpoint is waiting for.
        expected: u64,
    },
}

/// Checkpoint working directory plus its state machine.
pub struct CheckpointState {
    config: ChainSyncConfig,
    active: ActiveCheckpoint,
    root: PathBuf,
    blocks: BlockDirectory,
    infos: BlockDirectory,
    live_blocks: BlockDirectory,
    live_infos: BlockDirectory,
    archives: ArchiveStore,
    codec: BincodeCodec,
}

impl CheckpointState {
    /// Open the checkpoint directory under `config.data_dir`.
    ///
    /// A checkpoint left behind by a previous process is abandoned: its
    /// blocks go back to the live directories and the rest is removed.
    /// Open this before the chain state so it sees the returned blocks.
    pub fn open(config: ChainSyncConfig) -> Result<Self, ChainSyncError> {
        let root = config.checkpoint_dir();
        let per_batch = config.blocks_per_batch;
        let mut state = Self {
            blocks: BlockDirectory::new(root.join(BLOCKS), per_batch),
            infos: BlockDirectory::new(root.join(BLOCKS_INFO), per_batch),
            live_blocks: BlockDirectory::new(config.blocks_dir(), per_batch),
            live_infos: BlockDirectory::new(config.blocks_info_dir(), per_batch),
            archives: ArchiveStore::new(config.archive_dir()),
            codec: BincodeCodec,
            active: ActiveCheckpoint::new(),
            root,
            config,
        };
        if state.root.exists() {
            warn!("[qc-13] Abandoning checkpoint left by a previous run");
            state.reset()?;
        }
        Ok(state)
    }

    /// State machine view.
    pub fn active(&self) -> &ActiveCheckpoint {
        &self.active
    }

    /// Checkpoint working directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unpack a fetched archive, verify it against the consensus checkpoint
    /// and measure what it already holds.
    pub fn install_archive(
        &mut self,
        expected: CheckpointInfo,
        bytes: &[u8],
    ) -> Result<CheckpointPhase, ChainSyncError> {
        if !self.active.is_unset() {
            return Err(ChainSyncError::Checkpoint(format!(
                "Cannot install an archive while {:?}",
                self.active.phase()
            )));
        }
        remove_dir_if_exists(&self.root)?;
        let files = unpack(bytes, &self.root, self.config.max_payload_bytes)?;

        let actual = snapshot_content_hash(&self.root.join(SNAPSHOTS))?;
        if actual != Some(expected) {
            remove_dir_if_exists(&self.root)?;
            return Err(ChainSyncError::ProtocolViolation(format!(
                "Archive content does not match checkpoint {} {}",
                expected.height,
                hex::encode(expected.hash)
            )));
        }
        debug!("[qc-13] Unpacked checkpoint archive ({} files)", files);

        self.active.begin(expected)?;
        self.initialize()?;
        Ok(self.active.phase())
    }

    /// Initializing → Filling / ReadyToDeploy.
    fn initialize(&mut self) -> Result<(), ChainSyncError> {
        let last = list_snapshot_heights(&self.root.join(SNAPSHOTS))?
            .last()
            .copied()
            .ok_or_else(|| ChainSyncError::Checkpoint("Archive holds no snapshot".into()))?;

        self.migrate_live_blocks(last)?;
        self.blocks.remove_above(last)?;
        self.infos.remove_above(last)?;

        let height = self.blocks.highest_contiguous()?;
        let stored_hash = match height {
            Some(h) => Some(self.stored_block_hash(h)?),
            None => None,
        };
        self.active.measured(last, height, stored_hash)?;
        info!(
            "[qc-13] Checkpoint {} initialized: blocks up to {:?}, last snapshot {}",
            self.active.info().map_or(0, |i| i.height),
            height,
            last
        );
        Ok(())
    }

    /// Move blocks the node already has into the checkpoint and drop live
    /// blocks past the checkpoint's last snapshot.
    fn migrate_live_blocks(&self, last: u64) -> Result<(), ChainSyncError> {
        let moved = self.live_blocks.move_range_into(&self.blocks, 0, last)?;
        self.live_infos.move_range_into(&self.infos, 0, last)?;
        let dropped = self.live_blocks.remove_above(last)?;
        self.live_infos.remove_above(last)?;
        if moved + dropped > 0 {
            debug!(
                "[qc-13] Migrated {} live blocks into the checkpoint, dropped {}",
                moved, dropped
            );
        }
        Ok(())
    }

    fn stored_block_hash(&self, index: u64) -> Result<Hash, ChainSyncError> {
        let raw = self
            .blocks
            .read(index)?
            .ok_or_else(|| ChainSyncError::Checkpoint(format!("Block {} missing", index)))?;
        Ok(self.codec.decode_block(&raw)?.hash)
    }

    /// Offer the next block while filling.
    ///
    /// A block whose previous hash disagrees with the stored one erases its
    /// on-disk batch and fails with `ChainDivergence`.
    pub fn ingest_block(
        &mut self,
        block: &SyncBlock,
        raw_block: &[u8],
        raw_info: &[u8],
    ) -> Result<Ingest, ChainSyncError> {
        match self.active.check(block)? {
            BlockCheck::OutOfOrder { expected } => Ok(Ingest::OutOfOrder { expected }),
            BlockCheck::Diverged => {
                self.blocks.erase_batch(block.index)?;
                self.infos.erase_batch(block.index)?;
                let height = self.blocks.highest_contiguous()?;
                let stored_hash = match height {
                    Some(h) => Some(self.stored_block_hash(h)?),
                    None => None,
                };
                self.active.rewind(height, stored_hash)?;
                warn!(
                    "[qc-13] Checkpoint block {} diverges, erased batch from {}",
                    block.index,
                    self.blocks.batch_start(block.index)
                );
                Err(ChainSyncError::ChainDivergence { index: block.index })
            }
            BlockCheck::Accept => {
                if self.audit_due() && !block.verify_proof_hash() {
                    return Err(ChainSyncError::IntegrityAudit { index: block.index });
                }
                self.blocks.write(block.index, raw_block)?;
                self.infos.write(block.index, raw_info)?;
                self.active.advance(block.index, block.hash)?;
                Ok(match self.active.is_ready() {
                    true => Ingest::Ready,
                    false => Ingest::Accepted,
                })
            }
        }
    }

    fn audit_due(&self) -> bool {
        rand::thread_rng().gen_range(0..self.config.audit_one_in.max(1)) == 0
    }

    /// Pack the checkpoint and publish it for other peers.
    pub fn persist_archive(&self, include_blocks: bool) -> Result<CheckpointInfo, ChainSyncError> {
        publish(&self.root, &self.archives, include_blocks)?
            .ok_or_else(|| ChainSyncError::Checkpoint("Checkpoint holds no snapshot".into()))
    }

    /// Publish an archive built straight from the live snapshots, so a
    /// synced node can serve checkpoints. `None` when there is no snapshot.
    pub fn build_from_snapshots(
        &self,
        include_blocks: bool,
    ) -> Result<Option<CheckpointInfo>, ChainSyncError> {
        if !self.active.is_unset() {
            return Err(ChainSyncError::Checkpoint(
                "Cannot publish while a checkpoint is active".into(),
            ));
        }
        publish(&self.config.data_dir, &self.archives, include_blocks)
    }

    /// Swap the checkpoint directories in for the live ones and return to
    /// Unset. Returns the height of the deployed last snapshot.
    pub fn deploy(&mut self, publish_archive: bool) -> Result<u64, ChainSyncError> {
        if !self.active.is_ready() {
            return Err(ChainSyncError::Checkpoint(format!(
                "Cannot deploy while {:?}",
                self.active.phase()
            )));
        }
        let height = self
            .active
            .last_snapshot_height()
            .ok_or_else(|| ChainSyncError::Checkpoint("Ready without a snapshot height".into()))?;

        if publish_archive {
            self.persist_archive(true)?;
        }

        for (sub, live) in [
            (BLOCKS, self.config.blocks_dir()),
            (BLOCKS_INFO, self.config.blocks_info_dir()),
            (SNAPSHOTS, self.config.snapshots_dir()),
        ] {
            swap_in(&self.root.join(sub), &live)?;
        }
        remove_dir_if_exists(&self.root)?;
        self.active.reset();
        info!("[qc-13] Checkpoint deployed at snapshot height {}", height);
        Ok(height)
    }

    /// Abandon the checkpoint: its blocks go back to the live directories.
    pub fn reset(&mut self) -> Result<(), ChainSyncError> {
        self.blocks.move_range_into(&self.live_blocks, 0, u64::MAX)?;
        self.infos.move_range_into(&self.live_infos, 0, u64::MAX)?;
        remove_dir_if_exists(&self.root)?;
        self.active.reset();
        Ok(())
    }
}

/// Pack `base`'s snapshots (and blocks) under their content hash, unless
/// that archive is already the published one.
fn publish(
    base: &Path,
    archives: &ArchiveStore,
    include_blocks: bool,
) -> Result<Option<CheckpointInfo>, ChainSyncError> {
    let Some(info) = snapshot_content_hash(&base.join(SNAPSHOTS))? else {
        return Ok(None);
    };
    if matches!(archives.current()?, Some((current, _)) if current == info) {
        return Ok(Some(info));
    }
    let subdirs: &[&str] = match include_blocks {
        true => &[SNAPSHOTS, BLOCKS, BLOCKS_INFO],
        false => &[SNAPSHOTS],
    };
    let bytes = pack(base, subdirs)?;
    archives.persist(&info, &bytes)?;
    Ok(Some(info))
}

/// Replace `live` with `staged`, keeping the old directory until the new one
/// is in place.
fn swap_in(staged: &Path, live: &Path) -> Result<(), ChainSyncError> {
    let retired = live.with_extension("old");
    remove_dir_if_exists(&retired)?;
    if live.exists() {
        fs::rename(live, &retired)?;
    }
    if staged.exists() {
        fs::rename(staged, live)?;
    } else {
        fs::create_dir_all(live)?;
    }
    remove_dir_if_exists(&retired)?;
    Ok(())
}
