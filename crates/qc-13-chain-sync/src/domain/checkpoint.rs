//! # Active Checkpoint
//!
//! Pure state machine behind checkpoint bootstrapping. The on-disk side lives
//! in `application::checkpoint`; this type only decides which transitions are
//! legal.
//!
//! ```text
//! Unset ──begin──→ Initializing ──measured──→ Filling(h) ──advance──→ ReadyToDeploy
//!   ↑                                                                     │
//!   └──────────────────────────────── reset ─────────────────────────────┘
//! ```

use super::entities::{CheckpointInfo, SyncBlock};
use super::errors::{ChainSyncError, Hash};

/// Phase of the active checkpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckpointPhase {
    /// No checkpoint in progress.
    #[default]
    Unset,
    /// Archive unpacked, contents not yet measured.
    Initializing,
    /// Ingesting blocks. `None` means no block is present yet and filling
    /// starts at index 0.
    Filling {
        /// Highest contiguous block held.
        height: Option<u64>,
    },
    /// Every block up to the last snapshot is present.
    ReadyToDeploy,
}

/// What to do with the next block offered to the checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockCheck {
    /// Index and previous hash line up.
    Accept,
    /// Index is not `height + 1`; nothing is written.
    OutOfOrder {
        /// Index the checkpoint is waiting for.
        expected: u64,
    },
    /// Index is right but the previous hash disagrees with ours.
    Diverged,
}

/// Checkpoint bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveCheckpoint {
    phase: CheckpointPhase,
    info: Option<CheckpointInfo>,
    last_snapshot_height: Option<u64>,
    stored_hash: Option<Hash>,
}

impl ActiveCheckpoint {
    /// A fresh, unset checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> CheckpointPhase {
        self.phase
    }

    /// Checkpoint being built, if any.
    pub fn info(&self) -> Option<CheckpointInfo> {
        self.info
    }

    /// Highest snapshot height embedded in the archive.
    pub fn last_snapshot_height(&self) -> Option<u64> {
        self.last_snapshot_height
    }

    /// Hash of the highest ingested block.
    pub fn stored_hash(&self) -> Option<Hash> {
        self.stored_hash
    }

    /// Whether nothing is in progress.
    pub fn is_unset(&self) -> bool {
        self.phase == CheckpointPhase::Unset
    }

    /// Whether blocks are being ingested.
    pub fn is_filling(&self) -> bool {
        matches!(self.phase, CheckpointPhase::Filling { .. })
    }

    /// Whether the checkpoint can be deployed.
    pub fn is_ready(&self) -> bool {
        self.phase == CheckpointPhase::ReadyToDeploy
    }

    /// Highest contiguous block held, if measured.
    pub fn height(&self) -> Option<u64> {
        match self.phase {
            CheckpointPhase::Filling { height } => height,
            CheckpointPhase::ReadyToDeploy => self.last_snapshot_height,
            _ => None,
        }
    }

    /// Index the checkpoint expects next while filling.
    pub fn next_index(&self) -> Option<u64> {
        match self.phase {
            CheckpointPhase::Filling { height } => Some(height.map_or(0, |h| h + 1)),
            _ => None,
        }
    }

    /// Unset → Initializing.
    pub fn begin(&mut self, info: CheckpointInfo) -> Result<(), ChainSyncError> {
        if self.phase != CheckpointPhase::Unset {
            return Err(invalid_transition(self.phase, "begin"));
        }
        self.phase = CheckpointPhase::Initializing;
        self.info = Some(info);
        Ok(())
    }

    /// Initializing → Filling, or straight to ReadyToDeploy when the archive
    /// already holds every block up to its last snapshot.
    pub fn measured(
        &mut self,
        last_snapshot_height: u64,
        height: Option<u64>,
        stored_hash: Option<Hash>,
    ) -> Result<(), ChainSyncError> {
        if self.phase != CheckpointPhase::Initializing {
            return Err(invalid_transition(self.phase, "measured"));
        }
        if let Some(h) = height {
            if h > last_snapshot_height {
                return Err(ChainSyncError::Checkpoint(format!(
                    "Block height {} beyond last snapshot {}",
                    h, last_snapshot_height
                )));
            }
        }
        self.last_snapshot_height = Some(last_snapshot_height);
        self.stored_hash = stored_hash;
        self.phase = if height == Some(last_snapshot_height) {
            CheckpointPhase::ReadyToDeploy
        } else {
            CheckpointPhase::Filling { height }
        };
        Ok(())
    }

    /// Classify the next block offered while filling.
    pub fn check(&self, block: &SyncBlock) -> Result<BlockCheck, ChainSyncError> {
        let expected = self
            .next_index()
            .ok_or_else(|| invalid_transition(self.phase, "check"))?;
        if block.index != expected {
            return Ok(BlockCheck::OutOfOrder { expected });
        }
        match self.stored_hash {
            Some(hash) if hash != block.prev_hash => Ok(BlockCheck::Diverged),
            _ => Ok(BlockCheck::Accept),
        }
    }

    /// Record an accepted block; reaching the last snapshot height makes the
    /// checkpoint deployable.
    pub fn advance(&mut self, index: u64, hash: Hash) -> Result<(), ChainSyncError> {
        if self.next_index() != Some(index) {
            return Err(invalid_transition(self.phase, "advance"));
        }
        self.stored_hash = Some(hash);
        self.phase = if Some(index) == self.last_snapshot_height {
            CheckpointPhase::ReadyToDeploy
        } else {
            CheckpointPhase::Filling {
                height: Some(index),
            }
        };
        Ok(())
    }

    /// Step back after an on-disk batch was erased.
    pub fn rewind(&mut self, height: Option<u64>, stored_hash: Option<Hash>) -> Result<(), ChainSyncError> {
        if !self.is_filling() {
            return Err(invalid_transition(self.phase, "rewind"));
        }
        self.phase = CheckpointPhase::Filling { height };
        self.stored_hash = stored_hash;
        Ok(())
    }

    /// Back to Unset (after deploy or an explicit reset).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn invalid_transition(phase: CheckpointPhase, op: &str) -> ChainSyncError {
    ChainSyncError::Checkpoint(format!("Invalid transition '{}' from {:?}", op, phase))
}
