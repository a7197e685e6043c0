//! # Value Objects
//!
//! Wire messages, transfer progress and the outcome types returned upward.

use super::errors::Hash;
use super::entities::CheckpointInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request sent to a peer over the sync protocol.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncRequest {
    /// Ask for the peer's current height, latest hash and checkpoint.
    Status,
    /// Ask for an inclusive range of blocks.
    GetBlocks {
        /// First block index.
        start_index: u32,
        /// Last block index (inclusive).
        end_index: u32,
        /// Also return the raw block-info records.
        includes_block_info: bool,
        /// Resume position inside the payload.
        byte_offset: u32,
    },
    /// Ask for a checkpoint archive by content hash.
    GetCheckpoint {
        /// Content hash of the archive.
        checkpoint_hash: Hash,
        /// Resume position inside the payload.
        byte_offset: u32,
    },
}

impl SyncRequest {
    /// Create a GetBlocks request starting at offset zero. Indices past the
    /// wire range saturate at `u32::MAX`.
    pub fn get_blocks(start_index: u64, end_index: u64, includes_block_info: bool) -> Self {
        SyncRequest::GetBlocks {
            start_index: u32::try_from(start_index).unwrap_or(u32::MAX),
            end_index: u32::try_from(end_index).unwrap_or(u32::MAX),
            includes_block_info,
            byte_offset: 0,
        }
    }

    /// Create a GetCheckpoint request starting at offset zero.
    pub fn get_checkpoint(checkpoint_hash: Hash) -> Self {
        SyncRequest::GetCheckpoint {
            checkpoint_hash,
            byte_offset: 0,
        }
    }

    /// Payload offset the responder should start from.
    pub fn byte_offset(&self) -> u32 {
        match self {
            SyncRequest::Status => 0,
            SyncRequest::GetBlocks { byte_offset, .. }
            | SyncRequest::GetCheckpoint { byte_offset, .. } => *byte_offset,
        }
    }

    /// Same request, resumed at `offset`.
    pub fn with_offset(&self, offset: u32) -> Self {
        let mut resumed = self.clone();
        match &mut resumed {
            SyncRequest::Status => {}
            SyncRequest::GetBlocks { byte_offset, .. }
            | SyncRequest::GetCheckpoint { byte_offset, .. } => *byte_offset = offset,
        }
        resumed
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncRequest::Status => "getStatus",
            SyncRequest::GetBlocks { .. } => "getBlocks",
            SyncRequest::GetCheckpoint { .. } => "getCheckpoint",
        }
    }
}

/// Decoded fixed-size response header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Full payload length, independent of the requested offset.
    pub payload_len: u32,
    /// Responder's current height.
    pub current_height: u32,
    /// Responder's checkpoint height.
    pub checkpoint_height: u32,
    /// Responder's latest block hash.
    pub latest_block_hash: Hash,
    /// Responder's checkpoint hash.
    pub checkpoint_hash: Hash,
}

/// Responder status carried by every response header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponderStatus {
    /// Responder's current height.
    pub current_height: u64,
    /// Responder's latest block hash.
    pub latest_block_hash: Hash,
    /// Responder's checkpoint.
    pub checkpoint: CheckpointInfo,
}

impl From<&ResponseHeader> for ResponderStatus {
    fn from(header: &ResponseHeader) -> Self {
        Self {
            current_height: header.current_height as u64,
            latest_block_hash: header.latest_block_hash,
            checkpoint: CheckpointInfo::new(
                header.checkpoint_height as u64,
                header.checkpoint_hash,
            ),
        }
    }
}

/// Progress of one payload transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes copied into the buffer so far.
    pub acquired_bytes: u64,
    /// Bytes declared by the responder.
    pub expected_bytes: u64,
    /// Reads that delivered payload bytes.
    pub chunk_count: u64,
}

impl TransferProgress {
    /// Transfer is complete once every declared byte is in.
    pub fn is_complete(&self) -> bool {
        self.acquired_bytes == self.expected_bytes
    }
}

/// Failure tallies driving the escalation ladder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FailureCounter {
    /// Failures since the last success.
    pub successive_failures: u64,
    /// Failures since the counter was created.
    pub total_failures: u64,
}

impl FailureCounter {
    /// Record a failure.
    pub fn record_failure(&mut self) {
        self.successive_failures += 1;
        self.total_failures += 1;
    }

    /// Record a success; cumulative failures are kept.
    pub fn record_success(&mut self) {
        self.successive_failures = 0;
    }
}

/// Outcome of one BlockSyncPipeline run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A checkpoint archive was fetched, filled and deployed.
    CheckpointDeployed,
    /// Blocks were applied up to this height.
    Synced(u64),
    /// The run failed; the reason is for logs.
    Failed(String),
    /// Chain divergence or a fatal apply error; restart the sync round.
    Restart,
}

/// Human-readable result of `sync_with_peers`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    /// Local height already matches consensus.
    AlreadySynced,
    /// Progress was made; poll statuses again.
    VerifyingConsensus,
    /// Checkpoint deployed.
    CheckpointDownloaded,
    /// No dialable peer answered.
    NoPeers,
    /// Peers answered but nothing usable was reported.
    NoConsensus,
    /// Nobody gave progress; cooled down.
    Failed,
    /// Nobody gave progress; rolled back to this snapshot height.
    RolledBack(u64),
    /// Escalation reached the last resort.
    RestartRequested,
    /// Another round is already running.
    AlreadySyncing,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::AlreadySynced => write!(f, "Already at the consensus height"),
            SyncStatus::VerifyingConsensus => write!(f, "Verifying consensus"),
            SyncStatus::CheckpointDownloaded => write!(f, "Checkpoint downloaded"),
            SyncStatus::NoPeers => write!(f, "No peers available"),
            SyncStatus::NoConsensus => write!(f, "No consensus found"),
            SyncStatus::Failed => write!(f, "Sync failed, will retry"),
            SyncStatus::RolledBack(h) => write!(f, "Rolled back to snapshot {}", h),
            SyncStatus::RestartRequested => write!(f, "Node restart requested"),
            SyncStatus::AlreadySyncing => write!(f, "Sync already in progress"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_with_offset() {
        let req = SyncRequest::get_blocks(1, 100, true).with_offset(4096);
        assert_eq!(req.byte_offset(), 4096);
        assert_eq!(SyncRequest::Status.with_offset(10).byte_offset(), 0);
    }

    #[test]
    fn test_get_blocks_saturates_past_wire_range() {
        let beyond = u32::MAX as u64 + 7;
        match SyncRequest::get_blocks(beyond - 1, beyond, false) {
            SyncRequest::GetBlocks {
                start_index,
                end_index,
                ..
            } => {
                assert_eq!(start_index, u32::MAX);
                assert_eq!(end_index, u32::MAX);
            }
            other => panic!("unexpected {:?}", other),
        }
        match SyncRequest::get_blocks(5, 9, false) {
            SyncRequest::GetBlocks {
                start_index,
                end_index,
                ..
            } => assert_eq!((start_index, end_index), (5, 9)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_failure_counter_success_keeps_total() {
        let mut counter = FailureCounter::default();
        counter.record_failure();
        counter.record_failure();
        counter.record_success();
        assert_eq!(counter.successive_failures, 0);
        assert_eq!(counter.total_failures, 2);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(
            SyncStatus::AlreadySynced.to_string(),
            "Already at the consensus height"
        );
        assert_eq!(SyncStatus::CheckpointDownloaded.to_string(), "Checkpoint downloaded");
        assert_eq!(SyncStatus::VerifyingConsensus.to_string(), "Verifying consensus");
    }
}
