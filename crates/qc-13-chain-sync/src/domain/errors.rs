//! # Domain Errors
//!
//! Error types for Chain Sync.
//!
//! Transient network failures, protocol violations and chain divergence are
//! all surfaced as `ChainSyncError`. The orchestrator converts them into a
//! `SyncStatus` and never raises them to its caller.

use std::io;
use thiserror::Error;

/// Hash type alias (32-byte SHA-256)
pub type Hash = [u8; 32];

/// Peer identifier as handed out by the transport.
pub type PeerId = String;

/// Chain sync error types.
#[derive(Debug, Error)]
pub enum ChainSyncError {
    /// Peer never became dialable within the wait window.
    #[error("Peer {0} is not dialable")]
    PeerNotDialable(PeerId),

    /// A stream open or request phase exceeded its timeout.
    #[error("Timed out during {phase}")]
    Timeout {
        /// Phase that timed out
        phase: &'static str,
    },

    /// Stream-level I/O failure (reset, abort, short read).
    #[error("Transport error: {0}")]
    Transport(io::Error),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer answered with something that breaks the protocol.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Declared payload exceeds the hard allocation cap.
    #[error("Declared payload of {declared} bytes exceeds cap of {cap} bytes")]
    PayloadTooLarge {
        /// Length declared by the responder
        declared: u64,
        /// Configured cap
        cap: u64,
    },

    /// Transfer gave up after too many successive failures.
    #[error("Transfer aborted after {attempts} successive failures: {last}")]
    RetriesExhausted {
        /// Number of failed attempts
        attempts: u32,
        /// Last failure observed
        last: String,
    },

    /// Encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Snapshot store failure.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Checkpoint state machine failure.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Block's previous hash does not match the locally held hash.
    #[error("Chain divergence at block {index}")]
    ChainDivergence {
        /// Index of the offending block
        index: u64,
    },

    /// Sampled proof-hash audit failed.
    #[error("Integrity audit failed for block {index}")]
    IntegrityAudit {
        /// Index of the corrupted block
        index: u64,
    },

    /// Chain state refused a block.
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl ChainSyncError {
    /// Whether the failure calls for a fresh consensus round and a restart of
    /// the sync session rather than a plain retry.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            ChainSyncError::ChainDivergence { .. }
                | ChainSyncError::Apply(ApplyError::Fatal(_))
                | ChainSyncError::Snapshot(SnapshotError::Restore(ApplyError::Fatal(_)))
        )
    }
}

impl From<bincode::Error> for ChainSyncError {
    fn from(e: bincode::Error) -> Self {
        ChainSyncError::Serialization(e.to_string())
    }
}

/// Errors returned by the chain-state collaborator when applying a block.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    /// Block could not be applied now; a later attempt may succeed.
    #[error("Block apply failed (retryable): {0}")]
    Retryable(String),

    /// Chain state is unusable; the node must restart.
    #[error("Block apply failed (fatal): {0}")]
    Fatal(String),
}

/// Snapshot store errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    /// No complete snapshot exists at this height.
    #[error("No snapshot at height {0}")]
    Missing(u64),

    /// A blob could not be encoded or decoded.
    #[error("Snapshot serialization error: {0}")]
    Serialization(String),

    /// The chain state refused the snapshot.
    #[error("Snapshot restore failed: {0}")]
    Restore(#[from] ApplyError),
}

impl From<bincode::Error> for SnapshotError {
    fn from(e: bincode::Error) -> Self {
        SnapshotError::Serialization(e.to_string())
    }
}
