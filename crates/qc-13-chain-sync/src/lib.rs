//! # QC-13 Chain Sync
//!
//! Chain synchronization between peers of a Quantum-Chain node.
//!
//! **Subsystem ID:** 13  
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)  
//!
//! ## Purpose
//!
//! Bring a node to the height the network has converged on, without a
//! trusted coordinator:
//! - Poll peer statuses and vote on (height, hash) and on the checkpoint
//! - Transfer block ranges and checkpoint archives over resumable streams
//! - Bootstrap from a checkpoint archive instead of replaying the chain
//! - Escalate repeated failures: cooldown, snapshot rollback, node restart
//!
//! ## Failure Ladder
//!
//! | Failure | Action |
//! |---------|--------|
//! | every | cooldown |
//! | every 3rd | roll back to an older snapshot, cycling backward |
//! | every 25th | request a node restart |
//!
//! ## Module Structure
//!
//! ```text
//! qc-13-chain-sync/
//! ├── domain/          # Entities, wire types, checkpoint state machine, errors
//! ├── algorithms/      # Consensus, response envelope, escalation ladder
//! ├── ports/           # API trait (inbound) + transport/chain/codec (outbound)
//! ├── adapters/        # Snapshot store, block dirs, archives, codec, in-memory transport
//! ├── application/     # Transfer session, pipeline, checkpoint, server, service
//! └── config.rs        # ChainSyncConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::{
    ArchiveStore, BincodeCodec, BlockDirectory, LocalChainState, MemoryTransport, SnapshotStore,
};
pub use algorithms::{
    decode_header, encode_header, encode_request, find_consensus, read_request,
    EscalationAction, EscalationPolicy,
};
pub use application::{
    BlockSyncPipeline, ChainSyncService, CheckpointState, Ingest, SyncCommand, SyncHandle,
    SyncServer, TransferResult, TransferSession,
};
pub use config::{ChainSyncConfig, ConfigError};
pub use domain::{
    ActiveCheckpoint, ApplyError, BlockBatch, BlockCheck, ChainSnapshot, ChainSyncError,
    CheckpointInfo, CheckpointPhase, Consensus, FailureCounter, Hash, PeerId, PeerStatus,
    ResponderStatus, ResponseHeader, SnapshotError, SyncBlock, SyncOutcome, SyncRequest,
    SyncStatus, TransferProgress, MAX_PAYLOAD_BYTES, RESPONSE_HEADER_SIZE, SYNC_PROTOCOL,
};
pub use ports::{BlockCodec, ChainState, ChainSyncApi, PeerTransport, SyncStream};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
