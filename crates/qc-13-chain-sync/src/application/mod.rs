//! # Application Module
//!
//! Stateful services built on the domain, algorithms and ports.

pub mod checkpoint;
pub mod pipeline;
pub mod server;
pub mod service;
pub mod transfer;

pub use checkpoint::{CheckpointState, Ingest};
pub use pipeline::BlockSyncPipeline;
pub use server::SyncServer;
pub use service::{ChainSyncService, SyncCommand, SyncHandle};
pub use transfer::{TransferResult, TransferSession};
