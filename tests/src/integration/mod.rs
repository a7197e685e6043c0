//! # Chain Sync Integration Scenarios
//!
//! Full nodes (disk-backed chain state, checkpoint state, sync service)
//! talking to serving peers over the in-process transport.

#[cfg(test)]
mod harness;

pub mod block_sync;
pub mod checkpoint_bootstrap;
pub mod failure_ladder;
pub mod resumable_transfer;
