//! # Inbound Ports
//!
//! API trait exposed to the node runtime.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::{PeerId, SyncStatus};

/// Chain Sync API - inbound port.
#[async_trait]
pub trait ChainSyncApi: Send + Sync {
    /// Run one sync round against the currently dialable peers.
    ///
    /// Never fails; the outcome is a short human-readable status.
    async fn sync_with_peers(&mut self) -> SyncStatus;

    /// Whether a sync round is in progress.
    fn is_syncing(&self) -> bool;

    /// Heights reported by peers in the last status round.
    fn peers_heights(&self) -> HashMap<PeerId, u64>;
}
