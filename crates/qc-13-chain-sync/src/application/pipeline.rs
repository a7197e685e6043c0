//! # Block Sync Pipeline
//!
//! Drives sequential range requests against one peer and feeds the blocks
//! either to the filling checkpoint or straight to the chain state.
//!
//! The request for range N+1 is in flight while range N is being applied;
//! blocks themselves are always applied in ascending order.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::checkpoint::{CheckpointState, Ingest};
use super::transfer::{TransferResult, TransferSession};
use crate::adapters::{BincodeCodec, SnapshotStore};
use crate::config::ChainSyncConfig;
use crate::domain::{
    ApplyError, BlockBatch, ChainSyncError, CheckpointInfo, SyncOutcome, SyncRequest,
};
use crate::ports::{BlockCodec, ChainState, PeerTransport};

type FetchResult = Result<TransferResult, ChainSyncError>;

/// A spawned range request, aborted if dropped before completion.
struct InFlight {
    start: u64,
    end: u64,
    handle: JoinHandle<FetchResult>,
}

impl InFlight {
    async fn finish(mut self) -> FetchResult {
        let joined = (&mut self.handle).await;
        joined.map_err(|e| ChainSyncError::Checkpoint(format!("Fetch task failed: {}", e)))?
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// What applying one batch amounted to.
enum BatchResult {
    Continue,
    Exhausted,
    Stop(SyncOutcome),
}

/// Fetches block ranges and checkpoint archives from a peer.
pub struct BlockSyncPipeline<T: PeerTransport + 'static, C: ChainState + 'static> {
    session: TransferSession<T>,
    chain: Arc<C>,
    checkpoint: CheckpointState,
    snapshots: SnapshotStore,
    codec: BincodeCodec,
    config: ChainSyncConfig,
}

impl<T: PeerTransport + 'static, C: ChainState + 'static> BlockSyncPipeline<T, C> {
    /// Create a pipeline over `session`, applying into `chain`.
    pub fn new(
        session: TransferSession<T>,
        chain: Arc<C>,
        checkpoint: CheckpointState,
        config: ChainSyncConfig,
    ) -> Self {
        Self {
            session,
            chain,
            checkpoint,
            snapshots: SnapshotStore::new(config.snapshots_dir(), config.snapshots_trash_dir()),
            codec: BincodeCodec,
            config,
        }
    }

    /// Checkpoint state owned by the pipeline.
    pub fn checkpoint(&self) -> &CheckpointState {
        &self.checkpoint
    }

    /// Mutable checkpoint state.
    pub fn checkpoint_mut(&mut self) -> &mut CheckpointState {
        &mut self.checkpoint
    }

    /// Whether an archive fetch is worth it from `local_height`.
    pub fn wants_checkpoint(&self, local_height: u64, checkpoint: Option<CheckpointInfo>) -> bool {
        self.checkpoint.active().is_unset()
            && checkpoint.map_or(false, |cp| {
                !cp.is_empty() && cp.height > local_height + self.config.min_checkpoint_gap
            })
    }

    /// Sync from `peer` up to `to_height`.
    pub async fn sync_blocks(
        &mut self,
        peer: &str,
        to_height: u64,
        checkpoint: Option<CheckpointInfo>,
    ) -> SyncOutcome {
        let local_height = self.chain.current_height();
        if let Some(cp) = checkpoint.filter(|_| self.wants_checkpoint(local_height, checkpoint)) {
            if let Err(e) = self.fetch_checkpoint(peer, cp).await {
                warn!(
                    "[qc-13] Checkpoint {} from {} unusable, falling back to blocks: {}",
                    cp.height, peer, e
                );
                if let Err(e) = self.checkpoint.reset() {
                    return SyncOutcome::Failed(e.to_string());
                }
            }
        }

        if self.checkpoint.active().is_ready() {
            return self.deploy_checkpoint();
        }

        let (start, end) = match self.checkpoint.active().next_index() {
            Some(next) => {
                let last = self.checkpoint.active().last_snapshot_height().unwrap_or(next);
                (next, last)
            }
            None => (local_height + 1, to_height),
        };
        if start > end {
            return SyncOutcome::Synced(local_height);
        }

        let filled_before = self.checkpoint.active().height();
        match self.fetch_and_apply(peer, start, end).await {
            Some(outcome) => outcome,
            None if self.checkpoint.active().is_ready() => self.deploy_checkpoint(),
            None => {
                // Progress is either live height or checkpoint fill height.
                let height = self.chain.current_height();
                let filled = self.checkpoint.active().height() > filled_before;
                match height > local_height || filled {
                    true => SyncOutcome::Synced(height),
                    false => SyncOutcome::Failed(format!("No blocks applied from {}", peer)),
                }
            }
        }
    }

    async fn fetch_checkpoint(&mut self, peer: &str, cp: CheckpointInfo) -> Result<(), ChainSyncError> {
        info!(
            "[qc-13] Fetching checkpoint {} ({}) from {}",
            cp.height,
            hex::encode(&cp.hash[..8]),
            peer
        );
        let result = self
            .session
            .request(
                peer,
                &SyncRequest::get_checkpoint(cp.hash),
                self.config.transfer_max_retries,
            )
            .await?;
        if result.payload.is_empty() {
            return Err(ChainSyncError::ProtocolViolation(format!(
                "{} does not serve checkpoint {}",
                peer, cp.height
            )));
        }
        self.checkpoint.install_archive(cp, &result.payload)?;
        Ok(())
    }

    fn spawn_fetch(&self, peer: &str, start: u64, end: u64) -> InFlight {
        let session = self.session.clone();
        let peer = peer.to_string();
        let request = SyncRequest::get_blocks(start, end, self.checkpoint.active().is_filling());
        let retries = self.config.transfer_max_retries;
        let handle = tokio::spawn(async move { session.request(&peer, &request, retries).await });
        InFlight { start, end, handle }
    }

    fn range_end(&self, start: u64, end: u64) -> u64 {
        end.min(start + self.config.max_blocks_per_request - 1)
    }

    /// Pipelined range loop. `None` means the range ran to completion or the
    /// peer ran out of blocks.
    async fn fetch_and_apply(&mut self, peer: &str, start: u64, end: u64) -> Option<SyncOutcome> {
        let mut inflight = Some(self.spawn_fetch(peer, start, self.range_end(start, end)));

        while let Some(current) = inflight.take() {
            let (range_start, range_end) = (current.start, current.end);
            let batch = match current.finish().await.and_then(|r| self.codec.decode_batch(&r.payload)) {
                Ok(batch) => batch,
                Err(e) => return Some(SyncOutcome::Failed(e.to_string())),
            };

            if range_end < end && batch.blocks.len() as u64 == range_end - range_start + 1 {
                let next = range_end + 1;
                inflight = Some(self.spawn_fetch(peer, next, self.range_end(next, end)));
            }

            debug!(
                "[qc-13] Applying {} blocks from {} ({}..={})",
                batch.blocks.len(),
                peer,
                range_start,
                range_end
            );
            match self.apply_batch(&batch).await {
                BatchResult::Continue => {}
                BatchResult::Exhausted => return None,
                BatchResult::Stop(outcome) => return Some(outcome),
            }
        }
        None
    }

    async fn apply_batch(&mut self, batch: &BlockBatch) -> BatchResult {
        if batch.blocks.is_empty() {
            return BatchResult::Exhausted;
        }
        for (i, raw) in batch.blocks.iter().enumerate() {
            let block = match self.codec.decode_block(raw) {
                Ok(block) => block,
                Err(e) => return BatchResult::Stop(SyncOutcome::Failed(e.to_string())),
            };

            if self.checkpoint.active().is_filling() {
                let info = batch.infos.get(i).map(Vec::as_slice).unwrap_or_default();
                match self.checkpoint.ingest_block(&block, raw, info) {
                    Ok(Ingest::Accepted) | Ok(Ingest::OutOfOrder { .. }) => {}
                    Ok(Ingest::Ready) => return BatchResult::Exhausted,
                    Err(e) if e.requires_restart() => {
                        return BatchResult::Stop(SyncOutcome::Restart)
                    }
                    Err(e) => return BatchResult::Stop(SyncOutcome::Failed(e.to_string())),
                }
            } else {
                match self.chain.apply_finalized_block(&block, raw) {
                    Ok(()) => {}
                    Err(ApplyError::Fatal(reason)) => {
                        warn!("[qc-13] Block {} fatal: {}", block.index, reason);
                        return BatchResult::Stop(SyncOutcome::Restart);
                    }
                    Err(ApplyError::Retryable(_)) if block.index <= self.chain.current_height() => {}
                    Err(ApplyError::Retryable(reason)) => {
                        return BatchResult::Stop(SyncOutcome::Failed(reason))
                    }
                }
            }
            tokio::task::yield_now().await;
        }
        BatchResult::Continue
    }

    fn deploy_checkpoint(&mut self) -> SyncOutcome {
        let deployed = self
            .checkpoint
            .deploy(true)
            .and_then(|height| Ok(self.snapshots.rollback(height, self.chain.as_ref())?));
        match deployed {
            Ok(()) => SyncOutcome::CheckpointDeployed,
            Err(e) => {
                warn!("[qc-13] Checkpoint deploy failed: {}", e);
                if let Err(e) = self.checkpoint.reset() {
                    warn!("[qc-13] Checkpoint reset failed: {}", e);
                }
                SyncOutcome::Failed(e.to_string())
            }
        }
    }
}
