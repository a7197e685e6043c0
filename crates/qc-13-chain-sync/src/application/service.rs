//! # Chain Sync Service
//!
//! Top-level sync loop: poll peer statuses, find consensus, pick a peer that
//! agrees with it, drive the pipeline, and walk the failure ladder when no
//! peer gives progress.
//!
//! The host either calls `sync_with_peers` directly or hands the service to
//! `run`, which reacts to `SyncCommand`s, a periodic tick and a shutdown
//! signal.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::checkpoint::CheckpointState;
use super::pipeline::BlockSyncPipeline;
use super::transfer::TransferSession;
use crate::adapters::SnapshotStore;
use crate::algorithms::{find_consensus, EscalationAction, EscalationPolicy};
use crate::config::ChainSyncConfig;
use crate::domain::{
    FailureCounter, PeerId, PeerStatus, SyncOutcome, SyncRequest, SyncStatus,
};
use crate::ports::{ChainState, ChainSyncApi, PeerTransport};

/// Input to the service loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncCommand {
    /// A peer connected; a sync round follows.
    PeerConnected(PeerId),
    /// A peer went away; its reported height is dropped.
    PeerDisconnected(PeerId),
    /// Run a sync round now.
    SyncNow,
}

/// Cheap, cloneable view of the service for other tasks.
#[derive(Clone)]
pub struct SyncHandle {
    syncing: Arc<AtomicBool>,
    peers_heights: Arc<RwLock<HashMap<PeerId, u64>>>,
}

impl SyncHandle {
    /// Whether a sync round is in progress.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Heights reported in the last status round.
    pub fn peers_heights(&self) -> HashMap<PeerId, u64> {
        self.peers_heights.read().clone()
    }
}

/// Clears the syncing flag when a round ends, including when the round's
/// future is dropped mid-await.
struct SyncingGuard(Arc<AtomicBool>);

impl Drop for SyncingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Chain Sync Service - orchestrates sync rounds.
pub struct ChainSyncService<T: PeerTransport + 'static, C: ChainState + 'static> {
    /// Configuration.
    config: ChainSyncConfig,
    /// Transport used for status polls.
    session: TransferSession<T>,
    /// Chain state being synced.
    chain: Arc<C>,
    /// Range and checkpoint fetching.
    pipeline: BlockSyncPipeline<T, C>,
    /// Live snapshots, for rollbacks.
    snapshots: SnapshotStore,
    /// Recovery ladder.
    escalation: EscalationPolicy,
    /// Failed rounds.
    failures: FailureCounter,
    /// Rotates the serving peer between rounds.
    last_peer_given_index: usize,
    /// Shared view.
    handle: SyncHandle,
    /// Flipped once a node restart is requested.
    restart_tx: watch::Sender<bool>,
}

impl<T: PeerTransport + 'static, C: ChainState + 'static> ChainSyncService<T, C> {
    /// Create a service syncing `chain` over `transport`.
    pub fn new(
        config: ChainSyncConfig,
        transport: Arc<T>,
        chain: Arc<C>,
        checkpoint: CheckpointState,
    ) -> Self {
        let session = TransferSession::new(transport, config.clone());
        let pipeline =
            BlockSyncPipeline::new(session.clone(), chain.clone(), checkpoint, config.clone());
        let (restart_tx, _) = watch::channel(false);
        Self {
            snapshots: SnapshotStore::new(config.snapshots_dir(), config.snapshots_trash_dir()),
            escalation: config.escalation_policy(),
            failures: FailureCounter::default(),
            last_peer_given_index: 0,
            handle: SyncHandle {
                syncing: Arc::new(AtomicBool::new(false)),
                peers_heights: Arc::new(RwLock::new(HashMap::new())),
            },
            restart_tx,
            session,
            chain,
            pipeline,
            config,
        }
    }

    /// Shared view for other tasks.
    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Receiver flipped to `true` when the node must restart.
    pub fn subscribe_restart(&self) -> watch::Receiver<bool> {
        self.restart_tx.subscribe()
    }

    /// Whether a restart was requested.
    pub fn restart_requested(&self) -> bool {
        *self.restart_tx.borrow()
    }

    /// Failure counters.
    pub fn failures(&self) -> FailureCounter {
        self.failures
    }

    /// Checkpoint state.
    pub fn checkpoint(&self) -> &CheckpointState {
        self.pipeline.checkpoint()
    }

    /// Publish the live snapshots as a checkpoint archive for other peers.
    pub fn publish_checkpoint(&self) {
        match self.pipeline.checkpoint().build_from_snapshots(false) {
            Ok(Some(info)) => debug!("[qc-13] Serving checkpoint {}", info.height),
            Ok(None) => {}
            Err(e) => warn!("[qc-13] Could not publish checkpoint: {}", e),
        }
    }

    /// Poll every dialable peer concurrently.
    async fn poll_statuses(&self) -> Vec<PeerStatus> {
        let mut polls = JoinSet::new();
        for peer in self.session.transport().dialable_peers() {
            let session = self.session.clone();
            let retries = self.config.status_max_retries;
            polls.spawn(async move {
                let result = session.request(&peer, &SyncRequest::Status, retries).await;
                (peer, result)
            });
        }

        let mut statuses = Vec::new();
        while let Some(joined) = polls.join_next().await {
            match joined {
                Ok((peer, Ok(result))) => statuses.push(PeerStatus::new(
                    peer,
                    result.status.current_height,
                    result.status.latest_block_hash,
                    result.status.checkpoint,
                )),
                Ok((peer, Err(e))) => debug!("[qc-13] Status from {} failed: {}", peer, e),
                Err(e) => warn!("[qc-13] Status poll task failed: {}", e),
            }
        }
        statuses.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        statuses
    }

    async fn sync_round(&mut self) -> SyncStatus {
        let statuses = self.poll_statuses().await;
        *self.handle.peers_heights.write() = statuses
            .iter()
            .map(|s| (s.peer_id.clone(), s.current_height))
            .collect();
        if statuses.is_empty() {
            return SyncStatus::NoPeers;
        }

        let Some(consensus) = find_consensus(&statuses) else {
            return SyncStatus::NoConsensus;
        };
        let local_height = self.chain.current_height();
        if consensus.height <= local_height {
            self.failures.record_success();
            self.publish_checkpoint();
            return SyncStatus::AlreadySynced;
        }

        let candidates: Vec<&PeerStatus> = statuses
            .iter()
            .filter(|s| {
                s.current_height == consensus.height && s.latest_block_hash == consensus.block_hash
            })
            .collect();
        let Some(peer) = self.next_peer(&candidates) else {
            return SyncStatus::NoConsensus;
        };

        info!(
            "[qc-13] Syncing {} -> {} from {} ({} of {} peers agree)",
            local_height,
            consensus.height,
            peer,
            consensus.peers,
            statuses.len()
        );
        match self
            .pipeline
            .sync_blocks(&peer, consensus.height, consensus.checkpoint)
            .await
        {
            SyncOutcome::CheckpointDeployed => {
                self.failures.record_success();
                SyncStatus::CheckpointDownloaded
            }
            SyncOutcome::Synced(height) => {
                self.failures.record_success();
                debug!("[qc-13] Round reached height {}", height);
                SyncStatus::VerifyingConsensus
            }
            SyncOutcome::Failed(reason) => self.escalate(&reason).await,
            SyncOutcome::Restart => self.escalate("sync restart signalled").await,
        }
    }

    /// Rotate through the peers that agree with consensus.
    fn next_peer(&mut self, candidates: &[&PeerStatus]) -> Option<PeerId> {
        if candidates.is_empty() {
            return None;
        }
        let peer = candidates[self.last_peer_given_index % candidates.len()].peer_id.clone();
        self.last_peer_given_index = self.last_peer_given_index.wrapping_add(1);
        Some(peer)
    }

    /// Cooldown, then rollback or restart per the ladder.
    async fn escalate(&mut self, reason: &str) -> SyncStatus {
        self.failures.record_failure();
        warn!(
            "[qc-13] Sync failure #{} ({} in a row): {}",
            self.failures.total_failures, self.failures.successive_failures, reason
        );
        tokio::time::sleep(self.config.failure_cooldown()).await;

        let heights = match self.snapshots.list_heights() {
            Ok(heights) => heights,
            Err(e) => {
                warn!("[qc-13] Could not list snapshots: {}", e);
                Vec::new()
            }
        };
        match self.escalation.decide(self.failures.total_failures, &heights) {
            EscalationAction::None => SyncStatus::Failed,
            EscalationAction::Rollback { height } => {
                match self.snapshots.rollback(height, self.chain.as_ref()) {
                    Ok(()) => SyncStatus::RolledBack(height),
                    Err(e) => {
                        warn!("[qc-13] Rollback to {} failed: {}", height, e);
                        SyncStatus::Failed
                    }
                }
            }
            EscalationAction::Restart => {
                self.request_restart();
                SyncStatus::RestartRequested
            }
        }
    }

    fn request_restart(&mut self) {
        error!(
            "[qc-13] {} sync failures, requesting node restart",
            self.failures.total_failures
        );
        if let Err(e) = self.pipeline.checkpoint_mut().reset() {
            warn!("[qc-13] Checkpoint reset failed: {}", e);
        }
        self.restart_tx.send_replace(true);
    }

    fn handle_command(&mut self, command: &SyncCommand) -> bool {
        match command {
            SyncCommand::PeerConnected(peer) => {
                debug!("[qc-13] Peer {} connected", peer);
                true
            }
            SyncCommand::PeerDisconnected(peer) => {
                self.handle.peers_heights.write().remove(peer);
                false
            }
            SyncCommand::SyncNow => true,
        }
    }

    /// Service loop. Returns when shutdown is signalled, the command channel
    /// closes, or a node restart is requested.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SyncCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("[qc-13] Chain sync service started");
        let mut tick = tokio::time::interval(self.config.sync_tick());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let wants_round = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    false
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(&command),
                    None => break,
                },
                _ = tick.tick() => true,
            };
            if !wants_round {
                continue;
            }

            // In-flight sync is dropped if shutdown arrives mid-round.
            let status = tokio::select! {
                status = self.sync_with_peers() => status,
                _ = shutdown.changed() => break,
            };
            debug!("[qc-13] {}", status);
            if self.restart_requested() {
                break;
            }
        }
        self.handle.syncing.store(false, Ordering::Release);
        info!("[qc-13] Chain sync service stopped");
    }
}

#[async_trait]
impl<T: PeerTransport + 'static, C: ChainState + 'static> ChainSyncApi for ChainSyncService<T, C> {
    async fn sync_with_peers(&mut self) -> SyncStatus {
        if self.handle.syncing.swap(true, Ordering::AcqRel) {
            return SyncStatus::AlreadySyncing;
        }
        let _syncing = SyncingGuard(self.handle.syncing.clone());
        self.sync_round().await
    }

    fn is_syncing(&self) -> bool {
        self.handle.is_syncing()
    }

    fn peers_heights(&self) -> HashMap<PeerId, u64> {
        self.handle.peers_heights()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{genesis_block, BincodeCodec, LocalChainState, MemoryTransport};
    use crate::application::SyncServer;
    use crate::domain::SyncBlock;
    use crate::ports::BlockCodec;
    use tempfile::TempDir;

    fn apply_chain(chain: &LocalChainState, n: u64, salt: u8) {
        let mut prev = chain.last_block_hash();
        for i in chain.current_height() + 1..=n {
            let block = SyncBlock::new(i, prev, vec![salt], vec![]);
            let raw = BincodeCodec.encode_block(&block).unwrap();
            chain.apply_finalized_block(&block, &raw).unwrap();
            prev = block.hash;
        }
    }

    fn server(tmp: &TempDir, n: u64, salt: u8) -> Arc<SyncServer<LocalChainState>> {
        let config = ChainSyncConfig::for_testing(tmp.path());
        let chain = LocalChainState::in_memory().unwrap();
        apply_chain(&chain, n, salt);
        Arc::new(SyncServer::new(Arc::new(chain), &config))
    }

    fn service(
        tmp: &TempDir,
        transport: Arc<MemoryTransport>,
    ) -> ChainSyncService<MemoryTransport, LocalChainState> {
        let config = ChainSyncConfig::for_testing(tmp.path());
        let checkpoint = CheckpointState::open(config.clone()).unwrap();
        let chain = Arc::new(LocalChainState::open(&config).unwrap());
        ChainSyncService::new(config, transport, chain, checkpoint)
    }

    #[tokio::test]
    async fn test_no_peers() {
        let tmp = TempDir::new().unwrap();
        let mut svc = service(&tmp, Arc::new(MemoryTransport::new()));
        assert_eq!(svc.sync_with_peers().await, SyncStatus::NoPeers);
        assert!(!svc.is_syncing());
    }

    #[tokio::test]
    async fn test_sync_follows_plurality() {
        let dirs: Vec<TempDir> = (0..4).map(|_| TempDir::new().unwrap()).collect();
        let transport = Arc::new(MemoryTransport::new());
        transport.register("a", server(&dirs[0], 15, 1));
        transport.register("b", server(&dirs[1], 15, 1));
        transport.register("c", server(&dirs[2], 18, 2));
        let mut svc = service(&dirs[3], transport);

        assert_eq!(svc.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        assert_eq!(svc.chain.current_height(), 15);
        assert_eq!(svc.sync_with_peers().await, SyncStatus::AlreadySynced);

        let heights = svc.peers_heights();
        assert_eq!(heights.get("c"), Some(&18));
        assert_eq!(heights.len(), 3);
    }

    #[test]
    fn test_peer_rotation() {
        let tmp = TempDir::new().unwrap();
        let mut svc = service(&tmp, Arc::new(MemoryTransport::new()));
        let a = PeerStatus::new("a", 5, [1; 32], Default::default());
        let b = PeerStatus::new("b", 5, [1; 32], Default::default());
        let candidates = vec![&a, &b];

        let picks: Vec<_> = (0..3).filter_map(|_| svc.next_peer(&candidates)).collect();
        assert_eq!(picks, vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(svc.next_peer(&[]), None);
    }

    #[tokio::test]
    async fn test_failures_escalate_to_restart() {
        let dirs: Vec<TempDir> = (0..2).map(|_| TempDir::new().unwrap()).collect();
        let transport = Arc::new(MemoryTransport::new());
        transport.register("a", server(&dirs[0], 5, 1));
        let mut svc = service(&dirs[1], transport);
        let mut restart = svc.subscribe_restart();

        // Local fork at height 2 makes every round fail.
        let mut prev = genesis_block().hash;
        for i in 1..=2 {
            let fork = SyncBlock::new(i, prev, vec![7, 7], vec![]);
            prev = fork.hash;
            let raw = BincodeCodec.encode_block(&fork).unwrap();
            svc.chain.apply_finalized_block(&fork, &raw).unwrap();
        }

        let mut statuses = Vec::new();
        for _ in 0..25 {
            statuses.push(svc.sync_with_peers().await);
        }
        assert!(statuses[..24].iter().all(|s| *s == SyncStatus::Failed));
        assert_eq!(statuses[24], SyncStatus::RestartRequested);
        assert!(restart.has_changed().unwrap());
        assert!(*restart.borrow_and_update());
        assert_eq!(svc.failures().total_failures, 25);
    }

    #[tokio::test]
    async fn test_cancelled_round_clears_syncing() {
        let dirs: Vec<TempDir> = (0..2).map(|_| TempDir::new().unwrap()).collect();
        let transport = Arc::new(MemoryTransport::new());
        transport.register("a", server(&dirs[0], 5, 1));
        let mut svc = service(&dirs[1], transport);
        apply_chain(&svc.chain, 2, 9);

        // The failed round parks in its cooldown long enough to be cancelled.
        svc.config.failure_cooldown_ms = 2_000;
        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(300),
            svc.sync_with_peers(),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!svc.is_syncing());
        assert_eq!(svc.failures().total_failures, 1);

        svc.config.failure_cooldown_ms = 1;
        assert_eq!(svc.sync_with_peers().await, SyncStatus::Failed);
        assert_eq!(svc.failures().total_failures, 2);
        assert!(!svc.is_syncing());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dirs: Vec<TempDir> = (0..2).map(|_| TempDir::new().unwrap()).collect();
        let transport = Arc::new(MemoryTransport::new());
        transport.register("a", server(&dirs[0], 12, 1));
        let svc = service(&dirs[1], transport);
        let handle = svc.handle();

        let (commands, rx) = mpsc::channel(8);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(svc.run(rx, shutdown_rx));

        commands.send(SyncCommand::SyncNow).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(handle.peers_heights().get("a"), Some(&12));

        shutdown.send(true).unwrap();
        task.await.unwrap();
        assert!(!handle.is_syncing());
    }
}
