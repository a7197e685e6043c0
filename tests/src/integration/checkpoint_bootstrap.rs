//! # Checkpoint Bootstrap
//!
//! A node far behind downloads a peer's checkpoint archive, deploys it, and
//! finishes the remaining blocks normally. Once synced it serves the same
//! checkpoint to others.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use qc_13_chain_sync::{ChainState, ChainSyncApi, MemoryTransport, SyncStatus};

    use super::super::harness::TestNode;

    #[tokio::test]
    async fn test_bootstrap_from_checkpoint_then_blocks() {
        let seed = TestNode::new();
        seed.grow(45, 1);
        let published = seed.publish_checkpoint().unwrap();
        assert_eq!(published.height, 40);

        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());
        let mut fresh = TestNode::new();
        let mut service = fresh.service(transport);

        assert_eq!(service.sync_with_peers().await, SyncStatus::CheckpointDownloaded);
        assert_eq!(fresh.chain.current_height(), 40);
        assert!(service.checkpoint().active().is_unset());

        assert_eq!(service.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        assert_eq!(fresh.chain.current_height(), 45);
        assert_eq!(fresh.chain.last_block_hash(), seed.chain.last_block_hash());
        assert_eq!(fresh.chain.capture_state(), seed.chain.capture_state());
    }

    #[tokio::test]
    async fn test_bootstrapped_node_serves_same_checkpoint() {
        let seed = TestNode::new();
        seed.grow(33, 1);
        let published = seed.publish_checkpoint().unwrap();

        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());
        let mut fresh = TestNode::new();
        let fresh_config = fresh.config.clone();
        let fresh_chain = fresh.chain.clone();
        let mut service = fresh.service(transport.clone());

        assert_eq!(service.sync_with_peers().await, SyncStatus::CheckpointDownloaded);
        assert_eq!(service.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        assert_eq!(service.sync_with_peers().await, SyncStatus::AlreadySynced);

        let relay = qc_13_chain_sync::SyncServer::new(fresh_chain, &fresh_config);
        assert_eq!(relay.published_checkpoint(), published);
    }

    #[tokio::test]
    async fn test_small_gap_skips_checkpoint() {
        let seed = TestNode::new();
        seed.grow(25, 1);
        seed.publish_checkpoint().unwrap();

        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());
        let mut fresh = TestNode::new();
        fresh.grow(15, 1);
        let mut service = fresh.service(transport);

        // Checkpoint 20 is within the minimum gap of height 15.
        assert_eq!(service.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        assert_eq!(fresh.chain.current_height(), 25);
    }

    #[tokio::test]
    async fn test_bootstrap_through_second_seed() {
        let seed = TestNode::new();
        seed.grow(52, 1);
        seed.publish_checkpoint().unwrap();

        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());
        let mut middle = TestNode::new();
        let mut middle_service = middle.service(transport);
        while middle.chain.current_height() < 52 {
            let status = middle_service.sync_with_peers().await;
            assert!(
                matches!(
                    status,
                    SyncStatus::CheckpointDownloaded | SyncStatus::VerifyingConsensus
                ),
                "unexpected {:?}",
                status
            );
        }
        assert_eq!(middle_service.sync_with_peers().await, SyncStatus::AlreadySynced);

        let relay = Arc::new(MemoryTransport::new());
        relay.register(
            "middle",
            Arc::new(qc_13_chain_sync::SyncServer::new(middle.chain.clone(), &middle.config)),
        );
        let mut last = TestNode::new();
        let mut last_service = last.service(relay);
        assert_eq!(last_service.sync_with_peers().await, SyncStatus::CheckpointDownloaded);
        assert_eq!(last.chain.current_height(), 50);
        assert_eq!(last_service.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        assert_eq!(last.chain.last_block_hash(), seed.chain.last_block_hash());
    }
}
