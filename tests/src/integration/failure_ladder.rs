//! # Failure Escalation Between Nodes
//!
//! A node on a fork cannot apply the network's blocks. Every third failed
//! round rolls chain state back to a snapshot, walking backward from the
//! newest; the twenty-fifth asks for a restart.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use qc_13_chain_sync::{ChainState, ChainSyncApi, MemoryTransport, SyncStatus};

    use super::super::harness::{blocks, TestNode};

    #[tokio::test]
    async fn test_permanent_fork_walks_the_ladder() {
        let seed = TestNode::new();
        seed.grow(40, 1);
        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());

        // Forked from block 1 with snapshots at 10, 20 and 30.
        let mut forked = TestNode::new();
        forked.grow(30, 9);
        let mut service = forked.service(transport);
        let mut restart = service.subscribe_restart();

        let mut statuses = Vec::new();
        for _ in 0..25 {
            statuses.push(service.sync_with_peers().await);
        }

        assert_eq!(statuses[2], SyncStatus::RolledBack(30));
        assert_eq!(statuses[5], SyncStatus::RolledBack(20));
        assert_eq!(statuses[8], SyncStatus::RolledBack(10));
        for (i, status) in statuses.iter().enumerate().take(24) {
            if (i + 1) % 3 != 0 {
                assert_eq!(*status, SyncStatus::Failed, "round {}", i + 1);
            }
        }
        assert_eq!(statuses[24], SyncStatus::RestartRequested);
        assert!(restart.has_changed().unwrap());
        assert!(service.restart_requested());
        assert_eq!(service.failures().total_failures, 25);
        assert_eq!(forked.chain.current_height(), 10);
    }

    #[tokio::test]
    async fn test_rollback_heals_late_fork() {
        let seed = TestNode::new();
        seed.grow(40, 1);
        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());

        // Shares blocks 1..=25 with the seed, then forks.
        let mut node = TestNode::new();
        node.grow(25, 1);
        node.apply(&blocks(26, 30, node.chain.last_block_hash(), 9));
        let mut service = node.service(transport);

        let statuses = [
            service.sync_with_peers().await,
            service.sync_with_peers().await,
            service.sync_with_peers().await,
        ];
        assert_eq!(
            statuses,
            [
                SyncStatus::Failed,
                SyncStatus::Failed,
                SyncStatus::RolledBack(30)
            ]
        );
        assert_eq!(service.sync_with_peers().await, SyncStatus::Failed);
        assert_eq!(service.sync_with_peers().await, SyncStatus::Failed);
        assert_eq!(service.sync_with_peers().await, SyncStatus::RolledBack(20));
        assert_eq!(node.chain.current_height(), 20);

        assert_eq!(service.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        assert_eq!(node.chain.current_height(), 40);
        assert_eq!(node.chain.last_block_hash(), seed.chain.last_block_hash());
        assert_eq!(service.failures().successive_failures, 0);
        assert_eq!(service.failures().total_failures, 6);
    }

    #[tokio::test]
    async fn test_unreachable_network_is_not_a_failure() {
        let transport = Arc::new(MemoryTransport::new());
        let mut node = TestNode::new();
        let mut service = node.service(transport);
        for _ in 0..5 {
            assert_eq!(service.sync_with_peers().await, SyncStatus::NoPeers);
        }
        assert_eq!(service.failures().total_failures, 0);
        assert!(!service.restart_requested());
    }
}
