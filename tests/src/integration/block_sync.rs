//! # Block Sync Between Nodes
//!
//! A fresh node catches up block by block from peers that agree on the tip,
//! and keeps what it synced across a reopen.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use qc_13_chain_sync::{
        ChainState, ChainSyncApi, LocalChainState, MemoryTransport, SyncCommand, SyncStatus,
    };

    use super::super::harness::TestNode;

    #[tokio::test]
    async fn test_fresh_node_catches_up_from_agreeing_peers() {
        let seeds: Vec<TestNode> = (0..2).map(|_| TestNode::new()).collect();
        for seed in &seeds {
            seed.grow(18, 1);
        }
        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed-a", seeds[0].server());
        transport.register("seed-b", seeds[1].server());

        let mut fresh = TestNode::new();
        let mut service = fresh.service(transport);

        assert_eq!(service.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        assert_eq!(fresh.chain.current_height(), 18);
        assert_eq!(fresh.chain.last_block_hash(), seeds[0].chain.last_block_hash());
        assert_eq!(service.sync_with_peers().await, SyncStatus::AlreadySynced);
        assert_eq!(service.failures().successive_failures, 0);
    }

    #[tokio::test]
    async fn test_minority_fork_is_ignored() {
        let honest: Vec<TestNode> = (0..2).map(|_| TestNode::new()).collect();
        for node in &honest {
            node.grow(12, 1);
        }
        let forked = TestNode::new();
        forked.grow(14, 2);

        let transport = Arc::new(MemoryTransport::new());
        transport.register("honest-a", honest[0].server());
        transport.register("honest-b", honest[1].server());
        transport.register("forked", forked.server());

        let mut fresh = TestNode::new();
        let mut service = fresh.service(transport);
        assert_eq!(service.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        assert_eq!(fresh.chain.last_block_hash(), honest[0].chain.last_block_hash());
        assert_eq!(service.peers_heights().get("forked"), Some(&14));
    }

    #[tokio::test]
    async fn test_synced_blocks_survive_reopen() {
        let seed = TestNode::new();
        seed.grow(27, 1);
        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());

        let mut fresh = TestNode::new();
        let mut service = fresh.service(transport);
        assert_eq!(service.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        drop(service);

        let reopened = LocalChainState::open(&fresh.config).unwrap();
        assert_eq!(reopened.current_height(), 27);
        assert_eq!(reopened.last_block_hash(), seed.chain.last_block_hash());
        assert_eq!(reopened.capture_state(), seed.chain.capture_state());
    }

    #[tokio::test]
    async fn test_run_loop_syncs_on_peer_connect() {
        let seed = TestNode::new();
        seed.grow(9, 1);
        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());

        let mut fresh = TestNode::new();
        let service = fresh.service(transport);
        let (commands, command_rx) = tokio::sync::mpsc::channel(8);
        let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
        let task = tokio::spawn(service.run(command_rx, shutdown_rx));

        commands
            .send(SyncCommand::PeerConnected("seed".to_string()))
            .await
            .unwrap();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while fresh.chain.current_height() < 9 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(fresh.chain.current_height(), 9);

        shutdown.send(true).unwrap();
        task.await.unwrap();
    }
}
