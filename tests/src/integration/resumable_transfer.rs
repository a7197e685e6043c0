//! # Resumable Transfers
//!
//! Streams cut mid-payload resume at the acquired offset, through the
//! transfer session alone and through a full sync round. A declared length
//! above the cap is refused before any buffer exists.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use qc_13_chain_sync::adapters::RequestHandler;
    use qc_13_chain_sync::{
        encode_header, ChainState, ChainSyncApi, ChainSyncConfig, ChainSyncError, MemoryTransport,
        ResponseHeader, SyncRequest, SyncStatus, TransferSession, RESPONSE_HEADER_SIZE,
    };

    use super::super::harness::TestNode;

    /// Declares a payload one byte over `cap` and sends nothing after it.
    struct OversizedResponder {
        cap: u64,
    }

    impl RequestHandler for OversizedResponder {
        fn respond(&self, _request: &SyncRequest) -> Result<Vec<u8>, ChainSyncError> {
            let header = ResponseHeader {
                payload_len: (self.cap + 1) as u32,
                current_height: 9,
                checkpoint_height: 0,
                latest_block_hash: [0x11; 32],
                checkpoint_hash: [0; 32],
            };
            Ok(encode_header(&header).to_vec())
        }
    }

    #[tokio::test]
    async fn test_cut_block_transfer_matches_clean_transfer() {
        let seed = TestNode::new();
        seed.grow(10, 1);
        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());
        let session = TransferSession::new(transport.clone(), seed.config.clone());
        let request = SyncRequest::get_blocks(1, 10, true);

        let clean = session.request("seed", &request, 5).await.unwrap();

        // Every cut attempt still moves 40 bytes, so successive failures stay at one.
        transport.truncate_next_responses("seed", RESPONSE_HEADER_SIZE + 40, 12);
        let resumed = session.request("seed", &request, 5).await.unwrap();
        assert_eq!(resumed.payload, clean.payload);
        assert_eq!(resumed.status, clean.status);
        assert!(resumed.progress.is_complete());
        assert!(transport.dial_count() > 2);
    }

    #[tokio::test]
    async fn test_cut_checkpoint_archive_still_bootstraps() {
        let seed = TestNode::new();
        seed.grow(45, 1);
        seed.publish_checkpoint().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());
        transport.truncate_next_responses("seed", RESPONSE_HEADER_SIZE + 64, 6);

        let mut fresh = TestNode::new();
        let mut service = fresh.service(transport);
        assert_eq!(service.sync_with_peers().await, SyncStatus::CheckpointDownloaded);
        assert_eq!(fresh.chain.current_height(), 40);
        assert_eq!(service.sync_with_peers().await, SyncStatus::VerifyingConsensus);
        assert_eq!(fresh.chain.last_block_hash(), seed.chain.last_block_hash());
    }

    #[tokio::test]
    async fn test_oversized_declaration_rejected_without_retry() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = ChainSyncConfig {
            max_payload_bytes: 4096,
            ..ChainSyncConfig::for_testing(tmp.path())
        };
        let transport = Arc::new(MemoryTransport::new());
        transport.register("liar", Arc::new(OversizedResponder { cap: 4096 }));
        let session = TransferSession::new(transport.clone(), config);

        let err = session
            .request("liar", &SyncRequest::get_checkpoint([0x22; 32]), 5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChainSyncError::PayloadTooLarge {
                declared: 4097,
                cap: 4096
            }
        ));
        assert_eq!(transport.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_refused_dials_exhaust_transfer_retries() {
        let seed = TestNode::new();
        seed.grow(5, 1);
        let transport = Arc::new(MemoryTransport::new());
        transport.register("seed", seed.server());
        transport.refuse_next_dials("seed", 10);
        let session = TransferSession::new(transport.clone(), seed.config.clone());

        let err = session
            .request("seed", &SyncRequest::get_blocks(1, 5, false), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainSyncError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(transport.dial_count(), 5);
    }
}
