//! # Sync Server
//!
//! Responder side of the sync protocol. Every response carries the node's
//! status in the fixed header, so a `Status` request is simply a response
//! with an empty payload.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::adapters::{ArchiveStore, BincodeCodec};
use crate::algorithms::{encode_header, read_request};
use crate::config::ChainSyncConfig;
use crate::domain::{
    BlockBatch, ChainSyncError, CheckpointInfo, ResponseHeader, SyncRequest, RESPONSE_HEADER_SIZE,
};
use crate::ports::{BlockCodec, ChainState};

/// Answers `Status`, `GetBlocks` and `GetCheckpoint` requests.
pub struct SyncServer<C: ChainState> {
    chain: Arc<C>,
    archives: ArchiveStore,
    codec: BincodeCodec,
    max_blocks_per_request: u64,
}

impl<C: ChainState> SyncServer<C> {
    /// Serve `chain` and the archive published under `config.data_dir`.
    pub fn new(chain: Arc<C>, config: &ChainSyncConfig) -> Self {
        Self {
            chain,
            archives: ArchiveStore::new(config.archive_dir()),
            codec: BincodeCodec,
            max_blocks_per_request: config.max_blocks_per_request,
        }
    }

    /// Checkpoint advertised in response headers.
    pub fn published_checkpoint(&self) -> CheckpointInfo {
        match self.archives.current() {
            Ok(Some((info, _))) => info,
            Ok(None) => CheckpointInfo::default(),
            Err(e) => {
                warn!("[qc-13] Could not scan published archive: {}", e);
                CheckpointInfo::default()
            }
        }
    }

    /// Full payload for a request, before offset slicing.
    fn payload(&self, request: &SyncRequest) -> Result<Vec<u8>, ChainSyncError> {
        match request {
            SyncRequest::Status => Ok(Vec::new()),
            SyncRequest::GetBlocks {
                start_index,
                end_index,
                includes_block_info,
                ..
            } => {
                let start = *start_index as u64;
                let end = (*end_index as u64)
                    .min(start + self.max_blocks_per_request.saturating_sub(1));
                if end < start {
                    return self.codec.encode_batch(&BlockBatch::default());
                }
                let blocks = self.chain.get_range_of_blocks(start, end);
                let infos = match includes_block_info {
                    true => self.chain.get_range_of_block_info(start, end),
                    false => Vec::new(),
                };
                self.codec.encode_batch(&BlockBatch { blocks, infos })
            }
            SyncRequest::GetCheckpoint { checkpoint_hash, .. } => {
                Ok(self.archives.read(checkpoint_hash)?.unwrap_or_default())
            }
        }
    }

    /// Header plus the payload sliced at the request's byte offset.
    pub fn respond(&self, request: &SyncRequest) -> Result<Vec<u8>, ChainSyncError> {
        let payload = self.payload(request)?;
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            ChainSyncError::ProtocolViolation(format!(
                "Payload of {} bytes does not fit the envelope",
                payload.len()
            ))
        })?;
        let checkpoint = self.published_checkpoint();
        let header = ResponseHeader {
            payload_len,
            current_height: clamp_u32(self.chain.current_height()),
            checkpoint_height: clamp_u32(checkpoint.height),
            latest_block_hash: self.chain.last_block_hash(),
            checkpoint_hash: checkpoint.hash,
        };

        let offset = (request.byte_offset() as usize).min(payload.len());
        let mut out = Vec::with_capacity(RESPONSE_HEADER_SIZE + payload.len() - offset);
        out.extend_from_slice(&encode_header(&header));
        out.extend_from_slice(&payload[offset..]);
        Ok(out)
    }

    /// Handle one request on an incoming stream, then close it.
    pub async fn serve<S>(&self, mut stream: S) -> Result<(), ChainSyncError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = read_request(&mut stream).await?;
        let response = self.respond(&request)?;
        debug!(
            "[qc-13] Serving {} ({} bytes)",
            request.kind(),
            response.len()
        );
        stream
            .write_all(&response)
            .await
            .map_err(ChainSyncError::Transport)?;
        stream.shutdown().await.map_err(ChainSyncError::Transport)?;
        Ok(())
    }
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
