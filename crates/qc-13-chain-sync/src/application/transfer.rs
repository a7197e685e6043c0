//! # Transfer Session
//!
//! One resumable request/response exchange with one peer.
//!
//! ## Flow
//!
//! 1. Wait for the peer to become dialable (poll, bounded wait).
//! 2. Open a stream, write the framed request, read the 76-byte header.
//! 3. On the first header, check the declared length against the cap and
//!    allocate the buffer once.
//! 4. Copy payload bytes into the buffer at the acquired offset.
//! 5. On a failed attempt, back off and retry with `byte_offset = acquired`
//!    so the responder resumes instead of starting over.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::algorithms::{decode_header, encode_request};
use crate::config::ChainSyncConfig;
use crate::domain::{
    invariant_payload_within_cap, invariant_progress_bounded, ChainSyncError, FailureCounter,
    ResponderStatus, SyncRequest, TransferProgress, RESPONSE_HEADER_SIZE, SYNC_PROTOCOL,
};
use crate::ports::{PeerTransport, SyncStream};

/// A completed transfer.
#[derive(Clone, Debug)]
pub struct TransferResult {
    /// Responder status from the last header received.
    pub status: ResponderStatus,
    /// The full payload.
    pub payload: Vec<u8>,
    /// Final progress counters.
    pub progress: TransferProgress,
}

/// Buffer state carried across attempts.
#[derive(Default)]
struct Partial {
    buffer: Option<Vec<u8>>,
    progress: TransferProgress,
}

/// Issues resumable requests over a `PeerTransport`.
pub struct TransferSession<T: PeerTransport> {
    transport: Arc<T>,
    config: ChainSyncConfig,
}

impl<T: PeerTransport> Clone for TransferSession<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: PeerTransport> TransferSession<T> {
    /// Create a session factory over `transport`.
    pub fn new(transport: Arc<T>, config: ChainSyncConfig) -> Self {
        Self { transport, config }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Send `request` to `peer` and collect the full payload, giving up after
    /// `max_retries` successive failed attempts.
    pub async fn request(
        &self,
        peer: &str,
        request: &SyncRequest,
        max_retries: u32,
    ) -> Result<TransferResult, ChainSyncError> {
        let session = Uuid::new_v4();
        let mut partial = Partial::default();
        let mut failures = FailureCounter::default();

        loop {
            self.wait_until_dialable(peer).await?;

            let acquired_before = partial.progress.acquired_bytes;
            let resumed = request.with_offset(acquired_before as u32);
            match self.attempt(peer, &resumed, &mut partial).await {
                Ok(status) => {
                    let progress = partial.progress;
                    debug!(
                        "[qc-13] {} {} from {} done: {} bytes in {} chunks",
                        session,
                        request.kind(),
                        peer,
                        progress.acquired_bytes,
                        progress.chunk_count
                    );
                    return Ok(TransferResult {
                        status,
                        payload: partial.buffer.unwrap_or_default(),
                        progress,
                    });
                }
                Err(e @ ChainSyncError::PayloadTooLarge { .. }) => return Err(e),
                Err(e) => {
                    if partial.progress.acquired_bytes > acquired_before {
                        failures.record_success();
                    }
                    failures.record_failure();
                    warn!(
                        "[qc-13] {} {} from {} failed ({}/{}): {}",
                        session,
                        request.kind(),
                        peer,
                        failures.successive_failures,
                        max_retries,
                        e
                    );
                    if failures.successive_failures >= max_retries as u64 {
                        return Err(ChainSyncError::RetriesExhausted {
                            attempts: failures.successive_failures as u32,
                            last: e.to_string(),
                        });
                    }
                    sleep(self.config.retry_backoff()).await;
                }
            }
        }
    }

    async fn wait_until_dialable(&self, peer: &str) -> Result<(), ChainSyncError> {
        let deadline = Instant::now() + self.config.dial_wait_timeout();
        while !self.transport.is_dialable(peer) {
            if Instant::now() >= deadline {
                return Err(ChainSyncError::PeerNotDialable(peer.to_string()));
            }
            sleep(self.config.dial_poll_interval()).await;
        }
        Ok(())
    }

    async fn attempt(
        &self,
        peer: &str,
        request: &SyncRequest,
        partial: &mut Partial,
    ) -> Result<ResponderStatus, ChainSyncError> {
        let phase_timeout = self.config.request_timeout();

        let mut stream: Box<dyn SyncStream> = within(phase_timeout, "dial", async {
            self.transport.dial(peer, SYNC_PROTOCOL).await
        })
        .await?;

        let frame = encode_request(request)?;
        within(phase_timeout, "request", async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await?;

        let mut raw_header = [0u8; RESPONSE_HEADER_SIZE];
        within(phase_timeout, "header", stream.read_exact(&mut raw_header)).await?;
        let header = decode_header(&raw_header)?;
        let declared = header.payload_len as u64;

        let buffer = match partial.buffer.as_mut() {
            Some(buffer) => {
                if declared != partial.progress.expected_bytes {
                    return Err(ChainSyncError::ProtocolViolation(format!(
                        "Payload length changed from {} to {} on resume",
                        partial.progress.expected_bytes, declared
                    )));
                }
                buffer
            }
            None => {
                invariant_payload_within_cap(declared, self.config.max_payload_bytes)?;
                partial.progress.expected_bytes = declared;
                partial.buffer.insert(vec![0u8; declared as usize])
            }
        };

        while partial.progress.acquired_bytes < partial.progress.expected_bytes {
            let at = partial.progress.acquired_bytes as usize;
            let read = within(phase_timeout, "payload", stream.read(&mut buffer[at..])).await?;
            if read == 0 {
                return Err(ChainSyncError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream closed at {} of {} bytes", at, declared),
                )));
            }
            partial.progress.acquired_bytes += read as u64;
            partial.progress.chunk_count += 1;
            invariant_progress_bounded(
                partial.progress.acquired_bytes,
                partial.progress.expected_bytes,
            )?;
        }

        Ok(ResponderStatus::from(&header))
    }
}

/// Run one I/O phase under a timeout, mapping both failure kinds.
async fn within<F, O>(limit: Duration, phase: &'static str, fut: F) -> Result<O, ChainSyncError>
where
    F: Future<Output = std::io::Result<O>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err(ChainSyncError::Transport(e)),
        Err(_) => Err(ChainSyncError::Timeout { phase }),
    }
}
