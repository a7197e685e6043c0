//! In-process peer transport.
//!
//! Each dial opens a `tokio::io::duplex` pair and hands the far end to the
//! registered peer's responder on a spawned task. Used by the simulator and
//! by tests, including fault injection for refused dials and streams cut
//! mid-response.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::algorithms::read_request;
use crate::application::SyncServer;
use crate::domain::{ChainSyncError, SyncRequest, SYNC_PROTOCOL};
use crate::ports::{ChainState, PeerTransport, SyncStream};

const DUPLEX_BUFFER: usize = 64 * 1024;

/// Anything that can turn a request into a full response.
pub trait RequestHandler: Send + Sync {
    /// Header plus payload for `request`.
    fn respond(&self, request: &SyncRequest) -> Result<Vec<u8>, ChainSyncError>;
}

impl<C: ChainState> RequestHandler for SyncServer<C> {
    fn respond(&self, request: &SyncRequest) -> Result<Vec<u8>, ChainSyncError> {
        SyncServer::respond(self, request)
    }
}

struct PeerEntry {
    handler: Arc<dyn RequestHandler>,
    dialable: bool,
    refuse_dials: u32,
    truncate_after: Option<usize>,
    truncations: u32,
}

/// `PeerTransport` over in-memory duplex streams.
#[derive(Default)]
pub struct MemoryTransport {
    peers: Mutex<HashMap<String, PeerEntry>>,
    dials: AtomicU64,
}

impl MemoryTransport {
    /// Transport with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dialable peer.
    pub fn register(&self, peer: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.peers.lock().insert(
            peer.into(),
            PeerEntry {
                handler,
                dialable: true,
                refuse_dials: 0,
                truncate_after: None,
                truncations: 0,
            },
        );
    }

    /// Forget a peer.
    pub fn remove(&self, peer: &str) {
        self.peers.lock().remove(peer);
    }

    /// Mark a peer dialable or not.
    pub fn set_dialable(&self, peer: &str, dialable: bool) {
        if let Some(entry) = self.peers.lock().get_mut(peer) {
            entry.dialable = dialable;
        }
    }

    /// Refuse the next `count` dials to `peer`.
    pub fn refuse_next_dials(&self, peer: &str, count: u32) {
        if let Some(entry) = self.peers.lock().get_mut(peer) {
            entry.refuse_dials = count;
        }
    }

    /// Cut the next `times` responses from `peer` after `after_bytes`
    /// bytes, header included.
    pub fn truncate_next_responses(&self, peer: &str, after_bytes: usize, times: u32) {
        if let Some(entry) = self.peers.lock().get_mut(peer) {
            entry.truncate_after = Some(after_bytes);
            entry.truncations = times;
        }
    }

    /// Dials attempted so far, refused ones included.
    pub fn dial_count(&self) -> u64 {
        self.dials.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn dialable_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .peers
            .lock()
            .iter()
            .filter(|(_, entry)| entry.dialable)
            .map(|(id, _)| id.clone())
            .collect();
        peers.sort();
        peers
    }

    fn is_dialable(&self, peer: &str) -> bool {
        self.peers.lock().get(peer).map_or(false, |e| e.dialable)
    }

    async fn dial(&self, peer: &str, protocol: &str) -> io::Result<Box<dyn SyncStream>> {
        self.dials.fetch_add(1, Ordering::Relaxed);
        if protocol != SYNC_PROTOCOL {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("protocol {} not served", protocol),
            ));
        }

        let (handler, cut) = {
            let mut peers = self.peers.lock();
            let entry = peers
                .get_mut(peer)
                .filter(|e| e.dialable)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, peer.to_string()))?;
            if entry.refuse_dials > 0 {
                entry.refuse_dials -= 1;
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, peer.to_string()));
            }
            let cut = match entry.truncations {
                0 => None,
                _ => {
                    entry.truncations -= 1;
                    entry.truncate_after
                }
            };
            (entry.handler.clone(), cut)
        };

        let (local, mut remote) = tokio::io::duplex(DUPLEX_BUFFER);
        let peer_id = peer.to_string();
        tokio::spawn(async move {
            let request = match read_request(&mut remote).await {
                Ok(request) => request,
                Err(e) => {
                    debug!("[qc-13] {} dropped a malformed request: {}", peer_id, e);
                    return;
                }
            };
            let Ok(response) = handler.respond(&request) else {
                return;
            };
            let end = cut.map_or(response.len(), |n| n.min(response.len()));
            if remote.write_all(&response[..end]).await.is_ok() && cut.is_none() {
                let _ = remote.shutdown().await;
            }
        });
        Ok(Box::new(local))
    }
}
