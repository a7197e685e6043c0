//! # Outbound Ports
//!
//! Traits for the collaborators Chain Sync drives: peer transport, chain
//! state, and the binary codec.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::{ApplyError, BlockBatch, ChainSnapshot, ChainSyncError, Hash, SyncBlock};

/// Duplex byte stream to one peer.
pub trait SyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> SyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Peer transport - outbound port.
///
/// Connection liveness and the address book stay on the transport side; the
/// sync core only asks whether a peer is dialable and opens streams.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Peers that can be dialed right now.
    fn dialable_peers(&self) -> Vec<String>;

    /// Whether `peer` can be dialed right now.
    fn is_dialable(&self, peer: &str) -> bool;

    /// Open a stream to `peer` speaking `protocol`.
    async fn dial(&self, peer: &str, protocol: &str) -> io::Result<Box<dyn SyncStream>>;
}

/// Chain state - outbound port.
///
/// Holds finalized blocks and the live UTXO set, stake spectrum and
/// known-address table. Implementations use interior mutability so the
/// orchestrator and the request server can share one instance.
pub trait ChainState: Send + Sync {
    /// Index of the latest finalized block.
    fn current_height(&self) -> u64;

    /// Hash of the latest finalized block.
    fn last_block_hash(&self) -> Hash;

    /// Validate and apply the next block.
    fn apply_finalized_block(&self, block: &SyncBlock, raw: &[u8]) -> Result<(), ApplyError>;

    /// Raw encoded blocks for the inclusive range; stops at the first gap.
    fn get_range_of_blocks(&self, start: u64, end: u64) -> Vec<Vec<u8>>;

    /// Raw block-info records for the inclusive range; stops at the first gap.
    fn get_range_of_block_info(&self, start: u64, end: u64) -> Vec<Vec<u8>>;

    /// Copy of the live UTXO set, stake spectrum and address table.
    fn capture_state(&self) -> ChainSnapshot;

    /// Bulk-replace the live state with a snapshot taken at `height`.
    ///
    /// Only the snapshot store calls this.
    fn restore_state(&self, height: u64, snapshot: ChainSnapshot) -> Result<(), ApplyError>;
}

/// Binary codec - outbound port.
pub trait BlockCodec: Send + Sync {
    /// Encode one block.
    fn encode_block(&self, block: &SyncBlock) -> Result<Vec<u8>, ChainSyncError>;

    /// Decode one block.
    fn decode_block(&self, raw: &[u8]) -> Result<SyncBlock, ChainSyncError>;

    /// Encode a GetBlocks payload.
    fn encode_batch(&self, batch: &BlockBatch) -> Result<Vec<u8>, ChainSyncError>;

    /// Decode a GetBlocks payload.
    fn decode_batch(&self, raw: &[u8]) -> Result<BlockBatch, ChainSyncError>;
}
