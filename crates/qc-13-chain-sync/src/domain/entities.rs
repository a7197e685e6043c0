//! # Domain Entities
//!
//! Core entities for Chain Sync: what peers report, what the network agreed
//! on, and the block/state payloads that travel between nodes.

use super::errors::{Hash, PeerId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Height and content hash of a checkpoint archive.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CheckpointInfo {
    /// Highest snapshot height contained in the archive.
    pub height: u64,
    /// Content hash over the archive's snapshot folders.
    pub hash: Hash,
}

impl CheckpointInfo {
    /// Create a new checkpoint reference.
    pub fn new(height: u64, hash: Hash) -> Self {
        Self { height, hash }
    }

    /// A zero height means the peer has no checkpoint to offer.
    pub fn is_empty(&self) -> bool {
        self.height == 0
    }
}

/// Chain status reported by one peer in a status round.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerStatus {
    /// Reporting peer.
    pub peer_id: PeerId,
    /// Peer's current chain height.
    pub current_height: u64,
    /// Hash of the peer's latest block.
    pub latest_block_hash: Hash,
    /// Checkpoint the peer can serve.
    pub checkpoint: CheckpointInfo,
}

impl PeerStatus {
    /// Create a peer status.
    pub fn new(
        peer_id: impl Into<PeerId>,
        current_height: u64,
        latest_block_hash: Hash,
        checkpoint: CheckpointInfo,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            current_height,
            latest_block_hash,
            checkpoint,
        }
    }
}

/// Result of plurality voting over a round of peer statuses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Consensus {
    /// Agreed chain height.
    pub height: u64,
    /// Votes behind the winning (height, hash) pair.
    pub peers: usize,
    /// Agreed latest block hash.
    pub block_hash: Hash,
    /// Agreed checkpoint, if any peer reported one.
    pub checkpoint: Option<CheckpointInfo>,
    /// Votes behind the winning checkpoint.
    pub checkpoint_peers: usize,
}

/// A block as seen by the sync subsystem.
///
/// `hash` is the proof hash: SHA-256 over the previous hash, the index and
/// the producer signature. The body is opaque here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncBlock {
    /// Height of this block.
    pub index: u64,
    /// Declared proof hash.
    pub hash: Hash,
    /// Hash of the previous block.
    pub prev_hash: Hash,
    /// Producer signature the proof hash is derived from.
    pub signature: Vec<u8>,
    /// Transactions and everything else the sync core does not inspect.
    pub body: Vec<u8>,
}

impl SyncBlock {
    /// Build a block whose declared hash is its proof hash.
    pub fn new(index: u64, prev_hash: Hash, signature: Vec<u8>, body: Vec<u8>) -> Self {
        let hash = compute_proof_hash(index, &prev_hash, &signature);
        Self {
            index,
            hash,
            prev_hash,
            signature,
            body,
        }
    }

    /// Recompute the proof hash from the signature.
    pub fn compute_proof_hash(&self) -> Hash {
        compute_proof_hash(self.index, &self.prev_hash, &self.signature)
    }

    /// Whether the declared hash matches the recomputed proof hash.
    pub fn verify_proof_hash(&self) -> bool {
        self.compute_proof_hash() == self.hash
    }
}

fn compute_proof_hash(index: u64, prev_hash: &Hash, signature: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(index.to_le_bytes());
    hasher.update(signature);
    hasher.finalize().into()
}

/// Payload of a GetBlocks response: raw encoded blocks and, when requested,
/// their raw block-info records in the same order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockBatch {
    /// Encoded blocks in ascending index order.
    pub blocks: Vec<Vec<u8>>,
    /// Encoded block-info records, empty unless requested.
    pub infos: Vec<Vec<u8>>,
}

/// UTXO set keyed by output anchor.
pub type UtxoSet = BTreeMap<String, Vec<u8>>;

/// Stake spectrum keyed by address.
pub type StakeSpectrum = BTreeMap<String, u64>;

/// Known-address table: address to the height it was first seen at.
pub type KnownAddressTable = BTreeMap<String, u64>;

/// Point-in-time chain state captured in a snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainSnapshot {
    /// Unspent outputs.
    pub utxo_set: UtxoSet,
    /// VSS stake spectrum.
    pub stake_spectrum: StakeSpectrum,
    /// Mempool's known-address table.
    pub known_addresses: KnownAddressTable,
}
