//! # Adapters Layer (Hexagonal Architecture)
//!
//! Filesystem stores behind the sync core, the bincode codec, a reference
//! chain state and an in-process transport.

pub mod archive;
pub mod block_dir;
pub mod codec;
pub mod local_chain;
pub mod memory;
pub mod snapshot_store;

pub use archive::{pack, snapshot_content_hash, unpack, ArchiveStore};
pub use block_dir::BlockDirectory;
pub use codec::BincodeCodec;
pub use local_chain::{genesis_block, BlockInfo, LocalChainState};
pub use memory::{MemoryTransport, RequestHandler};
pub use snapshot_store::{SnapshotStore, ADDRESS_TABLE_FILE, SPECTRUM_FILE, UTXO_CACHE_FILE};
