//! Bincode block codec.

use crate::domain::{BlockBatch, ChainSyncError, SyncBlock};
use crate::ports::BlockCodec;

/// Default codec using bincode.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl BlockCodec for BincodeCodec {
    fn encode_block(&self, block: &SyncBlock) -> Result<Vec<u8>, ChainSyncError> {
        Ok(bincode::serialize(block)?)
    }

    fn decode_block(&self, raw: &[u8]) -> Result<SyncBlock, ChainSyncError> {
        Ok(bincode::deserialize(raw)?)
    }

    fn encode_batch(&self, batch: &BlockBatch) -> Result<Vec<u8>, ChainSyncError> {
        Ok(bincode::serialize(batch)?)
    }

    fn decode_batch(&self, raw: &[u8]) -> Result<BlockBatch, ChainSyncError> {
        Ok(bincode::deserialize(raw)?)
    }
}
