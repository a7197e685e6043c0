//! # Domain Invariants
//!
//! Protocol constants and the checks that must always hold.

use super::errors::ChainSyncError;

/// Size of the fixed response envelope header in bytes.
///
/// `payload_len(4) | current_height(4) | checkpoint_height(4) | latest_hash(32) | checkpoint_hash(32)`
pub const RESPONSE_HEADER_SIZE: usize = 76;

/// Hard cap on a declared payload (1 GiB).
pub const MAX_PAYLOAD_BYTES: u64 = 1024 * 1024 * 1024;

/// Largest block range requested in one GetBlocks call.
pub const MAX_BLOCKS_PER_REQUEST: u64 = 100;

/// Local height must trail the checkpoint by more than this before an
/// archive transfer is attempted.
pub const MIN_CHECKPOINT_GAP: u64 = 720;

/// One in this many ingested checkpoint blocks gets a full proof-hash audit.
pub const DEFAULT_AUDIT_ONE_IN: u32 = 27;

/// Retry budget for status polls.
pub const STATUS_MAX_RETRIES: u32 = 1;

/// Retry budget for block and archive transfers.
pub const TRANSFER_MAX_RETRIES: u32 = 5;

/// Every n-th cumulative failure attempts a snapshot rollback.
pub const ROLLBACK_EVERY: u64 = 3;

/// Every n-th cumulative failure requests a node restart.
pub const RESTART_EVERY: u64 = 25;

/// Protocol id for the sync request/response exchange.
pub const SYNC_PROTOCOL: &str = "/qc/sync/1.0.0";

/// Protocol id for relay sharing (owned by the transport).
pub const RELAY_SHARE_PROTOCOL: &str = "/qc/relay-share/1.0.0";

/// Invariant: transfer progress never exceeds what was declared.
pub fn invariant_progress_bounded(acquired: u64, expected: u64) -> Result<(), ChainSyncError> {
    if acquired > expected {
        return Err(ChainSyncError::ProtocolViolation(format!(
            "Received {} bytes but only {} were declared",
            acquired, expected
        )));
    }
    Ok(())
}

/// Invariant: a declared payload must fit under the allocation cap.
pub fn invariant_payload_within_cap(declared: u64, cap: u64) -> Result<(), ChainSyncError> {
    if declared > cap {
        return Err(ChainSyncError::PayloadTooLarge { declared, cap });
    }
    Ok(())
}
