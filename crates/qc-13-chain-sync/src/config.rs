//! # Chain Sync Configuration
//!
//! Configuration for the Chain Sync service. Defaults match the network
//! protocol; `for_testing()` shrinks timings so scenario tests run fast.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::algorithms::EscalationPolicy;
use crate::domain::{
    DEFAULT_AUDIT_ONE_IN, MAX_BLOCKS_PER_REQUEST, MAX_PAYLOAD_BYTES, MIN_CHECKPOINT_GAP,
    RESTART_EVERY, ROLLBACK_EVERY, STATUS_MAX_RETRIES, TRANSFER_MAX_RETRIES,
};

/// Chain sync configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainSyncConfig {
    /// Root of the live block/snapshot dirs, checkpoint dirs and archives.
    pub data_dir: PathBuf,

    /// Largest block range per GetBlocks request.
    pub max_blocks_per_request: u64,

    /// Blocks behind the consensus checkpoint before an archive is fetched.
    pub min_checkpoint_gap: u64,

    /// Hard cap on a declared payload.
    pub max_payload_bytes: u64,

    /// Successive failures tolerated by a status poll.
    pub status_max_retries: u32,

    /// Successive failures tolerated by a bulk transfer.
    pub transfer_max_retries: u32,

    /// Interval between dialability checks.
    pub dial_poll_interval_ms: u64,

    /// Give up on a peer that stays undialable this long.
    pub dial_wait_timeout_ms: u64,

    /// Timeout for one stream open / request phase.
    pub request_timeout_ms: u64,

    /// Pause between transfer retries.
    pub retry_backoff_ms: u64,

    /// Cooldown after a failed sync round.
    pub failure_cooldown_ms: u64,

    /// Snapshot rollback cadence (cumulative failures).
    pub rollback_every: u64,

    /// Node restart cadence (cumulative failures).
    pub restart_every: u64,

    /// One in this many checkpoint blocks gets a proof-hash audit.
    pub audit_one_in: u32,

    /// Blocks between snapshots taken by the chain owner.
    pub snapshot_interval: u64,

    /// Snapshots kept by retention.
    pub snapshots_to_keep: usize,

    /// Block files per on-disk batch directory.
    pub blocks_per_batch: u64,

    /// Orchestrator tick.
    pub sync_tick_ms: u64,
}

impl Default for ChainSyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_blocks_per_request: MAX_BLOCKS_PER_REQUEST,
            min_checkpoint_gap: MIN_CHECKPOINT_GAP,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            status_max_retries: STATUS_MAX_RETRIES,
            transfer_max_retries: TRANSFER_MAX_RETRIES,
            dial_poll_interval_ms: 100,
            dial_wait_timeout_ms: 10_000,
            request_timeout_ms: 3_000,
            retry_backoff_ms: 2_000,
            failure_cooldown_ms: 5_000,
            rollback_every: ROLLBACK_EVERY,
            restart_every: RESTART_EVERY,
            audit_one_in: DEFAULT_AUDIT_ONE_IN,
            snapshot_interval: 60,
            snapshots_to_keep: 5,
            blocks_per_batch: 100,
            sync_tick_ms: 1_000,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field that drives a modulo or a loop bound is zero.
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

impl ChainSyncConfig {
    /// Create a config for testing (smaller values).
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_blocks_per_request: 10,
            min_checkpoint_gap: 20,
            dial_poll_interval_ms: 5,
            dial_wait_timeout_ms: 50,
            request_timeout_ms: 500,
            retry_backoff_ms: 10,
            failure_cooldown_ms: 1,
            audit_one_in: 1,
            snapshot_interval: 10,
            snapshots_to_keep: 3,
            blocks_per_batch: 10,
            sync_tick_ms: 20,
            ..Self::default()
        }
    }

    /// Defaults overridden from `QC_SYNC_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("QC_SYNC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            info!("[qc-13] Data dir from environment: {}", config.data_dir.display());
        }
        if let Ok(value) = std::env::var("QC_SYNC_MAX_BLOCKS") {
            match value.parse() {
                Ok(n) => config.max_blocks_per_request = n,
                Err(_) => warn!("[qc-13] QC_SYNC_MAX_BLOCKS must be an integer"),
            }
        }
        if let Ok(value) = std::env::var("QC_SYNC_MIN_CHECKPOINT_GAP") {
            match value.parse() {
                Ok(n) => config.min_checkpoint_gap = n,
                Err(_) => warn!("[qc-13] QC_SYNC_MIN_CHECKPOINT_GAP must be an integer"),
            }
        }

        config
    }

    /// Reject values that would divide by zero or never make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.max_blocks_per_request == 0, "max_blocks_per_request"),
            (self.transfer_max_retries == 0, "transfer_max_retries"),
            (self.status_max_retries == 0, "status_max_retries"),
            (self.audit_one_in == 0, "audit_one_in"),
            (self.snapshot_interval == 0, "snapshot_interval"),
            (self.blocks_per_batch == 0, "blocks_per_batch"),
            (self.rollback_every == 0, "rollback_every"),
            (self.restart_every == 0, "restart_every"),
        ];
        match checks.iter().find(|(zero, _)| *zero) {
            Some((_, name)) => Err(ConfigError::ZeroValue(name)),
            None => Ok(()),
        }
    }

    /// Escalation cadence.
    pub fn escalation_policy(&self) -> EscalationPolicy {
        EscalationPolicy {
            rollback_every: self.rollback_every,
            restart_every: self.restart_every,
        }
    }

    /// Dialability poll interval.
    pub fn dial_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dial_poll_interval_ms)
    }

    /// Dialability wait timeout.
    pub fn dial_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_wait_timeout_ms)
    }

    /// Per-phase request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Retry backoff.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Failure cooldown.
    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }

    /// Orchestrator tick.
    pub fn sync_tick(&self) -> Duration {
        Duration::from_millis(self.sync_tick_ms)
    }

    /// Live block directory.
    pub fn blocks_dir(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    /// Live block-info directory.
    pub fn blocks_info_dir(&self) -> PathBuf {
        self.data_dir.join("blocks-info")
    }

    /// Live snapshot directory.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Trash for snapshots taken out of service.
    pub fn snapshots_trash_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots-trash")
    }

    /// Working directory of the active checkpoint.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoint")
    }

    /// Durable, content-hashed archives served to other peers.
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoint-archive")
    }
}
