//! Snapshot store.
//!
//! Each snapshot is a folder named by height holding three independently
//! serialized blobs:
//!
//! ```text
//! <root>/<height>/spectrum.bin
//! <root>/<height>/address-table.bin
//! <root>/<height>/utxo-cache.bin
//! ```
//!
//! A folder missing any of the three is malformed and is deleted the moment
//! a listing sees it.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::block_dir::remove_dir_if_exists;
use crate::domain::{
    ChainSnapshot, KnownAddressTable, SnapshotError, StakeSpectrum, UtxoSet,
};
use crate::ports::ChainState;

/// Stake spectrum blob.
pub const SPECTRUM_FILE: &str = "spectrum.bin";
/// Known-address table blob.
pub const ADDRESS_TABLE_FILE: &str = "address-table.bin";
/// UTXO set blob.
pub const UTXO_CACHE_FILE: &str = "utxo-cache.bin";

const REQUIRED_FILES: [&str; 3] = [SPECTRUM_FILE, ADDRESS_TABLE_FILE, UTXO_CACHE_FILE];

/// Periodic chain-state snapshots keyed by height.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    root: PathBuf,
    trash: PathBuf,
}

impl SnapshotStore {
    /// Open a store rooted at `root`, trashing into `trash`.
    pub fn new(root: impl Into<PathBuf>, trash: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            trash: trash.into(),
        }
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder of the snapshot at `height`.
    pub fn snapshot_dir(&self, height: u64) -> PathBuf {
        self.root.join(height.to_string())
    }

    /// Whether the chain owner should snapshot at `height`.
    pub fn is_due(height: u64, interval: u64) -> bool {
        height > 0 && interval > 0 && height % interval == 0
    }

    /// Write the three blobs for `height`, replacing an older snapshot at
    /// the same height.
    pub fn save(&self, height: u64, snapshot: &ChainSnapshot) -> Result<(), SnapshotError> {
        let staging = self.root.join(format!(".{}.staging", height));
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging)?;

        fs::write(
            staging.join(SPECTRUM_FILE),
            bincode::serialize(&snapshot.stake_spectrum)?,
        )?;
        fs::write(
            staging.join(ADDRESS_TABLE_FILE),
            bincode::serialize(&snapshot.known_addresses)?,
        )?;
        fs::write(
            staging.join(UTXO_CACHE_FILE),
            bincode::serialize(&snapshot.utxo_set)?,
        )?;

        let target = self.snapshot_dir(height);
        remove_dir_if_exists(&target)?;
        fs::rename(&staging, &target)?;
        debug!("[qc-13] Saved snapshot at height {}", height);
        Ok(())
    }

    /// Ascending heights of complete snapshots. Malformed folders are
    /// deleted along the way.
    pub fn list_heights(&self) -> Result<Vec<u64>, SnapshotError> {
        list_snapshot_heights(&self.root)
    }

    /// Read back the snapshot at `height`.
    pub fn load(&self, height: u64) -> Result<ChainSnapshot, SnapshotError> {
        let dir = self.snapshot_dir(height);
        if !is_complete(&dir) {
            return Err(SnapshotError::Missing(height));
        }
        let stake_spectrum: StakeSpectrum = bincode::deserialize(&fs::read(dir.join(SPECTRUM_FILE))?)?;
        let known_addresses: KnownAddressTable =
            bincode::deserialize(&fs::read(dir.join(ADDRESS_TABLE_FILE))?)?;
        let utxo_set: UtxoSet = bincode::deserialize(&fs::read(dir.join(UTXO_CACHE_FILE))?)?;
        Ok(ChainSnapshot {
            utxo_set,
            stake_spectrum,
            known_addresses,
        })
    }

    /// Save only when `height` lands on the snapshot interval. Returns
    /// whether a snapshot was written.
    pub fn maybe_save(
        &self,
        height: u64,
        interval: u64,
        snapshot: &ChainSnapshot,
    ) -> Result<bool, SnapshotError> {
        if !Self::is_due(height, interval) {
            return Ok(false);
        }
        self.save(height, snapshot)?;
        Ok(true)
    }

    /// Overwrite the chain state's UTXO set, stake spectrum and address
    /// table with the snapshot at `height`. Snapshots are left in place.
    pub fn rollback(&self, height: u64, chain: &dyn ChainState) -> Result<(), SnapshotError> {
        let snapshot = self.load(height)?;
        chain.restore_state(height, snapshot)?;
        info!("[qc-13] Rolled chain state back to snapshot {}", height);
        Ok(())
    }

    /// Delete every snapshot above `height`.
    pub fn prune_above(&self, height: u64) -> Result<usize, SnapshotError> {
        self.prune_where(|h| h > height)
    }

    /// Delete every snapshot below `height`.
    pub fn prune_below(&self, height: u64) -> Result<usize, SnapshotError> {
        self.prune_where(|h| h < height)
    }

    /// Keep only the newest `keep` snapshots.
    pub fn enforce_retention(&self, keep: usize) -> Result<usize, SnapshotError> {
        let heights = self.list_heights()?;
        if heights.len() <= keep {
            return Ok(0);
        }
        let cutoff = heights[heights.len() - keep.max(1)];
        let keep_none = keep == 0;
        self.prune_where(|h| h < cutoff || keep_none)
    }

    /// Move the snapshot at `height` to the trash.
    pub fn trash(&self, height: u64) -> Result<(), SnapshotError> {
        let from = self.snapshot_dir(height);
        if !from.is_dir() {
            return Err(SnapshotError::Missing(height));
        }
        fs::create_dir_all(&self.trash)?;
        let to = self.trash.join(height.to_string());
        remove_dir_if_exists(&to)?;
        fs::rename(from, to)?;
        Ok(())
    }

    /// Bring a trashed snapshot back.
    pub fn restore(&self, height: u64) -> Result<(), SnapshotError> {
        let from = self.trash.join(height.to_string());
        if !from.is_dir() {
            return Err(SnapshotError::Missing(height));
        }
        fs::create_dir_all(&self.root)?;
        let to = self.snapshot_dir(height);
        remove_dir_if_exists(&to)?;
        fs::rename(from, to)?;
        Ok(())
    }

    /// Permanently delete everything in the trash.
    pub fn empty_trash(&self) -> Result<(), SnapshotError> {
        remove_dir_if_exists(&self.trash)?;
        Ok(())
    }

    fn prune_where(&self, doomed: impl Fn(u64) -> bool) -> Result<usize, SnapshotError> {
        let mut removed = 0;
        for height in self.list_heights()?.into_iter().filter(|h| doomed(*h)) {
            remove_dir_if_exists(&self.snapshot_dir(height))?;
            removed += 1;
        }
        if removed > 0 {
            debug!("[qc-13] Pruned {} snapshots", removed);
        }
        Ok(removed)
    }
}

/// Scan a snapshot root, deleting malformed folders. Shared with the
/// checkpoint, whose archive embeds a snapshot root of its own.
pub(crate) fn list_snapshot_heights(root: &Path) -> Result<Vec<u64>, SnapshotError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut heights = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(height) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) else {
            continue;
        };
        if is_complete(&path) {
            heights.push(height);
        } else {
            warn!(
                "[qc-13] Snapshot {} is missing required files, deleting {}",
                height,
                path.display()
            );
            remove_dir_if_exists(&path)?;
        }
    }
    heights.sort_unstable();
    Ok(heights)
}

fn is_complete(dir: &Path) -> bool {
    REQUIRED_FILES.iter().all(|f| dir.join(f).is_file())
}
