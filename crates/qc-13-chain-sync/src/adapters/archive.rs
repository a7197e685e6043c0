//! Checkpoint archives.
//!
//! An archive is a zstd-compressed bincode bundle of files relative to a
//! checkpoint directory (`snapshots/...`, optionally `blocks/...` and
//! `blocks-info/...`). Its identity is the content hash of the snapshot
//! folders it carries, so two nodes holding the same snapshots publish the
//! same checkpoint hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use super::block_dir::remove_dir_if_exists;
use super::snapshot_store::{
    list_snapshot_heights, ADDRESS_TABLE_FILE, SPECTRUM_FILE, UTXO_CACHE_FILE,
};
use crate::domain::{ChainSyncError, CheckpointInfo, Hash};

const ARCHIVE_EXT: &str = "qca";
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveEntry {
    path: String,
    data: Vec<u8>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ArchiveBundle {
    entries: Vec<ArchiveEntry>,
}

/// Content hash over every complete snapshot folder under `snapshot_root`,
/// plus the highest snapshot height. `None` when there is no snapshot.
pub fn snapshot_content_hash(snapshot_root: &Path) -> Result<Option<CheckpointInfo>, ChainSyncError> {
    let heights = list_snapshot_heights(snapshot_root)?;
    let Some(&top) = heights.last() else {
        return Ok(None);
    };
    let mut hasher = Sha256::new();
    for height in &heights {
        hasher.update(height.to_le_bytes());
        let dir = snapshot_root.join(height.to_string());
        for name in [ADDRESS_TABLE_FILE, SPECTRUM_FILE, UTXO_CACHE_FILE] {
            let data = fs::read(dir.join(name))?;
            hasher.update(name.as_bytes());
            hasher.update((data.len() as u64).to_le_bytes());
            hasher.update(&data);
        }
    }
    Ok(Some(CheckpointInfo::new(top, hasher.finalize().into())))
}

/// Pack the listed subdirectories of `base` into one archive.
pub fn pack(base: &Path, subdirs: &[&str]) -> Result<Vec<u8>, ChainSyncError> {
    let mut bundle = ArchiveBundle::default();
    for sub in subdirs {
        collect_files(base, &base.join(sub), &mut bundle.entries)?;
    }
    bundle.entries.sort_by(|a, b| a.path.cmp(&b.path));
    let raw = bincode::serialize(&bundle)?;
    Ok(zstd::encode_all(&raw[..], ZSTD_LEVEL)?)
}

/// Unpack an archive into `dest`, refusing entries that escape it or that
/// inflate past `max_unpacked_bytes`. Returns the number of files written.
pub fn unpack(bytes: &[u8], dest: &Path, max_unpacked_bytes: u64) -> Result<usize, ChainSyncError> {
    let mut raw = Vec::new();
    zstd::stream::read::Decoder::new(bytes)?
        .take(max_unpacked_bytes + 1)
        .read_to_end(&mut raw)?;
    if raw.len() as u64 > max_unpacked_bytes {
        return Err(ChainSyncError::ProtocolViolation(format!(
            "Archive inflates past {} bytes",
            max_unpacked_bytes
        )));
    }
    let bundle: ArchiveBundle = bincode::deserialize(&raw)?;

    for entry in &bundle.entries {
        let relative = safe_relative_path(&entry.path)?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, &entry.data)?;
    }
    Ok(bundle.entries.len())
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<ArchiveEntry>) -> Result<(), ChainSyncError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
            continue;
        }
        let relative = path
            .strip_prefix(base)
            .map_err(|e| ChainSyncError::Checkpoint(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.push(ArchiveEntry {
            path: name,
            data: fs::read(&path)?,
        });
    }
    Ok(())
}

fn safe_relative_path(path: &str) -> Result<PathBuf, ChainSyncError> {
    let candidate = PathBuf::from(path);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if path.is_empty() || escapes {
        return Err(ChainSyncError::ProtocolViolation(format!(
            "Archive entry '{}' escapes the checkpoint directory",
            path
        )));
    }
    Ok(candidate)
}

/// Durable archive published for other peers. Holds at most one file; a
/// directory with more than one is malformed and emptied on scan.
#[derive(Clone, Debug)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    /// Open the archive directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name(info: &CheckpointInfo) -> String {
        format!("{}-{}.{}", info.height, hex::encode(info.hash), ARCHIVE_EXT)
    }

    /// The published checkpoint and its file.
    pub fn current(&self) -> Result<Option<(CheckpointInfo, PathBuf)>, ChainSyncError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ARCHIVE_EXT) {
                found.push(path);
            }
        }
        match found.len() {
            0 => Ok(None),
            1 => {
                let path = found.remove(0);
                match parse_file_name(&path) {
                    Some(info) => Ok(Some((info, path))),
                    None => {
                        warn!("[qc-13] Unrecognised archive {}, deleting", path.display());
                        fs::remove_file(&path)?;
                        Ok(None)
                    }
                }
            }
            n => {
                warn!(
                    "[qc-13] {} archives in {}, expected one; clearing",
                    n,
                    self.dir.display()
                );
                for path in found {
                    fs::remove_file(path)?;
                }
                Ok(None)
            }
        }
    }

    /// Replace the published archive.
    pub fn persist(&self, info: &CheckpointInfo, bytes: &[u8]) -> Result<PathBuf, ChainSyncError> {
        remove_dir_if_exists(&self.dir)?;
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(info));
        fs::write(&path, bytes)?;
        debug!(
            "[qc-13] Published checkpoint {} ({} bytes)",
            info.height,
            bytes.len()
        );
        Ok(path)
    }

    /// Archive bytes for `hash`, if that is the published checkpoint.
    pub fn read(&self, hash: &Hash) -> Result<Option<Vec<u8>>, ChainSyncError> {
        match self.current()? {
            Some((info, path)) if &info.hash == hash => Ok(Some(fs::read(path)?)),
            _ => Ok(None),
        }
    }
}

fn parse_file_name(path: &Path) -> Option<CheckpointInfo> {
    let stem = path.file_stem()?.to_str()?;
    let (height, hash_hex) = stem.split_once('-')?;
    let bytes = hex::decode(hash_hex).ok()?;
    let hash: Hash = bytes.try_into().ok()?;
    Some(CheckpointInfo::new(height.parse().ok()?, hash))
}
