//! Batch-chunked block directory.
//!
//! Blocks live one file per index, grouped into batch directories of
//! `per_batch` consecutive indices:
//!
//! ```text
//! <root>/<batch_start>/<index>.bin
//! ```
//!
//! Both the live chain directories and the checkpoint's working directories
//! use this layout, so migration is a rename and a divergence only costs one
//! batch.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const BLOCK_EXT: &str = "bin";

/// One directory of batch-chunked block files.
#[derive(Clone, Debug)]
pub struct BlockDirectory {
    root: PathBuf,
    per_batch: u64,
}

impl BlockDirectory {
    /// Open (or lazily create) a block directory.
    pub fn new(root: impl Into<PathBuf>, per_batch: u64) -> Self {
        Self {
            root: root.into(),
            per_batch: per_batch.max(1),
        }
    }

    /// Directory root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// First index of the batch holding `index`.
    pub fn batch_start(&self, index: u64) -> u64 {
        index / self.per_batch * self.per_batch
    }

    fn batch_dir(&self, batch_start: u64) -> PathBuf {
        self.root.join(batch_start.to_string())
    }

    fn file_path(&self, index: u64) -> PathBuf {
        self.batch_dir(self.batch_start(index))
            .join(format!("{}.{}", index, BLOCK_EXT))
    }

    /// Persist one block file.
    pub fn write(&self, index: u64, bytes: &[u8]) -> io::Result<()> {
        let path = self.file_path(index);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(tmp, path)
    }

    /// Read one block file.
    pub fn read(&self, index: u64) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.file_path(index)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether a block file exists.
    pub fn contains(&self, index: u64) -> bool {
        self.file_path(index).is_file()
    }

    /// Every index present on disk.
    pub fn indices(&self) -> io::Result<BTreeSet<u64>> {
        let mut found = BTreeSet::new();
        let batches = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e),
        };
        for batch in batches {
            let batch = batch?;
            if !batch.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(batch.path())? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(BLOCK_EXT) {
                    continue;
                }
                if let Some(index) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse().ok())
                {
                    found.insert(index);
                }
            }
        }
        Ok(found)
    }

    /// Highest index `h` such that every block in `0..=h` is present.
    pub fn highest_contiguous(&self) -> io::Result<Option<u64>> {
        let indices = self.indices()?;
        let mut highest = None;
        for (expected, index) in indices.into_iter().enumerate() {
            if index != expected as u64 {
                break;
            }
            highest = Some(index);
        }
        Ok(highest)
    }

    /// Erase the whole batch holding `index`.
    pub fn erase_batch(&self, index: u64) -> io::Result<()> {
        remove_dir_if_exists(&self.batch_dir(self.batch_start(index)))
    }

    /// Delete every block above `height`.
    pub fn remove_above(&self, height: u64) -> io::Result<usize> {
        let mut removed = 0;
        for index in self.indices()?.into_iter().filter(|i| *i > height) {
            fs::remove_file(self.file_path(index))?;
            removed += 1;
        }
        self.prune_empty_batches()?;
        Ok(removed)
    }

    /// Move blocks in `start..=end` into `target`, leaving other files alone.
    pub fn move_range_into(&self, target: &BlockDirectory, start: u64, end: u64) -> io::Result<usize> {
        let mut moved = 0;
        for index in self.indices()?.range(start..=end) {
            let to = target.file_path(*index);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(self.file_path(*index), to)?;
            moved += 1;
        }
        self.prune_empty_batches()?;
        Ok(moved)
    }

    /// Remove the whole directory.
    pub fn clear(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.root)
    }

    fn prune_empty_batches(&self) -> io::Result<()> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() && fs::read_dir(&path)?.next().is_none() {
                fs::remove_dir(&path)?;
            }
        }
        Ok(())
    }
}

/// `remove_dir_all` that treats a missing directory as success.
pub(crate) fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fill(dir: &BlockDirectory, range: std::ops::RangeInclusive<u64>) {
        for i in range {
            dir.write(i, &[i as u8]).unwrap();
        }
    }

    #[test]
    fn test_write_read_and_batches() {
        let tmp = TempDir::new().unwrap();
        let dir = BlockDirectory::new(tmp.path().join("blocks"), 10);
        fill(&dir, 0..=12);
        assert_eq!(dir.read(12).unwrap(), Some(vec![12]));
        assert_eq!(dir.read(13).unwrap(), None);
        assert!(tmp.path().join("blocks/10/12.bin").is_file());
        assert_eq!(dir.highest_contiguous().unwrap(), Some(12));
    }

    #[test]
    fn test_highest_contiguous_stops_at_gap() {
        let tmp = TempDir::new().unwrap();
        let dir = BlockDirectory::new(tmp.path(), 10);
        fill(&dir, 0..=4);
        fill(&dir, 6..=8);
        assert_eq!(dir.highest_contiguous().unwrap(), Some(4));

        let empty = BlockDirectory::new(tmp.path().join("none"), 10);
        assert_eq!(empty.highest_contiguous().unwrap(), None);
    }

    #[test]
    fn test_erase_batch_only_touches_that_batch() {
        let tmp = TempDir::new().unwrap();
        let dir = BlockDirectory::new(tmp.path(), 10);
        fill(&dir, 0..=25);
        dir.erase_batch(14).unwrap();
        assert!(dir.contains(9));
        assert!(!dir.contains(10));
        assert!(!dir.contains(19));
        assert!(dir.contains(20));
        assert_eq!(dir.highest_contiguous().unwrap(), Some(9));
    }

    #[test]
    fn test_move_range_and_remove_above() {
        let tmp = TempDir::new().unwrap();
        let live = BlockDirectory::new(tmp.path().join("live"), 10);
        let target = BlockDirectory::new(tmp.path().join("cp"), 10);
        fill(&live, 0..=30);

        assert_eq!(live.move_range_into(&target, 0, 14).unwrap(), 15);
        assert_eq!(target.highest_contiguous().unwrap(), Some(14));
        assert!(!live.contains(14));
        assert!(live.contains(15));

        assert_eq!(live.remove_above(20).unwrap(), 10);
        assert!(live.contains(20));
        assert!(!live.contains(21));
        assert!(!tmp.path().join("live/30").exists());
    }
}
