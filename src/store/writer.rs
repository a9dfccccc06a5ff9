//! Snapshot writer - producer side of the per-module cache format

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::store::snapshot::SnapshotHeader;

/// Writer for per-module cache snapshots.
///
/// Entries accumulate in sorted order and go out in a single pass, so two
/// writers fed the same relation produce byte-identical files.
pub struct CacheWriter {
    path: PathBuf,
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl CacheWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    /// Queue values under a key, merging with anything already queued.
    pub fn insert<I, S>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = self.entries.entry(key.to_string()).or_default();
        set.extend(values.into_iter().map(Into::into));
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Write the snapshot, replacing any previous file at the path.
    pub fn write(self) -> Result<()> {
        // Payload first: the header needs its length and checksum.
        let mut payload = Vec::new();
        for (key, values) in &self.entries {
            payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
            payload.extend_from_slice(key.as_bytes());
            payload.extend_from_slice(&(values.len() as u32).to_le_bytes());
            for value in values {
                payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
                payload.extend_from_slice(value.as_bytes());
            }
        }

        let checksum = *blake3::hash(&payload).as_bytes();
        let header = SnapshotHeader::new(self.entries.len() as u64, payload.len() as u64, checksum);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(&header.magic)?;
        writer.write_all(&header.version.to_le_bytes())?;
        writer.write_all(&header.entry_count.to_le_bytes())?;
        writer.write_all(&header.payload_len.to_le_bytes())?;
        writer.write_all(&header.checksum)?;
        writer.write_all(&payload)?;
        writer.flush()?;

        tracing::debug!(
            "Written {} entries to {:?}",
            self.entries.len(),
            self.path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::store::snapshot::{ModuleCache, HEADER_SIZE_ON_DISK};
    use tempfile::TempDir;

    fn write_sample(path: &Path) {
        let mut writer = CacheWriter::new(path);
        writer.insert("a.b.C", ["a.b.D", "a.b.E"]);
        writer.insert("a.b.D", ["a.b.F"]);
        writer.write().unwrap();
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtypes.bin");
        write_sample(&path);

        let cache = ModuleCache::open(&path).unwrap();
        assert_eq!(cache.entry_count(), 2);

        let entries: Vec<_> = cache.entries().map(|e| e.unwrap()).collect();
        assert_eq!(entries[0].0, "a.b.C");
        assert_eq!(entries[0].1, vec!["a.b.D", "a.b.E"]);
        assert_eq!(entries[1].0, "a.b.D");
        assert_eq!(entries[1].1, vec!["a.b.F"]);
    }

    #[test]
    fn test_insert_merges_and_dedups() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtypes.bin");

        let mut writer = CacheWriter::new(&path);
        writer.insert("a.b.C", ["a.b.D"]);
        writer.insert("a.b.C", ["a.b.D", "a.b.E"]);
        assert_eq!(writer.entry_count(), 1);
        writer.write().unwrap();

        let cache = ModuleCache::open(&path).unwrap();
        let entries: Vec<_> = cache.entries().map(|e| e.unwrap()).collect();
        assert_eq!(entries[0].1, vec!["a.b.D", "a.b.E"]);
    }

    #[test]
    fn test_deterministic_bytes() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.bin");
        let second = dir.path().join("second.bin");

        // Same relation, different insertion order.
        let mut writer = CacheWriter::new(&first);
        writer.insert("a.b.C", ["a.b.E", "a.b.D"]);
        writer.insert("a.b.A", ["a.b.B"]);
        writer.write().unwrap();

        let mut writer = CacheWriter::new(&second);
        writer.insert("a.b.A", ["a.b.B"]);
        writer.insert("a.b.C", ["a.b.D"]);
        writer.insert("a.b.C", ["a.b.E"]);
        writer.write().unwrap();

        assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());
    }

    #[test]
    fn test_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lookups.bin");
        CacheWriter::new(&path).write().unwrap();

        let cache = ModuleCache::open(&path).unwrap();
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.entries().count(), 0);
    }

    #[test]
    fn test_flipped_payload_byte_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtypes.bin");
        write_sample(&path);

        let mut bytes = std::fs::read(&path).unwrap();
        let idx = HEADER_SIZE_ON_DISK + 3;
        bytes[idx] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = ModuleCache::open(&path).unwrap_err();
        assert!(matches!(err, IndexError::Corrupted(_)));
    }

    #[test]
    fn test_truncated_file_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtypes.bin");
        write_sample(&path);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let err = ModuleCache::open(&path).unwrap_err();
        assert!(matches!(err, IndexError::Corrupted(_)));
    }

    #[test]
    fn test_bad_magic_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtypes.bin");
        write_sample(&path);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, &bytes).unwrap();

        let err = ModuleCache::open(&path).unwrap_err();
        assert!(matches!(err, IndexError::InvalidFormat(_)));
    }

    #[test]
    fn test_tiny_file_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtypes.bin");
        std::fs::write(&path, b"CR").unwrap();

        let err = ModuleCache::open(&path).unwrap_err();
        assert!(matches!(err, IndexError::InvalidFormat(_)));
    }

    #[test]
    fn test_empty_file_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtypes.bin");
        std::fs::write(&path, b"").unwrap();

        let err = ModuleCache::open(&path).unwrap_err();
        assert!(matches!(err, IndexError::InvalidFormat(_)));
    }
}
