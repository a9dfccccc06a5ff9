//! Unified index storage
//!
//! Pairs the two one-to-many relations the index answers queries from: class
//! name -> direct subtypes, and symbol name -> referencing files. Both live
//! side by side in one directory and are opened, closed and discarded
//! together. Keys are canonical dotted names; normalization happens once at
//! ingest, never at query time.

pub mod ingest;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::store::RelationStore;

pub use ingest::IngestReport;

/// Directory inside a module's build output that holds its cache snapshots.
pub const MODULE_CACHE_DIR: &str = "kotlin-cache";

/// Snapshot file for the class -> direct subtypes relation.
pub const SUBTYPES_CACHE_FILE: &str = "subtypes.bin";

/// Snapshot file for the symbol -> referencing files relation.
pub const LOOKUPS_CACHE_FILE: &str = "lookups.bin";

/// Store names inside the index directory.
pub const SUBTYPES_STORE: &str = "subtypes";
pub const USAGES_STORE: &str = "usages";

/// The unified on-disk index.
pub struct IndexStorage {
    dir: PathBuf,
    subtypes: RelationStore,
    usages: RelationStore,
}

impl IndexStorage {
    /// Create a fresh, empty index at `dir`, sweeping stale files first.
    pub fn create(dir: &Path) -> Result<Self> {
        let subtypes = RelationStore::create(dir, SUBTYPES_STORE)?;
        let usages = match RelationStore::create(dir, USAGES_STORE) {
            Ok(store) => store,
            Err(e) => {
                subtypes.close_and_clean();
                return Err(e);
            }
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            subtypes,
            usages,
        })
    }

    /// Re-open an index a previous session left behind.
    pub fn reopen(dir: &Path) -> Result<Self> {
        let subtypes = RelationStore::reopen(dir, SUBTYPES_STORE)?;
        let usages = match RelationStore::reopen(dir, USAGES_STORE) {
            Ok(store) => store,
            Err(e) => {
                let _ = subtypes.close();
                return Err(e);
            }
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            subtypes,
            usages,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Merge every per-module cache snapshot under the given build roots.
    pub fn ingest(&self, roots: &[PathBuf]) -> Result<IngestReport> {
        ingest::run(self, roots)
    }

    /// Direct subtypes of a class, keyed by its dotted name.
    pub fn direct_subtypes(&self, name: &str) -> Result<BTreeSet<String>> {
        self.subtypes.get(name)
    }

    /// Files referencing a symbol, keyed by its dotted name.
    pub fn referencing_files(&self, name: &str) -> Result<BTreeSet<String>> {
        self.usages.get(name)
    }

    pub fn subtype_key_count(&self) -> usize {
        self.subtypes.key_count()
    }

    pub fn usage_key_count(&self) -> usize {
        self.usages.key_count()
    }

    pub(crate) fn subtypes_store(&self) -> &RelationStore {
        &self.subtypes
    }

    pub(crate) fn usages_store(&self) -> &RelationStore {
        &self.usages
    }

    /// Force both stores to disk.
    pub fn flush(&self) -> Result<()> {
        self.subtypes.flush()?;
        self.usages.flush()
    }

    /// Close both stores, retaining their files for a later reopen.
    pub fn close(self) -> Result<()> {
        let IndexStorage {
            subtypes, usages, ..
        } = self;
        let first = subtypes.close();
        usages.close()?;
        first
    }

    /// Close both stores and delete their files.
    pub fn close_and_clean(self) {
        let IndexStorage {
            subtypes, usages, ..
        } = self;
        subtypes.close_and_clean();
        usages.close_and_clean();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_close_reopen() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::create(dir.path()).unwrap();
        storage.subtypes_store().put("a.A", &["a.B"]).unwrap();
        storage.usages_store().put("a.A", &["src/A.kt"]).unwrap();
        storage.close().unwrap();

        let storage = IndexStorage::reopen(dir.path()).unwrap();
        assert_eq!(storage.direct_subtypes("a.A").unwrap().len(), 1);
        assert_eq!(storage.referencing_files("a.A").unwrap().len(), 1);
    }

    #[test]
    fn test_close_and_clean_removes_both_stores() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::create(dir.path()).unwrap();
        storage.subtypes_store().put("a.A", &["a.B"]).unwrap();
        storage.close_and_clean();

        assert!(!dir.path().join(SUBTYPES_STORE).exists());
        assert!(!dir.path().join(USAGES_STORE).exists());
        assert!(IndexStorage::reopen(dir.path()).is_err());
    }

    #[test]
    fn test_reopen_without_create_fails() {
        let dir = TempDir::new().unwrap();
        assert!(IndexStorage::reopen(dir.path()).is_err());
    }

    #[test]
    fn test_flush_then_reopen_sees_writes() {
        let dir = TempDir::new().unwrap();
        let storage = IndexStorage::create(dir.path()).unwrap();
        storage.subtypes_store().put("a.A", &["a.B"]).unwrap();
        storage.usages_store().put("a.A", &["src/A.kt"]).unwrap();
        storage.flush().unwrap();
        // No orderly close: the flush alone must leave reopenable files.
        drop(storage);

        let storage = IndexStorage::reopen(dir.path()).unwrap();
        assert_eq!(storage.direct_subtypes("a.A").unwrap().len(), 1);
        assert_eq!(storage.referencing_files("a.A").unwrap().len(), 1);
    }
}
