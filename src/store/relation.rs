//! Mutable one-to-many stores backed by sled
//!
//! Keys are symbol names, values are deduplicated string sets (type names or
//! file paths). A store survives process restarts and tolerates concurrent
//! readers; all mutation goes through atomic read-modify-write on the tree.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Version of the value encoding inside the sled tree.
pub const STORE_FORMAT_VERSION: u16 = 1;

/// Sidecar metadata written next to the sled tree on creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub format_version: u16,
    pub created_at: u64,
}

impl StoreMeta {
    fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            format_version: STORE_FORMAT_VERSION,
            created_at: now,
        }
    }
}

/// One named one-to-many store.
///
/// Lives at `dir/name` (the sled tree) plus a `dir/name.meta.json` sidecar.
/// Methods take `&self`; sled handles cross-thread access internally, so the
/// store can be shared for parallel ingest.
#[derive(Debug)]
pub struct RelationStore {
    name: String,
    db_path: PathBuf,
    meta_path: PathBuf,
    db: sled::Db,
}

impl RelationStore {
    /// Create a fresh store under `dir/name`, first deleting any leftover
    /// files from earlier sessions, half-written ones included.
    pub fn create(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let removed = remove_store_files(dir, name)?;
        if removed > 0 {
            tracing::warn!(
                "Removed {} stale file(s) for store '{}' in {:?}",
                removed,
                name,
                dir
            );
        }
        let db_path = dir.join(name);
        let meta_path = meta_path_for(dir, name);
        let db = open_sled(&db_path)?;
        serde_json::to_writer_pretty(fs::File::create(&meta_path)?, &StoreMeta::now())?;
        Ok(Self {
            name: name.to_string(),
            db_path,
            meta_path,
            db,
        })
    }

    /// Re-open a store left behind by [`close`](Self::close), without
    /// touching its content.
    pub fn reopen(dir: &Path, name: &str) -> Result<Self> {
        let db_path = dir.join(name);
        let meta_path = meta_path_for(dir, name);
        if !db_path.is_dir() {
            return Err(IndexError::Corrupted(format!(
                "store '{}' is missing from {:?}",
                name, dir
            )));
        }
        let meta_file = fs::File::open(&meta_path).map_err(|e| {
            IndexError::Corrupted(format!("store '{}' has no readable metadata: {}", name, e))
        })?;
        let meta: StoreMeta = serde_json::from_reader(meta_file).map_err(|e| {
            IndexError::Corrupted(format!("store '{}' metadata is malformed: {}", name, e))
        })?;
        if meta.format_version != STORE_FORMAT_VERSION {
            return Err(IndexError::InvalidFormat(format!(
                "store '{}' has format version {}, expected {}",
                name, meta.format_version, STORE_FORMAT_VERSION
            )));
        }
        let db = open_sled(&db_path)?;
        Ok(Self {
            name: name.to_string(),
            db_path,
            meta_path,
            db,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the value set of a key. Values are deduplicated and sorted.
    pub fn put(&self, key: &str, values: &[&str]) -> Result<()> {
        let set: BTreeSet<&str> = values.iter().copied().collect();
        let encoded = bincode::serialize(&set)?;
        self.db.insert(key.as_bytes(), encoded)?;
        Ok(())
    }

    /// Merge values into a key's set without dropping existing ones.
    ///
    /// Concurrent adders race through compare-and-swap and retry; set union
    /// is commutative, so the final state does not depend on who wins.
    pub fn add(&self, key: &str, values: &[&str]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        loop {
            let current = self.db.get(key.as_bytes())?;
            let mut set: BTreeSet<String> = match &current {
                Some(bytes) => decode_values(bytes)?,
                None => BTreeSet::new(),
            };
            let before = set.len();
            set.extend(values.iter().map(|v| v.to_string()));
            if set.len() == before && current.is_some() {
                // Everything already present, no write needed.
                return Ok(());
            }
            let encoded = bincode::serialize(&set)?;
            match self
                .db
                .compare_and_swap(key.as_bytes(), current, Some(encoded))?
            {
                Ok(()) => return Ok(()),
                Err(_) => continue, // lost a race with another writer
            }
        }
    }

    /// The value set of a key; empty when the key has never been written.
    pub fn get(&self, key: &str) -> Result<BTreeSet<String>> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => decode_values(&bytes),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Lazily walk the transitive closure of a key.
    ///
    /// Values of the seed come out first, then values-of-values, each key
    /// expanded at most once per walk. The seed itself is only yielded when
    /// some value chain leads back to it. Every call starts a fresh walk, so
    /// the iterator can be dropped and restarted at no cost.
    pub fn get_deep(&self, key: &str) -> DeepValues<'_> {
        DeepValues {
            store: self,
            frontier: VecDeque::from([key.to_string()]),
            expanded: HashSet::new(),
            seen: HashSet::new(),
            ready: VecDeque::new(),
        }
    }

    /// Number of keys with a stored value set.
    pub fn key_count(&self) -> usize {
        self.db.len()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Flush and close, leaving all files on disk for a later [`reopen`](Self::reopen).
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Close the store and delete its files.
    ///
    /// Never fails: cleanup problems are logged and swallowed, since the
    /// caller is already discarding the data.
    pub fn close_and_clean(self) {
        let RelationStore {
            name,
            db_path,
            meta_path: _,
            db,
        } = self;
        drop(db);
        if let Some(dir) = db_path.parent() {
            if let Err(e) = remove_store_files(dir, &name) {
                tracing::warn!("Failed to clean store '{}' in {:?}: {}", name, dir, e);
            }
        }
    }
}

/// Lazy breadth-first walk over a store, following values as keys.
pub struct DeepValues<'a> {
    store: &'a RelationStore,
    frontier: VecDeque<String>,
    expanded: HashSet<String>,
    seen: HashSet<String>,
    ready: VecDeque<String>,
}

impl Iterator for DeepValues<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.ready.pop_front() {
                return Some(Ok(value));
            }
            let key = self.frontier.pop_front()?;
            if !self.expanded.insert(key.clone()) {
                continue;
            }
            match self.store.get(&key) {
                Ok(values) => {
                    for value in values {
                        if self.seen.insert(value.clone()) {
                            self.frontier.push_back(value.clone());
                            self.ready.push_back(value);
                        }
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn meta_path_for(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.meta.json", name))
}

fn open_sled(path: &Path) -> Result<sled::Db> {
    sled::open(path).map_err(|e| match e {
        sled::Error::Corruption { .. } => {
            IndexError::Corrupted(format!("sled tree at {:?} is corrupted", path))
        }
        other => IndexError::Storage(other),
    })
}

fn decode_values(bytes: &[u8]) -> Result<BTreeSet<String>> {
    bincode::deserialize(bytes)
        .map_err(|e| IndexError::Corrupted(format!("undecodable value set: {}", e)))
}

/// Remove every on-disk trace of `dir/name`: the sled tree itself plus any
/// `name.*` sidecar or temp file. Returns the number of entries removed.
fn remove_store_files(dir: &Path, name: &str) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(0), // directory gone means nothing to remove
    };
    let prefix = format!("{}.", name);
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name != name && !file_name.starts_with(&prefix) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}
