//! Bulk ingest of per-module cache snapshots
//!
//! The external compiler leaves one `kotlin-cache` directory per module
//! under `{root}/{build_target_type}/{module}`. Ingest walks every build
//! root, opens each snapshot read-only and merges its entries into the
//! unified stores. Modules are merged in parallel; set union is commutative,
//! so the resulting index does not depend on merge order.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::error::Result;
use crate::index::{
    IndexStorage, LOOKUPS_CACHE_FILE, MODULE_CACHE_DIR, SUBTYPES_CACHE_FILE,
};
use crate::names;
use crate::store::{ModuleCache, RelationStore};

/// What one ingest pass saw and produced.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Sorted, deduplicated names of every module that had a cache directory.
    pub modules: Vec<String>,
    pub subtype_keys: usize,
    pub usage_keys: usize,
    pub elapsed: Duration,
}

/// Snapshot files found for one module under one build target type.
#[derive(Debug, Clone)]
struct ModuleCacheFiles {
    module: String,
    subtypes: Option<PathBuf>,
    lookups: Option<PathBuf>,
}

pub(crate) fn run(storage: &IndexStorage, roots: &[PathBuf]) -> Result<IngestReport> {
    let started = Instant::now();
    let discovered = discover(roots)?;

    discovered
        .par_iter()
        .try_for_each(|files| ingest_module(storage, files))?;

    let mut modules: Vec<String> = discovered.into_iter().map(|f| f.module).collect();
    modules.sort();
    modules.dedup();

    let report = IngestReport {
        modules,
        subtype_keys: storage.subtype_key_count(),
        usage_keys: storage.usage_key_count(),
        elapsed: started.elapsed(),
    };
    tracing::info!(
        "Ingested {} module cache(s): {} subtype keys, {} usage keys in {:?}",
        report.modules.len(),
        report.subtype_keys,
        report.usage_keys,
        report.elapsed
    );
    Ok(report)
}

/// Walk `{root}/{build_target_type}/{module}/kotlin-cache` for every root.
///
/// Roots that do not exist are skipped, not errors: a clean checkout has no
/// build output at all. A module seen without snapshot files still counts as
/// discovered, since its existence matters for dirty-scope setup.
fn discover(roots: &[PathBuf]) -> Result<Vec<ModuleCacheFiles>> {
    let mut found = Vec::new();
    for root in roots {
        if !root.is_dir() {
            tracing::debug!("Skipping missing build root {:?}", root);
            continue;
        }
        for target_dir in sorted_subdirs(root)? {
            for module_dir in sorted_subdirs(&target_dir)? {
                let cache_dir = module_dir.join(MODULE_CACHE_DIR);
                if !cache_dir.is_dir() {
                    continue;
                }
                let Some(module) = module_dir.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                found.push(ModuleCacheFiles {
                    module: module.to_string(),
                    subtypes: existing(cache_dir.join(SUBTYPES_CACHE_FILE)),
                    lookups: existing(cache_dir.join(LOOKUPS_CACHE_FILE)),
                });
            }
        }
    }
    found.sort_by(|a, b| a.module.cmp(&b.module));
    Ok(found)
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

fn ingest_module(storage: &IndexStorage, files: &ModuleCacheFiles) -> Result<()> {
    if let Some(path) = &files.subtypes {
        merge_snapshot(storage.subtypes_store(), path, true)?;
    }
    if let Some(path) = &files.lookups {
        merge_snapshot(storage.usages_store(), path, false)?;
    }
    Ok(())
}

/// Merge one snapshot into a store.
///
/// Keys are symbol names in both relations and get canonicalized to dotted
/// form. Values are names only in the subtypes relation (`normalize_values`);
/// file paths pass through untouched.
fn merge_snapshot(store: &RelationStore, path: &Path, normalize_values: bool) -> Result<()> {
    let cache = ModuleCache::open(path)?;
    for entry in cache.entries() {
        let (raw_key, raw_values) = entry?;
        let key = names::binary_to_dotted(raw_key);
        if normalize_values {
            let normalized: Vec<String> = raw_values
                .iter()
                .map(|v| names::binary_to_dotted(v))
                .collect();
            let refs: Vec<&str> = normalized.iter().map(String::as_str).collect();
            store.add(&key, &refs)?;
        } else {
            store.add(&key, &raw_values)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CacheWriter;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn write_cache(
        root: &Path,
        target: &str,
        module: &str,
        file_name: &str,
        entries: &[(&str, &[&str])],
    ) {
        let cache_dir = root.join(target).join(module).join(MODULE_CACHE_DIR);
        fs::create_dir_all(&cache_dir).unwrap();
        let mut writer = CacheWriter::new(cache_dir.join(file_name));
        for (key, values) in entries {
            writer.insert(key, values.iter().copied());
        }
        writer.write().unwrap();
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_ingest_merges_across_modules() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        write_cache(
            &root,
            "production",
            "core",
            SUBTYPES_CACHE_FILE,
            &[("p.Base", &["p.CoreImpl"])],
        );
        write_cache(
            &root,
            "production",
            "app",
            SUBTYPES_CACHE_FILE,
            &[("p.Base", &["p.AppImpl"])],
        );

        let storage = IndexStorage::create(&tmp.path().join("index")).unwrap();
        let report = storage.ingest(&[root]).unwrap();

        assert_eq!(report.modules, vec!["app".to_string(), "core".to_string()]);
        assert_eq!(
            storage.direct_subtypes("p.Base").unwrap(),
            set(&["p.AppImpl", "p.CoreImpl"])
        );
    }

    #[test]
    fn test_ingest_normalizes_binary_names() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        write_cache(
            &root,
            "production",
            "core",
            SUBTYPES_CACHE_FILE,
            &[("p.Outer$Base", &["p.Outer$Impl"])],
        );
        write_cache(
            &root,
            "production",
            "core",
            LOOKUPS_CACHE_FILE,
            &[("p.Outer$Base", &["src/main/Outer.kt"])],
        );

        let storage = IndexStorage::create(&tmp.path().join("index")).unwrap();
        storage.ingest(&[root]).unwrap();

        // Keys and subtype values are canonical dotted names.
        assert_eq!(
            storage.direct_subtypes("p.Outer.Base").unwrap(),
            set(&["p.Outer.Impl"])
        );
        // File path values pass through untouched.
        assert_eq!(
            storage.referencing_files("p.Outer.Base").unwrap(),
            set(&["src/main/Outer.kt"])
        );
    }

    #[test]
    fn test_ingest_skips_missing_roots() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        write_cache(
            &root,
            "production",
            "core",
            SUBTYPES_CACHE_FILE,
            &[("p.Base", &["p.Impl"])],
        );

        let storage = IndexStorage::create(&tmp.path().join("index")).unwrap();
        let report = storage
            .ingest(&[tmp.path().join("never-built"), root])
            .unwrap();

        assert_eq!(report.modules, vec!["core".to_string()]);
        assert_eq!(storage.direct_subtypes("p.Base").unwrap().len(), 1);
    }

    #[test]
    fn test_module_under_two_targets_listed_once() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        write_cache(
            &root,
            "production",
            "core",
            SUBTYPES_CACHE_FILE,
            &[("p.Base", &["p.Impl"])],
        );
        write_cache(
            &root,
            "test",
            "core",
            SUBTYPES_CACHE_FILE,
            &[("p.Base", &["p.TestImpl"])],
        );

        let storage = IndexStorage::create(&tmp.path().join("index")).unwrap();
        let report = storage.ingest(&[root]).unwrap();

        assert_eq!(report.modules, vec!["core".to_string()]);
        assert_eq!(
            storage.direct_subtypes("p.Base").unwrap(),
            set(&["p.Impl", "p.TestImpl"])
        );
    }

    #[test]
    fn test_module_without_cache_dir_ignored() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        fs::create_dir_all(root.join("production").join("plain-java")).unwrap();
        write_cache(
            &root,
            "production",
            "core",
            SUBTYPES_CACHE_FILE,
            &[("p.Base", &["p.Impl"])],
        );

        let storage = IndexStorage::create(&tmp.path().join("index")).unwrap();
        let report = storage.ingest(&[root]).unwrap();

        assert_eq!(report.modules, vec!["core".to_string()]);
    }

    #[test]
    fn test_corrupt_snapshot_fails_ingest() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        write_cache(
            &root,
            "production",
            "core",
            SUBTYPES_CACHE_FILE,
            &[("p.Base", &["p.Impl"])],
        );

        let snapshot = root
            .join("production")
            .join("core")
            .join(MODULE_CACHE_DIR)
            .join(SUBTYPES_CACHE_FILE);
        let mut bytes = fs::read(&snapshot).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&snapshot, &bytes).unwrap();

        let storage = IndexStorage::create(&tmp.path().join("index")).unwrap();
        assert!(storage.ingest(&[root]).is_err());
    }

    #[test]
    fn test_repeated_ingest_same_answers() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        write_cache(
            &root,
            "production",
            "core",
            SUBTYPES_CACHE_FILE,
            &[("p.Base", &["p.B", "p.C"]), ("p.B", &["p.D"])],
        );

        let first = IndexStorage::create(&tmp.path().join("first")).unwrap();
        first.ingest(std::slice::from_ref(&root)).unwrap();
        let second = IndexStorage::create(&tmp.path().join("second")).unwrap();
        second.ingest(std::slice::from_ref(&root)).unwrap();

        for key in ["p.Base", "p.B", "p.D"] {
            assert_eq!(
                first.direct_subtypes(key).unwrap(),
                second.direct_subtypes(key).unwrap()
            );
        }
    }
}
