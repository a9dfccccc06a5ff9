//! Reference index service - lifecycle, queries, degradation
//!
//! One instance per project; no global state. Consistency with the external
//! incremental compiler is event-driven: the build pipeline announces
//! session boundaries, file watchers mark modules dirty, and every query
//! first checks whether the index may answer at all. "Unknown" (`None`) is
//! always a safe answer - callers fall back to their slow path - and the
//! service never panics a caller over a bad index file.

pub mod subtypes;
pub mod worker;


use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::dirty::DirtyScope;
use crate::error::IndexError;
use crate::index::IndexStorage;
use crate::names::QualifiedName;

pub use subtypes::{KotlinProvider, Language, SubtypeProvider};

use subtypes::collect_subtypes;
use worker::{IngestWorker, Job};

// Debug logging macro - enabled via REFINDEX_DEBUG=1
macro_rules! debug_log {
    ($($arg:tt)*) => {
        if std::env::var("REFINDEX_DEBUG").is_ok() {
            eprintln!("[REFINDEX DEBUG] {}", format!($($arg)*));
        }
    };
}
pub(crate) use debug_log;

/// Where a project keeps its index and where the compiler leaves build
/// output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPaths {
    /// Directory owning the unified stores. Exclusively ours: nothing else
    /// may write into it.
    pub index_dir: PathBuf,
    /// Build output roots scanned for per-module caches.
    pub build_roots: Vec<PathBuf>,
}

impl IndexPaths {
    pub fn new(index_dir: impl Into<PathBuf>, build_roots: Vec<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            build_roots,
        }
    }
}

/// Lifecycle phase, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No authoritative build has completed yet, or the store was discarded
    /// and awaits the next build. No queries are answered.
    Uninitialized,
    /// That many overlapping build sessions are running.
    BuildInProgress(u32),
    /// Ready to answer.
    Idle,
}

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub phase: Phase,
    pub dirty_modules: usize,
    pub known_modules: usize,
    pub subtype_keys: usize,
    pub usage_keys: usize,
}

/// A query about one symbol.
#[derive(Debug, Clone)]
pub struct SymbolQuery {
    pub name: QualifiedName,
    /// Module declaring the symbol, when the caller can resolve it. `None`
    /// means a library or external origin, which is never dirty.
    pub origin: Option<String>,
    /// Searches originating in a library report the declaration itself
    /// together with its subtypes.
    pub in_library_scope: bool,
}

impl SymbolQuery {
    pub fn new(name: QualifiedName) -> Self {
        Self {
            name,
            origin: None,
            in_library_scope: false,
        }
    }

    pub fn origin(mut self, module: impl Into<String>) -> Self {
        self.origin = Some(module.into());
        self
    }

    pub fn in_library_scope(mut self, flag: bool) -> Self {
        self.in_library_scope = flag;
        self
    }
}

pub(crate) struct ServiceState {
    pub(crate) storage: Option<IndexStorage>,
    pub(crate) dirty: DirtyScope,
    pub(crate) builds_in_flight: u32,
}

pub(crate) struct ServiceInner {
    pub(crate) paths: IndexPaths,
    pub(crate) state: RwLock<ServiceState>,
}

/// The per-project reference index.
///
/// All mutation happens under one write lock and, for anything slow, on the
/// background ingest worker. Queries take the read lock (or try to); a
/// query that cannot answer right now returns `None` instead of blocking or
/// guessing.
pub struct ReferenceIndexService {
    inner: Arc<ServiceInner>,
    java_provider: Option<Box<dyn SubtypeProvider + Send + Sync>>,
    worker: IngestWorker,
}

impl ReferenceIndexService {
    /// Service without a sibling-language collaborator: subtype queries see
    /// only what the snapshots recorded.
    pub fn new(paths: IndexPaths) -> Self {
        Self::build(paths, None)
    }

    /// Service that interleaves the given provider into every subtype
    /// closure.
    pub fn with_provider(
        paths: IndexPaths,
        provider: Box<dyn SubtypeProvider + Send + Sync>,
    ) -> Self {
        Self::build(paths, Some(provider))
    }

    fn build(paths: IndexPaths, provider: Option<Box<dyn SubtypeProvider + Send + Sync>>) -> Self {
        let inner = Arc::new(ServiceInner {
            paths,
            state: RwLock::new(ServiceState {
                storage: None,
                dirty: DirtyScope::new(),
                builds_in_flight: 0,
            }),
        });
        let worker = IngestWorker::spawn(Arc::clone(&inner));
        Self {
            inner,
            java_provider: provider,
            worker,
        }
    }

    // =========================================================================
    // Build-lifecycle feed
    // =========================================================================

    /// A build session is starting; `compiling` is everything it plans to
    /// compile. Storage is suspended for the duration, since the build
    /// rewrites snapshots underneath it.
    pub fn on_build_started<I, S>(&self, compiling: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Ok(mut state) = self.inner.state.write() else {
            tracing::error!("State lock poisoned, ignoring build start");
            return;
        };
        state.builds_in_flight += 1;
        state.dirty.build_started(compiling);
        if let Some(storage) = state.storage.take() {
            if let Err(e) = storage.close() {
                tracing::warn!("Failed to suspend index storage cleanly: {}", e);
            }
        }
        debug_log!("build started, {} in flight", state.builds_in_flight);
    }

    /// A build session finished; `rebuilt` is what it actually recompiled.
    /// Robust to an empty set (a build that compiled nothing). When the last
    /// overlapping session ends, a full rebuild is queued on the worker.
    pub fn on_build_finished(&self, rebuilt: &HashSet<String>) {
        let Ok(mut state) = self.inner.state.write() else {
            tracing::error!("State lock poisoned, ignoring build finish");
            return;
        };
        if state.builds_in_flight == 0 {
            tracing::warn!("Build finished without a matching start, ignoring");
            return;
        }
        state.builds_in_flight -= 1;
        state.dirty.build_finished(rebuilt);
        if state.builds_in_flight > 0 {
            return;
        }
        state.dirty.clear_compiling();
        if !state.dirty.is_initialized() {
            // The scope comes live inside the event: a mark landing after
            // this handler returns must survive the first ingest.
            state.dirty.initialize();
        }
        drop(state);
        self.worker.send(Job::Rebuild);
    }

    /// The build system checked everything and found all output current.
    ///
    /// With exactly one session in flight and no interleaved changes since
    /// it started, the retained stores come back without a re-ingest; a
    /// session that raced a change falls back to a full rebuild. A verdict
    /// arriving outside any session, or with overlapping sessions in
    /// flight, cannot be ordered against the changes around it and is
    /// ignored.
    pub fn on_up_to_date_check_passed(&self) {
        let Ok(mut state) = self.inner.state.write() else {
            tracing::error!("State lock poisoned, ignoring up-to-date verdict");
            return;
        };
        match state.builds_in_flight {
            0 => {
                // The check behind the verdict may have run before the
                // latest marks; they stay.
                debug_log!("up-to-date verdict ignored: no build session in flight");
            }
            1 => {
                // The verdict ends the session either way; the counter must
                // not stay stuck waiting for a finish that never comes.
                state.builds_in_flight = 0;
                if state.dirty.unchanged_since_build_start() {
                    let initialized = state.dirty.is_initialized();
                    state.dirty.all_clean();
                    if initialized {
                        drop(state);
                        self.worker.send(Job::Reopen);
                    }
                } else {
                    // Changes raced the check: keep their dirty marks and
                    // fall back to a full rebuild.
                    state.dirty.build_finished(&HashSet::new());
                    state.dirty.clear_compiling();
                    drop(state);
                    self.worker.send(Job::Rebuild);
                }
            }
            _ => {
                debug_log!("up-to-date verdict ignored: overlapping build sessions");
            }
        }
    }

    /// A file changed; its owning module can no longer be trusted until the
    /// next build covers it.
    pub fn mark_dirty(&self, module: &str) {
        let Ok(mut state) = self.inner.state.write() else {
            tracing::error!("State lock poisoned, ignoring dirty mark");
            return;
        };
        state.dirty.mark_dirty(module);
        debug_log!("module {} marked dirty", module);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Subtypes of the queried class, or `None` when the index cannot
    /// answer. `None` is "unknown", never "no subtypes": callers must fall
    /// back to their slow path.
    pub fn subtypes_of(&self, query: &SymbolQuery, deep: bool) -> Option<BTreeSet<QualifiedName>> {
        let state = self.inner.state.read().ok()?;
        self.answer_subtypes(&state, query, deep)
    }

    /// Non-blocking variant for latency-sensitive callers: lock contention
    /// is answered with `None` instead of waiting.
    pub fn try_subtypes_of(
        &self,
        query: &SymbolQuery,
        deep: bool,
    ) -> Option<BTreeSet<QualifiedName>> {
        let state = self.inner.state.try_read().ok()?;
        self.answer_subtypes(&state, query, deep)
    }

    /// Files referencing the queried symbol, or `None` when the index
    /// cannot answer.
    pub fn referencing_files(&self, query: &SymbolQuery) -> Option<BTreeSet<PathBuf>> {
        let state = self.inner.state.read().ok()?;
        self.answer_referencing_files(&state, query)
    }

    /// Non-blocking variant of [`referencing_files`](Self::referencing_files).
    pub fn try_referencing_files(&self, query: &SymbolQuery) -> Option<BTreeSet<PathBuf>> {
        let state = self.inner.state.try_read().ok()?;
        self.answer_referencing_files(&state, query)
    }

    /// Gate every query: initialized, no build in flight, storage open, and
    /// the target's module neither dirty nor compiling.
    fn answerable<'s>(
        &self,
        state: &'s ServiceState,
        query: &SymbolQuery,
    ) -> Option<&'s IndexStorage> {
        if state.builds_in_flight > 0 || !state.dirty.is_initialized() {
            return None;
        }
        let storage = state.storage.as_ref()?;
        if let Some(module) = &query.origin {
            if !state.dirty.is_safe(module) {
                return None;
            }
        }
        Some(storage)
    }

    fn answer_subtypes(
        &self,
        state: &ServiceState,
        query: &SymbolQuery,
        deep: bool,
    ) -> Option<BTreeSet<QualifiedName>> {
        let storage = self.answerable(state, query)?;
        let kotlin = KotlinProvider::new(storage);
        let mut providers: Vec<&dyn SubtypeProvider> = vec![&kotlin];
        if let Some(java) = &self.java_provider {
            providers.push(java.as_ref());
        }
        match collect_subtypes(&providers, &query.name, deep, query.in_library_scope) {
            Ok(result) => Some(result),
            Err(e) => self.give_up("subtype query", e),
        }
    }

    fn answer_referencing_files(
        &self,
        state: &ServiceState,
        query: &SymbolQuery,
    ) -> Option<BTreeSet<PathBuf>> {
        let storage = self.answerable(state, query)?;
        match storage.referencing_files(query.name.as_dotted()) {
            Ok(files) => Some(files.into_iter().map(PathBuf::from).collect()),
            Err(e) => self.give_up("reference query", e),
        }
    }

    /// Reads never surface errors: the store goes away and the caller sees
    /// "unknown". The next build rebuilds from scratch.
    fn give_up<T>(&self, what: &str, e: IndexError) -> Option<T> {
        tracing::warn!("Index {} failed, discarding storage: {}", what, e);
        self.worker.send(Job::Discard);
        None
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub fn status(&self) -> ServiceStatus {
        let Ok(state) = self.inner.state.read() else {
            return ServiceStatus {
                phase: Phase::Uninitialized,
                dirty_modules: 0,
                known_modules: 0,
                subtype_keys: 0,
                usage_keys: 0,
            };
        };
        let phase = if state.builds_in_flight > 0 {
            Phase::BuildInProgress(state.builds_in_flight)
        } else if state.dirty.is_initialized() && state.storage.is_some() {
            Phase::Idle
        } else {
            Phase::Uninitialized
        };
        ServiceStatus {
            phase,
            dirty_modules: state.dirty.dirty_count(),
            known_modules: state.dirty.known_count(),
            subtype_keys: state.storage.as_ref().map_or(0, |s| s.subtype_key_count()),
            usage_keys: state.storage.as_ref().map_or(0, |s| s.usage_key_count()),
        }
    }

    /// Wait for queued background work (rebuilds, discards) to finish.
    /// Tests and orderly shutdown use this; normal callers never need to.
    pub fn sync(&self) {
        self.worker.sync();
    }

    /// Suspend the service at project close: storage is closed, nothing is
    /// deleted. Dropping the service does the same.
    pub fn close(&self) {
        self.worker.sync();
        let Ok(mut state) = self.inner.state.write() else {
            return;
        };
        if let Some(storage) = state.storage.take() {
            if let Err(e) = storage.close() {
                tracing::warn!("Failed to close index storage cleanly: {}", e);
            }
        }
    }
}

impl Drop for ReferenceIndexService {
    fn drop(&mut self) {
        self.close();
    }
}
