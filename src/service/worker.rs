//! Ingest worker - single-threaded job processor for storage lifecycle
//!
//! Bulk ingest can scan thousands of snapshot files and must never run on
//! the thread announcing build events. Every storage open, rebuild and
//! discard therefore goes through one worker thread, which takes the write
//! lock per job. Jobs are fire-and-forget; `Barrier` lets tests and orderly
//! shutdown wait for the queue to drain.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::index::IndexStorage;
use crate::service::{debug_log, ServiceInner};

pub(crate) enum Job {
    /// Create fresh storage and ingest every build root from scratch.
    Rebuild,
    /// Bring back storage retained by a build suspension, skipping ingest.
    Reopen,
    /// Close and delete the current storage (a reader hit unusable data).
    Discard,
    /// Reply once every job queued before this one has run.
    Barrier(Sender<()>),
    Shutdown,
}

pub(crate) struct IngestWorker {
    job_tx: Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl IngestWorker {
    pub(crate) fn spawn(inner: Arc<ServiceInner>) -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let handle = thread::spawn(move || worker_loop(inner, job_rx));
        Self {
            job_tx,
            handle: Some(handle),
        }
    }

    pub(crate) fn send(&self, job: Job) {
        let _ = self.job_tx.send(job);
    }

    /// Block until previously queued jobs have completed.
    pub(crate) fn sync(&self) {
        let (response_tx, response_rx) = unbounded();
        let _ = self.job_tx.send(Job::Barrier(response_tx));
        let _ = response_rx.recv();
    }
}

impl Drop for IngestWorker {
    fn drop(&mut self) {
        let _ = self.job_tx.send(Job::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: Arc<ServiceInner>, job_rx: Receiver<Job>) {
    while let Ok(job) = job_rx.recv() {
        match job {
            Job::Rebuild => rebuild(&inner),
            Job::Reopen => reopen(&inner),
            Job::Discard => discard(&inner),
            Job::Barrier(response_tx) => {
                let _ = response_tx.send(());
            }
            Job::Shutdown => break,
        }
    }
}

/// Full rebuild: sweep old files, create fresh stores, ingest all roots.
fn rebuild(inner: &ServiceInner) {
    let Ok(mut state) = inner.state.write() else {
        tracing::error!("State lock poisoned, skipping rebuild");
        return;
    };
    if state.builds_in_flight > 0 {
        // Another session started while this job sat in the queue; its
        // finish will queue a rebuild over the newer caches.
        debug_log!("skipping rebuild queued before a newer build");
        return;
    }
    if let Some(old) = state.storage.take() {
        // A rebuild replaces whatever is still open.
        let _ = old.close();
    }
    let storage = match IndexStorage::create(&inner.paths.index_dir) {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!("Failed to create index storage: {}", e);
            return;
        }
    };
    match storage.ingest(&inner.paths.build_roots) {
        Ok(report) => {
            if let Err(e) = storage.flush() {
                tracing::warn!("Failed to flush index storage after ingest: {}", e);
            }
            // Dirty bits are the finish handler's business; the ingest only
            // reports which modules it saw.
            state.dirty.register_modules(report.modules.iter().cloned());
            state.storage = Some(storage);
            debug_log!(
                "rebuild done: {} modules, {} subtype keys, {} usage keys",
                report.modules.len(),
                report.subtype_keys,
                report.usage_keys
            );
        }
        Err(e) => {
            if e.is_corruption() {
                tracing::error!("Ingest hit corrupted snapshot data: {}", e);
            } else {
                tracing::error!("Ingest failed: {}", e);
            }
            // Half-merged stores are worse than no stores: queries answer
            // "unknown" until the next build rebuilds from scratch.
            storage.close_and_clean();
        }
    }
}

/// Up-to-date fast path: re-open the retained stores without ingest.
fn reopen(inner: &ServiceInner) {
    let Ok(mut state) = inner.state.write() else {
        tracing::error!("State lock poisoned, skipping reopen");
        return;
    };
    if state.builds_in_flight > 0 || state.storage.is_some() {
        return;
    }
    match IndexStorage::reopen(&inner.paths.index_dir) {
        Ok(storage) => {
            state.storage = Some(storage);
            debug_log!("reopened retained index storage");
        }
        Err(e) => {
            tracing::warn!(
                "Failed to reopen retained index storage, waiting for next build: {}",
                e
            );
        }
    }
}

/// A reader saw unusable data: close, delete, wait for the next build.
fn discard(inner: &ServiceInner) {
    let Ok(mut state) = inner.state.write() else {
        tracing::error!("State lock poisoned, skipping discard");
        return;
    };
    if let Some(storage) = state.storage.take() {
        tracing::warn!("Discarding index storage after a read failure");
        storage.close_and_clean();
    }
}
