//! refindex - incremental compiler reference index for mixed Java/Kotlin codebases
//!
//! # Architecture
//!
//! - **Per-module snapshots**: `subtypes.bin` / `lookups.bin` emitted by the
//!   compiler, BLAKE3-checksummed, read zero-copy via memmap2
//! - **Unified store**: one-to-many relations (supertype -> subtypes,
//!   symbol -> referencing files) merged into sled trees
//! - **Parallel ingest**: module caches discovered on disk and merged with rayon
//! - **Build-event lifecycle**: BuildStarted / BuildFinished / up-to-date
//!   verdicts drive off-thread rebuilds; queries stay non-blocking
//! - **Graceful degradation**: a query that cannot be answered consistently
//!   returns "unknown" instead of a wrong or partial result
//!
//! # Usage example
//!
//! ```no_run
//! use refindex::{IndexPaths, QualifiedName, ReferenceIndexService, SymbolQuery};
//! use std::collections::HashSet;
//!
//! # fn main() {
//! let paths = IndexPaths::new("./index", vec!["./build/out".into()]);
//! let service = ReferenceIndexService::new(paths);
//!
//! // The build system reports a finished compilation round.
//! service.on_build_started(["core"]);
//! service.on_build_finished(&HashSet::from(["core".to_string()]));
//!
//! // Which classes extend com.example.Base, transitively?
//! let query = SymbolQuery::new(QualifiedName::from_dotted("com.example.Base"));
//! match service.subtypes_of(&query, true) {
//!     Some(subtypes) => println!("Found {} subtypes", subtypes.len()),
//!     None => println!("Index unavailable, fall back to a full resolve"),
//! }
//! # }
//! ```

pub mod dirty;
pub mod error;
pub mod index;
pub mod names;
pub mod service;
pub mod store;

pub use error::{IndexError, Result};
pub use names::QualifiedName;
pub use service::{
    IndexPaths, Language, Phase, ReferenceIndexService, ServiceStatus, SubtypeProvider,
    SymbolQuery,
};

// Re-export the storage layer for embedding without the service on top
pub use index::{IndexStorage, IngestReport};
pub use store::{CacheWriter, ModuleCache, RelationStore};
