//! One-to-many persistent stores
//!
//! Two storage shapes live here: [`RelationStore`], the mutable sled-backed
//! store the index serves queries from, and [`ModuleCache`], the immutable
//! memory-mapped snapshot an external compiler leaves behind per module.
//! [`CacheWriter`] is the producer side of the snapshot format.

pub mod relation;
pub mod snapshot;
pub mod writer;

pub use relation::{DeepValues, RelationStore};
pub use snapshot::ModuleCache;
pub use writer::CacheWriter;
