//! Durable keyed storage for in-flight units of work.
//!
//! The [`ObjectStore`] trait is the storage boundary; the redelivery engine never
//! assumes anything beyond it. Two implementations ship here:
//!
//! - [`InMemoryObjectStore`]: tests/dev
//! - [`FileObjectStore`]: one file per key, survives process restarts

pub mod file;
pub mod in_memory;
pub mod r#trait;

pub use file::FileObjectStore;
pub use in_memory::InMemoryObjectStore;
pub use r#trait::{KeyIter, ObjectStore, ObjectStoreError, StoreKey};
