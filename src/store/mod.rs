//! Collaborator interfaces: thunk storage and the result cache.
//!
//! The execution graph never serializes or hashes thunks itself. It reads
//! definitions through a [`ThunkStore`], asks the store to persist and hash
//! rewritten thunks, and consults a [`ResultCache`] for outputs of
//! multi-output thunks that were produced as a side effect of a reduction.

pub mod cache;
pub mod memory;

use crate::types::{DependencyId, ObjectType, Thunk};

/// Trait for thunk storage backends.
///
/// Methods take `&self`; backends shared with execution engines use
/// interior mutability.
pub trait ThunkStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Load the thunk stored under `hash` (a bare hash, no selector).
    fn read(&self, hash: &str) -> Result<Thunk, Self::Error>;

    /// Persist `thunk` and return its canonical content hash.
    fn write(&self, thunk: &Thunk) -> Result<String, Self::Error>;

    /// Classify a hash as thunk or value.
    fn classify(&self, hash: &str) -> ObjectType {
        ObjectType::from_hash(hash)
    }
}

/// Cache of already-computed outputs, keyed by selector identifiers.
pub trait ResultCache: Send + Sync {
    /// Resolved hash of `id`, if known.
    fn check(&self, id: &DependencyId) -> Option<String>;
}

/// A cache that never resolves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResultCache;

impl ResultCache for NoResultCache {
    fn check(&self, _id: &DependencyId) -> Option<String> {
        None
    }
}

pub use cache::LruResultCache;
pub use memory::{InMemoryError, InMemoryThunkStore};
