//! In-memory thunk store for testing and embedding.

use std::collections::{BTreeMap, BTreeSet};
use parking_lot::RwLock;

use crate::canonical::object_hash;
use crate::types::{DependencyId, ObjectType, Thunk};
use super::{ResultCache, ThunkStore};

/// Error type for in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    /// Thunk not found.
    #[error("Thunk not found: {0}")]
    ThunkNotFound(String),
    /// Thunk could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct Objects {
    /// Thunks by content hash.
    thunks: BTreeMap<String, Thunk>,
    /// Value blobs by content hash.
    values: BTreeMap<String, Vec<u8>>,
    /// Resolved outputs by raw selector identifier.
    results: BTreeMap<String, String>,
    /// Hashes read through `ThunkStore::read`, for tests.
    reads: Vec<String>,
}

/// In-memory thunk store.
///
/// Uses BTreeMap for deterministic iteration order. Doubles as a
/// [`ResultCache`] so engines can publish selected outputs next to values.
#[derive(Debug, Default)]
pub struct InMemoryThunkStore {
    objects: RwLock<Objects>,
}

impl InMemoryThunkStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a thunk and return its content hash.
    pub fn put_thunk(&self, thunk: Thunk) -> Result<String, InMemoryError> {
        let hash = thunk.content_hash()?;
        self.objects.write().thunks.insert(hash.clone(), thunk);
        Ok(hash)
    }

    /// Add a value blob and return its content hash.
    pub fn put_value(&self, bytes: impl Into<Vec<u8>>) -> String {
        let bytes = bytes.into();
        let hash = object_hash(ObjectType::Value, &bytes);
        self.objects.write().values.insert(hash.clone(), bytes);
        hash
    }

    /// Fetch a value blob.
    pub fn value(&self, hash: &str) -> Option<Vec<u8>> {
        self.objects.read().values.get(hash).cloned()
    }

    /// Fetch a thunk without recording a read.
    pub fn thunk(&self, hash: &str) -> Option<Thunk> {
        self.objects.read().thunks.get(hash).cloned()
    }

    /// Record the resolved hash of one output of a thunk.
    pub fn put_result(&self, id: &DependencyId, hash: impl Into<String>) {
        self.objects.write().results.insert(id.to_raw(), hash.into());
    }

    /// Get number of stored thunks.
    pub fn num_thunks(&self) -> usize {
        self.objects.read().thunks.len()
    }

    /// Get number of stored values.
    pub fn num_values(&self) -> usize {
        self.objects.read().values.len()
    }

    /// Hashes requested through [`ThunkStore::read`], in order.
    pub fn reads(&self) -> Vec<String> {
        self.objects.read().reads.clone()
    }

    /// Distinct hashes requested through [`ThunkStore::read`].
    pub fn distinct_reads(&self) -> BTreeSet<String> {
        self.objects.read().reads.iter().cloned().collect()
    }
}

impl ThunkStore for InMemoryThunkStore {
    type Error = InMemoryError;

    fn read(&self, hash: &str) -> Result<Thunk, Self::Error> {
        let mut objects = self.objects.write();
        objects.reads.push(hash.to_string());
        objects
            .thunks
            .get(hash)
            .cloned()
            .ok_or_else(|| InMemoryError::ThunkNotFound(hash.to_string()))
    }

    fn write(&self, thunk: &Thunk) -> Result<String, Self::Error> {
        self.put_thunk(thunk.clone())
    }
}

impl ResultCache for InMemoryThunkStore {
    fn check(&self, id: &DependencyId) -> Option<String> {
        self.objects.read().results.get(&id.to_raw()).cloned()
    }
}
