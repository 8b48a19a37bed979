//! Graph and reductor configuration.
//!
//! Configuration never changes what a reduction computes, only how results
//! are looked up and how work is grouped for dispatch. The fingerprint lets
//! callers record which configuration produced a run.

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;

/// Default cap on a batched dispatch group.
pub const DEFAULT_MAX_GROUP_SIZE: usize = 32;

/// Default capacity of [`crate::store::LruResultCache`].
pub const DEFAULT_RESULT_CACHE_CAPACITY: usize = 10_000;

/// Default cap on groups in flight in the reductor.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Configuration for [`crate::ExecutionGraph`] and [`crate::Reductor`].
///
/// ## Parameters
///
/// - `max_group_size`: Largest group `get_thunks` returns (0 = unbounded)
/// - `consult_result_cache`: Whether reductions splice cached selected outputs
/// - `result_cache_capacity`: Entries kept by the default LRU result cache
/// - `max_in_flight`: Groups the reductor keeps dispatched at once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Largest batched group.
    pub max_group_size: usize,
    /// Check the result cache for selected outputs during reduction.
    pub consult_result_cache: bool,
    /// Capacity of the default result cache.
    pub result_cache_capacity: usize,
    /// Dispatched groups allowed at once.
    pub max_in_flight: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            consult_result_cache: true,
            result_cache_capacity: DEFAULT_RESULT_CACHE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl GraphConfig {
    /// Configuration that dispatches every thunk on its own.
    pub fn unbatched() -> Self {
        Self {
            max_group_size: 1,
            ..Self::default()
        }
    }

    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Group size limit, `None` when unbounded.
    pub fn group_limit(&self) -> Option<usize> {
        (self.max_group_size > 0).then_some(self.max_group_size)
    }

    /// Fingerprint of the canonical JSON form.
    pub fn config_hash(&self) -> String {
        // Plain struct of integers and bools; serialization cannot fail.
        canonical_hash_hex(self).unwrap_or_default()
    }
}
