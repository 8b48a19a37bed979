//! Grouping of thunk chains into one dispatch.
//!
//! Remote execution pays a fixed cost per request. When a ready thunk is the
//! only input of its only referencer, and so on up the graph, the whole
//! chain can be shipped together and reduced in sequence by the worker.
//! Grouping only changes dispatch granularity, never results.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{ExecutionGraph, GraphError};
use crate::store::ThunkStore;
use crate::types::Thunk;

/// One member of a dispatch group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Hash the thunk is tracked under.
    pub hash: String,
    /// The thunk definition.
    pub thunk: Thunk,
}

impl<S: ThunkStore> ExecutionGraph<S> {
    /// Group `hash` with the chain of thunks that wait only on it.
    ///
    /// Starting from `hash`, the sole referencer is folded in as long as it
    /// has exactly one pending thunk dependency. Stops when the chain
    /// branches, ends, or reaches the configured group size.
    pub fn get_thunks(&self, hash: &str) -> Result<Vec<BatchEntry>, GraphError> {
        let thunk = self
            .thunks
            .get(hash)
            .ok_or_else(|| GraphError::NotFound(hash.to_string()))?;

        let limit = self.config.group_limit();
        let mut group = vec![BatchEntry {
            hash: hash.to_string(),
            thunk: thunk.clone(),
        }];
        let mut seen: HashSet<&str> = HashSet::from([hash]);
        let mut current = hash;

        while limit.map_or(true, |max| group.len() < max) {
            let Some(next) = self.referencing.sole_referencer(current) else {
                break;
            };
            let Some(next_thunk) = self.thunks.get(next) else {
                break;
            };
            if next_thunk.thunks.len() != 1 || !seen.insert(next) {
                break;
            }
            group.push(BatchEntry {
                hash: next.to_string(),
                thunk: next_thunk.clone(),
            });
            current = next;
        }

        tracing::trace!(hash = %hash, size = group.len(), "Grouped thunks");
        Ok(group)
    }
}
