//! Reverse dependency index: who is waiting on whom.

use std::collections::{BTreeMap, BTreeSet};

/// For each tracked hash, the thunks that list it as a pending dependency.
///
/// An entry exists for every live thunk, possibly empty. Entries for hashes
/// that were reduced to values are dropped once the reduction is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseIndex {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl ReverseIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `hash` has an entry.
    pub fn track(&mut self, hash: &str) {
        if !self.entries.contains_key(hash) {
            self.entries.insert(hash.to_string(), BTreeSet::new());
        }
    }

    /// Record that `referencer` depends on `dependency`.
    pub fn link(&mut self, dependency: &str, referencer: &str) {
        self.entries
            .entry(dependency.to_string())
            .or_default()
            .insert(referencer.to_string());
    }

    /// Forget that `referencer` depends on `dependency`.
    ///
    /// Does nothing if `dependency` is not tracked.
    pub fn unlink(&mut self, dependency: &str, referencer: &str) {
        if let Some(set) = self.entries.get_mut(dependency) {
            set.remove(referencer);
        }
    }

    /// Move the entry for `old` to `new`, merging with any entry `new` has.
    ///
    /// Returns false if `old` was not tracked.
    pub fn rekey(&mut self, old: &str, new: &str) -> bool {
        let Some(referencers) = self.entries.remove(old) else {
            return false;
        };
        self.entries.entry(new.to_string()).or_default().extend(referencers);
        true
    }

    /// Drop the entry for `hash`.
    pub fn remove(&mut self, hash: &str) -> Option<BTreeSet<String>> {
        self.entries.remove(hash)
    }

    /// Referencers of `hash`, if tracked.
    pub fn get(&self, hash: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(hash)
    }

    /// Whether `hash` has an entry.
    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    /// The only referencer of `hash`, if there is exactly one.
    pub fn sole_referencer(&self, hash: &str) -> Option<&str> {
        let set = self.entries.get(hash)?;
        if set.len() == 1 {
            set.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Number of tracked hashes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in hash order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
