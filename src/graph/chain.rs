//! Rename chain between original and current thunk hashes.

use std::collections::BTreeMap;

/// Bidirectional original ↔ current hash map.
///
/// Chains are compressed on every rename: after `a → b` and `b → c` the
/// index holds only `a ↔ c`, so lookups resolve in one hop either way.
/// Several originals may converge on one current hash; the inverse lookup
/// reports the first of them to be recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashChain {
    /// Original hash to the hash that currently supersedes it.
    updated: BTreeMap<String, String>,
    /// Current hash to the originals it supersedes, oldest first.
    original: BTreeMap<String, Vec<String>>,
}

impl HashChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `old` has been superseded by `new`.
    pub fn record(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }

        let roots = self
            .original
            .remove(old)
            .unwrap_or_else(|| vec![old.to_string()]);

        let mut kept = Vec::with_capacity(roots.len());
        for root in roots {
            if root == new {
                // Renamed back to where the chain started.
                self.updated.remove(&root);
            } else {
                self.updated.insert(root.clone(), new.to_string());
                kept.push(root);
            }
        }

        if !kept.is_empty() {
            self.original.entry(new.to_string()).or_default().extend(kept);
        }
    }

    /// Current hash for `original`, or `original` itself if never renamed.
    pub fn updated<'a>(&'a self, original: &'a str) -> &'a str {
        self.updated.get(original).map_or(original, String::as_str)
    }

    /// Original hash for `updated`, or `updated` itself if not a rename.
    pub fn original<'a>(&'a self, updated: &'a str) -> &'a str {
        self.original
            .get(updated)
            .and_then(|roots| roots.first())
            .map_or(updated, String::as_str)
    }

    /// Whether `hash` has been superseded.
    pub fn is_superseded(&self, hash: &str) -> bool {
        self.updated.contains_key(hash)
    }

    /// Number of live renames.
    pub fn len(&self) -> usize {
        self.updated.len()
    }

    /// Whether no rename has been recorded.
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }

    /// Iterate `(original, current)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.updated.iter().map(|(o, u)| (o.as_str(), u.as_str()))
    }

    /// Both directions agree entry for entry.
    pub(crate) fn is_consistent(&self) -> bool {
        let inverse_len: usize = self.original.values().map(Vec::len).sum();
        inverse_len == self.updated.len()
            && self.original.iter().all(|(current, roots)| {
                roots
                    .iter()
                    .all(|root| self.updated.get(root).is_some_and(|u| u == current))
            })
    }
}
