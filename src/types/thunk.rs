//! Thunk definitions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::hash::{DependencyId, ObjectType};
use crate::canonical::{object_hash, to_canonical_bytes};

/// Dependency map: identifier to the file names it is materialized under.
///
/// One object can back several inputs of the same thunk (two inputs that
/// reduced to identical bytes, or a reduction landing on a literal the thunk
/// already lists), so every identifier carries a set of names.
pub type DependencyMap = BTreeMap<DependencyId, BTreeSet<String>>;

/// Add `names` under `id`, keeping any names already there.
fn merge_into(map: &mut DependencyMap, id: DependencyId, names: BTreeSet<String>) {
    map.entry(id).or_default().extend(names);
}

/// The code a thunk runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Hash of the executable to invoke.
    pub hash: String,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Environment variables, `KEY=VALUE`.
    pub envars: Vec<String>,
}

impl Function {
    /// Create a function invoking `hash` with `args`.
    pub fn new(hash: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            hash: hash.into(),
            args,
            envars: Vec::new(),
        }
    }
}

/// A content-addressed description of a pending computation.
///
/// The hash of a thunk is the [`object_hash`] of its canonical bytes, so
/// every dependency edit yields a different hash. The graph stores a thunk
/// under its registration hash until it is rehashed by a reduction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thunk {
    /// What to run.
    pub function: Function,
    /// Literal and blob dependencies.
    pub values: DependencyMap,
    /// Dependencies needed to run the function itself.
    pub executables: DependencyMap,
    /// Dependencies that are still unreduced thunks.
    pub thunks: DependencyMap,
    /// Names of the outputs this thunk produces.
    pub outputs: Vec<String>,
}

impl Thunk {
    /// Create a thunk with no dependencies.
    pub fn new(function: Function) -> Self {
        Self {
            function,
            outputs: vec!["out".to_string()],
            ..Self::default()
        }
    }

    /// Add a value dependency.
    pub fn with_value(mut self, id: DependencyId, filename: impl Into<String>) -> Self {
        self.values.entry(id).or_default().insert(filename.into());
        self
    }

    /// Add an executable dependency.
    pub fn with_executable(mut self, id: DependencyId, filename: impl Into<String>) -> Self {
        self.executables.entry(id).or_default().insert(filename.into());
        self
    }

    /// Add a thunk dependency.
    pub fn with_thunk(mut self, id: DependencyId, filename: impl Into<String>) -> Self {
        self.thunks.entry(id).or_default().insert(filename.into());
        self
    }

    /// Set the output names.
    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// A thunk can run once no thunk-typed dependency is pending.
    pub fn is_executable(&self) -> bool {
        self.thunks.is_empty()
    }

    /// Pending thunk dependencies.
    pub fn thunk_dependencies(&self) -> impl Iterator<Item = &DependencyId> {
        self.thunks.keys()
    }

    /// Distinct base hashes of pending thunk dependencies, in map order.
    pub fn thunk_dependency_hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = Vec::with_capacity(self.thunks.len());
        for id in self.thunks.keys() {
            if !hashes.iter().any(|h| h == id.hash()) {
                hashes.push(id.hash().to_string());
            }
        }
        hashes
    }

    /// Whether any pending dependency has base hash `hash`.
    pub fn depends_on(&self, hash: &str) -> bool {
        self.thunks.keys().any(|id| id.hash() == hash)
    }

    /// Replace every pending reference to `old` with `new`.
    ///
    /// A bare `old` entry is moved to `values` when `new` is a value. An
    /// entry selecting one output of `old` is rebased onto `new` when `new`
    /// is a thunk; when `new` is a value the selected output is unknown, so
    /// the entry stays as is until [`Thunk::resolve_output`] splices it.
    /// File names merge with any already listed under the new identifier.
    ///
    /// Returns whether anything changed.
    pub fn update_dependency(&mut self, old: &str, new: &str, new_type: ObjectType) -> bool {
        let affected: Vec<DependencyId> = self
            .thunks
            .keys()
            .filter(|id| id.hash() == old)
            .cloned()
            .collect();

        let mut changed = false;
        for id in affected {
            match (id.has_selector(), new_type) {
                (_, ObjectType::Thunk) => {
                    if let Some(names) = self.thunks.remove(&id) {
                        merge_into(&mut self.thunks, id.rebased(new), names);
                        changed = true;
                    }
                }
                (false, ObjectType::Value) => {
                    if let Some(names) = self.thunks.remove(&id) {
                        merge_into(&mut self.values, DependencyId::new(new), names);
                        changed = true;
                    }
                }
                (true, ObjectType::Value) => {}
            }
        }
        changed
    }

    /// Splice the resolved hash of one selected output in place of `id`.
    ///
    /// File names merge with any already listed under the resolved hash.
    ///
    /// Returns whether `id` was a pending dependency.
    pub fn resolve_output(&mut self, id: &DependencyId, resolved: &str, resolved_type: ObjectType) -> bool {
        let Some(names) = self.thunks.remove(id) else {
            return false;
        };
        let target = match resolved_type {
            ObjectType::Thunk => &mut self.thunks,
            ObjectType::Value => &mut self.values,
        };
        merge_into(target, DependencyId::new(resolved), names);
        true
    }

    /// Canonical serialized form.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        to_canonical_bytes(self)
    }

    /// Content hash of the current definition.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        Ok(object_hash(ObjectType::Thunk, &self.to_canonical_bytes()?))
    }
}
