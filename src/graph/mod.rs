//! The execution graph.
//!
//! The graph registers thunks, tracks the renames produced as thunks are
//! reduced, keeps a reverse index of who depends on whom, and reports which
//! thunks become ready to run after each reduction.
//!
//! ## Tables
//!
//! ```text
//! thunks       hash → Thunk            (primary store)
//! referencing  hash → {referencer}     (reverse index)
//! chain        original ↔ current      (rename chain)
//! ```
//!
//! All three change together. Every mutation goes through
//! [`ExecutionGraph::update_hash`] or registration commit, and both check
//! their preconditions before touching any table, so a failed call leaves
//! the graph as it was. A reduction writes every rewritten thunk to the
//! store before it renames anything.
//!
//! ## Error classes
//!
//! - Recoverable: a hash that is not tracked, a store read or write failure.
//! - Fatal: an [`InvariantViolation`]. The graph is corrupt and results
//!   derived from it can no longer be trusted.

pub mod batch;
pub mod chain;
pub mod reverse;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::GraphConfig;
use crate::store::{NoResultCache, ResultCache, ThunkStore};
use crate::types::{DependencyId, DependencyIdError, ObjectType, Thunk};

pub use batch::BatchEntry;
pub use chain::HashChain;
pub use reverse::ReverseIndex;

/// Thunks ready for dispatch, in hash order.
pub type Frontier = BTreeSet<String>;

/// Error type for graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Hash is not tracked by the graph.
    #[error("Thunk not found in execution graph: {0}")]
    NotFound(String),
    /// Hash could not be parsed.
    #[error("Invalid hash: {0}")]
    InvalidHash(#[from] DependencyIdError),
    /// Store error.
    #[error("Store error: {0}")]
    Store(String),
    /// Graph invariant broken (fatal).
    #[error("Execution graph invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl GraphError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }

    /// Whether the graph can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

/// A broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// A hash that must be live is missing from the thunk table.
    #[error("thunk {0} is not tracked")]
    MissingThunk(String),
    /// A live hash has no reverse-index entry.
    #[error("thunk {0} has no reverse-index entry")]
    MissingReverseEntry(String),
    /// A dependency cycle was reached.
    #[error("dependency cycle through {0}")]
    Cycle(String),
    /// A live thunk is missing from its dependency's reverse-index entry.
    #[error("{referencer} depends on {dependency} but is not indexed as a referencer")]
    DanglingReference {
        /// The dependency.
        dependency: String,
        /// The thunk depending on it.
        referencer: String,
    },
    /// A reverse-index edge names a thunk that no longer depends on it.
    #[error("{referencer} is indexed as a referencer of {dependency} but does not depend on it")]
    StaleEdge {
        /// The dependency.
        dependency: String,
        /// The indexed referencer.
        referencer: String,
    },
    /// The two directions of the rename chain disagree.
    #[error("rename chain directions disagree")]
    BrokenChain,
}

/// Snapshot of graph table sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Live thunks.
    pub thunks: usize,
    /// Live thunks with no pending thunk dependency.
    pub executable: usize,
    /// Live thunks still waiting on another thunk.
    pub pending: usize,
    /// Reverse-index entries.
    pub reverse_entries: usize,
    /// Live renames in the chain.
    pub renames: usize,
    /// Distinct value dependencies seen.
    pub value_dependencies: usize,
    /// Distinct executable dependencies seen.
    pub executable_dependencies: usize,
}

/// A thunk being pulled in by [`ExecutionGraph::add_thunk`].
struct Registration {
    hash: String,
    thunk: Thunk,
    dependencies: Vec<String>,
    next: usize,
    /// `(referenced, canonical)` for every dependency resolved so far.
    resolved: Vec<(String, String)>,
}

impl Registration {
    fn new(hash: String, thunk: Thunk) -> Self {
        let dependencies = thunk.thunk_dependency_hashes();
        Self {
            hash,
            thunk,
            dependencies,
            next: 0,
            resolved: Vec::new(),
        }
    }

    fn next_dependency(&mut self) -> Option<String> {
        let dep = self.dependencies.get(self.next).cloned();
        if dep.is_some() {
            self.next += 1;
        }
        dep
    }
}

/// A selected output resolved from the result cache: `(id, target, type)`.
type Splice = (DependencyId, String, ObjectType);

/// A referencer rewritten by a reduction, already persisted under `to`.
struct Rewrite {
    from: String,
    to: String,
    thunk: Thunk,
    spliced: Vec<Splice>,
}

/// In-memory execution graph over a [`ThunkStore`].
///
/// Single writer: every mutating method takes `&mut self`, so completions
/// from concurrent engines are applied one at a time by whoever owns the
/// graph.
pub struct ExecutionGraph<S: ThunkStore> {
    store: Arc<S>,
    results: Arc<dyn ResultCache>,
    config: GraphConfig,
    thunks: BTreeMap<String, Thunk>,
    referencing: ReverseIndex,
    chain: HashChain,
    value_dependencies: BTreeSet<String>,
    executable_dependencies: BTreeSet<String>,
}

impl<S: ThunkStore> ExecutionGraph<S> {
    /// Create an empty graph reading thunks from `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, GraphConfig::default())
    }

    /// Create an empty graph with explicit configuration.
    pub fn with_config(store: Arc<S>, config: GraphConfig) -> Self {
        Self {
            store,
            results: Arc::new(NoResultCache),
            config,
            thunks: BTreeMap::new(),
            referencing: ReverseIndex::new(),
            chain: HashChain::new(),
            value_dependencies: BTreeSet::new(),
            executable_dependencies: BTreeSet::new(),
        }
    }

    /// Use `results` to resolve selected outputs during reduction.
    pub fn with_result_cache(mut self, results: Arc<dyn ResultCache>) -> Self {
        self.results = results;
        self
    }

    /// Register the thunk named by `hash` and everything it depends on.
    ///
    /// Returns the canonical hash the thunk is tracked under. Registering a
    /// hash that is already live, or that has been superseded by a live
    /// hash, returns that hash without reading the store.
    ///
    /// Dependencies are pulled in depth-first with an explicit stack. A
    /// thunk is committed only after all of its dependencies are, so a
    /// store failure part way leaves every committed thunk complete.
    pub fn add_thunk(&mut self, hash: &str) -> Result<String, GraphError> {
        let root = DependencyId::parse(hash)?.hash().to_string();

        if let Some(canonical) = self.registered(&root) {
            return Ok(canonical);
        }

        let mut in_progress: HashSet<String> = HashSet::new();
        let mut stack: Vec<Registration> = Vec::new();
        stack.push(self.load(&root)?);
        in_progress.insert(root);

        loop {
            let next = match stack.last_mut() {
                Some(top) => top.next_dependency(),
                None => break,
            };

            match next {
                Some(dep) => {
                    if let Some(canonical) = self.registered(&dep) {
                        if let Some(top) = stack.last_mut() {
                            top.resolved.push((dep, canonical));
                        }
                        continue;
                    }
                    if in_progress.contains(&dep) {
                        return Err(Self::violation(InvariantViolation::Cycle(dep)));
                    }
                    stack.push(self.load(&dep)?);
                    in_progress.insert(dep);
                }
                None => {
                    let Some(done) = stack.pop() else { break };
                    in_progress.remove(&done.hash);
                    let hash = self.commit(done);
                    match stack.last_mut() {
                        Some(parent) => parent.resolved.push((hash.clone(), hash)),
                        None => return Ok(hash),
                    }
                }
            }
        }

        Err(Self::violation(InvariantViolation::MissingThunk(hash.to_string())))
    }

    /// Apply a completed reduction of `old_hash` to `new_hash`.
    ///
    /// `new_hash` is either a value or a replacement thunk. Returns the
    /// thunks that became ready to run as a consequence. Fails with
    /// [`GraphError::NotFound`] and no change if `old_hash` is not tracked.
    ///
    /// A referencer rehashed after a cached selected output is spliced into
    /// it is reported only if it is executable afterwards.
    ///
    /// Every rewritten referencer is persisted before any table changes, so
    /// a store failure returns a recoverable error with `old_hash` still
    /// tracked. Errors after the rename are always fatal.
    pub fn force_thunk(&mut self, old_hash: &str, new_hash: &str) -> Result<Frontier, GraphError> {
        if !self.thunks.contains_key(old_hash) {
            tracing::warn!(old_hash = %old_hash, new_hash = %new_hash, "Reduction for untracked thunk ignored");
            return Err(GraphError::NotFound(old_hash.to_string()));
        }

        let new_type = self.store.classify(new_hash);
        let actual = match new_type {
            ObjectType::Thunk => self.add_thunk(new_hash)?,
            ObjectType::Value => new_hash.to_string(),
        };

        let rewrites = self.plan_rewrites(old_hash, &actual, new_type)?;

        self.update_hash(old_hash, &actual)?;

        let mut frontier = Frontier::new();
        for rewrite in rewrites {
            let Rewrite { from, to, thunk, spliced } = rewrite;
            let ready = thunk.is_executable();
            self.link_spliced(&from, &thunk, &spliced);
            self.thunks.insert(from.clone(), thunk);
            self.update_hash(&from, &to)?;
            if ready {
                frontier.insert(to);
            }
        }

        match new_type {
            ObjectType::Thunk => frontier.extend(self.order_one_dependencies(&actual)?),
            // Nothing will reference a value as a pending thunk again.
            ObjectType::Value => {
                self.referencing.remove(&actual);
            }
        }

        tracing::debug!(
            old_hash = %old_hash,
            new_hash = %actual,
            new_type = %new_type,
            frontier = frontier.len(),
            "Applied reduction"
        );

        Ok(frontier)
    }

    /// Executable thunks reachable from `hash` with no executable thunk in
    /// between.
    ///
    /// `hash` may carry an output selector. Every bare dependency reached
    /// must be tracked, and a cycle is reported as a fatal violation.
    pub fn order_one_dependencies(&self, hash: &str) -> Result<Frontier, GraphError> {
        let root = DependencyId::base_of(hash).to_string();

        let mut frontier = Frontier::new();
        let mut done: HashSet<String> = HashSet::new();
        let mut on_path: HashSet<String> = HashSet::new();
        // (hash, leaving): a `true` entry closes the subtree of `hash`.
        let mut stack: Vec<(String, bool)> = vec![(root, false)];

        while let Some((current, leaving)) = stack.pop() {
            if leaving {
                on_path.remove(&current);
                done.insert(current);
                continue;
            }
            if done.contains(&current) {
                continue;
            }
            if on_path.contains(&current) {
                return Err(Self::violation(InvariantViolation::Cycle(current)));
            }

            let thunk = self
                .thunks
                .get(&current)
                .ok_or_else(|| Self::violation(InvariantViolation::MissingThunk(current.clone())))?;

            if thunk.is_executable() {
                frontier.insert(current.clone());
                done.insert(current);
                continue;
            }

            // A selected output of a thunk already reduced to a value waits
            // on the result cache; it is pending but has nothing to run.
            let dependencies: Vec<String> = thunk
                .thunk_dependency_hashes()
                .into_iter()
                .filter(|dep| {
                    self.thunks.contains_key(dep)
                        || thunk.thunk_dependencies().any(|id| id.hash() == dep.as_str() && !id.has_selector())
                })
                .collect();
            on_path.insert(current.clone());
            stack.push((current, true));
            for dep in dependencies.into_iter().rev() {
                if !done.contains(&dep) {
                    stack.push((dep, false));
                }
            }
        }

        Ok(frontier)
    }

    /// Current hash for a hash that may have been superseded.
    pub fn updated_hash<'a>(&'a self, original: &'a str) -> &'a str {
        self.chain.updated(original)
    }

    /// Original hash for a hash produced by renames.
    pub fn original_hash<'a>(&'a self, updated: &'a str) -> &'a str {
        self.chain.original(updated)
    }

    /// Tracked thunk under `hash`.
    pub fn get(&self, hash: &str) -> Option<&Thunk> {
        self.thunks.get(hash)
    }

    /// Whether `hash` is a live thunk.
    pub fn contains(&self, hash: &str) -> bool {
        self.thunks.contains_key(hash)
    }

    /// Number of live thunks.
    pub fn len(&self) -> usize {
        self.thunks.len()
    }

    /// Whether no thunk is live.
    pub fn is_empty(&self) -> bool {
        self.thunks.is_empty()
    }

    /// Live thunk hashes.
    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.thunks.keys().map(String::as_str)
    }

    /// Thunks currently waiting on `hash`, if it is tracked.
    pub fn referencing_thunks(&self, hash: &str) -> Option<&BTreeSet<String>> {
        self.referencing.get(hash)
    }

    /// Every value dependency seen so far, for prefetching.
    pub fn value_dependencies(&self) -> &BTreeSet<String> {
        &self.value_dependencies
    }

    /// Every executable dependency seen so far, for prefetching.
    pub fn executable_dependencies(&self) -> &BTreeSet<String> {
        &self.executable_dependencies
    }

    /// Classify `hash` with the store's classifier.
    pub fn classify(&self, hash: &str) -> ObjectType {
        self.store.classify(hash)
    }

    /// Get the configuration.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Table sizes.
    pub fn stats(&self) -> GraphStats {
        let executable = self.thunks.values().filter(|t| t.is_executable()).count();
        GraphStats {
            thunks: self.thunks.len(),
            executable,
            pending: self.thunks.len() - executable,
            reverse_entries: self.referencing.len(),
            renames: self.chain.len(),
            value_dependencies: self.value_dependencies.len(),
            executable_dependencies: self.executable_dependencies.len(),
        }
    }

    /// Audit every cross-table invariant.
    ///
    /// Walks all tables; intended for tests and debug assertions.
    pub fn check_consistency(&self) -> Result<(), InvariantViolation> {
        if !self.chain.is_consistent() {
            return Err(InvariantViolation::BrokenChain);
        }

        for (hash, thunk) in &self.thunks {
            if !self.referencing.contains(hash) {
                return Err(InvariantViolation::MissingReverseEntry(hash.clone()));
            }
            for id in thunk.thunk_dependencies() {
                match self.referencing.get(id.hash()) {
                    Some(set) if set.contains(hash) => {}
                    Some(_) => {
                        return Err(InvariantViolation::DanglingReference {
                            dependency: id.hash().to_string(),
                            referencer: hash.clone(),
                        })
                    }
                    // A selected output of a thunk already reduced to a value
                    // waits on the result cache, not on a live thunk.
                    None if id.has_selector() => {}
                    None => return Err(InvariantViolation::MissingThunk(id.hash().to_string())),
                }
            }
        }

        for (dependency, referencers) in self.referencing.iter() {
            if !self.thunks.contains_key(dependency) {
                return Err(InvariantViolation::MissingThunk(dependency.to_string()));
            }
            for referencer in referencers {
                let Some(thunk) = self.thunks.get(referencer) else {
                    return Err(InvariantViolation::MissingThunk(referencer.clone()));
                };
                if !thunk.depends_on(dependency) {
                    return Err(InvariantViolation::StaleEdge {
                        dependency: dependency.to_string(),
                        referencer: referencer.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Replace every structural reference to `old` with `new`.
    ///
    /// Updates the rename chain (when `new` is a thunk), the dependency maps
    /// of every referencer, the reverse index, and moves the thunk itself to
    /// `new` unless `new` is already live or is a value. Referencers are
    /// edited in place but not rehashed.
    pub(crate) fn update_hash(&mut self, old: &str, new: &str) -> Result<(), GraphError> {
        let referencers: Vec<String> = self
            .referencing
            .get(old)
            .ok_or_else(|| Self::violation(InvariantViolation::MissingReverseEntry(old.to_string())))?
            .iter()
            .cloned()
            .collect();
        if let Some(missing) = referencers.iter().find(|r| !self.thunks.contains_key(*r)) {
            return Err(Self::violation(InvariantViolation::MissingThunk(missing.clone())));
        }
        if old == new {
            return Ok(());
        }

        let new_type = self.store.classify(new);
        if new_type.is_thunk() {
            self.chain.record(old, new);
        }

        for referencer in &referencers {
            if let Some(thunk) = self.thunks.get_mut(referencer) {
                thunk.update_dependency(old, new, new_type);
            }
        }

        if let Some(thunk) = self.thunks.remove(old) {
            let dependencies = thunk.thunk_dependency_hashes();
            for dep in &dependencies {
                self.referencing.unlink(dep, old);
            }
            if new_type.is_thunk() && !self.thunks.contains_key(new) {
                for dep in &dependencies {
                    if self.referencing.contains(dep) {
                        self.referencing.link(dep, new);
                    }
                }
                self.thunks.insert(new.to_string(), thunk);
            }
        }

        self.referencing.rekey(old, new);

        tracing::trace!(old = %old, new = %new, referencers = referencers.len(), "Renamed thunk");
        Ok(())
    }

    /// Work out how every thunk waiting on `old` is rewritten by renaming
    /// it to `new`, and persist the rewritten definitions.
    ///
    /// Reads the tables but does not change them, apart from registering
    /// thunks named by cached outputs. Referencers are planned in index
    /// order, each seeing the renames planned before it, which is the order
    /// they are applied in.
    fn plan_rewrites(&mut self, old: &str, new: &str, new_type: ObjectType) -> Result<Vec<Rewrite>, GraphError> {
        let mut referencers: BTreeSet<String> = self
            .referencing
            .get(old)
            .ok_or_else(|| Self::violation(InvariantViolation::MissingReverseEntry(old.to_string())))?
            .clone();
        if new_type.is_thunk() {
            if let Some(existing) = self.referencing.get(new) {
                referencers.extend(existing.iter().cloned());
            }
        }
        referencers.remove(old);

        let mut rewrites: Vec<Rewrite> = Vec::new();
        for referencer in referencers {
            let mut thunk = self
                .thunks
                .get(&referencer)
                .cloned()
                .ok_or_else(|| Self::violation(InvariantViolation::MissingThunk(referencer.clone())))?;
            thunk.update_dependency(old, new, new_type);
            for earlier in &rewrites {
                thunk.update_dependency(&earlier.from, &earlier.to, ObjectType::Thunk);
            }

            let mut spliced = Vec::new();
            if !thunk.is_executable() {
                if !self.config.consult_result_cache {
                    continue;
                }
                spliced = self.cached_outputs(&thunk)?;
                if spliced.is_empty() {
                    continue;
                }
                for (id, target, resolved_type) in &spliced {
                    thunk.resolve_output(id, target, *resolved_type);
                }
            }

            let to = self.store.write(&thunk).map_err(GraphError::from_store)?;
            rewrites.push(Rewrite {
                from: referencer,
                to,
                thunk,
                spliced,
            });
        }

        Ok(rewrites)
    }

    /// Selected outputs of `thunk` the result cache already resolves.
    fn cached_outputs(&mut self, thunk: &Thunk) -> Result<Vec<Splice>, GraphError> {
        let selected: Vec<DependencyId> = thunk.thunk_dependencies().filter(|id| id.has_selector()).cloned().collect();

        let mut splices = Vec::new();
        for id in selected {
            let Some(resolved) = self.results.check(&id) else { continue };
            let resolved_type = self.store.classify(&resolved);
            let target = match resolved_type {
                ObjectType::Thunk => self.add_thunk(&resolved)?,
                ObjectType::Value => resolved,
            };
            splices.push((id, target, resolved_type));
        }
        Ok(splices)
    }

    /// Update reverse edges of `hash` for outputs spliced into `thunk`.
    fn link_spliced(&mut self, hash: &str, thunk: &Thunk, spliced: &[Splice]) {
        if spliced.is_empty() {
            return;
        }
        for (id, _, _) in spliced {
            if !thunk.depends_on(id.hash()) {
                self.referencing.unlink(id.hash(), hash);
            }
        }
        for (_, target, resolved_type) in spliced {
            if resolved_type.is_thunk() {
                self.referencing.link(target, hash);
            }
        }
        tracing::trace!(hash = %hash, spliced = spliced.len(), "Spliced cached outputs");
    }

    /// Live hash for `hash`, following the rename chain.
    fn registered(&self, hash: &str) -> Option<String> {
        let updated = self.chain.updated(hash);
        if self.thunks.contains_key(updated) {
            return Some(updated.to_string());
        }
        self.thunks.contains_key(hash).then(|| hash.to_string())
    }

    fn load(&self, hash: &str) -> Result<Registration, GraphError> {
        let thunk = self.store.read(hash).map_err(GraphError::from_store)?;
        tracing::trace!(hash = %hash, dependencies = thunk.thunks.len(), "Loaded thunk");
        Ok(Registration::new(hash.to_string(), thunk))
    }

    /// Insert a fully resolved registration into all tables.
    fn commit(&mut self, registration: Registration) -> String {
        let Registration { hash, mut thunk, resolved, .. } = registration;

        for (referenced, canonical) in &resolved {
            if referenced != canonical {
                thunk.update_dependency(referenced, canonical, ObjectType::Thunk);
            }
            self.referencing.link(canonical, &hash);
        }
        self.referencing.track(&hash);

        self.value_dependencies
            .extend(thunk.values.keys().map(DependencyId::to_raw));
        self.executable_dependencies
            .extend(thunk.executables.keys().map(DependencyId::to_raw));

        tracing::trace!(hash = %hash, executable = thunk.is_executable(), "Registered thunk");
        self.thunks.insert(hash.clone(), thunk);
        hash
    }

    fn violation(violation: InvariantViolation) -> GraphError {
        tracing::error!(violation = %violation, "EXECUTION_GRAPH_INVARIANT: graph is corrupt");
        GraphError::Invariant(violation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryError, InMemoryThunkStore, LruResultCache};
    use crate::types::Function;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum BudgetError {
        #[error(transparent)]
        Inner(#[from] InMemoryError),
        #[error("write budget exhausted")]
        Exhausted,
    }

    /// Store that accepts a fixed number of writes, then refuses.
    struct BudgetStore {
        inner: InMemoryThunkStore,
        writes_left: AtomicUsize,
    }

    impl BudgetStore {
        fn new(writes: usize) -> Self {
            Self {
                inner: InMemoryThunkStore::new(),
                writes_left: AtomicUsize::new(writes),
            }
        }

        fn allow(&self, writes: usize) {
            self.writes_left.store(writes, Ordering::SeqCst);
        }
    }

    impl ThunkStore for BudgetStore {
        type Error = BudgetError;

        fn read(&self, hash: &str) -> Result<Thunk, Self::Error> {
            Ok(self.inner.read(hash)?)
        }

        fn write(&self, thunk: &Thunk) -> Result<String, Self::Error> {
            self.writes_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .map_err(|_| BudgetError::Exhausted)?;
            Ok(self.inner.write(thunk)?)
        }
    }

    fn leaf(store: &InMemoryThunkStore, name: &str) -> String {
        store
            .put_thunk(Thunk::new(Function::new("Vsh", vec![name.to_string()])))
            .unwrap()
    }

    fn node(store: &InMemoryThunkStore, name: &str, deps: &[&str]) -> String {
        let mut thunk = Thunk::new(Function::new("Vsh", vec![name.to_string()]));
        for (i, dep) in deps.iter().enumerate() {
            thunk = thunk.with_thunk(DependencyId::parse(dep).unwrap(), format!("in{i}"));
        }
        store.put_thunk(thunk).unwrap()
    }

    fn graph(store: &Arc<InMemoryThunkStore>) -> ExecutionGraph<InMemoryThunkStore> {
        ExecutionGraph::new(Arc::clone(store))
    }

    #[test]
    fn test_add_leaf() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let mut g = graph(&store);

        assert_eq!(g.add_thunk(&b).unwrap(), b);
        assert!(g.get(&b).unwrap().is_executable());
        assert!(g.referencing_thunks(&b).unwrap().is_empty());
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_add_records_reverse_edges() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let c = leaf(&store, "c");
        let a = node(&store, "a", &[&b, &c]);
        let mut g = graph(&store);

        g.add_thunk(&a).unwrap();
        assert_eq!(g.len(), 3);
        assert!(g.referencing_thunks(&b).unwrap().contains(&a));
        assert!(g.referencing_thunks(&c).unwrap().contains(&a));
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_add_strips_selector() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let mut g = graph(&store);

        assert_eq!(g.add_thunk(&format!("{b}#out")).unwrap(), b);
    }

    #[test]
    fn test_add_shared_dependency_read_once() {
        let store = Arc::new(InMemoryThunkStore::new());
        let d = leaf(&store, "d");
        let b = node(&store, "b", &[&d]);
        let c = node(&store, "c", &[&d]);
        let a = node(&store, "a", &[&b, &c]);
        let mut g = graph(&store);

        g.add_thunk(&a).unwrap();
        assert_eq!(store.reads().iter().filter(|h| **h == d).count(), 1);
        assert_eq!(g.referencing_thunks(&d).unwrap().len(), 2);
    }

    #[test]
    fn test_add_missing_is_recoverable() {
        let store = Arc::new(InMemoryThunkStore::new());
        let a = node(&store, "a", &["Tmissing"]);
        let mut g = graph(&store);

        let err = g.add_thunk(&a).unwrap_err();
        assert!(matches!(err, GraphError::Store(_)));
        assert!(!err.is_fatal());
        assert!(g.is_empty());
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_add_failure_keeps_committed_dependencies() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let a = node(&store, "a", &[&b, "Tmissing"]);
        let mut g = graph(&store);

        assert!(g.add_thunk(&a).is_err());
        assert!(g.contains(&b));
        assert!(!g.contains(&a));
        assert!(g.referencing_thunks(&b).unwrap().is_empty());
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_add_rejects_empty_hash() {
        let store = Arc::new(InMemoryThunkStore::new());
        let mut g = graph(&store);
        assert!(matches!(g.add_thunk(""), Err(GraphError::InvalidHash(_))));
    }

    #[test]
    fn test_update_hash_moves_entries() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let a = node(&store, "a", &[&b]);
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        g.update_hash(&b, "Tb2").unwrap();
        assert!(!g.contains(&b));
        assert!(g.contains("Tb2"));
        assert!(g.referencing_thunks(&b).is_none());
        assert!(g.referencing_thunks("Tb2").unwrap().contains(&a));
        assert!(g.get(&a).unwrap().depends_on("Tb2"));
        assert_eq!(g.updated_hash(&b), "Tb2");
        assert_eq!(g.original_hash("Tb2"), b);
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_update_hash_repoints_outgoing_edges() {
        let store = Arc::new(InMemoryThunkStore::new());
        let c = leaf(&store, "c");
        let b = node(&store, "b", &[&c]);
        let mut g = graph(&store);
        g.add_thunk(&b).unwrap();

        g.update_hash(&b, "Tb2").unwrap();
        let refs = g.referencing_thunks(&c).unwrap();
        assert!(refs.contains("Tb2"));
        assert!(!refs.contains(&b));
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_update_hash_untracked_is_fatal() {
        let store = Arc::new(InMemoryThunkStore::new());
        let mut g = graph(&store);
        let err = g.update_hash("Tnope", "Tother").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_force_to_value() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let a = node(&store, "a", &[&b]);
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        let v = store.put_value("b-out");
        let frontier = g.force_thunk(&b, &v).unwrap();

        assert_eq!(frontier.len(), 1);
        let a2 = frontier.iter().next().unwrap().clone();
        assert_ne!(a2, a);
        assert!(g.get(&a2).unwrap().is_executable());
        assert!(g.get(&a2).unwrap().values.contains_key(&DependencyId::new(v.clone())));
        assert!(!g.contains(&a));
        assert!(!g.contains(&b));
        assert!(g.referencing_thunks(&v).is_none());
        assert_eq!(g.updated_hash(&a), a2);
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_force_partial_leaves_referencer_pending() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let c = leaf(&store, "c");
        let a = node(&store, "a", &[&b, &c]);
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        let frontier = g.force_thunk(&b, &store.put_value("b")).unwrap();
        assert!(frontier.is_empty());
        assert!(g.contains(&a));
        assert!(!g.get(&a).unwrap().is_executable());
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_force_untracked() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let mut g = graph(&store);
        g.add_thunk(&b).unwrap();

        let err = g.force_thunk("Tnope", "Vx").unwrap_err();
        assert!(matches!(err, GraphError::NotFound(_)));
        assert!(!err.is_fatal());
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_force_to_thunk_reports_its_frontier() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let a = node(&store, "a", &[&b]);
        let d = leaf(&store, "d");
        let b2 = node(&store, "b2", &[&d]);
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        let frontier = g.force_thunk(&b, &b2).unwrap();
        assert_eq!(frontier, Frontier::from([d.clone()]));
        assert!(g.get(&a).unwrap().depends_on(&b2));
        assert_eq!(g.updated_hash(&b), b2);
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_chain_compresses_across_reductions() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let a = node(&store, "a", &[&b]);
        let b2 = leaf(&store, "b2");
        let b3 = leaf(&store, "b3");
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        g.force_thunk(&b, &b2).unwrap();
        g.force_thunk(&b2, &b3).unwrap();

        assert_eq!(g.updated_hash(&b), b3);
        assert_eq!(g.original_hash(&b3), b);
        assert_eq!(g.updated_hash(&b2), b2);
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_force_splices_cached_output() {
        let store = Arc::new(InMemoryThunkStore::new());
        let m = leaf(&store, "multi");
        let a = node(&store, "a", &[&format!("{m}#extra")]);
        let cache = LruResultCache::new(16);
        let mut g = graph(&store).with_result_cache(Arc::new(cache.clone()));
        g.add_thunk(&a).unwrap();

        let extra = store.put_value("extra");
        cache.insert(&DependencyId::with_selector(m.clone(), "extra"), extra.clone());

        let frontier = g.force_thunk(&m, &store.put_value("primary")).unwrap();
        assert_eq!(frontier.len(), 1);
        let a2 = frontier.iter().next().unwrap();
        assert!(g.get(a2).unwrap().values.contains_key(&DependencyId::new(extra)));
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_force_without_cached_output_waits() {
        let store = Arc::new(InMemoryThunkStore::new());
        let m = leaf(&store, "multi");
        let a = node(&store, "a", &[&format!("{m}#extra")]);
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        let frontier = g.force_thunk(&m, &store.put_value("primary")).unwrap();
        assert!(frontier.is_empty());
        assert!(g.contains(&a));
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_cache_lookup_can_be_disabled() {
        let store = Arc::new(InMemoryThunkStore::new());
        let m = leaf(&store, "multi");
        let a = node(&store, "a", &[&format!("{m}#extra")]);
        let config = GraphConfig {
            consult_result_cache: false,
            ..GraphConfig::default()
        };
        let mut g = ExecutionGraph::with_config(Arc::clone(&store), config)
            .with_result_cache(Arc::clone(&store) as Arc<dyn ResultCache>);
        g.add_thunk(&a).unwrap();
        store.put_result(&DependencyId::with_selector(m.clone(), "extra"), store.put_value("x"));

        assert!(g.force_thunk(&m, &store.put_value("p")).unwrap().is_empty());
    }

    #[test]
    fn test_failed_write_leaves_graph_unchanged() {
        let store = Arc::new(BudgetStore::new(0));
        let b = leaf(&store.inner, "b");
        let a = node(&store.inner, "a", &[&b]);
        let mut g = ExecutionGraph::new(Arc::clone(&store));
        g.add_thunk(&a).unwrap();
        let before = g.stats();

        let v = store.inner.put_value("b-out");
        let err = g.force_thunk(&b, &v).unwrap_err();
        assert!(matches!(err, GraphError::Store(_)));
        assert!(!err.is_fatal());
        assert!(g.contains(&a));
        assert!(g.contains(&b));
        assert!(g.get(&a).unwrap().depends_on(&b));
        assert_eq!(g.updated_hash(&b), b);
        assert_eq!(g.stats(), before);
        g.check_consistency().unwrap();

        store.allow(usize::MAX);
        let frontier = g.force_thunk(&b, &v).unwrap();
        assert_eq!(frontier.len(), 1);
        assert!(!g.contains(&b));
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_failed_write_mid_cascade_leaves_graph_unchanged() {
        let store = Arc::new(BudgetStore::new(1));
        let b = leaf(&store.inner, "b");
        let a = node(&store.inner, "a", &[&b]);
        let c = node(&store.inner, "c", &[&b]);
        let root = node(&store.inner, "root", &[&a, &c]);
        let mut g = ExecutionGraph::new(Arc::clone(&store));
        g.add_thunk(&root).unwrap();
        let before = g.stats();
        let hashes: Vec<String> = g.hashes().map(str::to_string).collect();

        let v = store.inner.put_value("b-out");
        let err = g.force_thunk(&b, &v).unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(g.stats(), before);
        assert_eq!(g.hashes().map(str::to_string).collect::<Vec<_>>(), hashes);
        assert_eq!(g.referencing_thunks(&b).unwrap().len(), 2);
        assert_eq!(g.chain.len(), 0);
        g.check_consistency().unwrap();

        store.allow(usize::MAX);
        let frontier = g.force_thunk(&b, &v).unwrap();
        assert_eq!(frontier.len(), 2);
        assert_eq!(g.referencing_thunks(&root).map(BTreeSet::len), Some(0));
        for ready in &frontier {
            assert!(g.referencing_thunks(ready).unwrap().contains(&root));
        }
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_order_one_skips_selected_output_of_reduced_thunk() {
        let store = Arc::new(InMemoryThunkStore::new());
        let m = leaf(&store, "multi");
        let o = leaf(&store, "other");
        let a = node(&store, "a", &[&format!("{m}#extra"), &o]);
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        assert!(g.force_thunk(&m, &store.put_value("primary")).unwrap().is_empty());
        assert!(!g.contains(&m));
        g.check_consistency().unwrap();

        assert_eq!(g.order_one_dependencies(&a).unwrap(), Frontier::from([o.clone()]));

        assert!(g.force_thunk(&o, &store.put_value("other")).unwrap().is_empty());
        assert!(g.order_one_dependencies(&a).unwrap().is_empty());
        g.check_consistency().unwrap();
    }

    #[test]
    fn test_order_one_missing_bare_dependency_is_fatal() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let a = node(&store, "a", &[&b]);
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        g.thunks.remove(&b);
        let err = g.order_one_dependencies(&a).unwrap_err();
        assert!(matches!(err, GraphError::Invariant(InvariantViolation::MissingThunk(ref h)) if *h == b));
    }

    #[test]
    fn test_order_one_diamond() {
        let store = Arc::new(InMemoryThunkStore::new());
        let d = leaf(&store, "d");
        let e = leaf(&store, "e");
        let b = node(&store, "b", &[&d]);
        let c = node(&store, "c", &[&d, &e]);
        let a = node(&store, "a", &[&b, &c]);
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        assert_eq!(g.order_one_dependencies(&a).unwrap(), Frontier::from([d.clone(), e.clone()]));
        assert_eq!(g.order_one_dependencies(&d).unwrap(), Frontier::from([d.clone()]));
        assert_eq!(g.order_one_dependencies(&format!("{b}#0")).unwrap(), Frontier::from([d]));
    }

    #[test]
    fn test_order_one_untracked_is_fatal() {
        let store = Arc::new(InMemoryThunkStore::new());
        let g = graph(&store);
        let err = g.order_one_dependencies("Tnope").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_stats() {
        let store = Arc::new(InMemoryThunkStore::new());
        let b = leaf(&store, "b");
        let a_thunk = Thunk::new(Function::new("Vsh", vec!["a".into()]))
            .with_thunk(DependencyId::new(b.clone()), "b")
            .with_value(DependencyId::new("Vinput"), "input")
            .with_executable(DependencyId::new("Vsh"), "sh");
        let a = store.put_thunk(a_thunk).unwrap();
        let mut g = graph(&store);
        g.add_thunk(&a).unwrap();

        let stats = g.stats();
        assert_eq!(stats.thunks, 2);
        assert_eq!(stats.executable, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.reverse_entries, 2);
        assert_eq!(stats.value_dependencies, 1);
        assert_eq!(stats.executable_dependencies, 1);
        assert!(g.value_dependencies().contains("Vinput"));
        assert!(g.executable_dependencies().contains("Vsh"));
    }
}
