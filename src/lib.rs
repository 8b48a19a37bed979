//! # thunk-graph
//!
//! Content-addressed execution graph for memoized thunk reduction.
//!
//! A thunk is a computation identified by the hash of its definition. When
//! a thunk is executed it reduces to a value (or to a simpler thunk), and
//! that result is substituted into every thunk that was waiting on it,
//! which changes their hashes in turn. The graph answers one question after
//! each reduction:
//!
//! > Which thunks can run now?
//!
//! ## Core Contract
//!
//! 1. [`ExecutionGraph::add_thunk`] registers a thunk and its dependency closure
//! 2. [`ExecutionGraph::force_thunk`] applies a reduction and returns the new frontier
//! 3. [`ExecutionGraph::updated_hash`] / [`ExecutionGraph::original_hash`]
//!    translate hashes across renames
//!
//! ## Architecture
//!
//! ```text
//! Reductor → ExecutionEngine (submit / poll)
//!    ↓
//! ExecutionGraph ── thunks / ReverseIndex / HashChain
//!    ↓
//! ThunkStore + ResultCache (memory or external)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Frontiers are ordered sets (`BTreeSet`)
//! - Dependency maps are `BTreeMap`, so canonical bytes are stable
//! - Same store contents + same completions → same hashes and frontiers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod config;
pub mod engine;
pub mod graph;
pub mod reductor;
pub mod store;
pub mod types;

// Re-exports
pub use types::{DependencyId, DependencyIdError, DependencyMap, Function, ObjectType, Thunk};
pub use graph::{
    BatchEntry, ExecutionGraph, Frontier, GraphError, GraphStats, HashChain, InvariantViolation,
    ReverseIndex,
};
pub use config::GraphConfig;
pub use engine::{Completion, ExecutionEngine};
pub use reductor::{Reductor, ReductorError};
pub use store::{InMemoryThunkStore, LruResultCache, NoResultCache, ResultCache, ThunkStore};
pub use canonical::{canonical_hash, canonical_hash_hex, object_hash, to_canonical_bytes};
