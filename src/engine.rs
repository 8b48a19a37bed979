//! Execution engine interface.
//!
//! Engines run ready thunks somewhere (a local process pool, a remote
//! worker fleet) and report what each one reduced to. The graph does not
//! care how; it only consumes [`Completion`]s, one at a time.

use serde::{Deserialize, Serialize};

use crate::graph::BatchEntry;

/// A finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Hash of the thunk that ran, as dispatched.
    pub thunk_hash: String,
    /// What it reduced to: a value hash or a replacement thunk hash.
    pub output_hash: String,
}

impl Completion {
    /// Create a completion record.
    pub fn new(thunk_hash: impl Into<String>, output_hash: impl Into<String>) -> Self {
        Self {
            thunk_hash: thunk_hash.into(),
            output_hash: output_hash.into(),
        }
    }
}

/// Trait for execution backends.
///
/// `submit` must not block on the execution itself; results are collected
/// with `poll`. An engine given a group reports one completion per member it
/// reduced, in chain order.
pub trait ExecutionEngine {
    /// Error type for engine operations.
    type Error: std::error::Error + Send + Sync;

    /// Short name used in logs.
    fn label(&self) -> &str;

    /// Whether executions leave this machine.
    fn is_remote(&self) -> bool {
        false
    }

    /// Whether this engine accepts `group`.
    fn can_execute(&self, group: &[BatchEntry]) -> bool {
        !group.is_empty()
    }

    /// Groups submitted and not yet fully reported.
    fn job_count(&self) -> usize;

    /// Start executing `group`.
    fn submit(&mut self, group: Vec<BatchEntry>) -> Result<(), Self::Error>;

    /// Collect finished executions.
    fn poll(&mut self) -> Result<Vec<Completion>, Self::Error>;
}
