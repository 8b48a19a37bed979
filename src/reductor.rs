//! The single-writer control loop.
//!
//! The reductor owns the graph and one engine. It seeds the graph with the
//! target thunks, dispatches every ready thunk, and applies completions one
//! at a time until every target has reduced to a value. Engines may run
//! executions concurrently; the graph only ever sees them serialized here.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::engine::ExecutionEngine;
use crate::graph::{ExecutionGraph, GraphError};
use crate::store::ThunkStore;
use crate::types::ObjectType;

/// Error type for reductor runs.
#[derive(Debug, thiserror::Error)]
pub enum ReductorError {
    /// Graph error.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Engine error.
    #[error("Engine '{engine}': {message}")]
    Engine {
        /// Engine label.
        engine: String,
        /// Error message.
        message: String,
    },
    /// The engine refused a ready thunk.
    #[error("Engine '{engine}' cannot execute {hash}")]
    Refused {
        /// Engine label.
        engine: String,
        /// Head of the refused group.
        hash: String,
    },
    /// Nothing is running or ready, yet targets remain.
    #[error("Reduction stalled with {0} unresolved target(s)")]
    Stalled(usize),
}

/// Drives an [`ExecutionGraph`] to completion with an [`ExecutionEngine`].
pub struct Reductor<S: ThunkStore, E: ExecutionEngine> {
    graph: ExecutionGraph<S>,
    engine: E,
    ready: BTreeSet<String>,
    /// Dispatched hash → original hash, for thunks not yet reported.
    in_flight: HashMap<String, String>,
}

impl<S: ThunkStore, E: ExecutionEngine> Reductor<S, E> {
    /// Create a reductor over `graph` and `engine`.
    pub fn new(graph: ExecutionGraph<S>, engine: E) -> Self {
        Self {
            graph,
            engine,
            ready: BTreeSet::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Reduce every target to a value.
    ///
    /// Returns the final value hash of each target, keyed by the hash it
    /// was given as.
    pub fn run(&mut self, targets: &[String]) -> Result<BTreeMap<String, String>, ReductorError> {
        // given hash → original tracked hash
        let mut pending: BTreeMap<String, String> = BTreeMap::new();
        let mut results: BTreeMap<String, String> = BTreeMap::new();

        for target in targets {
            let canonical = self.graph.add_thunk(target)?;
            let original = self.graph.original_hash(&canonical).to_string();
            self.ready.extend(self.graph.order_one_dependencies(&canonical)?);
            pending.insert(target.clone(), original);
        }

        tracing::debug!(
            engine = %self.engine.label(),
            targets = pending.len(),
            ready = self.ready.len(),
            "Starting reduction"
        );

        while !pending.is_empty() {
            self.dispatch()?;

            if self.engine.job_count() == 0 {
                return Err(ReductorError::Stalled(pending.len()));
            }

            let completions = self.engine.poll().map_err(|e| self.engine_error(e))?;
            for completion in completions {
                // Group members are rehashed while the head reduces, so map
                // the dispatched hash forward through its original.
                let original = self
                    .in_flight
                    .remove(&completion.thunk_hash)
                    .unwrap_or_else(|| completion.thunk_hash.clone());
                let current = self.graph.updated_hash(&original).to_string();

                let finished: Vec<String> = pending
                    .iter()
                    .filter(|(_, tracked)| self.graph.updated_hash(tracked) == current)
                    .map(|(given, _)| given.clone())
                    .collect();

                match self.graph.force_thunk(&current, &completion.output_hash) {
                    Ok(frontier) => self.ready.extend(frontier),
                    Err(e) if !e.is_fatal() => {
                        tracing::warn!(
                            engine = %self.engine.label(),
                            thunk_hash = %completion.thunk_hash,
                            error = %e,
                            "Dropped completion"
                        );
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }

                if self.graph.classify(&completion.output_hash) == ObjectType::Value {
                    for given in finished {
                        pending.remove(&given);
                        results.insert(given, completion.output_hash.clone());
                    }
                }
            }
        }

        Ok(results)
    }

    /// Get the graph.
    pub fn graph(&self) -> &ExecutionGraph<S> {
        &self.graph
    }

    /// Get the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Give back the graph and engine.
    pub fn into_parts(self) -> (ExecutionGraph<S>, E) {
        (self.graph, self.engine)
    }

    /// Submit ready thunks while the engine has room.
    fn dispatch(&mut self) -> Result<(), ReductorError> {
        let max_in_flight = self.graph.config().max_in_flight.max(1);

        while self.engine.job_count() < max_in_flight {
            let Some(hash) = self.ready.pop_first() else {
                break;
            };
            if !self.graph.contains(&hash) {
                // Renamed by a later reduction before it could be dispatched.
                continue;
            }
            let original = self.graph.original_hash(&hash);
            if self.in_flight.values().any(|o| o == original) {
                continue;
            }

            let mut group = self.graph.get_thunks(&hash)?;
            if !self.engine.is_remote() {
                group.truncate(1);
            }
            if !self.engine.can_execute(&group) {
                return Err(ReductorError::Refused {
                    engine: self.engine.label().to_string(),
                    hash,
                });
            }

            for entry in &group {
                let original = self.graph.original_hash(&entry.hash).to_string();
                self.in_flight.insert(entry.hash.clone(), original);
            }
            tracing::trace!(engine = %self.engine.label(), hash = %hash, size = group.len(), "Dispatching");
            self.engine.submit(group).map_err(|e| self.engine_error(e))?;
        }

        Ok(())
    }

    fn engine_error(&self, e: E::Error) -> ReductorError {
        ReductorError::Engine {
            engine: self.engine.label().to_string(),
            message: e.to_string(),
        }
    }
}
