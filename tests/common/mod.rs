//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Once};

use thunk_graph::{
    BatchEntry, Completion, DependencyId, ExecutionEngine, Function, InMemoryThunkStore, ObjectType,
    Thunk,
};

/// First argument that makes the engine reduce to a new thunk instead of a value.
pub const SPAWN: &str = "spawn";

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Thunk builders
// ─────────────────────────────────────────────────────────────────────────────

pub fn leaf(store: &InMemoryThunkStore, name: &str) -> String {
    store
        .put_thunk(Thunk::new(Function::new("Vsh", vec![name.to_string()])))
        .unwrap()
}

pub fn node(store: &InMemoryThunkStore, name: &str, deps: &[&str]) -> String {
    let mut thunk = Thunk::new(Function::new("Vsh", vec![name.to_string()]));
    for (i, dep) in deps.iter().enumerate() {
        thunk = thunk.with_thunk(DependencyId::parse(dep).unwrap(), format!("in{i}"));
    }
    store.put_thunk(thunk).unwrap()
}

/// A thunk that reduces to a fresh leaf thunk named `child`.
pub fn spawner(store: &InMemoryThunkStore, child: &str) -> String {
    store
        .put_thunk(Thunk::new(Function::new(
            "Vsh",
            vec![SPAWN.to_string(), child.to_string()],
        )))
        .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic in-process engine.
///
/// A thunk reduces to a value whose bytes are its arguments and value
/// inputs, or to a new leaf thunk if its first argument is [`SPAWN`]. Extra
/// outputs are published to the store's result cache.
pub struct LocalEngine {
    store: Arc<InMemoryThunkStore>,
    queue: VecDeque<Vec<BatchEntry>>,
    remote: bool,
    /// Sizes of submitted groups, in order.
    pub submitted: Vec<usize>,
    /// Every thunk hash executed, in order.
    pub executed: Vec<String>,
    /// Most groups queued at once.
    pub peak: usize,
}

impl LocalEngine {
    pub fn new(store: Arc<InMemoryThunkStore>) -> Self {
        Self {
            store,
            queue: VecDeque::new(),
            remote: false,
            submitted: Vec::new(),
            executed: Vec::new(),
            peak: 0,
        }
    }

    /// Accept whole groups, like a remote worker would.
    pub fn batching(mut self) -> Self {
        self.remote = true;
        self
    }

    fn execute(&mut self, hash: &str, thunk: &Thunk) -> String {
        assert!(thunk.is_executable(), "dispatched thunk {hash} is not executable");
        self.executed.push(hash.to_string());

        if thunk.function.args.first().map(String::as_str) == Some(SPAWN) {
            let child = thunk.function.args.get(1).cloned().unwrap_or_default();
            return leaf(&self.store, &child);
        }

        for output in thunk.outputs.iter().skip(1) {
            let bytes = format!("{}/{}", hash, output);
            let value = self.store.put_value(bytes);
            self.store
                .put_result(&DependencyId::with_selector(hash, output.as_str()), value);
        }

        let inputs: Vec<String> = thunk.values.keys().map(|id| id.to_raw()).collect();
        self.store
            .put_value(format!("{}({})", thunk.function.args.join(" "), inputs.join(",")))
    }
}

impl ExecutionEngine for LocalEngine {
    type Error = Infallible;

    fn label(&self) -> &str {
        if self.remote {
            "test-remote"
        } else {
            "test-local"
        }
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    fn job_count(&self) -> usize {
        self.queue.len()
    }

    fn submit(&mut self, group: Vec<BatchEntry>) -> Result<(), Self::Error> {
        self.submitted.push(group.len());
        self.queue.push_back(group);
        self.peak = self.peak.max(self.queue.len());
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Completion>, Self::Error> {
        let Some(group) = self.queue.pop_front() else {
            return Ok(Vec::new());
        };

        let mut completions = Vec::new();
        // (dispatched hash, what it reduced to) of the previous member
        let mut previous: Option<(String, String)> = None;
        for entry in group {
            let mut thunk = entry.thunk;
            if let Some((prev_hash, prev_out)) = &previous {
                let kind = ObjectType::from_hash(prev_out);
                thunk.update_dependency(prev_hash, prev_out, kind);
            }
            let output = self.execute(&entry.hash, &thunk);
            completions.push(Completion::new(entry.hash.clone(), output.clone()));
            previous = Some((entry.hash, output));
        }
        Ok(completions)
    }
}
