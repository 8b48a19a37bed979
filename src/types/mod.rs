//! Core types for the execution graph.

pub mod hash;
pub mod thunk;

pub use hash::{DependencyId, DependencyIdError, ObjectType, SELECTOR_MARKER};
pub use thunk::{DependencyMap, Function, Thunk};
