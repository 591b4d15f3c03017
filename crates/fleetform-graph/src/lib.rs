//! Fleetform Graph
//!
//! A directed acyclic graph of infrastructure components. The graph resolves
//! a deterministic creation order (dependencies first, declaration order as
//! the tie-break) and keeps the outputs each component publishes once it is
//! provisioned, so dependents can consume them before they start.

mod error;
mod graph;

pub use error::GraphError;
pub use graph::{DependencyGraph, Edge};
