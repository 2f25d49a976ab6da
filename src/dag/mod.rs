// src/dag/mod.rs

//! Dependency graph model.
//!
//! [`graph`] holds a lock-protected directed acyclic graph over string
//! handles, with caller payloads for nodes and edges. It knows nothing about
//! workflows; [`crate::workflow`] builds one per workflow instance.

pub mod graph;

pub use graph::{DependencyGraph, GraphEdge, GraphSnapshot, NodeKey};
