//! tour-graph-core: In-memory route graph and shortest path engine.
//!
//! A pure Rust library that keeps one weighted, directed adjacency subgraph
//! per route (stops as vertices, neighbor rows as edges) and answers
//! minimum-distance queries over it with Dijkstra's algorithm.
//! No storage dependencies: this crate compiles standalone.
//!
//! The `tour-graph` crate wraps it with an entity store, a per-route
//! registry and the mutation gateway; the engine itself is usable
//! independently for benchmarking and testing.

mod error;
mod graph;
mod traversal;


pub use error::{GraphError, GraphResult};
pub use graph::{check_weight, Edge, EdgeRecord, RouteGraph, RouteId, StopId, StopInfo};
pub use traversal::{
    degree_centrality, distances_from, shortest_path, DegreeResult, ReachedStop, WeightedPath,
};
