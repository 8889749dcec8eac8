//! Dependency graph, levelization and cycle detection for reaction scheduling.

pub mod dag;
pub mod dot;
pub mod error;
pub mod levels;
pub mod reduce;


pub use dag::{
    aliases, classify_connections, connection_readers, reader_port, ConnectionClass, DependencyGraph, Edge, EdgeKind,
    GraphStats, NodeKey,
};
pub use dot::{to_dot, DotOptions};
pub use error::GraphError;
pub use levels::{levelize, Levelization};
pub use reduce::prune_redundant_edges;
