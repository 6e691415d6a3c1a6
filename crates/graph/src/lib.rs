pub mod topology;

pub use topology::{DependencyGraph, GraphStats, Node, NodeContext, TopologyError};
