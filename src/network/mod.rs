//! Network dependency analysis: which containers share another container's network
//! namespace and therefore have to be quiesced and rebuilt when it is replaced.

pub mod discovery;
pub mod graph;
pub mod index;

pub use discovery::discover_snapshots;
pub use graph::{
    DependencyEdge, DependencyGraph, DependencyReason, Dependent, build_graph, build_graph_indexed,
    provides_network, stack_peers, uses_network_mode,
};
pub use index::IdentityIndex;
