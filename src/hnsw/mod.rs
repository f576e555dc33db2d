//! HNSW (Hierarchical Navigable Small World) proximity graph.

pub mod graph;
pub mod neighbor_queue;
mod select;

pub use graph::{EntryPoint, HnswGraph};
pub use neighbor_queue::Neighbor;
