//! # hnsw_index
//!
//! An in-memory approximate nearest-neighbour index built on a Hierarchical
//! Navigable Small World graph.
//!
//! This library provides:
//! - Contiguous vector storage keyed by integer labels
//! - Distance metrics (squared Euclidean, cosine, inner product, Hamming)
//! - HNSW graph construction, search and removal with neighbourhood repair
//! - Single-file persistence with checksums
//!
//! ## Example
//!
//! ```rust
//! use hnsw_index::Index;
//!
//! let index = Index::l2sq(4, 8).unwrap();
//! index.add(42, &[0.3, 0.5, 1.2, 1.4]).unwrap();
//! index.add(43, &[0.4, 0.2, 1.2, 1.1]).unwrap();
//!
//! let results = index.search(&[0.3, 0.5, 1.2, 1.4], 10).unwrap();
//! assert_eq!(results.labels, vec![42, 43]);
//! assert!(results.distances[0] < 1e-6);
//! ```

pub mod config;
pub mod distance;
pub mod error;
pub mod flat_index;
pub mod hnsw;
pub mod index;
pub mod metrics;
pub mod persistence;
pub mod storage;
pub mod vector;

/// Caller-chosen identifier of a stored vector.
pub type Label = u64;

pub use config::{ConcurrencyMode, IndexConfig};
pub use distance::Metric;
pub use error::{IndexError, Result};
pub use index::{Index, Matches};
pub use metrics::{IndexMetrics, IndexStats};
pub use persistence::CancellationToken;
pub use storage::{NodeId, VectorStore};
pub use vector::Vector;
