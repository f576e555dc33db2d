//! Index facade: input validation, locking, and the public API.

use std::path::Path;
use std::time::Instant;

use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{ConcurrencyMode, IndexConfig};
use crate::distance::Metric;
use crate::error::{IndexError, Result};
use crate::flat_index;
use crate::hnsw::{HnswGraph, Neighbor};
use crate::metrics::{IndexMetrics, IndexStats};
use crate::persistence::snapshot::{self, LoadedIndex};
use crate::persistence::CancellationToken;
use crate::storage::{NodeId, VectorStore};
use crate::vector::{check_dimension, check_finite, check_magnitude, norm, Vector};
use crate::Label;

/// Search results, closest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matches {
    pub labels: Vec<Label>,
    pub distances: Vec<f32>,
}

impl Matches {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterate over `(label, distance)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Label, f32)> + '_ {
        self.labels.iter().copied().zip(self.distances.iter().copied())
    }

    fn from_hits(store: &VectorStore, hits: impl IntoIterator<Item = (NodeId, f32)>) -> Self {
        let (labels, distances) = hits
            .into_iter()
            .map(|(id, distance)| (store.label_of(id), distance))
            .unzip();
        Self { labels, distances }
    }
}

#[derive(Debug)]
struct IndexState {
    store: VectorStore,
    graph: HnswGraph,
}

/// An approximate nearest-neighbour index over fixed-length `f32` vectors.
///
/// All methods take `&self`; the index can be shared between threads with
/// an `Arc`. Searches run concurrently with each other. How insertions
/// interleave is chosen by [`IndexConfig::concurrency`].
#[derive(Debug)]
pub struct Index {
    config: IndexConfig,
    state: RwLock<IndexState>,
    /// Held exclusively by removal, compaction, save and load. Insertions
    /// take it exclusively in single-writer mode and shared otherwise.
    gate: RwLock<()>,
    metrics: IndexMetrics,
}

impl Index {
    /// Create an empty index.
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        info!(
            dimensions = config.dimensions,
            metric = %config.metric,
            connectivity = config.connectivity,
            ef_construction = config.ef_construction,
            ef_search = config.ef_search,
            "creating index"
        );
        let state = IndexState {
            store: VectorStore::new(config.dimensions),
            graph: HnswGraph::new(config.clone()),
        };
        Ok(Self::from_state(config, state))
    }

    fn from_state(config: IndexConfig, state: IndexState) -> Self {
        Self {
            config,
            state: RwLock::new(state),
            gate: RwLock::new(()),
            metrics: IndexMetrics::new(),
        }
    }

    /// Squared Euclidean index with default expansion factors.
    pub fn l2sq(dimensions: usize, connectivity: usize) -> Result<Self> {
        Self::new(IndexConfig::new(dimensions, Metric::L2Sq).with_connectivity(connectivity))
    }

    /// Cosine index with default expansion factors.
    pub fn cos(dimensions: usize, connectivity: usize) -> Result<Self> {
        Self::new(IndexConfig::new(dimensions, Metric::Cosine).with_connectivity(connectivity))
    }

    /// Inner product index with default expansion factors.
    pub fn ip(dimensions: usize, connectivity: usize) -> Result<Self> {
        Self::new(IndexConfig::new(dimensions, Metric::InnerProduct).with_connectivity(connectivity))
    }

    /// Hamming index with default expansion factors.
    pub fn hamming(dimensions: usize, connectivity: usize) -> Result<Self> {
        Self::new(IndexConfig::new(dimensions, Metric::Hamming).with_connectivity(connectivity))
    }

    /// Open a saved index, taking its configuration from the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let loaded = snapshot::load(path.as_ref(), &CancellationToken::new())?;
        let config = loaded.config(&IndexConfig::default());
        info!(path = %path.as_ref().display(), size = loaded.store.count(), "index opened");
        let (store, graph) = loaded.into_parts(config.clone());
        Ok(Self::from_state(config, IndexState { store, graph }))
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn connectivity(&self) -> usize {
        self.config.connectivity
    }

    pub fn metric(&self) -> Metric {
        self.config.metric
    }

    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    fn validate(&self, vector: &[f32]) -> Result<()> {
        check_dimension(vector, self.config.dimensions)?;
        check_finite(vector)?;
        check_magnitude(vector)?;
        if self.config.metric.requires_nonzero_norm() && norm(vector) == 0.0 {
            return Err(IndexError::InvalidVector {
                reason: format!("zero vector has no direction under {} metric", self.config.metric),
            });
        }
        Ok(())
    }

    /// Insert `vector` under `label`.
    ///
    /// If `label` is already present its old vector is removed first, so the
    /// call behaves as an explicit replace.
    pub fn add(&self, label: Label, vector: &[f32]) -> Result<()> {
        self.validate(vector)?;

        // Replacing unlinks and repairs the graph, which must not overlap
        // other insertions, so a replace always runs under the exclusive gate.
        let single = self.config.concurrency == ConcurrencyMode::SingleWriter;
        let mut exclusive = single.then(|| self.gate.write());
        let mut shared = (!single).then(|| self.gate.read());
        let id = loop {
            if let Some(id) = self.allocate(label, vector, exclusive.is_some())? {
                break id;
            }
            drop(shared.take());
            exclusive = Some(self.gate.write());
        };

        let state = self.state.read();
        state.graph.insert(&state.store, id);
        self.metrics.record_insert();
        Ok(())
    }

    /// Store `vector` and allocate its graph node, ready to be linked.
    ///
    /// Returns `None` without changing anything when `label` is present and
    /// `replace` is false.
    fn allocate(&self, label: Label, vector: &[f32], replace: bool) -> Result<Option<NodeId>> {
        let mut state = self.state.write();
        let IndexState { store, graph } = &mut *state;

        let existing = store.lookup(label);
        if existing.is_some() && !replace {
            return Ok(None);
        }
        // Reserve up front so nothing below can fail half way
        store.reserve(1)?;
        graph.reserve(1)?;

        if let Some(old) = existing {
            debug!(label, "replacing existing vector");
            graph.remove(store, old);
        }
        let id = store.put(label, vector)?;
        let level = graph.sample_level();
        graph.allocate(id, level)?;
        Ok(Some(id))
    }

    /// Insert many vectors. All inputs are validated before any is inserted.
    ///
    /// In concurrent-writer mode the insertions run on the rayon pool.
    pub fn add_batch(&self, items: &[(Label, Vec<f32>)]) -> Result<()> {
        for (_, vector) in items {
            self.validate(vector)?;
        }
        self.reserve(self.size() + items.len())?;

        match self.config.concurrency {
            ConcurrencyMode::SingleWriter => items
                .iter()
                .try_for_each(|(label, vector)| self.add(*label, vector)),
            ConcurrencyMode::ConcurrentWriters => items
                .par_iter()
                .try_for_each(|(label, vector)| self.add(*label, vector)),
        }
    }

    /// Find the `k` nearest neighbours of `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Matches> {
        self.search_with_ef(query, k, self.config.ef_search)
    }

    /// Search with an explicit beam width instead of the configured one.
    pub fn search_with_ef(&self, query: &[f32], k: usize, ef: usize) -> Result<Matches> {
        self.validate(query)?;
        let start = Instant::now();

        let state = self.state.read();
        let hits = state.graph.search(&state.store, query, k, ef.max(1));
        let matches = Matches::from_hits(
            &state.store,
            hits.into_iter().map(|Neighbor { id, distance }| (id, distance)),
        );

        self.metrics.record_search(start.elapsed());
        Ok(matches)
    }

    /// Run several searches on the rayon pool.
    pub fn search_batch(&self, queries: &[Vec<f32>], k: usize) -> Result<Vec<Matches>> {
        queries.par_iter().map(|q| self.search(q, k)).collect()
    }

    /// Brute-force search over every live vector.
    pub fn exact_search(&self, query: &[f32], k: usize) -> Result<Matches> {
        self.validate(query)?;
        let state = self.state.read();
        let hits = flat_index::exact_search(&state.store, self.config.metric, query, k);
        Ok(Matches::from_hits(&state.store, hits))
    }

    /// Remove `label`. Returns false if it was not present.
    pub fn remove(&self, label: Label) -> bool {
        let _gate = self.gate.write();
        let mut state = self.state.write();
        let IndexState { store, graph } = &mut *state;

        let Some(id) = store.lookup(label) else {
            return false;
        };
        graph.remove(store, id);
        store.remove(label);
        self.metrics.record_removal();
        debug!(label, size = store.count(), "removed");
        true
    }

    /// Number of live vectors.
    pub fn size(&self) -> usize {
        self.state.read().store.count()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, label: Label) -> bool {
        self.state.read().store.contains(label)
    }

    /// Copy of the vector stored under `label`.
    pub fn get(&self, label: Label) -> Option<Vector> {
        let state = self.state.read();
        let id = state.store.lookup(label)?;
        state.store.get(id).ok()
    }

    /// Labels of all live vectors in insertion order.
    pub fn labels(&self) -> Vec<Label> {
        self.state.read().store.iter().map(|(_, label, _)| label).collect()
    }

    /// Make room for a total of `capacity` vectors.
    pub fn reserve(&self, capacity: usize) -> Result<()> {
        let mut state = self.state.write();
        let additional = capacity.saturating_sub(state.store.slots());
        state.store.reserve(additional)?;
        state.graph.reserve(additional)?;
        Ok(())
    }

    /// Number of vectors storage can hold without growing.
    pub fn capacity(&self) -> usize {
        self.state.read().store.capacity()
    }

    /// Drop storage held by removed vectors. Returns the number of slots
    /// reclaimed.
    pub fn compact(&self) -> usize {
        let _gate = self.gate.write();
        let mut state = self.state.write();
        let IndexState { store, graph } = &mut *state;

        let before = store.slots();
        let remap = store.compact();
        graph.compact(&remap);
        let reclaimed = before - store.slots();
        debug!(reclaimed, "compacted storage");
        reclaimed
    }

    /// Labels of live vectors that cannot be reached from the entry point
    /// on the bottom layer. Empty for a healthy index.
    pub fn unreachable_labels(&self) -> Vec<Label> {
        let state = self.state.read();
        let reached = state.graph.reachable();
        state
            .store
            .iter()
            .filter(|(id, _, _)| !reached.contains(id))
            .map(|(_, label, _)| label)
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        let entry = state.graph.entry_point();
        IndexStats {
            size: state.store.count(),
            tombstones: state.store.slots() - state.store.count(),
            capacity: state.store.capacity(),
            max_level: state.graph.max_level(),
            nodes_per_layer: state.graph.layer_counts(),
            entry_label: entry.map(|e| state.store.label_of(e.id)),
        }
    }

    /// Save the index to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.save_with(path, &CancellationToken::new())
    }

    /// Save, checking `cancel` after every node. A cancelled save leaves no
    /// file behind.
    pub fn save_with(&self, path: impl AsRef<Path>, cancel: &CancellationToken) -> Result<()> {
        let _gate = self.gate.write();
        let state = self.state.read();
        snapshot::save(path.as_ref(), &self.config, &state.store, &state.graph, cancel)
    }

    /// Replace the contents of this index with the one saved at `path`.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        self.load_with(path, &CancellationToken::new())
    }

    /// Load, checking `cancel` after every node. On any error, cancellation
    /// included, the index keeps its previous contents.
    pub fn load_with(&self, path: impl AsRef<Path>, cancel: &CancellationToken) -> Result<()> {
        let path = path.as_ref();
        let loaded = snapshot::load(path, cancel)?;
        self.check_compatible(&loaded)?;

        let (store, graph) = loaded.into_parts(self.config.clone());
        let _gate = self.gate.write();
        let mut state = self.state.write();
        *state = IndexState { store, graph };
        info!(path = %path.display(), size = state.store.count(), "index loaded");
        Ok(())
    }

    fn check_compatible(&self, loaded: &LoadedIndex) -> Result<()> {
        let header = &loaded.header;
        if header.dimensions as usize != self.config.dimensions {
            return Err(IndexError::IncompatibleFormat(format!(
                "file has {} dimensions, index has {}",
                header.dimensions, self.config.dimensions
            )));
        }
        if header.metric != self.config.metric {
            return Err(IndexError::IncompatibleFormat(format!(
                "file uses {} metric, index uses {}",
                header.metric, self.config.metric
            )));
        }
        if header.connectivity as usize != self.config.connectivity {
            return Err(IndexError::IncompatibleFormat(format!(
                "file has connectivity {}, index has {}",
                header.connectivity, self.config.connectivity
            )));
        }
        if header.max_level as usize >= self.config.max_layers {
            return Err(IndexError::IncompatibleFormat(format!(
                "file has {} layers, index allows {}",
                header.max_level + 1,
                self.config.max_layers
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_index() -> Index {
        Index::new(IndexConfig::new(3, Metric::L2Sq).with_connectivity(4).with_seed(1)).unwrap()
    }

    #[test]
    fn test_two_vector_scenario() {
        let index = Index::l2sq(4, 8).unwrap();
        index.add(42, &[0.3, 0.5, 1.2, 1.4]).unwrap();
        index.add(43, &[0.4, 0.2, 1.2, 1.1]).unwrap();

        let results = index.search(&[0.3, 0.5, 1.2, 1.4], 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results.labels, vec![42, 43]);
        assert_relative_eq!(results.distances[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(results.distances[1], 0.19, epsilon = 1e-5);
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        assert!(matches!(Index::l2sq(0, 8), Err(IndexError::InvalidConfiguration(_))));
        assert!(matches!(Index::l2sq(4, 0), Err(IndexError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_dimension_mismatch_leaves_size() {
        let index = Index::l2sq(4, 8).unwrap();
        index.add(1, &[0.0, 0.0, 0.0, 1.0]).unwrap();
        let err = index.add(2, &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 4, actual: 3 }));
        assert_eq!(index.size(), 1);
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let index = small_index();
        assert!(matches!(
            index.add(1, &[1.0, f32::NAN, 0.0]),
            Err(IndexError::InvalidVector { .. })
        ));
        assert!(matches!(
            index.search(&[f32::INFINITY, 0.0, 0.0], 1),
            Err(IndexError::InvalidVector { .. })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_cosine_rejects_zero_vector() {
        let index = Index::cos(2, 4).unwrap();
        assert!(matches!(
            index.add(1, &[0.0, 0.0]),
            Err(IndexError::InvalidVector { .. })
        ));
        index.add(2, &[0.0, 3.0]).unwrap();
        let results = index.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(results.labels, vec![2]);
    }

    #[test]
    fn test_rejects_vectors_too_large_for_distances() {
        let index = Index::cos(2, 4).unwrap();
        assert!(matches!(
            index.add(1, &[1e30, 1e30]),
            Err(IndexError::InvalidVector { .. })
        ));
        let index = Index::l2sq(2, 4).unwrap();
        assert!(matches!(
            index.add(1, &[3e19, 3e19]),
            Err(IndexError::InvalidVector { .. })
        ));
        assert!(matches!(
            index.search(&[-3e19, 0.0], 1),
            Err(IndexError::InvalidVector { .. })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_large_components_keep_distance_order() {
        let index = Index::l2sq(2, 4).unwrap();
        index.add(1, &[4e18, 4e18]).unwrap();
        index.add(2, &[-4e18, -4e18]).unwrap();
        index.add(3, &[1e18, 1e18]).unwrap();

        let results = index.search(&[4e18, 4e18], 3).unwrap();
        assert_eq!(results.labels, vec![1, 3, 2]);
        assert!(results.distances.iter().all(|d| d.is_finite()));
    }

    #[test]
    fn test_ties_broken_by_label() {
        let index = Index::l2sq(2, 4).unwrap();
        index.add(10, &[1.0, 0.0]).unwrap();
        index.add(5, &[-1.0, 0.0]).unwrap();

        let results = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(results.labels, vec![5, 10]);
        assert_eq!(results.distances[0], results.distances[1]);
        assert_eq!(index.exact_search(&[0.0, 0.0], 2).unwrap().labels, vec![5, 10]);
    }

    #[test]
    fn test_add_replaces_existing_label() {
        let index = small_index();
        index.add(7, &[1.0, 0.0, 0.0]).unwrap();
        index.add(8, &[0.0, 1.0, 0.0]).unwrap();
        index.add(7, &[0.0, 0.0, 1.0]).unwrap();

        assert_eq!(index.size(), 2);
        assert_eq!(index.get(7).unwrap().as_slice(), &[0.0, 0.0, 1.0]);
        let results = index.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(results.labels.iter().filter(|&&l| l == 7).count(), 1);
        assert_eq!(index.stats().tombstones, 1);
    }

    #[test]
    fn test_remove() {
        let index = small_index();
        index.add(1, &[1.0, 0.0, 0.0]).unwrap();
        index.add(2, &[0.0, 1.0, 0.0]).unwrap();

        assert!(index.remove(1));
        assert!(!index.remove(1));
        assert_eq!(index.size(), 1);
        assert!(!index.contains(1));
        assert!(index.get(1).is_none());

        let results = index.search(&[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(results.labels, vec![2]);
    }

    #[test]
    fn test_label_reuse_after_remove() {
        let index = small_index();
        index.add(5, &[1.0, 1.0, 1.0]).unwrap();
        assert!(index.remove(5));
        index.add(5, &[2.0, 2.0, 2.0]).unwrap();
        assert_eq!(index.size(), 1);
        assert_eq!(index.search(&[2.0, 2.0, 2.0], 1).unwrap().labels, vec![5]);
    }

    #[test]
    fn test_search_zero_k_and_empty() {
        let index = small_index();
        assert!(index.search(&[0.0, 0.0, 0.0], 3).unwrap().is_empty());
        index.add(1, &[0.0, 0.0, 0.0]).unwrap();
        assert!(index.search(&[0.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_reserve_and_capacity() {
        let index = small_index();
        index.reserve(64).unwrap();
        assert!(index.capacity() >= 64);
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn test_compact_keeps_results() {
        let index = small_index();
        for i in 0..30u64 {
            index.add(i, &[i as f32, (i % 5) as f32, 1.0]).unwrap();
        }
        for i in (0..30u64).step_by(3) {
            assert!(index.remove(i));
        }
        let before = index.search(&[7.0, 2.0, 1.0], 5).unwrap();
        assert_eq!(index.compact(), 10);
        assert_eq!(index.stats().tombstones, 0);
        assert_eq!(index.search(&[7.0, 2.0, 1.0], 5).unwrap(), before);
        assert!(index.unreachable_labels().is_empty());
    }

    #[test]
    fn test_stats_and_metrics() {
        let index = small_index();
        index.add(1, &[1.0, 0.0, 0.0]).unwrap();
        index.add(2, &[0.0, 1.0, 0.0]).unwrap();
        index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        index.remove(2);

        let stats = index.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(stats.entry_label, Some(1));
        assert_eq!(stats.nodes_per_layer[0], 1);

        assert_eq!(index.metrics().total_inserts(), 2);
        assert_eq!(index.metrics().total_searches(), 1);
        assert_eq!(index.metrics().total_removals(), 1);
    }

    #[test]
    fn test_exact_search_matches_graph_on_small_set() {
        let index = small_index();
        for i in 0..20u64 {
            index.add(i, &[i as f32, 0.5, -(i as f32)]).unwrap();
        }
        let q = [4.2, 0.5, -4.2];
        assert_eq!(
            index.search(&q, 3).unwrap().labels,
            index.exact_search(&q, 3).unwrap().labels
        );
    }

    #[test]
    fn test_batch_apis() {
        let index = Index::new(
            IndexConfig::new(2, Metric::L2Sq)
                .with_connectivity(4)
                .with_concurrency(ConcurrencyMode::ConcurrentWriters),
        )
        .unwrap();
        let items: Vec<(Label, Vec<f32>)> =
            (0..50u64).map(|i| (i, vec![i as f32, (i * i % 11) as f32])).collect();
        index.add_batch(&items).unwrap();
        assert_eq!(index.size(), 50);

        let queries: Vec<Vec<f32>> = items.iter().take(5).map(|(_, v)| v.clone()).collect();
        let results = index.search_batch(&queries, 1).unwrap();
        for (i, m) in results.iter().enumerate() {
            assert_eq!(m.labels, vec![i as u64]);
        }
    }

    #[test]
    fn test_add_batch_validates_first() {
        let index = small_index();
        let items = vec![(1, vec![1.0, 2.0, 3.0]), (2, vec![1.0, 2.0])];
        assert!(index.add_batch(&items).is_err());
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn test_concurrent_replacements_keep_graph_consistent() {
        let index = std::sync::Arc::new(
            Index::new(
                IndexConfig::new(2, Metric::L2Sq)
                    .with_connectivity(4)
                    .with_seed(9)
                    .with_concurrency(ConcurrencyMode::ConcurrentWriters),
            )
            .unwrap(),
        );
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let index = std::sync::Arc::clone(&index);
                std::thread::spawn(move || {
                    for i in 0..120u64 {
                        let label = (i + t * 5) % 16;
                        let jitter = ((i * 7 + t) % 10) as f32 * 0.01;
                        index.add(label, &[label as f32 + jitter, (label % 4) as f32]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.size(), 16);
        assert!(index.unreachable_labels().is_empty());
        {
            let state = index.state.read();
            let entry = state.graph.entry_point().unwrap();
            let top = (0..state.graph.slots())
                .filter_map(|id| state.graph.level_of(id))
                .max()
                .unwrap();
            assert!(state.store.is_live(entry.id));
            assert_eq!(entry.level, top);
        }
        for label in 0..16u64 {
            let vector = index.get(label).unwrap();
            let results = index.search_with_ef(vector.as_slice(), 1, 64).unwrap();
            assert_eq!(results.labels, vec![label]);
        }
    }
}
