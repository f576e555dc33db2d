//! Brute-force exact k-NN over the vector store.
//!
//! Used as ground truth when measuring the recall of the graph search.

use crate::distance::Metric;
use crate::storage::{NodeId, VectorStore};

/// Compute the distance to every live vector and keep the `k` closest,
/// sorted by distance with ties broken by ascending label.
pub fn exact_search(
    store: &VectorStore,
    metric: Metric,
    query: &[f32],
    k: usize,
) -> Vec<(NodeId, f32)> {
    let mut results: Vec<(NodeId, f32)> = store
        .iter()
        .map(|(id, _, vector)| (id, metric.eval(query, vector)))
        .collect();

    results.sort_by(|a, b| {
        a.1.total_cmp(&b.1)
            .then_with(|| store.label_of(a.0).cmp(&store.label_of(b.0)))
    });
    results.truncate(k);
    results
}
