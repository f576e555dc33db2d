//! Diversity-preserving neighbour selection.

use crate::distance::Metric;
use crate::storage::VectorStore;

use super::neighbor_queue::Neighbor;

/// Pick at most `cap` neighbours from `candidates`, which must be sorted by
/// ascending distance to the base vector and free of duplicates.
///
/// A candidate is accepted only if it is closer to the base than to every
/// neighbour accepted so far. When fewer than `cap` pass, the rejected
/// candidates fill the remaining slots closest-first. The result is sorted by
/// ascending distance to the base.
pub(crate) fn select_neighbors(
    metric: Metric,
    store: &VectorStore,
    candidates: &[Neighbor],
    cap: usize,
) -> Vec<Neighbor> {
    if candidates.len() <= cap {
        return candidates.to_vec();
    }

    let mut selected: Vec<Neighbor> = Vec::with_capacity(cap);
    let mut pruned: Vec<Neighbor> = Vec::new();

    for &candidate in candidates {
        if selected.len() >= cap {
            break;
        }
        let vector = store.vector(candidate.id);
        let diverse = selected
            .iter()
            .all(|s| candidate.distance < metric.eval(vector, store.vector(s.id)));
        if diverse {
            selected.push(candidate);
        } else {
            pruned.push(candidate);
        }
    }

    for candidate in pruned {
        if selected.len() >= cap {
            break;
        }
        selected.push(candidate);
    }

    selected.sort();
    selected
}
