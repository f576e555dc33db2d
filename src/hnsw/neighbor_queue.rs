//! Priority queues over `(node, distance)` pairs for beam search.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::storage::NodeId;

/// A node together with its distance to some reference vector.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub distance: f32,
    pub id: NodeId,
}

impl Neighbor {
    pub fn new(id: NodeId, distance: f32) -> Self {
        Self { distance, id }
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Ascending by distance, then by id, so heaps and sorts are deterministic.
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Nodes still to expand, closest first.
#[derive(Debug, Default)]
pub struct Candidates {
    heap: BinaryHeap<Reverse<Neighbor>>,
}

impl Candidates {
    pub fn push(&mut self, n: Neighbor) {
        self.heap.push(Reverse(n));
    }

    pub fn pop(&mut self) -> Option<Neighbor> {
        self.heap.pop().map(|Reverse(n)| n)
    }
}

/// The best `limit` nodes seen so far, furthest on top.
#[derive(Debug)]
pub struct ResultSet {
    heap: BinaryHeap<Neighbor>,
    limit: usize,
}

impl ResultSet {
    pub fn new(limit: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(limit + 1),
            limit,
        }
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.limit
    }

    pub fn furthest(&self) -> Option<&Neighbor> {
        self.heap.peek()
    }

    /// Keep `n` if the set has room or `n` is strictly closer than the
    /// furthest entry, which is then dropped. Returns whether `n` was kept.
    pub fn offer(&mut self, n: Neighbor) -> bool {
        if !self.is_full() {
            self.heap.push(n);
            return true;
        }
        match self.heap.peek() {
            Some(furthest) if n.distance < furthest.distance => {
                self.heap.pop();
                self.heap.push(n);
                true
            }
            _ => false,
        }
    }

    /// Drain into a Vec sorted ascending by distance.
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}
