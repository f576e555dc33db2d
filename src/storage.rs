//! Contiguous vector storage keyed by label.

use std::collections::HashMap;

use crate::error::{IndexError, Result};
use crate::vector::{check_dimension, Vector};
use crate::Label;

/// Dense slot index shared by the vector store and the proximity graph.
pub type NodeId = usize;

/// Fixed-dimensionality vectors stored back to back in one buffer.
///
/// Slots are never reused: removing a label only tombstones its slot, so
/// the buffer grows monotonically until [`VectorStore::compact`] is called.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimensions: usize,
    /// Slot `i` occupies `data[i * dimensions..(i + 1) * dimensions]`.
    data: Vec<f32>,
    labels: Vec<Label>,
    live: Vec<bool>,
    by_label: HashMap<Label, NodeId>,
}

impl VectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
            labels: Vec::new(),
            live: Vec::new(),
            by_label: HashMap::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Append `vector` under `label`, tombstoning any live slot the label
    /// already occupies.
    pub fn put(&mut self, label: Label, vector: &[f32]) -> Result<NodeId> {
        check_dimension(vector, self.dimensions)?;
        self.reserve(1)?;

        if let Some(old) = self.by_label.remove(&label) {
            self.live[old] = false;
        }

        let id = self.labels.len();
        self.data.extend_from_slice(vector);
        self.labels.push(label);
        self.live.push(true);
        self.by_label.insert(label, id);
        Ok(id)
    }

    /// Copy of the vector in slot `id`.
    pub fn get(&self, id: NodeId) -> Result<Vector> {
        if !self.is_live(id) {
            return Err(IndexError::NotFound(format!("node {}", id)));
        }
        Ok(Vector::from(self.vector(id)))
    }

    /// Tombstone the slot holding `label`.
    pub fn remove(&mut self, label: Label) -> Option<NodeId> {
        let id = self.by_label.remove(&label)?;
        self.live[id] = false;
        Some(id)
    }

    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.by_label.len()
    }

    /// Number of slots, tombstones included.
    pub fn slots(&self) -> usize {
        self.labels.len()
    }

    /// Number of vectors the buffer can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.data.capacity() / self.dimensions.max(1)
    }

    /// Make room for `additional` more vectors.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let floats = additional.checked_mul(self.dimensions).ok_or_else(|| {
            IndexError::Capacity(format!("cannot reserve {} vectors", additional))
        })?;
        self.data.try_reserve(floats)?;
        self.labels.try_reserve(additional)?;
        self.live.try_reserve(additional)?;
        self.by_label.try_reserve(additional)?;
        Ok(())
    }

    pub fn lookup(&self, label: Label) -> Option<NodeId> {
        self.by_label.get(&label).copied()
    }

    pub fn contains(&self, label: Label) -> bool {
        self.by_label.contains_key(&label)
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.live.get(id).copied().unwrap_or(false)
    }

    /// Label of slot `id` (live or tombstoned), or `None` past the last slot.
    pub fn label(&self, id: NodeId) -> Option<Label> {
        self.labels.get(id).copied()
    }

    /// Label of a slot the caller knows exists.
    pub(crate) fn label_of(&self, id: NodeId) -> Label {
        self.labels[id]
    }

    /// Borrow the components of slot `id`. Tombstoned slots stay readable
    /// until compaction.
    pub(crate) fn vector(&self, id: NodeId) -> &[f32] {
        let start = id * self.dimensions;
        &self.data[start..start + self.dimensions]
    }

    /// Iterate over live `(id, label, vector)` triples in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, Label, &[f32])> + '_ {
        self.live
            .iter()
            .enumerate()
            .filter(|(_, live)| **live)
            .map(move |(id, _)| (id, self.labels[id], self.vector(id)))
    }

    /// Drop tombstoned slots.
    ///
    /// Returns the old-to-new id map; surviving slots keep their relative
    /// order.
    pub fn compact(&mut self) -> Vec<Option<NodeId>> {
        let mut remap = vec![None; self.slots()];
        let mut data = Vec::with_capacity(self.count() * self.dimensions);
        let mut labels = Vec::with_capacity(self.count());

        for (old, label, vector) in self.iter() {
            remap[old] = Some(labels.len());
            labels.push(label);
            data.extend_from_slice(vector);
        }

        self.by_label = labels.iter().enumerate().map(|(id, &l)| (l, id)).collect();
        self.live = vec![true; labels.len()];
        self.labels = labels;
        self.data = data;
        remap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let mut store = VectorStore::new(3);
        let id = store.put(7, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(store.get(id).unwrap().as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(store.lookup(7), Some(id));
        assert_eq!(store.label_of(id), 7);
    }

    #[test]
    fn test_label_out_of_range() {
        let mut store = VectorStore::new(2);
        let id = store.put(3, &[1.0, 0.0]).unwrap();
        assert_eq!(store.label(id), Some(3));
        assert_eq!(store.label(id + 1), None);
        assert_eq!(store.label(usize::MAX), None);
        assert!(store.get(id + 1).is_err());
    }

    #[test]
    fn test_dimension_consistency() {
        let mut store = VectorStore::new(3);
        let result = store.put(1, &[1.0, 2.0]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
        assert_eq!(store.count(), 0);
        assert_eq!(store.slots(), 0);
    }

    #[test]
    fn test_put_overwrites_label() {
        let mut store = VectorStore::new(2);
        let first = store.put(1, &[1.0, 0.0]).unwrap();
        let second = store.put(1, &[0.0, 1.0]).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.count(), 1);
        assert_eq!(store.slots(), 2);
        assert!(!store.is_live(first));
        assert_eq!(store.get(second).unwrap().as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn test_remove_tombstones() {
        let mut store = VectorStore::new(2);
        let id = store.put(5, &[1.0, 1.0]).unwrap();
        assert_eq!(store.remove(5), Some(id));
        assert_eq!(store.remove(5), None);
        assert_eq!(store.count(), 0);
        assert!(matches!(store.get(id), Err(IndexError::NotFound(_))));
        // slot still occupies storage until compaction
        assert_eq!(store.slots(), 1);
    }

    #[test]
    fn test_compact_preserves_order() {
        let mut store = VectorStore::new(1);
        for label in 0..5u64 {
            store.put(label, &[label as f32]).unwrap();
        }
        store.remove(1);
        store.remove(3);

        let remap = store.compact();
        assert_eq!(remap, vec![Some(0), None, Some(1), None, Some(2)]);
        assert_eq!(store.slots(), 3);
        assert_eq!(store.lookup(4), Some(2));
        let labels: Vec<Label> = store.iter().map(|(_, label, _)| label).collect();
        assert_eq!(labels, vec![0, 2, 4]);
        assert_eq!(store.get(2).unwrap().as_slice(), &[4.0]);
    }

    #[test]
    fn test_reserve_grows_capacity() {
        let mut store = VectorStore::new(4);
        store.reserve(100).unwrap();
        assert!(store.capacity() >= 100);
    }
}
