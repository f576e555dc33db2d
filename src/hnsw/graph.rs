//! HNSW graph: topology plus the insertion, search and removal algorithms.
//!
//! Implements the Hierarchical Navigable Small World graph from:
//! "Efficient and robust approximate nearest neighbor search using
//!  Hierarchical Navigable Small World graphs" (Malkov & Yashunin, 2016/2018).
//!
//! The graph only stores topology. Vectors live in the [`VectorStore`] and
//! are passed in by the caller; a `NodeId` is a slot index in both.
//!
//! Locking: every node keeps its per-layer neighbour lists behind its own
//! `RwLock`, so insertions that hold `&HnswGraph` may link in parallel.
//! Whenever two lists have to change together they are locked in ascending
//! `NodeId` order. Structural changes (allocation, removal, compaction)
//! require `&mut HnswGraph`.

use std::collections::{HashSet, VecDeque};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::config::IndexConfig;
use crate::distance::Metric;
use crate::error::{IndexError, Result};
use crate::storage::{NodeId, VectorStore};

use super::neighbor_queue::{Candidates, Neighbor, ResultSet};
use super::select::select_neighbors;

/// Per-layer neighbour lists of one node, each sorted by ascending distance.
type Links = Vec<Vec<Neighbor>>;

/// A node in the HNSW graph.
#[derive(Debug)]
struct HnswNode {
    /// The top layer this node was inserted into.
    level: usize,
    links: RwLock<Links>,
    /// Per layer, the nodes whose lists link to this one.
    incoming: Mutex<Vec<Vec<NodeId>>>,
}

impl HnswNode {
    fn new(level: usize, config: &IndexConfig) -> Self {
        let links = (0..=level)
            .map(|l| Vec::with_capacity(config.capacity_at(l)))
            .collect();
        Self {
            level,
            links: RwLock::new(links),
            incoming: Mutex::new(vec![Vec::new(); level + 1]),
        }
    }
}

/// The node all searches and insertions start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub id: NodeId,
    pub level: usize,
}

/// The HNSW graph structure.
#[derive(Debug)]
pub struct HnswGraph {
    config: IndexConfig,
    /// Nodes indexed by `NodeId`. Slots are `None` once removed.
    nodes: Vec<Option<HnswNode>>,
    entry: Mutex<Option<EntryPoint>>,
    rng: Mutex<StdRng>,
}

impl HnswGraph {
    pub fn new(config: IndexConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            nodes: Vec::new(),
            entry: Mutex::new(None),
            rng: Mutex::new(rng),
        }
    }

    fn metric(&self) -> Metric {
        self.config.metric
    }

    fn node(&self, id: NodeId) -> Option<&HnswNode> {
        self.nodes.get(id).and_then(|n| n.as_ref())
    }

    /// Number of layer 0 lists that link to `id`.
    fn in_degree(&self, id: NodeId) -> usize {
        self.node(id)
            .map_or(0, |n| n.incoming.lock().first().map_or(0, Vec::len))
    }

    fn link_gained(&self, target: NodeId, layer: usize, from: NodeId) {
        if let Some(node) = self.node(target) {
            if let Some(list) = node.incoming.lock().get_mut(layer) {
                list.push(from);
            }
        }
    }

    fn link_lost(&self, target: NodeId, layer: usize, from: NodeId) {
        if let Some(node) = self.node(target) {
            if let Some(list) = node.incoming.lock().get_mut(layer) {
                if let Some(pos) = list.iter().position(|&n| n == from) {
                    list.swap_remove(pos);
                }
            }
        }
    }

    /// Record that the `layer` list of `owner` changed from `before` to
    /// `after`. Returns the nodes that lost their link from `owner`.
    fn account(
        &self,
        owner: NodeId,
        layer: usize,
        before: &[Neighbor],
        after: &[Neighbor],
    ) -> Vec<NodeId> {
        for n in after.iter().filter(|n| !before.iter().any(|b| b.id == n.id)) {
            self.link_gained(n.id, layer, owner);
        }
        let lost: Vec<NodeId> = before
            .iter()
            .filter(|n| !after.iter().any(|a| a.id == n.id))
            .map(|n| n.id)
            .collect();
        for &n in &lost {
            self.link_lost(n, layer, owner);
        }
        lost
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn level_of(&self, id: NodeId) -> Option<usize> {
        self.node(id).map(|n| n.level)
    }

    pub fn entry_point(&self) -> Option<EntryPoint> {
        *self.entry.lock()
    }

    /// Highest populated layer, or 0 for an empty graph.
    pub fn max_level(&self) -> usize {
        self.entry_point().map(|e| e.level).unwrap_or(0)
    }

    /// Number of slots, removed ones included.
    pub fn slots(&self) -> usize {
        self.nodes.len()
    }

    /// Copy of the neighbour ids of `id` on every layer.
    pub fn neighbors(&self, id: NodeId) -> Option<Vec<Vec<NodeId>>> {
        let node = self.node(id)?;
        let links = node.links.read();
        Some(
            links
                .iter()
                .map(|layer| layer.iter().map(|n| n.id).collect())
                .collect(),
        )
    }

    /// Number of live nodes present on each layer.
    pub fn layer_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.max_level() + 1];
        for node in self.nodes.iter().flatten() {
            for count in counts.iter_mut().take(node.level + 1) {
                *count += 1;
            }
        }
        counts
    }

    /// Draw a top layer from the geometric distribution with factor 1/ln(M).
    pub fn sample_level(&self) -> usize {
        // gen::<f64>() is in [0, 1); flip it so ln never sees zero
        let r: f64 = 1.0 - self.rng.lock().gen::<f64>();
        let level = (-r.ln() * self.config.ml()).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.nodes.try_reserve(additional)?;
        Ok(())
    }

    /// Create an unlinked node in slot `id`. The slot must be the next one.
    pub fn allocate(&mut self, id: NodeId, level: usize) -> Result<()> {
        if id != self.nodes.len() {
            return Err(IndexError::Capacity(format!(
                "node slot {} allocated out of order (next is {})",
                id,
                self.nodes.len()
            )));
        }
        self.nodes.try_reserve(1)?;
        self.nodes.push(Some(HnswNode::new(level, &self.config)));
        Ok(())
    }

    /// SEARCH-LAYER: Algorithm 2 from the HNSW paper.
    ///
    /// Beam search of width `ef` on one layer, starting from `entry`.
    /// Returns up to `ef` live nodes sorted by ascending distance.
    fn search_layer(
        &self,
        store: &VectorStore,
        query: &[f32],
        entry: &[Neighbor],
        ef: usize,
        layer: usize,
    ) -> Vec<Neighbor> {
        let mut visited = HashSet::new();
        let mut candidates = Candidates::default();
        let mut results = ResultSet::new(ef);

        for &ep in entry {
            if visited.insert(ep.id) && self.contains(ep.id) {
                candidates.push(ep);
                results.offer(ep);
            }
        }

        while let Some(c) = candidates.pop() {
            // If the closest candidate is further than the furthest result, stop
            if results.is_full() && results.furthest().map_or(false, |f| c.distance > f.distance) {
                break;
            }

            let Some(node) = self.node(c.id) else {
                continue;
            };
            let neighbor_ids: Vec<NodeId> = {
                let links = node.links.read();
                match links.get(layer) {
                    Some(list) => list.iter().map(|n| n.id).collect(),
                    None => continue,
                }
            };

            for neighbor_id in neighbor_ids {
                if !visited.insert(neighbor_id) || !self.contains(neighbor_id) {
                    continue;
                }
                let n = Neighbor::new(neighbor_id, self.metric().eval(query, store.vector(neighbor_id)));
                if results.offer(n) {
                    candidates.push(n);
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Greedy single-best descent from `entry` down to layer `to`.
    fn descend(
        &self,
        store: &VectorStore,
        query: &[f32],
        entry: EntryPoint,
        to: usize,
    ) -> Neighbor {
        let mut best = Neighbor::new(entry.id, self.metric().eval(query, store.vector(entry.id)));
        let mut layer = entry.level;
        while layer > to {
            if let Some(&n) = self.search_layer(store, query, &[best], 1, layer).first() {
                best = n;
            }
            layer -= 1;
        }
        best
    }

    /// Lock two distinct nodes' lists in ascending id order.
    fn lock_pair(
        &self,
        a: NodeId,
        b: NodeId,
    ) -> Option<(RwLockWriteGuard<'_, Links>, RwLockWriteGuard<'_, Links>)> {
        debug_assert_ne!(a, b);
        let (na, nb) = (self.node(a)?, self.node(b)?);
        if a < b {
            let ga = na.links.write();
            let gb = nb.links.write();
            Some((ga, gb))
        } else {
            let gb = nb.links.write();
            let ga = na.links.write();
            Some((ga, gb))
        }
    }

    /// Insert `link` into the `layer` list of `owner` at its sorted
    /// position, pruning back to capacity with the selection heuristic when
    /// it overflows.
    ///
    /// On layer 0 pruning never drops a node's only incoming link while a
    /// node with another incoming link can be dropped instead.
    fn push_link(
        &self,
        store: &VectorStore,
        owner: NodeId,
        list: &mut Vec<Neighbor>,
        link: Neighbor,
        layer: usize,
    ) {
        if list.iter().any(|n| n.id == link.id) {
            return;
        }
        let cap = self.config.capacity_at(layer);
        let pos = list.partition_point(|n| *n < link);
        list.insert(pos, link);
        self.link_gained(link.id, layer, owner);
        if list.len() <= cap {
            return;
        }

        let mut kept = select_neighbors(self.metric(), store, list, cap);
        if layer == 0 {
            self.keep_sole_links(list, &mut kept);
        }
        self.account(owner, layer, list, &kept);
        *list = kept;
    }

    /// Swap pruned nodes that would lose their last incoming link back into
    /// `kept`, evicting the farthest kept node that has another one.
    fn keep_sole_links(&self, before: &[Neighbor], kept: &mut Vec<Neighbor>) {
        let sole: Vec<Neighbor> = before
            .iter()
            .filter(|n| !kept.iter().any(|k| k.id == n.id) && self.in_degree(n.id) <= 1)
            .copied()
            .collect();
        for n in sole {
            let Some(victim) = kept.iter().rposition(|k| self.in_degree(k.id) >= 2) else {
                break;
            };
            trace!(kept = n.id, evicted = kept[victim].id, "preserving sole incoming link");
            kept.remove(victim);
            let pos = kept.partition_point(|k| *k < n);
            kept.insert(pos, n);
        }
    }

    /// INSERT: Algorithm 1 from the HNSW paper.
    ///
    /// Links an already allocated node into the graph. Takes `&self` so that
    /// several insertions can run concurrently.
    pub fn insert(&self, store: &VectorStore, id: NodeId) {
        let Some(level) = self.level_of(id) else {
            return;
        };

        // First node becomes the entry point with no links to build
        let entry = {
            let mut guard = self.entry.lock();
            let current = *guard;
            match current {
                Some(ep) if self.contains(ep.id) => ep,
                _ => {
                    *guard = Some(EntryPoint { id, level });
                    return;
                }
            }
        };

        let vector = store.vector(id);
        let mut ep = self.descend(store, vector, entry, level);

        for layer in (0..=level.min(entry.level)).rev() {
            let cap = self.config.capacity_at(layer);
            let found: Vec<Neighbor> = self
                .search_layer(store, vector, &[ep], self.config.ef_construction, layer)
                .into_iter()
                .filter(|n| n.id != id)
                .collect();
            let selected = select_neighbors(self.metric(), store, &found, cap);

            if let Some(node) = self.node(id) {
                let mut links = node.links.write();
                for &n in &selected {
                    self.push_link(store, id, &mut links[layer], n, layer);
                }
            }

            // Reverse links, each pair updated under both locks
            for n in &selected {
                let Some((own, mut other)) = self.lock_pair(id, n.id) else {
                    continue;
                };
                if layer >= other.len() || !own[layer].iter().any(|x| x.id == n.id) {
                    continue;
                }
                self.push_link(store, n.id, &mut other[layer], Neighbor::new(id, n.distance), layer);
            }

            if let Some(&closest) = found.first() {
                ep = closest;
            }
        }

        if level > entry.level {
            let mut guard = self.entry.lock();
            if guard.map_or(true, |current| level > current.level) {
                trace!(node = id, level, "new entry point");
                *guard = Some(EntryPoint { id, level });
            }
        }
    }

    /// SEARCH: Algorithm 5 from the HNSW paper.
    ///
    /// Returns up to `k` live nodes sorted by distance, ties broken by
    /// ascending label.
    pub fn search(
        &self,
        store: &VectorStore,
        query: &[f32],
        k: usize,
        ef: usize,
    ) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let Some(entry) = self.entry_point() else {
            return Vec::new();
        };
        if !self.contains(entry.id) {
            return Vec::new();
        }

        let ep = self.descend(store, query, entry, 0);
        let mut results = self.search_layer(store, query, &[ep], ef.max(k), 0);
        results.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| store.label_of(a.id).cmp(&store.label_of(b.id)))
        });
        results.truncate(k);
        results
    }

    /// Remove a node and repair the neighbourhood it leaves behind.
    pub fn remove(&mut self, store: &VectorStore, id: NodeId) {
        let Some(removed) = self.nodes.get_mut(id).and_then(|n| n.take()) else {
            return;
        };
        let former = removed.links.into_inner();
        let referrers = removed.incoming.into_inner();
        let metric = self.metric();

        for (layer, list) in former.iter().enumerate() {
            for n in list {
                self.link_lost(n.id, layer, id);
            }
        }
        // Nodes that lost an incoming layer 0 link and may need reattaching
        let mut touched: Vec<NodeId> = former
            .first()
            .map(|bottom| bottom.iter().map(|n| n.id).collect())
            .unwrap_or_default();

        // Drop every link pointing at the removed node
        let mut affected: Vec<(NodeId, usize)> = Vec::new();
        for (layer, froms) in referrers.iter().enumerate() {
            for &nid in froms {
                if let Some(Some(node)) = self.nodes.get_mut(nid) {
                    if let Some(list) = node.links.get_mut().get_mut(layer) {
                        list.retain(|n| n.id != id);
                        affected.push((nid, layer));
                    }
                }
            }
        }
        affected.sort_unstable();
        affected.dedup();

        // Reconnect nodes left sparse from the removed node's own neighbours
        let threshold = (self.config.m() / 2).max(1);
        for (nid, layer) in affected {
            let Some(former_list) = former.get(layer) else {
                continue;
            };
            let cap = self.config.capacity_at(layer);
            let base = store.vector(nid);

            let current: Vec<Neighbor> = match self.node(nid) {
                Some(node) => node.links.read()[layer].clone(),
                None => continue,
            };
            if current.len() >= threshold {
                continue;
            }

            let mut pool: Vec<Neighbor> = former_list
                .iter()
                .filter(|c| c.id != nid && !current.iter().any(|n| n.id == c.id))
                .filter(|c| self.level_of(c.id).map_or(false, |l| l >= layer))
                .map(|c| Neighbor::new(c.id, metric.eval(base, store.vector(c.id))))
                .collect();
            pool.sort();
            pool.truncate(self.config.m());
            pool.extend(current.iter().copied());
            pool.sort();

            let relinked = select_neighbors(metric, store, &pool, cap);
            let lost = self.account(nid, layer, &current, &relinked);
            if layer == 0 {
                touched.extend(lost);
            }
            if let Some(Some(node)) = self.nodes.get_mut(nid) {
                node.links.get_mut()[layer] = relinked;
            }
        }

        let entry_removed = self.entry.get_mut().map_or(false, |e| e.id == id);
        if entry_removed {
            let next = self
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| n.as_ref().map(|n| (i, n.level)))
                .min_by(|a, b| b.1.cmp(&a.1).then_with(|| store.label_of(a.0).cmp(&store.label_of(b.0))))
                .map(|(i, level)| EntryPoint { id: i, level });
            debug!(removed = id, new_entry = ?next, "entry point reassigned");
            *self.entry.get_mut() = next;
        }

        self.repair_reachability(store, touched, entry_removed);
    }

    /// Node ids reachable on layer 0 from the entry point.
    pub fn reachable(&self) -> HashSet<NodeId> {
        self.reach(None)
    }

    /// Breadth-first walk of layer 0 from the entry point. With `targets`
    /// the walk stops as soon as every target has been seen.
    fn reach(&self, targets: Option<&HashSet<NodeId>>) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let Some(entry) = self.entry_point() else {
            return seen;
        };
        if !self.contains(entry.id) {
            return seen;
        }
        let is_target = |id: NodeId| targets.map_or(false, |t| t.contains(&id));
        let mut remaining = targets.map_or(usize::MAX, HashSet::len);

        let mut queue = VecDeque::from([entry.id]);
        seen.insert(entry.id);
        if is_target(entry.id) {
            remaining -= 1;
        }
        while let Some(id) = queue.pop_front() {
            if remaining == 0 {
                break;
            }
            let Some(node) = self.node(id) else {
                continue;
            };
            for n in &node.links.read()[0] {
                if self.contains(n.id) && seen.insert(n.id) {
                    if is_target(n.id) {
                        remaining -= 1;
                    }
                    queue.push_back(n.id);
                }
            }
        }
        seen
    }

    /// Re-attach nodes that can no longer be reached on layer 0.
    ///
    /// Only `touched` nodes (those that lost an incoming layer 0 link) are
    /// checked, unless `full` asks for every live node, which is needed after
    /// the entry point moved. Each orphan gets an incoming link from its
    /// nearest reachable node. If that node's list is full its farthest link
    /// is evicted and the evicted node is checked in turn.
    fn repair_reachability(&mut self, store: &VectorStore, mut touched: Vec<NodeId>, full: bool) {
        let cap = self.config.capacity_at(0);
        let limit = 4 * self.nodes.len();
        let mut rounds = 0;

        loop {
            touched.retain(|&id| self.contains(id));
            touched.sort_unstable();
            touched.dedup();
            let targets: HashSet<NodeId> = if full {
                (0..self.nodes.len()).filter(|&id| self.contains(id)).collect()
            } else {
                touched.iter().copied().collect()
            };
            let reached = self.reach(Some(&targets));
            let Some(orphan) = targets.iter().filter(|&&id| !reached.contains(&id)).min().copied() else {
                break;
            };
            rounds += 1;
            if rounds > limit {
                warn!(orphan, "giving up on layer 0 reachability repair");
                break;
            }
            let Some(entry) = self.entry_point() else {
                break;
            };

            let vector = store.vector(orphan);
            let ef = self.config.ef_construction;
            let start = self.descend(store, vector, entry, 0);
            let mut found: Vec<Neighbor> = self
                .search_layer(store, vector, &[start], ef, 0)
                .into_iter()
                .filter(|n| reached.contains(&n.id))
                .collect();
            if found.is_empty() {
                // Upper layers led into the orphaned part; walk from the entry
                let from_entry = Neighbor::new(entry.id, self.metric().eval(vector, store.vector(entry.id)));
                found = self.search_layer(store, vector, &[from_entry], ef, 0);
            }
            let Some(anchor) = found
                .iter()
                .find(|n| n.id != orphan && self.node_degree(n.id, 0) < cap)
                .or_else(|| found.iter().find(|n| n.id != orphan))
                .copied()
            else {
                break;
            };

            debug!(orphan, anchor = anchor.id, "reattaching unreachable node");
            let link = Neighbor::new(orphan, anchor.distance);
            if let Some(Some(node)) = self.nodes.get_mut(anchor.id) {
                let list = &mut node.links.get_mut()[0];
                let evicted = if list.len() >= cap { list.pop() } else { None };
                let pos = list.partition_point(|n| *n < link);
                list.insert(pos, link);
                if let Some(evicted) = evicted {
                    self.link_lost(evicted.id, 0, anchor.id);
                    touched.push(evicted.id);
                }
                self.link_gained(orphan, 0, anchor.id);
            }
            let mut back_linked = false;
            if let Some(Some(node)) = self.nodes.get_mut(orphan) {
                let list = &mut node.links.get_mut()[0];
                if list.len() < cap && !list.iter().any(|n| n.id == anchor.id) {
                    let back = Neighbor::new(anchor.id, anchor.distance);
                    let pos = list.partition_point(|n| *n < back);
                    list.insert(pos, back);
                    back_linked = true;
                }
            }
            if back_linked {
                self.link_gained(anchor.id, 0, orphan);
            }
        }
    }

    fn node_degree(&self, id: NodeId, layer: usize) -> usize {
        self.node(id)
            .and_then(|n| n.links.read().get(layer).map(Vec::len))
            .unwrap_or(0)
    }

    /// Renumber nodes after the vector store was compacted.
    pub fn compact(&mut self, remap: &[Option<NodeId>]) {
        let live = remap.iter().flatten().count();
        let mut nodes: Vec<Option<HnswNode>> = Vec::with_capacity(live);
        for (old, slot) in self.nodes.drain(..).enumerate() {
            let (Some(mut node), Some(Some(new))) = (slot, remap.get(old).copied()) else {
                continue;
            };
            debug_assert_eq!(new, nodes.len());
            for list in node.links.get_mut().iter_mut() {
                list.retain_mut(|n| match remap.get(n.id).copied().flatten() {
                    Some(mapped) => {
                        n.id = mapped;
                        true
                    }
                    None => false,
                });
            }
            for list in node.incoming.get_mut().iter_mut() {
                list.retain_mut(|n| match remap.get(*n).copied().flatten() {
                    Some(mapped) => {
                        *n = mapped;
                        true
                    }
                    None => false,
                });
            }
            nodes.push(Some(node));
        }
        self.nodes = nodes;

        let entry = self.entry.get_mut();
        *entry = entry.and_then(|e| {
            remap
                .get(e.id)
                .copied()
                .flatten()
                .map(|id| EntryPoint { id, level: e.level })
        });
    }

    /// Rebuild a graph from persisted topology.
    ///
    /// `nodes[i]` is `(level, links)` for slot `i` of `store`; link order is
    /// kept as given. Distances are recomputed from the store.
    pub fn restore(
        config: IndexConfig,
        store: &VectorStore,
        nodes: Vec<(usize, Vec<Vec<NodeId>>)>,
        entry: Option<NodeId>,
    ) -> Self {
        let mut graph = Self::new(config);
        let metric = graph.metric();
        graph.nodes = nodes
            .into_iter()
            .enumerate()
            .map(|(id, (level, layers))| {
                let base = store.vector(id);
                let links = layers
                    .into_iter()
                    .map(|ids| {
                        ids.into_iter()
                            .map(|n| Neighbor::new(n, metric.eval(base, store.vector(n))))
                            .collect()
                    })
                    .collect();
                Some(HnswNode {
                    level,
                    links: RwLock::new(links),
                    incoming: Mutex::new(vec![Vec::new(); level + 1]),
                })
            })
            .collect();
        for (id, node) in graph.nodes.iter().enumerate() {
            let Some(node) = node else {
                continue;
            };
            for (layer, list) in node.links.read().iter().enumerate() {
                for n in list {
                    graph.link_gained(n.id, layer, id);
                }
            }
        }
        let entry = entry.and_then(|id| graph.level_of(id).map(|level| EntryPoint { id, level }));
        *graph.entry.get_mut() = entry;
        graph
    }
}
