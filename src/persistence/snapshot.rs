//! Save and load a complete index to and from a single file.
//!
//! The file is the header from [`super::format`] followed by one checksummed
//! frame per live node. Node ids in the file are dense (`0..node_count`) and
//! follow the in-memory slot order, so a loaded graph has the same topology
//! and visiting order as the one saved.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::hnsw::HnswGraph;
use crate::persistence::format::{FileHeader, HEADER_SIZE};
use crate::persistence::serialization::{self, NodeRecord};
use crate::persistence::CancellationToken;
use crate::storage::{NodeId, VectorStore};
use crate::vector::{check_finite, check_magnitude};

/// Topology and vectors read back from a file, ready to be assembled.
#[derive(Debug)]
pub(crate) struct LoadedIndex {
    pub header: FileHeader,
    pub store: VectorStore,
    /// `(level, links)` per dense node id.
    pub nodes: Vec<(usize, Vec<Vec<NodeId>>)>,
    pub entry: Option<NodeId>,
}

impl LoadedIndex {
    /// Configuration described by the header. `base` supplies the fields the
    /// file does not store (seed, concurrency mode).
    pub fn config(&self, base: &IndexConfig) -> IndexConfig {
        IndexConfig {
            dimensions: self.header.dimensions as usize,
            metric: self.header.metric,
            connectivity: self.header.connectivity as usize,
            ef_construction: self.header.ef_construction as usize,
            ef_search: self.header.ef_search as usize,
            max_layers: self.header.max_layers as usize,
            ..base.clone()
        }
    }

    pub fn into_parts(self, config: IndexConfig) -> (VectorStore, HnswGraph) {
        let graph = HnswGraph::restore(config, &self.store, self.nodes, self.entry);
        (self.store, graph)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| IndexError::Capacity(format!("{} {} does not fit the file format", what, value)))
}

/// Write `store` and `graph` to `path`.
///
/// Data goes to a sibling temp file that is renamed into place once complete,
/// so a failed or cancelled save never leaves a partial file at `path`.
pub(crate) fn save(
    path: &Path,
    config: &IndexConfig,
    store: &VectorStore,
    graph: &HnswGraph,
    cancel: &CancellationToken,
) -> Result<()> {
    let tmp = temp_path(path);
    let result = write_file(&tmp, config, store, graph, cancel)
        .and_then(|count| fs::rename(&tmp, path).map(|_| count).map_err(IndexError::from));

    match result {
        Ok(count) => {
            info!(path = %path.display(), nodes = count, "index saved");
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            debug!(path = %path.display(), error = %e, "index save aborted");
            Err(e)
        }
    }
}

fn write_file(
    path: &Path,
    config: &IndexConfig,
    store: &VectorStore,
    graph: &HnswGraph,
    cancel: &CancellationToken,
) -> Result<u64> {
    // Dense renumbering of live nodes in slot order
    let mut remap: Vec<Option<u64>> = vec![None; store.slots()];
    let mut live: Vec<NodeId> = Vec::with_capacity(store.count());
    for (id, _, _) in store.iter() {
        if graph.contains(id) {
            remap[id] = Some(live.len() as u64);
            live.push(id);
        }
    }

    let header = FileHeader {
        dimensions: to_u32(config.dimensions, "dimensions")?,
        metric: config.metric,
        connectivity: to_u32(config.connectivity, "connectivity")?,
        ef_construction: to_u32(config.ef_construction, "ef_construction")?,
        ef_search: to_u32(config.ef_search, "ef_search")?,
        max_layers: to_u32(config.max_layers, "max_layers")?,
        max_level: to_u32(graph.max_level(), "max_level")?,
        entry_point: graph.entry_point().and_then(|e| remap.get(e.id).copied().flatten()),
        node_count: live.len() as u64,
    };

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&header.encode())?;

    for &id in &live {
        let layers = graph.neighbors(id).unwrap_or_default();
        let record = NodeRecord {
            label: store.label_of(id),
            level: to_u32(layers.len().saturating_sub(1), "level")?,
            vector: store.vector(id).to_vec(),
            links: layers
                .iter()
                .map(|list| list.iter().filter_map(|&n| remap.get(n).copied().flatten()).collect())
                .collect(),
        };
        serialization::write_frame(&mut writer, &serialization::to_bincode(&record)?)?;
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
    }

    let file = writer.into_inner().map_err(|e| IndexError::IoError(e.into_error()))?;
    file.sync_all()?;
    Ok(header.node_count)
}

/// Read and validate an index file without touching any live index.
pub(crate) fn load(path: &Path, cancel: &CancellationToken) -> Result<LoadedIndex> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut header_buf = [0u8; HEADER_SIZE];
    serialization::read_exact_or_corrupt(&mut reader, &mut header_buf)?;
    let header = FileHeader::decode(&header_buf)?;

    let file_config = IndexConfig {
        dimensions: header.dimensions as usize,
        metric: header.metric,
        connectivity: header.connectivity as usize,
        ef_construction: header.ef_construction as usize,
        ef_search: header.ef_search as usize,
        max_layers: header.max_layers as usize,
        ..IndexConfig::default()
    };
    file_config
        .validate()
        .map_err(|e| IndexError::CorruptData(format!("header describes an invalid index: {}", e)))?;

    let count = usize::try_from(header.node_count)
        .map_err(|_| IndexError::CorruptData("node count overflows".to_string()))?;
    let dims = file_config.dimensions;

    let mut store = VectorStore::new(dims);
    // The count is untrusted; cap the up-front reservation
    store.reserve(count.min(1 << 20))?;
    let mut nodes: Vec<(usize, Vec<Vec<NodeId>>)> = Vec::new();

    for index in 0..count {
        let payload = serialization::read_frame(&mut reader)?;
        let record: NodeRecord = serialization::from_bincode(&payload)
            .map_err(|e| IndexError::CorruptData(format!("node {}: {}", index, e)))?;

        if record.vector.len() != dims {
            return Err(IndexError::CorruptData(format!(
                "node {} has {} components, expected {}",
                index,
                record.vector.len(),
                dims
            )));
        }
        check_finite(&record.vector)
            .and_then(|_| check_magnitude(&record.vector))
            .map_err(|e| IndexError::CorruptData(format!("node {}: {}", index, e)))?;
        if store.contains(record.label) {
            return Err(IndexError::CorruptData(format!(
                "label {} appears more than once",
                record.label
            )));
        }
        let level = record.level as usize;
        if record.level > header.max_level
            || level >= file_config.max_layers
            || record.links.len() != level + 1
        {
            return Err(IndexError::CorruptData(format!(
                "node {} has inconsistent level {}",
                index, record.level
            )));
        }

        let mut layers = Vec::with_capacity(record.links.len());
        for (layer, list) in record.links.iter().enumerate() {
            if list.len() > file_config.capacity_at(layer) {
                return Err(IndexError::CorruptData(format!(
                    "node {} exceeds neighbour capacity on layer {}",
                    index, layer
                )));
            }
            let mut ids = Vec::with_capacity(list.len());
            for &n in list {
                if n >= header.node_count || n == index as u64 {
                    return Err(IndexError::CorruptData(format!(
                        "node {} links to invalid node {}",
                        index, n
                    )));
                }
                ids.push(n as NodeId);
            }
            layers.push(ids);
        }

        store.put(record.label, &record.vector)?;
        nodes.push((level, layers));

        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
    }

    // Links may only point at nodes that exist on that layer
    for (index, (_, layers)) in nodes.iter().enumerate() {
        for (layer, list) in layers.iter().enumerate() {
            if let Some(&bad) = list.iter().find(|&&n| nodes[n].0 < layer) {
                return Err(IndexError::CorruptData(format!(
                    "node {} links to node {} above its top layer",
                    index, bad
                )));
            }
        }
    }

    let entry = match header.entry_point {
        None if count == 0 => None,
        Some(id) if id < header.node_count && nodes[id as usize].0 == header.max_level as usize => {
            Some(id as NodeId)
        }
        _ => {
            return Err(IndexError::CorruptData(
                "entry point is missing or not on the top layer".to_string(),
            ))
        }
    };

    debug!(path = %path.display(), nodes = count, "index file read");
    Ok(LoadedIndex {
        header,
        store,
        nodes,
        entry,
    })
}
