//! Fixed-size header at the start of an index file.
//!
//! Layout (little-endian):
//! [magic: 8][version: u32][dimensions: u32][metric: u8][connectivity: u32]
//! [ef_construction: u32][ef_search: u32][max_layers: u32][max_level: u32]
//! [entry_point: u64][node_count: u64][crc32 of the preceding bytes: u32]

use crate::distance::Metric;
use crate::error::{IndexError, Result};

pub const MAGIC: [u8; 8] = *b"HNSWIDX\0";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 8 + 4 + 4 + 1 + 4 * 5 + 8 + 8 + 4;

const NO_ENTRY: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub dimensions: u32,
    pub metric: Metric,
    pub connectivity: u32,
    pub ef_construction: u32,
    pub ef_search: u32,
    pub max_layers: u32,
    pub max_level: u32,
    pub entry_point: Option<u64>,
    pub node_count: u64,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }
}

impl FileHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.dimensions.to_le_bytes());
        out.push(self.metric.code());
        out.extend_from_slice(&self.connectivity.to_le_bytes());
        out.extend_from_slice(&self.ef_construction.to_le_bytes());
        out.extend_from_slice(&self.ef_search.to_le_bytes());
        out.extend_from_slice(&self.max_layers.to_le_bytes());
        out.extend_from_slice(&self.max_level.to_le_bytes());
        out.extend_from_slice(&self.entry_point.unwrap_or(NO_ENTRY).to_le_bytes());
        out.extend_from_slice(&self.node_count.to_le_bytes());
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&out);
        header
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if bytes[..8] != MAGIC {
            return Err(IndexError::CorruptData("not an index file (bad magic)".to_string()));
        }
        let body = &bytes[..HEADER_SIZE - 4];
        let mut cur = Cursor { buf: bytes, pos: HEADER_SIZE - 4 };
        if cur.u32() != crc32fast::hash(body) {
            return Err(IndexError::CorruptData("header checksum mismatch".to_string()));
        }

        let mut cur = Cursor { buf: bytes, pos: 8 };
        let version = cur.u32();
        if version != FORMAT_VERSION {
            return Err(IndexError::IncompatibleFormat(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        let dimensions = cur.u32();
        let [metric_code] = cur.take::<1>();
        let metric = Metric::from_code(metric_code).ok_or_else(|| {
            IndexError::IncompatibleFormat(format!("unknown metric code {}", metric_code))
        })?;
        let connectivity = cur.u32();
        let ef_construction = cur.u32();
        let ef_search = cur.u32();
        let max_layers = cur.u32();
        let max_level = cur.u32();
        let entry_point = match cur.u64() {
            NO_ENTRY => None,
            id => Some(id),
        };
        let node_count = cur.u64();

        Ok(Self {
            dimensions,
            metric,
            connectivity,
            ef_construction,
            ef_search,
            max_layers,
            max_level,
            entry_point,
            node_count,
        })
    }
}
