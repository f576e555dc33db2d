//! Serialization utilities: bincode for node records, JSON for configuration,
//! and checksummed framing for the index file.
//!
//! Each frame is written as: [length: u32][crc32: u32][payload]

use std::io::{ErrorKind, Read, Write};

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};

/// Frames larger than this are treated as corruption rather than allocated.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// One node of the graph as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub label: u64,
    pub level: u32,
    pub vector: Vec<f32>,
    /// Neighbour ids per layer `0..=level`, in the file's dense numbering.
    pub links: Vec<Vec<u64>>,
}

/// Encode data to bincode bytes.
pub fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| IndexError::SerializationError(e.to_string()))
}

/// Decode data from bincode bytes.
pub fn from_bincode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| IndexError::SerializationError(e.to_string()))
}

/// Encode data to JSON bytes.
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| IndexError::SerializationError(e.to_string()))
}

/// Decode data from JSON bytes.
pub fn from_json<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| IndexError::SerializationError(e.to_string()))
}

/// Write one length-prefixed, checksummed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(IndexError::Capacity(format!(
            "record of {} bytes exceeds the frame limit",
            payload.len()
        )));
    }
    let crc = crc32fast::hash(payload);
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&crc.to_le_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Read one frame, verifying its checksum.
///
/// A short read or a checksum mismatch is reported as `CorruptData`.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    read_exact_or_corrupt(reader, &mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(IndexError::CorruptData(format!("frame length {} is implausible", len)));
    }

    let mut crc_buf = [0u8; 4];
    read_exact_or_corrupt(reader, &mut crc_buf)?;
    let expected_crc = u32::from_le_bytes(crc_buf);

    let mut payload = vec![0u8; len];
    read_exact_or_corrupt(reader, &mut payload)?;

    if crc32fast::hash(&payload) != expected_crc {
        return Err(IndexError::CorruptData("frame checksum mismatch".to_string()));
    }
    Ok(payload)
}

/// `read_exact` that maps a premature EOF to `CorruptData`.
pub fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => IndexError::CorruptData("file is truncated".to_string()),
        _ => IndexError::IoError(e),
    })
}
