//! Chunk sizing, planning and transport encoding
//!
//! A source is cut into fixed-size `[start, end)` ranges; each range is
//! base64-encoded so it can travel inside a JSON body.

use super::UploadError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::ops::Range;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Minimum chunk size (5MB) - storage multipart requirement for all but the last part
pub const MIN_CHUNK_SIZE: u64 = 5 * MIB;

/// Default upper bound for proposed chunk sizes
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 50 * MIB;

/// Hard cap on a single chunk, enforced before any network call
pub const MAX_CHUNK_SIZE: u64 = 50 * MIB;

/// Maximum parts allowed in one multipart upload
pub const MAX_PARTS: u64 = 10_000;

/// Connection speed above which chunks are doubled (Mbit/s)
const FAST_CONNECTION_MBPS: f64 = 50.0;

/// Connection speed below which chunks are halved (Mbit/s)
const SLOW_CONNECTION_MBPS: f64 = 5.0;

/// Inclusive bounds applied to computed chunk sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub min: u64,
    pub max: u64,
}

impl Default for ChunkBounds {
    fn default() -> Self {
        Self {
            min: MIN_CHUNK_SIZE,
            max: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

/// Pick a chunk size for a file
///
/// Larger files and faster connections get larger chunks. The result never
/// yields more than [`MAX_PARTS`] parts unless `bounds.max` forbids it, and is
/// always within `bounds`.
pub fn optimal_chunk_size(file_size: u64, connection_mbps: Option<f64>, bounds: ChunkBounds) -> u64 {
    let mut size = match file_size {
        s if s < 100 * MIB => 5 * MIB,
        s if s < GIB => 10 * MIB,
        s if s < 5 * GIB => 25 * MIB,
        _ => 50 * MIB,
    };

    match connection_mbps {
        Some(speed) if speed >= FAST_CONNECTION_MBPS => size *= 2,
        Some(speed) if speed < SLOW_CONNECTION_MBPS => size /= 2,
        _ => {}
    }

    size = size.max(file_size.div_ceil(MAX_PARTS));

    size.clamp(bounds.min, bounds.max.max(bounds.min))
}

/// Reject chunks that are empty or above the hard cap
pub fn validate_chunk_len(len: u64) -> Result<(), UploadError> {
    if len == 0 {
        return Err(UploadError::Validation("chunk is empty".into()));
    }
    if len > MAX_CHUNK_SIZE {
        return Err(UploadError::Validation(format!(
            "chunk of {} bytes exceeds the {} byte limit",
            len, MAX_CHUNK_SIZE
        )));
    }
    Ok(())
}

/// Encode chunk bytes for JSON transport
pub fn encode_chunk(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// One byte range of the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the plan
    pub index: u64,
    pub range: Range<u64>,
}

impl Chunk {
    /// 1-based part number used on the wire
    pub fn part_number(&self) -> u32 {
        (self.index + 1) as u32
    }

    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a source of `file_size` bytes is cut into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u64,
}

impl ChunkPlan {
    /// Build a plan from the confirmed chunk size
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, UploadError> {
        if file_size == 0 {
            return Err(UploadError::Validation("file is empty".into()));
        }
        validate_chunk_len(chunk_size)?;

        let total_chunks = file_size.div_ceil(chunk_size);
        if total_chunks > MAX_PARTS {
            return Err(UploadError::Validation(format!(
                "file needs {} parts with {} byte chunks; at most {} are allowed",
                total_chunks, chunk_size, MAX_PARTS
            )));
        }

        Ok(Self {
            file_size,
            chunk_size,
            total_chunks,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Byte range of chunk `index`, or `None` past the end of the plan or
    /// when the slice would be empty
    pub fn chunk(&self, index: u64) -> Option<Chunk> {
        if index >= self.total_chunks {
            return None;
        }
        let start = index.checked_mul(self.chunk_size)?;
        if start >= self.file_size {
            return None;
        }
        let end = (start + self.chunk_size).min(self.file_size);
        Some(Chunk {
            index,
            range: start..end,
        })
    }

    /// Shrink the plan to the chunks actually produced
    pub fn truncate(&mut self, total_chunks: u64) {
        self.total_chunks = self.total_chunks.min(total_chunks);
    }

    /// Iterate over every chunk of the plan
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.total_chunks).map_while(|i| self.chunk(i))
    }
}
