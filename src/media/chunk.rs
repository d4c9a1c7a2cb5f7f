//! Chunk type delivered from the encoder to viewer sessions
//!
//! Designed to be cheap to clone: fan-out to N viewers shares one
//! reference-counted allocation.

use bytes::Bytes;

/// Kind of media chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Container header, emitted exactly once before any payload.
    /// Every viewer must receive it before any payload bytes.
    Header,
    /// Opaque payload chunk, one self-contained muxer flush
    Payload,
}

/// A chunk of encoded media broadcast to viewers
#[derive(Debug, Clone)]
pub struct MediaChunk {
    /// Whether this is the container header or a payload chunk
    pub kind: ChunkKind,
    /// Timestamp in milliseconds, derived from upstream frame timestamps.
    /// Zero for the container header.
    pub timestamp: u32,
    /// Chunk data (zero-copy via reference counting)
    pub data: Bytes,
}

impl MediaChunk {
    /// Create a container header chunk
    pub fn header(data: Bytes) -> Self {
        Self {
            kind: ChunkKind::Header,
            timestamp: 0,
            data,
        }
    }

    /// Create a payload chunk
    pub fn payload(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: ChunkKind::Payload,
            timestamp,
            data,
        }
    }

    /// Whether this chunk is the container header
    pub fn is_header(&self) -> bool {
        self.kind == ChunkKind::Header
    }

    /// Size of the chunk data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
