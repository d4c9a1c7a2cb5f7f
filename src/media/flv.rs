//! FLV stream segmentation
//!
//! The encoder muxes to FLV and the relay delivers those bytes verbatim,
//! but late joiners must be primed with the container header before any
//! payload. The splitter walks the byte stream at tag granularity:
//!
//! ```text
//! +-----------+------+--------------------------------------+
//! | FLV hdr(9)| PTS0 | Tag | PTS | Tag | PTS | Tag | PTS ... |
//! +-----------+------+--------------------------------------+
//! \________ container header ________/ \___ payload chunks __/
//! ```
//!
//! The container header is the file header plus every leading script or
//! sequence-header tag; the first ordinary media tag starts the payload
//! sequence. Each payload chunk is one complete tag with its trailing
//! previous-tag-size, so any suffix of chunks appended to the header is
//! itself a playable FLV stream.

use bytes::{Buf, BytesMut};

use super::chunk::MediaChunk;

/// FLV tag type: audio
const TAG_AUDIO: u8 = 8;
/// FLV tag type: video
const TAG_VIDEO: u8 = 9;
/// FLV tag type: script data (onMetaData)
const TAG_SCRIPT: u8 = 18;

/// Tag header (type + size + timestamp + stream id) in bytes
const TAG_HEADER_LEN: usize = 11;
/// Trailing previous-tag-size field in bytes
const PREV_TAG_SIZE_LEN: usize = 4;
/// FLV file signature + version + flags + data offset
const FILE_HEADER_LEN: usize = 9;

/// Upper bound on a single tag's data size; anything larger is treated as
/// stream corruption rather than buffered indefinitely.
const MAX_TAG_DATA_SIZE: usize = 16 * 1024 * 1024;

/// Error produced when the byte stream is not valid FLV
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlvError {
    /// Stream does not begin with the "FLV" signature
    InvalidSignature,
    /// Tag type byte is not audio, video, or script
    UnknownTagType(u8),
    /// Declared tag size exceeds the sanity bound
    OversizedTag(usize),
}

impl std::fmt::Display for FlvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlvError::InvalidSignature => write!(f, "missing FLV signature"),
            FlvError::UnknownTagType(t) => write!(f, "unknown FLV tag type: {}", t),
            FlvError::OversizedTag(size) => write!(f, "FLV tag too large: {} bytes", size),
        }
    }
}

impl std::error::Error for FlvError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Waiting for the 9-byte file header plus PreviousTagSize0
    FileHeader,
    /// Accumulating leading script/sequence-header tags into the header blob
    HeaderTags,
    /// Steady state: every complete tag becomes a payload chunk
    Body,
}

/// Incremental splitter from raw FLV bytes to [`MediaChunk`]s
///
/// Feed arbitrary byte slices with [`push`](Self::push); complete chunks are
/// returned as they become available. The first returned chunk is always the
/// container header.
pub struct FlvSplitter {
    buf: BytesMut,
    header: BytesMut,
    stage: Stage,
}

impl FlvSplitter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(16 * 1024),
            header: BytesMut::new(),
            stage: Stage::FileHeader,
        }
    }

    /// Feed bytes into the splitter, returning any chunks completed by them.
    pub fn push(&mut self, input: &[u8]) -> Result<Vec<MediaChunk>, FlvError> {
        self.buf.extend_from_slice(input);

        let mut out = Vec::new();
        loop {
            match self.stage {
                Stage::FileHeader => {
                    if self.buf.len() < FILE_HEADER_LEN {
                        break;
                    }
                    if &self.buf[0..3] != b"FLV" {
                        return Err(FlvError::InvalidSignature);
                    }
                    let data_offset = u32::from_be_bytes([
                        self.buf[5],
                        self.buf[6],
                        self.buf[7],
                        self.buf[8],
                    ]) as usize;
                    let preamble = data_offset.max(FILE_HEADER_LEN) + PREV_TAG_SIZE_LEN;
                    if self.buf.len() < preamble {
                        break;
                    }
                    self.header.extend_from_slice(&self.buf[..preamble]);
                    self.buf.advance(preamble);
                    self.stage = Stage::HeaderTags;
                }
                Stage::HeaderTags | Stage::Body => {
                    let Some((tag_type, timestamp, total)) = self.peek_tag()? else {
                        break;
                    };
                    let tag = self.buf.split_to(total);
                    if self.stage == Stage::HeaderTags {
                        let body = &tag[TAG_HEADER_LEN..total - PREV_TAG_SIZE_LEN];
                        if is_preamble_tag(tag_type, body) {
                            self.header.extend_from_slice(&tag);
                            continue;
                        }
                        // First ordinary media tag: seal the header, then
                        // emit this tag as the first payload chunk.
                        out.push(MediaChunk::header(self.header.split().freeze()));
                        self.stage = Stage::Body;
                    }
                    out.push(MediaChunk::payload(timestamp, tag.freeze()));
                }
            }
        }
        Ok(out)
    }

    /// Parse the next tag header without consuming it. Returns
    /// `(tag_type, timestamp, total_len)` once the complete tag (including
    /// the trailing previous-tag-size) is buffered.
    fn peek_tag(&self) -> Result<Option<(u8, u32, usize)>, FlvError> {
        if self.buf.len() < TAG_HEADER_LEN {
            return Ok(None);
        }
        let tag_type = self.buf[0] & 0x1F;
        if !matches!(tag_type, TAG_AUDIO | TAG_VIDEO | TAG_SCRIPT) {
            return Err(FlvError::UnknownTagType(tag_type));
        }
        let data_size =
            u32::from_be_bytes([0, self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if data_size > MAX_TAG_DATA_SIZE {
            return Err(FlvError::OversizedTag(data_size));
        }
        let total = TAG_HEADER_LEN + data_size + PREV_TAG_SIZE_LEN;
        if self.buf.len() < total {
            return Ok(None);
        }
        // 24-bit timestamp plus the extended upper byte
        let timestamp = u32::from_be_bytes([self.buf[7], self.buf[4], self.buf[5], self.buf[6]]);
        Ok(Some((tag_type, timestamp, total)))
    }
}

impl Default for FlvSplitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Tags that belong to the container header: script data and AVC/AAC
/// sequence headers, in whatever order the muxer flushed them.
fn is_preamble_tag(tag_type: u8, body: &[u8]) -> bool {
    match tag_type {
        TAG_SCRIPT => true,
        TAG_VIDEO => is_avc_sequence_header(body),
        TAG_AUDIO => is_aac_sequence_header(body),
        _ => false,
    }
}

/// Check if a video tag body is an AVC sequence header (codec 7, packet 0)
fn is_avc_sequence_header(body: &[u8]) -> bool {
    body.len() >= 2 && body[0] & 0x0F == 7 && body[1] == 0
}

/// Check if an audio tag body is an AAC sequence header (format 10, packet 0)
fn is_aac_sequence_header(body: &[u8]) -> bool {
    body.len() >= 2 && (body[0] >> 4) & 0x0F == 10 && body[1] == 0
}
