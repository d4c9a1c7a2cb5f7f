//! Media chunk types and FLV stream segmentation
//!
//! The relay treats encoder output as opaque bytes, but it still needs to
//! know where the container header ends and where each self-contained
//! payload chunk begins. This module provides the chunk type handed to
//! viewers and the splitter that segments the encoder's FLV byte stream.

pub mod chunk;
pub mod flv;

pub use chunk::{ChunkKind, MediaChunk};
pub use flv::{FlvError, FlvSplitter};
