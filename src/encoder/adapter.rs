//! Encoder adapter contract

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::media::MediaChunk;

use super::error::AdapterError;

/// Contract between a stream and its upstream encoder.
///
/// An implementation pulls the source at `url` and emits media into `sink`:
/// exactly one [`MediaChunk::header`] first, then any number of payload
/// chunks with non-decreasing timestamps, each a self-contained muxer flush.
/// The implementation owns its own worker; sink sends are serialized and
/// never concurrent.
///
/// `pull` returns when `stop` is cancelled, the upstream ends, or an
/// unrecoverable error occurs. After it returns, no further sink sends
/// happen. Cancellation must be honored within a bounded stop budget, and
/// stopping an already-stopped adapter is a no-op.
pub trait EncoderAdapter: Clone + Send + Sync + 'static {
    fn pull(
        &self,
        url: String,
        sink: mpsc::Sender<MediaChunk>,
        stop: CancellationToken,
    ) -> impl Future<Output = Result<(), AdapterError>> + Send;
}
