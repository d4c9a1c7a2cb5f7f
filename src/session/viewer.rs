//! Viewer session handle used by the fan-out worker

use bytes::Bytes;
use tokio::sync::mpsc;

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Chunk appended to the outbound queue
    Accepted,
    /// Queue full; the chunk was discarded for this viewer only
    Dropped,
    /// The pump is gone (client disconnected or session closed)
    Closed,
}

/// Sending side of one viewer's outbound queue.
///
/// Created together with its queue receiver; the receiver goes to the
/// session's pump, this handle goes to the stream's fan-out worker.
/// Dropping the handle closes the queue, which the pump treats as end of
/// stream.
#[derive(Debug)]
pub struct ViewerSession {
    id: u64,
    device_id: String,
    tx: mpsc::Sender<Bytes>,
}

impl ViewerSession {
    /// Create a session with a bounded outbound queue.
    ///
    /// `capacity` is a chunk count, not a byte count; chunk sizes are
    /// bounded by the encoder's muxer flushes.
    pub fn create(
        id: u64,
        device_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id,
                device_id: device_id.into(),
                tx,
            },
            rx,
        )
    }

    /// Stable session id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Opaque device id supplied by the viewer request
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Append a chunk to the outbound queue without blocking.
    ///
    /// On overflow the chunk is dropped and the queue is left untouched.
    pub fn enqueue(&self, data: Bytes) -> Enqueue {
        match self.tx.try_send(data) {
            Ok(()) => Enqueue::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_until_full() {
        let (session, mut rx) = ViewerSession::create(1, "cam-1", 2);

        assert_eq!(session.enqueue(Bytes::from_static(b"a")), Enqueue::Accepted);
        assert_eq!(session.enqueue(Bytes::from_static(b"b")), Enqueue::Accepted);
        // Queue full: dropped without disturbing queued chunks
        assert_eq!(session.enqueue(Bytes::from_static(b"c")), Enqueue::Dropped);

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_drop_frees_room() {
        let (session, mut rx) = ViewerSession::create(1, "cam-1", 1);

        assert_eq!(session.enqueue(Bytes::from_static(b"a")), Enqueue::Accepted);
        assert_eq!(session.enqueue(Bytes::from_static(b"b")), Enqueue::Dropped);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(session.enqueue(Bytes::from_static(b"c")), Enqueue::Accepted);
    }

    #[tokio::test]
    async fn test_enqueue_after_pump_gone() {
        let (session, rx) = ViewerSession::create(7, "cam-2", 4);
        drop(rx);

        assert_eq!(session.enqueue(Bytes::from_static(b"x")), Enqueue::Closed);
        assert_eq!(session.id(), 7);
        assert_eq!(session.device_id(), "cam-2");
    }
}
