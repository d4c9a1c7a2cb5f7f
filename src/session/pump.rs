//! Outbound pump: drains a session queue into the HTTP response body
//!
//! One pump per viewer session, the only task allowed to block on that
//! viewer's socket. Queued chunks are written as HTTP chunked-transfer
//! frames, coalescing up to a small batch per wakeup and flushing once per
//! batch.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time;

/// Chunks coalesced per queue wakeup
const CHUNK_BATCH: usize = 16;

/// A single chunk write exceeding this window marks the consumer as stuck
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a session's pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// Queue closed by the stream: remaining chunks were drained and the
    /// response was terminated cleanly
    StreamEnded,
    /// Client closed its end of the connection
    ClientGone,
    /// Writer unwritable past the stall window
    SlowConsumer,
    /// Write failed outright
    WriteError,
}

/// Per-session drain loop from queue to socket
pub struct SessionPump<S> {
    id: u64,
    queue: mpsc::Receiver<Bytes>,
    io: S,
    stall_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SessionPump<S> {
    pub fn new(id: u64, queue: mpsc::Receiver<Bytes>, io: S) -> Self {
        Self {
            id,
            queue,
            io,
            stall_timeout: WRITE_STALL_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Run until the stream ends or the viewer goes away, returning why.
    ///
    /// The socket's read side is watched solely to detect disconnects;
    /// anything the client sends after its request is discarded.
    pub async fn run(self) -> CloseCause {
        let id = self.id;
        let stall_timeout = self.stall_timeout;
        let mut queue = self.queue;
        let (mut reader, mut writer) = tokio::io::split(self.io);

        let mut probe = [0u8; 512];
        let mut batch: Vec<Bytes> = Vec::with_capacity(CHUNK_BATCH);

        let cause = loop {
            tokio::select! {
                n = queue.recv_many(&mut batch, CHUNK_BATCH) => {
                    if n == 0 {
                        // Queue closed and drained: terminate the chunked body.
                        let _ = writer.write_all(b"0\r\n\r\n").await;
                        let _ = writer.flush().await;
                        let _ = writer.shutdown().await;
                        break CloseCause::StreamEnded;
                    }
                    let mut failed = None;
                    for data in batch.drain(..) {
                        match time::timeout(stall_timeout, write_chunk(&mut writer, &data)).await {
                            Err(_) => {
                                failed = Some(CloseCause::SlowConsumer);
                                break;
                            }
                            Ok(Err(_)) => {
                                failed = Some(CloseCause::WriteError);
                                break;
                            }
                            Ok(Ok(())) => {}
                        }
                    }
                    if let Some(cause) = failed {
                        break cause;
                    }
                    if writer.flush().await.is_err() {
                        break CloseCause::WriteError;
                    }
                }
                read = reader.read(&mut probe) => {
                    match read {
                        Ok(0) | Err(_) => break CloseCause::ClientGone,
                        Ok(_) => {}
                    }
                }
            }
        };

        tracing::debug!(session_id = id, cause = ?cause, "session pump stopped");
        cause
    }
}

/// Write one payload as an HTTP chunked-transfer frame.
async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> std::io::Result<()> {
    let mut head = [0u8; 18];
    let head_len = {
        use std::io::Write;
        let mut cursor = &mut head[..];
        write!(cursor, "{:x}\r\n", data.len())?;
        18 - cursor.len()
    };
    writer.write_all(&head[..head_len]).await?;
    writer.write_all(data).await?;
    writer.write_all(b"\r\n").await
}
