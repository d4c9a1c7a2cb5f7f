//! Response writing helpers

use tokio::io::{AsyncWrite, AsyncWriteExt};

fn status_text(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

/// Write the streaming response preamble.
///
/// Chunked transfer because the body length is unknown for a live stream;
/// caching disabled so players always hit the live edge.
pub(crate) async fn send_flv_preamble<W: AsyncWrite + Unpin>(
    writer: &mut W,
) -> std::io::Result<()> {
    writer
        .write_all(
            b"HTTP/1.1 200 OK\r\n\
              Server: Video-Stream-Middleware\r\n\
              Content-Type: video/x-flv\r\n\
              Connection: close\r\n\
              Cache-Control: no-cache\r\n\
              Pragma: no-cache\r\n\
              Accept-Ranges: bytes\r\n\
              Transfer-Encoding: chunked\r\n\
              \r\n",
        )
        .await?;
    writer.flush().await
}

/// Write a complete error response and flush it; the caller closes the
/// connection.
pub(crate) async fn send_error<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    body: &str,
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Server: Video-Stream-Middleware\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        status,
        status_text(status),
        body.len(),
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await
}
