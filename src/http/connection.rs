//! Per-viewer connection handling
//!
//! One task per accepted socket: read the request head, validate it, write
//! the preamble, attach to the hub, then become the session's pump until
//! the stream ends or the client leaves.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time;

use crate::config::RelayConfig;
use crate::encoder::EncoderAdapter;
use crate::hub::StreamHub;
use crate::session::{SessionPump, ViewerSession};

use super::request::parse_viewer_request;
use super::response::{send_error, send_flv_preamble};

pub(crate) async fn serve<A: EncoderAdapter>(
    hub: Arc<StreamHub<A>>,
    mut socket: TcpStream,
    peer: SocketAddr,
    session_id: u64,
    config: &RelayConfig,
) {
    let head = match time::timeout(
        config.connection_timeout,
        read_request_head(&mut socket, config.max_frame_size),
    )
    .await
    {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            tracing::debug!(session_id, peer = %peer, error = %e, "failed to read request");
            return;
        }
        Err(_) => {
            tracing::debug!(session_id, peer = %peer, "request timed out");
            return;
        }
    };

    let request = match parse_viewer_request(&head) {
        Ok(request) => request,
        Err(e) => {
            tracing::info!(session_id, peer = %peer, error = %e, "rejecting viewer request");
            let _ = send_error(&mut socket, 400, &format!("bad request: {}\r\n", e)).await;
            return;
        }
    };

    tracing::info!(
        session_id,
        peer = %peer,
        device = %request.device_id,
        url = %request.source_url,
        "live viewer request"
    );

    if hub.is_shutting_down() {
        let _ = send_error(&mut socket, 503, "relay is shutting down\r\n").await;
        return;
    }

    // Preamble first; from here on the client sees a 200 and any failure is
    // a truncated body.
    if send_flv_preamble(&mut socket).await.is_err() {
        tracing::debug!(session_id, "client went away before the preamble");
        return;
    }

    let (session, queue) = ViewerSession::create(
        session_id,
        request.device_id,
        hub.config().session_queue_capacity,
    );
    let fp = match hub.attach(&request.source_url, session).await {
        Ok(fp) => fp,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "attach failed, truncating response");
            return;
        }
    };

    let cause = SessionPump::new(session_id, queue, socket).run().await;
    hub.detach(&fp, session_id).await;
    tracing::debug!(session_id, cause = ?cause, "viewer connection finished");
}

/// Read until the end of the request head, bounded by `cap` bytes.
async fn read_request_head(socket: &mut TcpStream, cap: usize) -> std::io::Result<String> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-request",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > cap {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }
    String::from_utf8(buf).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "request head is not utf-8")
    })
}
