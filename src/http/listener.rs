//! Relay server listener
//!
//! Handles the TCP accept loop and spawns per-viewer connection handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::RelayConfig;
use crate::encoder::EncoderAdapter;
use crate::error::Result;
use crate::hub::StreamHub;

use super::connection;
use super::response;

/// HTTP-FLV relay server
pub struct RelayServer<A: EncoderAdapter> {
    config: RelayConfig,
    hub: Arc<StreamHub<A>>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<A: EncoderAdapter> RelayServer<A> {
    /// Create a server that starts streams with the given encoder adapter
    pub fn new(config: RelayConfig, adapter: A) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            hub: Arc::new(StreamHub::new(adapter, config.hub.clone())),
            config,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the stream hub
    pub fn hub(&self) -> &Arc<StreamHub<A>> {
        &self.hub
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server until the process ends
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_with_listener(listener, std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Run on an already-bound listener. The hub's reaper runs for as long
    /// as the server does; on shutdown every stream is drained within the
    /// hub's budget.
    pub async fn run_with_listener<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "relay listening");
        let reaper = self.hub.spawn_reaper();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        reaper.abort();
        self.hub.shutdown().await;
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => tracing::error!(error = %e, "failed to accept connection"),
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Viewer cap: the permit rides along for the connection's lifetime.
        let permit = match &self.connection_semaphore {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "connection rejected: viewer limit reached");
                    tokio::spawn(async move {
                        use tokio::io::AsyncReadExt;
                        let mut socket = socket;
                        // Take the request off the wire first so the reset
                        // from unread data cannot beat the response out.
                        let mut buf = [0u8; 1024];
                        let _ = tokio::time::timeout(
                            std::time::Duration::from_secs(2),
                            socket.read(&mut buf),
                        )
                        .await;
                        let _ = response::send_error(&mut socket, 503, "viewer limit reached\r\n")
                            .await;
                    });
                    return;
                }
            },
            None => None,
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id, peer = %peer_addr, "new connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(session_id, error = %e, "failed to set TCP_NODELAY");
            }
        }

        let hub = Arc::clone(&self.hub);
        let config = self.config.clone();
        tokio::spawn(async move {
            let _permit = permit;
            connection::serve(hub, socket, peer_addr, session_id, &config).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    use super::*;
    use crate::encoder::testing::{ScriptedAdapter, Step};
    use crate::hub::HubConfig;

    const HEADER: &[u8] = b"#flv-header#";

    fn test_config() -> RelayConfig {
        RelayConfig::default().hub(
            HubConfig::default()
                .idle_grace(Duration::from_millis(100))
                .reaper_interval(Duration::from_millis(50)),
        )
    }

    struct TestServer {
        addr: SocketAddr,
        server: Arc<RelayServer<ScriptedAdapter>>,
        stop: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<()>,
    }

    async fn start_server(adapter: ScriptedAdapter, config: RelayConfig) -> TestServer {
        let server = Arc::new(RelayServer::new(config, adapter));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stop_rx) = oneshot::channel();

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = stop_rx.await;
            };
            let _ = runner.run_with_listener(listener, shutdown).await;
        });

        TestServer {
            addr,
            server,
            stop,
            task,
        }
    }

    async fn send_request(addr: SocketAddr, target: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: relay\r\n\r\n", target);
        // The server may answer (or reject) before the write lands.
        let _ = stream.write_all(request.as_bytes()).await;
        stream
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Read until `needle` appears or the deadline passes.
    async fn read_until(stream: &mut TcpStream, needle: &[u8], budget: Duration) -> Vec<u8> {
        let deadline = Instant::now() + budget;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        while find(&buf, needle).is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
                Ok(Ok(n)) if n > 0 => buf.extend_from_slice(&chunk[..n]),
                _ => break,
            }
        }
        buf
    }

    #[tokio::test]
    async fn test_streams_preamble_header_then_payload() {
        let adapter = ScriptedAdapter::live(HEADER, &[b"#p1#", b"#p2#"]);
        let ts = start_server(adapter, test_config()).await;

        let mut stream = send_request(
            ts.addr,
            "/live?deviceId=cam001&rtspUrl=rtsp%3A%2F%2Fcam.example%2F1",
        )
        .await;
        let bytes = read_until(&mut stream, b"#p2#", Duration::from_secs(5)).await;

        assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
        let head_end = find(&bytes, b"\r\n\r\n").unwrap();
        let head = std::str::from_utf8(&bytes[..head_end]).unwrap();
        assert!(head.contains("Content-Type: video/x-flv"));
        assert!(head.contains("Transfer-Encoding: chunked"));
        assert!(head.contains("Server: Video-Stream-Middleware"));

        // Container header precedes every payload chunk.
        let header_at = find(&bytes, HEADER).unwrap();
        let p1_at = find(&bytes, b"#p1#").unwrap();
        let p2_at = find(&bytes, b"#p2#").unwrap();
        assert!(head_end < header_at);
        assert!(header_at < p1_at);
        assert!(p1_at < p2_at);

        let _ = ts.stop.send(());
        ts.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_two_viewers_one_pull() {
        let adapter = ScriptedAdapter::live(HEADER, &[b"#p1#"]);
        let ts = start_server(adapter.clone(), test_config()).await;
        let target = "/live?deviceId=c1&rtspUrl=rtsp%3A%2F%2Fcam.example%2Fshared";

        let mut a = send_request(ts.addr, target).await;
        let a_bytes = read_until(&mut a, b"#p1#", Duration::from_secs(5)).await;
        assert!(find(&a_bytes, HEADER).is_some());

        // Second viewer joins mid-stream and still starts with the header.
        let mut b = send_request(ts.addr, target).await;
        let b_bytes = read_until(&mut b, HEADER, Duration::from_secs(5)).await;
        assert!(find(&b_bytes, HEADER).is_some());

        assert_eq!(adapter.pulls(), 1);
        assert_eq!(ts.server.hub().stream_count().await, 1);

        let _ = ts.stop.send(());
        ts.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_rtsp_url_is_400() {
        let adapter = ScriptedAdapter::live(HEADER, &[]);
        let ts = start_server(adapter.clone(), test_config()).await;

        let mut stream = send_request(ts.addr, "/live?deviceId=cam001").await;
        let bytes = read_until(&mut stream, b"\r\n\r\n", Duration::from_secs(5)).await;

        assert!(bytes.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
        // No stream was created for the bad request.
        assert_eq!(adapter.pulls(), 0);
        assert_eq!(ts.server.hub().stream_count().await, 0);

        let _ = ts.stop.send(());
        ts.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_path_is_400() {
        let adapter = ScriptedAdapter::live(HEADER, &[]);
        let ts = start_server(adapter, test_config()).await;

        let mut stream = send_request(ts.addr, "/status").await;
        let bytes = read_until(&mut stream, b"\r\n\r\n", Duration::from_secs(5)).await;
        assert!(bytes.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));

        let _ = ts.stop.send(());
        ts.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_last_viewer_disconnect_reaps_stream() {
        let adapter = ScriptedAdapter::live(HEADER, &[b"#p1#"]);
        let ts = start_server(adapter.clone(), test_config()).await;

        let mut stream = send_request(
            ts.addr,
            "/live?deviceId=c1&rtspUrl=rtsp%3A%2F%2Fcam.example%2F1",
        )
        .await;
        let bytes = read_until(&mut stream, b"#p1#", Duration::from_secs(5)).await;
        assert!(find(&bytes, HEADER).is_some());
        drop(stream);

        // Grace window (100ms) + reaper interval (50ms), with headroom.
        let deadline = Instant::now() + Duration::from_secs(5);
        while ts.server.hub().stream_count().await != 0 {
            assert!(Instant::now() < deadline, "stream was never reaped");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(adapter.stops_seen(), 1);
        assert_eq!(adapter.finished(), 1);

        let _ = ts.stop.send(());
        ts.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_viewer_limit_gets_503() {
        let adapter = ScriptedAdapter::live(HEADER, &[]);
        let mut config = test_config();
        config.max_connections = 1;
        let ts = start_server(adapter, config).await;

        let mut first = send_request(
            ts.addr,
            "/live?deviceId=c1&rtspUrl=rtsp%3A%2F%2Fcam.example%2F1",
        )
        .await;
        let first_bytes = read_until(&mut first, HEADER, Duration::from_secs(5)).await;
        assert!(first_bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));

        let mut second = send_request(
            ts.addr,
            "/live?deviceId=c2&rtspUrl=rtsp%3A%2F%2Fcam.example%2F1",
        )
        .await;
        let second_bytes = read_until(&mut second, b"\r\n\r\n", Duration::from_secs(5)).await;
        assert!(second_bytes.starts_with(b"HTTP/1.1 503 Service Unavailable\r\n"));

        let _ = ts.stop.send(());
        ts.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_source_truncates_response() {
        let adapter = ScriptedAdapter::new(vec![Step::Fail]);
        let ts = start_server(adapter, test_config()).await;

        let mut stream = send_request(
            ts.addr,
            "/live?deviceId=c1&rtspUrl=rtsp%3A%2F%2Fdown.example%2F1",
        )
        .await;

        // The viewer gets a 200 preamble and then a body that ends without
        // any media bytes.
        let mut bytes = Vec::new();
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            stream.read_to_end(&mut bytes),
        )
        .await;
        assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(find(&bytes, HEADER).is_none());

        let _ = ts.stop.send(());
        ts.task.await.unwrap();
    }
}
