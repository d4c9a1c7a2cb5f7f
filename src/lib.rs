//! Live-video relay middleware
//!
//! Accepts HTTP viewers that each name an upstream RTSP source, pulls each
//! unique source exactly once, transcodes it in real time to FLV, and fans
//! the encoded bytes out to every attached viewer over an HTTP chunked
//! response. When a source's last viewer leaves, the upstream pull and the
//! encoder are torn down after a grace window.
//!
//! # Architecture
//!
//! ```text
//! GET /live?deviceId=..&rtspUrl=..        GET /live (same rtspUrl)
//!        │                                      │
//!        ▼                                      ▼
//!  [RelayServer] ─── attach ───► [StreamHub] ◄─ attach
//!                                     │ one stream per fingerprint
//!                                     ▼
//!   rtsp://camera ──► [EncoderAdapter] ──► [fan-out worker]
//!                      (ffmpeg → FLV)        │        │
//!                                            ▼        ▼
//!                                      [session]  [session]
//!                                        pump       pump
//!                                            │        │
//!                                            ▼        ▼
//!                                       viewer A   viewer B
//! ```
//!
//! Every viewer receives the stream's container header before any payload
//! bytes; backpressure is per viewer (bounded queue, drop on overflow), so
//! one stalled client never slows the encoder or its peers.
//!
//! # Example
//!
//! ```no_run
//! use flv_relay::{FfmpegAdapter, RelayConfig, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> flv_relay::Result<()> {
//!     let config = RelayConfig::from_env();
//!     let adapter = FfmpegAdapter::new(config.adapter.clone());
//!     let server = RelayServer::new(config, adapter);
//!     server.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod http;
pub mod hub;
pub mod media;
pub mod session;
pub mod stream;

pub use config::RelayConfig;
pub use encoder::{AdapterConfig, AdapterError, EncoderAdapter, FfmpegAdapter};
pub use error::{Error, Result};
pub use http::RelayServer;
pub use hub::{HubConfig, HubError, HubEvent, SourceFingerprint, StreamHub};
pub use media::{ChunkKind, MediaChunk};
pub use session::ViewerSession;
