//! FFmpeg-backed encoder adapter
//!
//! Spawns an `ffmpeg` child that pulls the source over RTSP-in-TCP and
//! remuxes to FLV on stdout. The child's byte stream is segmented into the
//! container header and per-tag payload chunks before being handed to the
//! sink. Encode parameters favor latency over compression: no B-frames,
//! zero-latency tune, keyframe interval pinned to the GOP size.

use std::process::Stdio;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::media::{FlvSplitter, MediaChunk};

use super::adapter::EncoderAdapter;
use super::config::AdapterConfig;
use super::error::AdapterError;

/// FFmpeg child process adapter
#[derive(Debug, Clone)]
pub struct FfmpegAdapter {
    config: AdapterConfig,
}

impl FfmpegAdapter {
    /// Create an adapter with the given configuration
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    /// Get the adapter configuration
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Command-line arguments for one pull.
    ///
    /// Input side: TCP transport, bounded socket/read/analyze windows, large
    /// probe buffer, single-threaded decode. Output side: H.264 yuv420p with
    /// the low-latency knobs, AAC audio iff the source carries audio, FLV to
    /// stdout.
    fn build_args(&self, url: &str) -> Vec<String> {
        let c = &self.config;
        let mut args: Vec<String> = Vec::with_capacity(44);
        let mut push = |items: &[&str]| {
            args.extend(items.iter().map(|s| s.to_string()));
        };

        push(&["-hide_banner", "-nostats", "-loglevel", "error"]);
        push(&["-rtsp_transport", "tcp"]);
        push(&["-stimeout", &c.connect_timeout.as_micros().to_string()]);
        push(&["-rw_timeout", &c.read_timeout.as_micros().to_string()]);
        push(&["-probesize", &c.probe_size.to_string()]);
        push(&["-analyzeduration", &c.analyze_timeout.as_micros().to_string()]);
        push(&["-threads", "1"]);
        push(&["-i", url]);
        push(&["-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency"]);
        push(&["-crf", "25", "-pix_fmt", "yuv420p"]);
        push(&["-r", &c.target_fps.to_string()]);
        push(&["-g", &c.gop_size.to_string()]);
        push(&["-keyint_min", &c.gop_size.to_string()]);
        push(&["-bf", "0"]);
        push(&["-c:a", "aac"]);
        push(&["-max_delay", "0"]);
        push(&["-f", "flv", "pipe:1"]);
        args
    }

    fn spawn_muxer(&self, url: &str) -> Result<Child, AdapterError> {
        Command::new(&self.config.ffmpeg_bin)
            .args(self.build_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(AdapterError::Spawn)
    }

    async fn pump_stdout(
        &self,
        stdout: &mut ChildStdout,
        sink: &mpsc::Sender<MediaChunk>,
        stop: &CancellationToken,
    ) -> Result<(), AdapterError> {
        let mut splitter = FlvSplitter::new();
        let mut buf = BytesMut::with_capacity(16 * 1024);
        // The header must appear within the connect + analyze budget,
        // otherwise the source is declared unavailable.
        let header_deadline = Instant::now() + self.config.connect_timeout + self.config.analyze_timeout;
        let mut header_seen = false;

        loop {
            let read = tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = time::sleep_until(header_deadline), if !header_seen => {
                    return Err(AdapterError::SourceUnavailable);
                }
                read = time::timeout(self.config.read_timeout, stdout.read_buf(&mut buf)) => read,
            };

            let n = match read {
                Err(_) if header_seen => return Err(AdapterError::Stalled),
                // Silence before the header means the source never became
                // decodable.
                Err(_) => return Err(AdapterError::SourceUnavailable),
                Ok(Err(e)) => return Err(AdapterError::Read(e)),
                Ok(Ok(n)) => n,
            };
            if n == 0 {
                // Upstream ended. Before the header this means the source
                // never became decodable.
                return if header_seen {
                    Ok(())
                } else {
                    Err(AdapterError::SourceUnavailable)
                };
            }

            let chunks = splitter.push(&buf).map_err(AdapterError::Container)?;
            buf.clear();
            for chunk in chunks {
                header_seen |= chunk.is_header();
                if sink.send(chunk).await.is_err() {
                    // Fan-out worker is gone; nothing left to feed.
                    return Ok(());
                }
            }
        }
    }

    async fn shutdown(&self, child: &mut Child) {
        // start_kill is a no-op error if the child already exited
        let _ = child.start_kill();
        match time::timeout(self.config.stop_budget, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "ffmpeg exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to reap ffmpeg"),
            Err(_) => tracing::warn!(
                budget_secs = self.config.stop_budget.as_secs(),
                "ffmpeg did not exit within the stop budget"
            ),
        }
    }
}

impl EncoderAdapter for FfmpegAdapter {
    async fn pull(
        &self,
        url: String,
        sink: mpsc::Sender<MediaChunk>,
        stop: CancellationToken,
    ) -> Result<(), AdapterError> {
        let mut child = self.spawn_muxer(&url)?;

        let Some(mut stdout) = child.stdout.take() else {
            self.shutdown(&mut child).await;
            return Err(AdapterError::Spawn(std::io::Error::other(
                "ffmpeg stdout not captured",
            )));
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        let result = self.pump_stdout(&mut stdout, &sink, &stop).await;
        self.shutdown(&mut child).await;
        result
    }
}

/// Drain encoder diagnostics into the log at debug level.
async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "flv_relay::ffmpeg", "{}", line);
    }
}
