//! Encoder adapter configuration

use std::time::Duration;

/// Configuration for the upstream pull and encode
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Path to the ffmpeg executable
    pub ffmpeg_bin: String,

    /// Upstream socket/connect timeout
    pub connect_timeout: Duration,

    /// Upstream read/write timeout
    pub read_timeout: Duration,

    /// Maximum time spent probing the stream for parameters
    pub analyze_timeout: Duration,

    /// Probe buffer size in bytes
    pub probe_size: usize,

    /// Output frame rate
    pub target_fps: u32,

    /// GOP size in frames; the keyframe interval is pinned to this
    pub gop_size: u32,

    /// Wall-clock budget for a cooperative stop
    pub stop_budget: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(15),
            analyze_timeout: Duration::from_secs(10),
            probe_size: 10_000_000,
            target_fps: 25,
            gop_size: 25, // one keyframe per second at 25 fps
            stop_budget: Duration::from_secs(5),
        }
    }
}

impl AdapterConfig {
    /// Set the ffmpeg executable path
    pub fn ffmpeg_bin(mut self, bin: impl Into<String>) -> Self {
        self.ffmpeg_bin = bin.into();
        self
    }

    /// Set the upstream connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the upstream read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the analyze window
    pub fn analyze_timeout(mut self, timeout: Duration) -> Self {
        self.analyze_timeout = timeout;
        self
    }

    /// Set the output frame rate
    pub fn target_fps(mut self, fps: u32) -> Self {
        self.target_fps = fps;
        self
    }

    /// Set the GOP size
    pub fn gop_size(mut self, frames: u32) -> Self {
        self.gop_size = frames;
        self
    }
}
