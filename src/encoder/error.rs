//! Encoder adapter error types

use crate::media::FlvError;

/// Error type for encoder adapter operations
#[derive(Debug)]
pub enum AdapterError {
    /// Upstream could not be reached or analyzed within the configured
    /// budget: no decodable video frame, so no container header
    SourceUnavailable,
    /// Upstream stopped producing bytes for longer than the read timeout
    Stalled,
    /// The encoder process could not be started
    Spawn(std::io::Error),
    /// Reading encoder output failed
    Read(std::io::Error),
    /// Encoder output was not a valid container stream
    Container(FlvError),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::SourceUnavailable => write!(f, "source unavailable"),
            AdapterError::Stalled => write!(f, "upstream stalled past read timeout"),
            AdapterError::Spawn(e) => write!(f, "failed to spawn encoder: {}", e),
            AdapterError::Read(e) => write!(f, "failed to read encoder output: {}", e),
            AdapterError::Container(e) => write!(f, "malformed encoder output: {}", e),
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdapterError::Spawn(e) | AdapterError::Read(e) => Some(e),
            AdapterError::Container(e) => Some(e),
            _ => None,
        }
    }
}
