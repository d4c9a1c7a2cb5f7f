//! Hub error types

use super::fingerprint::SourceFingerprint;

/// Error type for hub operations
#[derive(Debug)]
pub enum HubError {
    /// The supplied source URL is not a usable upstream identity
    InvalidSource(url::ParseError),
    /// The hub is shutting down; no new viewers are accepted
    ShuttingDown,
    /// The stream for this fingerprint kept tearing down while the viewer
    /// was being attached
    Unavailable(SourceFingerprint),
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::InvalidSource(e) => write!(f, "invalid source url: {}", e),
            HubError::ShuttingDown => write!(f, "hub is shutting down"),
            HubError::Unavailable(fp) => write!(f, "stream unavailable: {}", fp),
        }
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HubError::InvalidSource(e) => Some(e),
            _ => None,
        }
    }
}
