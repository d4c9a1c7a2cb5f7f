//! Hub lifecycle events
//!
//! Best-effort notifications for observers (logs, tests, embedding hosts).
//! Nothing in the relay core depends on anyone listening.

use super::fingerprint::SourceFingerprint;

/// Lifecycle event emitted by the hub
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A stream was created for its first viewer
    StreamOpened {
        fingerprint: SourceFingerprint,
        url: String,
    },
    /// A stream terminated and left the registry
    StreamClosed { fingerprint: SourceFingerprint },
    /// A viewer was attached to a stream
    ViewerAttached {
        fingerprint: SourceFingerprint,
        session_id: u64,
    },
    /// A viewer detach was delivered to a stream
    ViewerDetached {
        fingerprint: SourceFingerprint,
        session_id: u64,
    },
}
