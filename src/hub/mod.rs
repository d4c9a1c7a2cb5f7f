//! Stream hub: fingerprint-keyed registry of live streams
//!
//! The hub deduplicates upstream pulls: every viewer of the same source
//! shares one stream, and the stream is torn down once its last viewer has
//! been gone past the grace window.
//!
//! ```text
//!                       Arc<StreamHub<A>>
//!                  ┌─────────────────────────┐
//!                  │ streams: Mutex<HashMap< │
//!                  │   SourceFingerprint,    │
//!                  │   StreamHandle {        │
//!                  │     mailbox, instance,  │
//!                  │   }                     │
//!                  │ >>                      │
//!                  └───────────┬─────────────┘
//!                              │ Attach / Detach / CheckIdle / Stop
//!                              ▼
//!                      [fan-out worker] ──► viewer queues ──► pumps ──► TCP
//!                              ▲
//!                              │ header / payload chunks
//!                      [encoder adapter]
//! ```
//!
//! Attaches are acknowledged by the target worker itself: if the worker is
//! already draining, the session comes back and the hub retries against a
//! fresh stream instance, so no viewer is ever parked on a dying stream.

pub mod config;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod store;

pub use config::HubConfig;
pub use error::HubError;
pub use event::HubEvent;
pub use fingerprint::SourceFingerprint;
pub use store::StreamHub;
