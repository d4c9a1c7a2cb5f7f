//! Per-source stream runtime
//!
//! A stream is one running source: one encoder adapter, one fan-out worker,
//! one viewer set, one cached container header. The fan-out worker is the
//! sole mutator of the viewer set; attach/detach/idle-check/stop all arrive
//! through its mailbox, so the set is never iterated while being mutated.

pub mod fanout;

pub use fanout::{AttachOutcome, FanoutWorker, StreamEvent, StreamState};
