//! Viewer session: per-client queue and outbound pump
//!
//! Each connected viewer owns a bounded outbound queue and one pump task.
//! The fan-out worker enqueues without ever blocking; the pump is the only
//! place that may block on the network writer. A full queue drops the
//! newest chunk for that viewer alone, so one slow client cannot stall the
//! encoder or its peers.

pub mod pump;
pub mod viewer;

pub use pump::{CloseCause, SessionPump};
pub use viewer::{Enqueue, ViewerSession};
