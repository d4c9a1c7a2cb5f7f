//! Fan-out worker: broadcast encoder output to every live viewer
//!
//! Exactly one worker task runs per stream. Each tick is either a chunk
//! from the encoder or an external event from the mailbox; mailbox events
//! win ties so attaches and detaches are never starved by a busy encoder.
//! Enqueueing to viewers never blocks; a viewer that keeps overflowing its
//! queue is evicted on its own, without touching the encoder or its peers.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::hub::SourceFingerprint;
use crate::media::{ChunkKind, MediaChunk};
use crate::session::{Enqueue, ViewerSession};

/// External events delivered to a stream's mailbox
#[derive(Debug)]
pub enum StreamEvent {
    /// Attach a viewer. The ack tells the hub whether the stream took the
    /// session or is already tearing down (in which case the session is
    /// handed back for re-routing to a fresh stream).
    Attach {
        session: ViewerSession,
        ack: oneshot::Sender<AttachOutcome>,
    },
    /// Remove a viewer by session id; no-op if it is already gone
    Detach { session_id: u64 },
    /// Reaper probe: decide idleness under the worker's serialization
    CheckIdle,
    /// Unconditional teardown (hub shutdown, encoder failure path)
    Stop,
}

/// Reply to an [`StreamEvent::Attach`]
#[derive(Debug)]
pub enum AttachOutcome {
    Attached,
    /// Stream is draining or terminated; the session is returned untouched
    Rejected(ViewerSession),
}

/// Stream lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Encoder starting; container header not yet cached
    Starting,
    /// Header cached, fan-out live
    Running,
    /// Teardown in progress; attaches are rejected
    Draining,
    /// Worker exited; viewer set empty, encoder stopped
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewerPhase {
    /// Attached before the header was available
    Pending,
    /// Header delivered; receives every subsequent payload chunk
    Live,
}

struct ViewerSlot {
    session: ViewerSession,
    phase: ViewerPhase,
    consecutive_drops: u32,
}

/// The per-stream fan-out loop
pub struct FanoutWorker {
    fingerprint: SourceFingerprint,
    instance: u64,
    mailbox: mpsc::Receiver<StreamEvent>,
    media: mpsc::Receiver<MediaChunk>,
    /// Cancels the encoder adapter; idempotent
    stop: CancellationToken,
    idle_grace: std::time::Duration,
    drop_threshold: u32,
    header: Option<Bytes>,
    viewers: HashMap<u64, ViewerSlot>,
    state: StreamState,
    created_at: Instant,
    /// Set iff the viewer set is empty while running
    empty_since: Option<Instant>,
}

enum Tick {
    Event(Option<StreamEvent>),
    Media(Option<MediaChunk>),
}

impl FanoutWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fingerprint: SourceFingerprint,
        instance: u64,
        mailbox: mpsc::Receiver<StreamEvent>,
        media: mpsc::Receiver<MediaChunk>,
        stop: CancellationToken,
        idle_grace: std::time::Duration,
        drop_threshold: u32,
    ) -> Self {
        Self {
            fingerprint,
            instance,
            mailbox,
            media,
            stop,
            idle_grace,
            drop_threshold,
            header: None,
            viewers: HashMap::new(),
            state: StreamState::Starting,
            created_at: Instant::now(),
            empty_since: None,
        }
    }

    /// Run until torn down, then hand the mailbox back so the owner can
    /// reject any attaches that were still in flight.
    pub async fn run(mut self) -> mpsc::Receiver<StreamEvent> {
        tracing::info!(
            stream = %self.fingerprint,
            instance = self.instance,
            "fan-out worker started"
        );

        loop {
            let tick = tokio::select! {
                biased;
                ev = self.mailbox.recv() => Tick::Event(ev),
                chunk = self.media.recv() => Tick::Media(chunk),
            };

            let teardown = match tick {
                Tick::Event(Some(ev)) => self.handle_event(ev),
                // Hub dropped the handle without a Stop (shutdown fallback)
                Tick::Event(None) => true,
                Tick::Media(Some(chunk)) => {
                    self.handle_media(chunk);
                    false
                }
                Tick::Media(None) => {
                    tracing::info!(stream = %self.fingerprint, "encoder output ended");
                    true
                }
            };

            self.note_empty();
            if teardown {
                break;
            }
        }

        self.state = StreamState::Draining;
        self.stop.cancel();
        let closed = self.viewers.len();
        // Dropping the senders closes every session queue; each pump drains
        // what it already has and terminates its response.
        self.viewers.clear();
        self.state = StreamState::Terminated;
        tracing::info!(
            stream = %self.fingerprint,
            instance = self.instance,
            viewers_closed = closed,
            uptime_secs = self.created_at.elapsed().as_secs(),
            "fan-out worker terminated"
        );
        self.mailbox
    }

    /// Handle one mailbox event; returns true to begin teardown.
    fn handle_event(&mut self, ev: StreamEvent) -> bool {
        match ev {
            StreamEvent::Attach { session, ack } => {
                let id = session.id();
                let mut slot = ViewerSlot {
                    session,
                    phase: ViewerPhase::Pending,
                    consecutive_drops: 0,
                };

                let mut dead = false;
                if let Some(header) = self.header.clone() {
                    match slot.session.enqueue(header) {
                        Enqueue::Accepted => slot.phase = ViewerPhase::Live,
                        _ => dead = true,
                    }
                }

                if ack.send(AttachOutcome::Attached).is_err() {
                    // Requester vanished before the ack; don't keep its session.
                    return false;
                }
                if dead {
                    // Queue was empty, so a failed header enqueue means the
                    // pump is already gone.
                    tracing::debug!(stream = %self.fingerprint, viewer = id, "viewer gone at attach");
                    return false;
                }

                self.empty_since = None;
                self.viewers.insert(id, slot);
                tracing::info!(
                    stream = %self.fingerprint,
                    viewer = id,
                    viewers = self.viewers.len(),
                    "viewer attached"
                );
                false
            }
            StreamEvent::Detach { session_id } => {
                if self.viewers.remove(&session_id).is_some() {
                    tracing::info!(
                        stream = %self.fingerprint,
                        viewer = session_id,
                        viewers = self.viewers.len(),
                        "viewer detached"
                    );
                }
                false
            }
            StreamEvent::CheckIdle => {
                if self.viewers.is_empty() {
                    if let Some(since) = self.empty_since {
                        if since.elapsed() >= self.idle_grace {
                            tracing::info!(
                                stream = %self.fingerprint,
                                idle_secs = since.elapsed().as_secs(),
                                "no viewers within grace window, tearing down"
                            );
                            return true;
                        }
                    }
                }
                false
            }
            StreamEvent::Stop => true,
        }
    }

    fn handle_media(&mut self, chunk: MediaChunk) {
        match chunk.kind {
            ChunkKind::Header => {
                if self.header.is_some() {
                    // The header is set once per stream instance.
                    tracing::debug!(stream = %self.fingerprint, "duplicate container header ignored");
                    return;
                }
                tracing::info!(
                    stream = %self.fingerprint,
                    bytes = chunk.size(),
                    "container header cached"
                );
                let header = chunk.data;
                self.header = Some(header.clone());
                self.state = StreamState::Running;

                let fp = self.fingerprint.clone();
                self.viewers.retain(|id, slot| {
                    match slot.session.enqueue(header.clone()) {
                        Enqueue::Accepted => {
                            slot.phase = ViewerPhase::Live;
                            true
                        }
                        _ => {
                            tracing::debug!(stream = %fp, viewer = *id, "viewer gone before header");
                            false
                        }
                    }
                });
            }
            ChunkKind::Payload => {
                if self.header.is_none() {
                    tracing::debug!(stream = %self.fingerprint, "payload before header discarded");
                    return;
                }
                let threshold = self.drop_threshold;
                let fp = self.fingerprint.clone();
                let data = chunk.data;
                self.viewers.retain(|id, slot| {
                    if slot.phase != ViewerPhase::Live {
                        return true;
                    }
                    match slot.session.enqueue(data.clone()) {
                        Enqueue::Accepted => {
                            slot.consecutive_drops = 0;
                            true
                        }
                        Enqueue::Dropped => {
                            slot.consecutive_drops += 1;
                            if slot.consecutive_drops > threshold {
                                tracing::warn!(
                                    stream = %fp,
                                    viewer = *id,
                                    drops = slot.consecutive_drops,
                                    "slow consumer, closing viewer"
                                );
                                false
                            } else {
                                true
                            }
                        }
                        Enqueue::Closed => {
                            tracing::debug!(stream = %fp, viewer = *id, "viewer queue closed");
                            false
                        }
                    }
                });
            }
        }
    }

    /// Track when the viewer set becomes empty while the stream is live.
    fn note_empty(&mut self) {
        if self.viewers.is_empty() {
            if self.empty_since.is_none() && self.state == StreamState::Running {
                self.empty_since = Some(Instant::now());
                tracing::debug!(stream = %self.fingerprint, "viewer set empty, grace window started");
            }
        } else {
            self.empty_since = None;
        }
    }
}
