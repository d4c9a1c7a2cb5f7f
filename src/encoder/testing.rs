//! Scripted adapter for exercising streams without a real upstream

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::media::MediaChunk;

use super::adapter::EncoderAdapter;
use super::error::AdapterError;

/// One step of a scripted pull
#[derive(Clone)]
pub(crate) enum Step {
    Header(Bytes),
    Payload(u32, Bytes),
    /// Block until the stop token fires, like a healthy live source
    IdleUntilStopped,
    /// Fail as an unreachable source
    Fail,
}

/// Adapter that replays a fixed script and counts lifecycle transitions
#[derive(Clone)]
pub(crate) struct ScriptedAdapter {
    steps: Arc<Vec<Step>>,
    pulls: Arc<AtomicUsize>,
    stops_seen: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Arc::new(steps),
            pulls: Arc::new(AtomicUsize::new(0)),
            stops_seen: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A healthy source: header, the given payloads, then live until stopped
    pub(crate) fn live(header: &'static [u8], payloads: &[&'static [u8]]) -> Self {
        let mut steps = vec![Step::Header(Bytes::from_static(header))];
        for (i, p) in payloads.iter().enumerate() {
            steps.push(Step::Payload(i as u32 * 40, Bytes::from_static(p)));
        }
        steps.push(Step::IdleUntilStopped);
        Self::new(steps)
    }

    /// How many times `pull` was invoked
    pub(crate) fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// How many pulls exited having observed a cancelled stop token
    pub(crate) fn stops_seen(&self) -> usize {
        self.stops_seen.load(Ordering::SeqCst)
    }

    /// How many pulls have returned
    pub(crate) fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl EncoderAdapter for ScriptedAdapter {
    async fn pull(
        &self,
        _url: String,
        sink: mpsc::Sender<MediaChunk>,
        stop: CancellationToken,
    ) -> Result<(), AdapterError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let mut result = Ok(());

        for step in self.steps.iter() {
            if stop.is_cancelled() {
                break;
            }
            match step {
                Step::Header(data) => {
                    if sink.send(MediaChunk::header(data.clone())).await.is_err() {
                        break;
                    }
                }
                Step::Payload(ts, data) => {
                    if sink.send(MediaChunk::payload(*ts, data.clone())).await.is_err() {
                        break;
                    }
                }
                Step::IdleUntilStopped => {
                    stop.cancelled().await;
                    break;
                }
                Step::Fail => {
                    result = Err(AdapterError::SourceUnavailable);
                    break;
                }
            }
        }

        if stop.is_cancelled() {
            self.stops_seen.fetch_add(1, Ordering::SeqCst);
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}
