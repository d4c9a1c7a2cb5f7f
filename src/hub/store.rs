//! Stream hub implementation
//!
//! Owns every live stream, keyed by source fingerprint. The registry map is
//! the only guard: create-or-fetch happens under it, so two viewers racing
//! on a fresh fingerprint still end up on a single stream. Teardown is
//! ABA-safe: a stream instance can only remove its own registry entry, so a
//! fresh stream installed under the same fingerprint is never clobbered by
//! its predecessor's cleanup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::encoder::EncoderAdapter;
use crate::session::ViewerSession;
use crate::stream::{AttachOutcome, FanoutWorker, StreamEvent};

use super::config::HubConfig;
use super::error::HubError;
use super::event::HubEvent;
use super::fingerprint::SourceFingerprint;

/// Capacity of the lifecycle event channel; lagging observers lose events,
/// never block the hub.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Registry entry for one live stream instance
struct StreamHandle {
    instance: u64,
    mailbox: mpsc::Sender<StreamEvent>,
    worker: JoinHandle<()>,
}

/// Process-wide registry of live streams
pub struct StreamHub<A: EncoderAdapter> {
    streams: Mutex<HashMap<SourceFingerprint, StreamHandle>>,
    adapter: A,
    config: HubConfig,
    next_instance: AtomicU64,
    shutting_down: AtomicBool,
    events: broadcast::Sender<HubEvent>,
}

impl<A: EncoderAdapter> StreamHub<A> {
    /// Create a hub that starts streams with the given adapter
    pub fn new(adapter: A, config: HubConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            streams: Mutex::new(HashMap::new()),
            adapter,
            config,
            next_instance: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            events,
        }
    }

    /// Get the hub configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of streams currently registered
    pub async fn stream_count(&self) -> usize {
        self.streams.lock().await.len()
    }

    /// Attach a viewer to the stream for `url`, creating the stream if this
    /// is its first viewer.
    ///
    /// Returns the source fingerprint, which the caller needs for
    /// [`detach`](Self::detach). If the target stream is tearing down
    /// concurrently, the attach is retried against a fresh instance; no
    /// viewer is ever left on a draining stream.
    pub async fn attach(
        self: &Arc<Self>,
        url: &str,
        session: ViewerSession,
    ) -> Result<SourceFingerprint, HubError> {
        let fp = SourceFingerprint::from_url(url).map_err(HubError::InvalidSource)?;
        let session_id = session.id();
        let mut session = session;

        for _ in 0..=self.config.attach_retries {
            if self.is_shutting_down() {
                return Err(HubError::ShuttingDown);
            }

            let (instance, mailbox) = {
                let mut streams = self.streams.lock().await;
                match streams.get(&fp) {
                    Some(handle) => (handle.instance, handle.mailbox.clone()),
                    None => {
                        let handle = self.spawn_stream(fp.clone(), url.to_string());
                        let target = (handle.instance, handle.mailbox.clone());
                        streams.insert(fp.clone(), handle);
                        target
                    }
                }
            };

            let (ack_tx, ack_rx) = oneshot::channel();
            let event = StreamEvent::Attach {
                session,
                ack: ack_tx,
            };
            match mailbox.send(event).await {
                Ok(()) => {}
                Err(mpsc::error::SendError(ev)) => {
                    // Worker already gone; take the session back and retry
                    // against a fresh instance.
                    match ev {
                        StreamEvent::Attach { session: s, .. } => session = s,
                        _ => return Err(HubError::Unavailable(fp)),
                    }
                    self.remove_instance(&fp, instance).await;
                    continue;
                }
            }

            match ack_rx.await {
                Ok(AttachOutcome::Attached) => {
                    let _ = self.events.send(HubEvent::ViewerAttached {
                        fingerprint: fp.clone(),
                        session_id,
                    });
                    return Ok(fp);
                }
                Ok(AttachOutcome::Rejected(s)) => {
                    session = s;
                    self.remove_instance(&fp, instance).await;
                    continue;
                }
                Err(_) => {
                    // The worker died mid-attach and the session went with
                    // it; the viewer's pump will observe its queue closing.
                    self.remove_instance(&fp, instance).await;
                    return Err(HubError::Unavailable(fp));
                }
            }
        }

        Err(HubError::Unavailable(fp))
    }

    /// Deliver a detach to the stream for `fp`; no-op if the stream or the
    /// session is already gone.
    pub async fn detach(&self, fp: &SourceFingerprint, session_id: u64) {
        let mailbox = {
            self.streams
                .lock()
                .await
                .get(fp)
                .map(|handle| handle.mailbox.clone())
        };
        if let Some(mailbox) = mailbox {
            if mailbox
                .send(StreamEvent::Detach { session_id })
                .await
                .is_ok()
            {
                let _ = self.events.send(HubEvent::ViewerDetached {
                    fingerprint: fp.clone(),
                    session_id,
                });
            }
        }
    }

    /// Remove the registry entry for a terminated stream instance.
    ///
    /// A no-op when the entry already points at a different (fresh)
    /// instance.
    pub async fn release(&self, fp: &SourceFingerprint, instance: u64) {
        self.remove_instance(fp, instance).await;
    }

    async fn remove_instance(&self, fp: &SourceFingerprint, instance: u64) {
        let mut streams = self.streams.lock().await;
        if streams.get(fp).map(|h| h.instance) == Some(instance) {
            streams.remove(fp);
            tracing::info!(stream = %fp, instance, "stream released");
        }
    }

    /// Spawn the reaper: a periodic probe asking every stream to decide,
    /// under its own serialization, whether its grace window has expired.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(hub.config.reaper_interval);
            loop {
                ticker.tick().await;
                let mailboxes: Vec<_> = {
                    hub.streams
                        .lock()
                        .await
                        .values()
                        .map(|h| h.mailbox.clone())
                        .collect()
                };
                for mailbox in mailboxes {
                    // A full mailbox means the stream is busy, hence not idle.
                    let _ = mailbox.try_send(StreamEvent::CheckIdle);
                }
            }
        })
    }

    /// Drain every stream and wait for termination within the shutdown
    /// budget; streams exceeding it are aborted.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<StreamHandle> = {
            let mut streams = self.streams.lock().await;
            streams.drain().map(|(_, handle)| handle).collect()
        };
        tracing::info!(streams = handles.len(), "hub shutting down");

        let mut workers = Vec::with_capacity(handles.len());
        for handle in handles {
            let StreamHandle {
                instance,
                mailbox,
                worker,
            } = handle;
            let _ = mailbox.try_send(StreamEvent::Stop);
            // Dropping the sender is the fallback stop signal for a stream
            // whose mailbox was full.
            drop(mailbox);
            workers.push((instance, worker));
        }

        let deadline = Instant::now() + self.config.shutdown_budget;
        for (instance, mut worker) in workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if time::timeout(remaining, &mut worker).await.is_err() {
                tracing::warn!(instance, "stream exceeded shutdown budget, abandoning");
                worker.abort();
            }
        }
    }

    /// Install and start a fresh stream instance. Caller holds the registry
    /// guard and inserts the returned handle.
    fn spawn_stream(self: &Arc<Self>, fp: SourceFingerprint, url: String) -> StreamHandle {
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let (mail_tx, mail_rx) = mpsc::channel(self.config.mailbox_capacity);
        let (media_tx, media_rx) = mpsc::channel(self.config.media_queue_capacity);
        let stop = CancellationToken::new();

        tracing::info!(stream = %fp, instance, url = %url, "starting stream");
        let _ = self.events.send(HubEvent::StreamOpened {
            fingerprint: fp.clone(),
            url: url.clone(),
        });

        let adapter = self.adapter.clone();
        let adapter_stop = stop.clone();
        let adapter_fp = fp.clone();
        let mut encoder_task = tokio::spawn(async move {
            match adapter.pull(url, media_tx, adapter_stop).await {
                Ok(()) => tracing::debug!(stream = %adapter_fp, "encoder finished"),
                Err(e) => tracing::warn!(stream = %adapter_fp, error = %e, "encoder failed"),
            }
        });

        let worker = FanoutWorker::new(
            fp.clone(),
            instance,
            mail_rx,
            media_rx,
            stop.clone(),
            self.config.idle_grace,
            self.config.drop_threshold,
        );

        let hub = Arc::clone(self);
        let stop_budget = self.config.encoder_stop_budget;
        let worker_task = tokio::spawn(async move {
            let mut mailbox = worker.run().await;

            // Remove the registry entry first so no new attach can target
            // this instance, then flush the mailbox: attaches still queued
            // are handed back and re-routed by the hub to a fresh stream.
            hub.release(&fp, instance).await;
            mailbox.close();
            while let Some(ev) = mailbox.recv().await {
                if let StreamEvent::Attach { session, ack } = ev {
                    let _ = ack.send(AttachOutcome::Rejected(session));
                }
            }

            stop.cancel();
            if time::timeout(stop_budget, &mut encoder_task).await.is_err() {
                tracing::warn!(stream = %fp, "encoder exceeded stop budget, aborting");
                encoder_task.abort();
            }
            let _ = hub.events.send(HubEvent::StreamClosed { fingerprint: fp });
        });

        StreamHandle {
            instance,
            mailbox: mail_tx,
            worker: worker_task,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::encoder::testing::{ScriptedAdapter, Step};

    const HEADER: &[u8] = b"#header#";

    fn test_config() -> HubConfig {
        HubConfig::default()
            .idle_grace(Duration::from_millis(100))
            .reaper_interval(Duration::from_millis(50))
    }

    fn hub_with(adapter: ScriptedAdapter) -> Arc<StreamHub<ScriptedAdapter>> {
        Arc::new(StreamHub::new(adapter, test_config()))
    }

    async fn attached_viewer(
        hub: &Arc<StreamHub<ScriptedAdapter>>,
        id: u64,
        url: &str,
    ) -> (SourceFingerprint, mpsc::Receiver<Bytes>) {
        let (session, rx) = ViewerSession::create(id, "cam", 64);
        let fp = hub.attach(url, session).await.unwrap();
        (fp, rx)
    }

    #[tokio::test]
    async fn test_viewers_share_one_adapter_pull() {
        let adapter = ScriptedAdapter::live(HEADER, &[b"#p1#"]);
        let hub = hub_with(adapter.clone());

        let (_, mut a) = attached_viewer(&hub, 1, "rtsp://cam.example/1").await;
        let (_, mut b) = attached_viewer(&hub, 2, "RTSP://CAM.EXAMPLE/1").await;

        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(HEADER));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(HEADER));
        assert_eq!(adapter.pulls(), 1);
        assert_eq!(hub.stream_count().await, 1);

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_first_attach_creates_one_stream() {
        let adapter = ScriptedAdapter::live(HEADER, &[]);
        let hub = hub_with(adapter.clone());

        let mut joins = Vec::new();
        for id in 0..8u64 {
            let hub = Arc::clone(&hub);
            joins.push(tokio::spawn(async move {
                let (session, rx) = ViewerSession::create(id, "cam", 64);
                hub.attach("rtsp://cam.example/race", session).await.unwrap();
                rx
            }));
        }
        let mut receivers = Vec::new();
        for join in joins {
            receivers.push(join.await.unwrap());
        }

        assert_eq!(adapter.pulls(), 1);
        assert_eq!(hub.stream_count().await, 1);
        for rx in &mut receivers {
            assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(HEADER));
        }

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_with_stale_instance_is_noop() {
        let adapter = ScriptedAdapter::live(HEADER, &[]);
        let hub = hub_with(adapter);

        let (fp, _rx) = attached_viewer(&hub, 1, "rtsp://cam.example/1").await;
        hub.release(&fp, 0xDEAD).await;
        assert_eq!(hub.stream_count().await, 1);

        hub.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_reaped_and_fresh_stream_created() {
        let adapter = ScriptedAdapter::live(HEADER, &[]);
        let hub = hub_with(adapter.clone());
        let reaper = hub.spawn_reaper();

        let (fp, mut rx) = attached_viewer(&hub, 1, "rtsp://cam.example/1").await;
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(HEADER));

        // Viewer leaves; the reaper should stop the encoder and clear the
        // registry after the grace window.
        drop(rx);
        hub.detach(&fp, 1).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(hub.stream_count().await, 0);
        assert_eq!(adapter.stops_seen(), 1);
        assert_eq!(adapter.finished(), 1);

        // A new viewer on the same fingerprint gets a fresh instance.
        let (_, mut rx2) = attached_viewer(&hub, 2, "rtsp://cam.example/1").await;
        assert_eq!(rx2.recv().await.unwrap(), Bytes::from_static(HEADER));
        assert_eq!(adapter.pulls(), 2);

        reaper.abort();
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_source_drains_viewers_and_registry() {
        let adapter = ScriptedAdapter::new(vec![Step::Fail]);
        let hub = hub_with(adapter.clone());

        let (session, mut rx) = ViewerSession::create(1, "cam", 64);
        // Attach may land before or after the failure; both are valid.
        let _ = hub.attach("rtsp://down.example/1", session).await;

        // The viewer's queue closes with zero bytes delivered.
        assert!(rx.recv().await.is_none());

        // Registry entry disappears once the worker wrapper releases it.
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.stream_count().await != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_mid_stream_failure_then_fresh_stream() {
        let adapter = ScriptedAdapter::new(vec![
            Step::Header(Bytes::from_static(HEADER)),
            Step::Payload(0, Bytes::from_static(b"#p1#")),
            Step::Fail,
        ]);
        let hub = hub_with(adapter.clone());

        let (_, mut rx) = attached_viewer(&hub, 1, "rtsp://flaky.example/1").await;
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(HEADER));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"#p1#"));
        assert!(rx.recv().await.is_none());

        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.stream_count().await != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Same fingerprint after the failure starts over with a new pull.
        let (_, mut rx2) = attached_viewer(&hub, 2, "rtsp://flaky.example/1").await;
        assert_eq!(rx2.recv().await.unwrap(), Bytes::from_static(HEADER));
        assert!(adapter.pulls() >= 2);

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_viewers() {
        let adapter = ScriptedAdapter::live(HEADER, &[]);
        let hub = hub_with(adapter.clone());

        let _viewer = attached_viewer(&hub, 1, "rtsp://cam.example/1").await;
        hub.shutdown().await;

        assert!(hub.is_shutting_down());
        assert_eq!(hub.stream_count().await, 0);
        assert_eq!(adapter.stops_seen(), 1);

        let (session, _rx) = ViewerSession::create(2, "cam", 64);
        let err = hub.attach("rtsp://cam.example/1", session).await.unwrap_err();
        assert!(matches!(err, HubError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_invalid_source_url() {
        let adapter = ScriptedAdapter::live(HEADER, &[]);
        let hub = hub_with(adapter);

        let (session, _rx) = ViewerSession::create(1, "cam", 64);
        let err = hub.attach("not a url", session).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidSource(_)));
        assert_eq!(hub.stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let adapter = ScriptedAdapter::live(HEADER, &[]);
        let hub = hub_with(adapter);
        let mut events = hub.subscribe_events();

        let (fp, _rx) = attached_viewer(&hub, 1, "rtsp://cam.example/1").await;

        match events.recv().await.unwrap() {
            HubEvent::StreamOpened { fingerprint, .. } => assert_eq!(fingerprint, fp),
            other => panic!("unexpected event: {:?}", other),
        }
        match events.recv().await.unwrap() {
            HubEvent::ViewerAttached {
                fingerprint,
                session_id,
            } => {
                assert_eq!(fingerprint, fp);
                assert_eq!(session_id, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        hub.shutdown().await;
    }
}
