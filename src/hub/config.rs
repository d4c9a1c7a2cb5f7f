//! Hub configuration

use std::time::Duration;

/// Configuration for stream lifecycle management
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a stream may sit without viewers before the reaper takes it
    pub idle_grace: Duration,

    /// How often the reaper probes streams for idleness
    pub reaper_interval: Duration,

    /// Per-viewer outbound queue bound, in chunks
    pub session_queue_capacity: usize,

    /// Consecutive dropped chunks before a viewer is closed as a slow
    /// consumer
    pub drop_threshold: u32,

    /// Stream mailbox bound (attach/detach/control events)
    pub mailbox_capacity: usize,

    /// Encoder-to-worker chunk channel bound
    pub media_queue_capacity: usize,

    /// How long to wait for a cancelled encoder before abandoning it
    pub encoder_stop_budget: Duration,

    /// Global budget for draining all streams at shutdown
    pub shutdown_budget: Duration,

    /// How many times an attach is retried against a fresh stream when it
    /// races a teardown
    pub attach_retries: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            idle_grace: Duration::from_secs(10),
            reaper_interval: Duration::from_secs(10),
            session_queue_capacity: 64,
            drop_threshold: 50,
            mailbox_capacity: 32,
            media_queue_capacity: 64,
            encoder_stop_budget: Duration::from_secs(5),
            shutdown_budget: Duration::from_secs(30),
            attach_retries: 3,
        }
    }
}

impl HubConfig {
    /// Set the idle grace window
    pub fn idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }

    /// Set the reaper probe interval
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Set the per-viewer queue bound
    pub fn session_queue_capacity(mut self, chunks: usize) -> Self {
        self.session_queue_capacity = chunks.max(1);
        self
    }

    /// Set the slow-consumer drop threshold
    pub fn drop_threshold(mut self, drops: u32) -> Self {
        self.drop_threshold = drops;
        self
    }

    /// Set the shutdown budget
    pub fn shutdown_budget(mut self, budget: Duration) -> Self {
        self.shutdown_budget = budget;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();

        assert_eq!(config.idle_grace, Duration::from_secs(10));
        assert_eq!(config.reaper_interval, Duration::from_secs(10));
        assert_eq!(config.session_queue_capacity, 64);
        assert_eq!(config.drop_threshold, 50);
        assert_eq!(config.encoder_stop_budget, Duration::from_secs(5));
        assert_eq!(config.shutdown_budget, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_chaining() {
        let config = HubConfig::default()
            .idle_grace(Duration::from_secs(30))
            .reaper_interval(Duration::from_secs(5))
            .session_queue_capacity(128)
            .drop_threshold(10);

        assert_eq!(config.idle_grace, Duration::from_secs(30));
        assert_eq!(config.reaper_interval, Duration::from_secs(5));
        assert_eq!(config.session_queue_capacity, 128);
        assert_eq!(config.drop_threshold, 10);
    }

    #[test]
    fn test_queue_capacity_floor() {
        let config = HubConfig::default().session_queue_capacity(0);
        assert_eq!(config.session_queue_capacity, 1);
    }
}
