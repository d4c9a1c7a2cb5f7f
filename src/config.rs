//! Relay configuration

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::encoder::AdapterConfig;
use crate::hub::HubConfig;

/// Default viewer endpoint port
const DEFAULT_PORT: u16 = 8888;

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the viewer endpoint binds to
    pub bind_addr: SocketAddr,

    /// Runtime worker threads (0 = runtime default)
    pub worker_threads: usize,

    /// Maximum concurrent viewer connections (0 = unlimited)
    pub max_connections: usize,

    /// Upper bound on a request head, in bytes
    pub max_frame_size: usize,

    /// A viewer must deliver its request within this window
    pub connection_timeout: Duration,

    /// Enable TCP_NODELAY on viewer sockets
    pub tcp_nodelay: bool,

    /// Stream lifecycle configuration
    pub hub: HubConfig,

    /// Upstream pull/encode configuration
    pub adapter: AdapterConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            worker_threads: 0,
            max_connections: 0,
            max_frame_size: 64 * 1024,
            connection_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // latency matters more than throughput here
            hub: HubConfig::default(),
            adapter: AdapterConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Create a config with a custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the viewer connection cap
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the request timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Replace the hub configuration
    pub fn hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    /// Replace the adapter configuration
    pub fn adapter(mut self, adapter: AdapterConfig) -> Self {
        self.adapter = adapter;
        self
    }

    /// Load configuration from the environment, falling back to defaults.
    ///
    /// `RELAY_PORT` wins over the legacy `NETTY_PORT`; unparsable values are
    /// logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) =
            env_parse::<u16>("RELAY_PORT").or_else(|| env_parse::<u16>("NETTY_PORT"))
        {
            config.bind_addr.set_port(port);
        }
        if let Some(threads) = env_parse("RELAY_WORKER_THREADS") {
            config.worker_threads = threads;
        }
        if let Some(max) = env_parse("RELAY_MAX_CONNECTIONS") {
            config.max_connections = max;
        }
        if let Some(size) = env_parse("RELAY_MAX_FRAME_SIZE") {
            config.max_frame_size = size;
        }

        if let Some(secs) = env_parse("RELAY_IDLE_GRACE_SECONDS") {
            config.hub.idle_grace = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_parse::<usize>("RELAY_SESSION_QUEUE_CAPACITY") {
            config.hub = config.hub.session_queue_capacity(capacity);
        }

        if let Some(ms) = env_parse("RELAY_ADAPTER_CONNECT_TIMEOUT_MS") {
            config.adapter.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("RELAY_ADAPTER_READ_TIMEOUT_MS") {
            config.adapter.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("RELAY_ADAPTER_ANALYZE_TIMEOUT_MS") {
            config.adapter.analyze_timeout = Duration::from_millis(ms);
        }
        if let Some(fps) = env_parse("RELAY_ADAPTER_TARGET_FPS") {
            config.adapter.target_fps = fps;
        }
        if let Some(frames) = env_parse("RELAY_ADAPTER_GOP_SIZE") {
            config.adapter.gop_size = frames;
        }

        config
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.max_frame_size, 64 * 1024);
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = RelayConfig::with_addr(addr);

        assert_eq!(config.bind_addr, addr);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        let config = RelayConfig::default()
            .bind(addr)
            .max_connections(500)
            .connection_timeout(Duration::from_secs(5));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 500);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("RELAY_PORT", "9999");
        std::env::set_var("RELAY_MAX_CONNECTIONS", "250");
        std::env::set_var("RELAY_IDLE_GRACE_SECONDS", "20");
        std::env::set_var("RELAY_SESSION_QUEUE_CAPACITY", "128");
        std::env::set_var("RELAY_ADAPTER_CONNECT_TIMEOUT_MS", "2500");
        std::env::set_var("RELAY_ADAPTER_TARGET_FPS", "30");
        std::env::set_var("RELAY_WORKER_THREADS", "not-a-number");

        let config = RelayConfig::from_env();

        assert_eq!(config.bind_addr.port(), 9999);
        assert_eq!(config.max_connections, 250);
        assert_eq!(config.hub.idle_grace, Duration::from_secs(20));
        assert_eq!(config.hub.session_queue_capacity, 128);
        assert_eq!(config.adapter.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.adapter.target_fps, 30);
        // Bad value falls back to the default.
        assert_eq!(config.worker_threads, 0);

        for key in [
            "RELAY_PORT",
            "RELAY_MAX_CONNECTIONS",
            "RELAY_IDLE_GRACE_SECONDS",
            "RELAY_SESSION_QUEUE_CAPACITY",
            "RELAY_ADAPTER_CONNECT_TIMEOUT_MS",
            "RELAY_ADAPTER_TARGET_FPS",
            "RELAY_WORKER_THREADS",
        ] {
            std::env::remove_var(key);
        }
    }
}
