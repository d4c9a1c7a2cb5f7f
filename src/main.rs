//! Relay binary: configuration from the environment, logging, signal
//! handling, and the server loop.

use flv_relay::{FfmpegAdapter, RelayConfig, RelayServer};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from_env();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if config.worker_threads > 0 {
        builder.worker_threads(config.worker_threads);
    }
    let runtime = match builder.enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to build runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async move {
        let adapter = FfmpegAdapter::new(config.adapter.clone());
        let server = RelayServer::new(config, adapter);
        tracing::info!(addr = %server.bind_addr(), "starting relay");

        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        if let Err(e) = server.run_until(shutdown).await {
            tracing::error!(error = %e, "relay terminated with error");
            std::process::exit(1);
        }
    });
}
