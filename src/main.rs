use shimgate::config::Config;
use shimgate::proxy::ProxyServer;
use shimgate::supervisor::Supervisor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shimgate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the backend before the proxy ever binds; a spawn failure aborts
    // the whole service with a non-zero exit.
    let supervisor = Arc::new(Supervisor::new(config.backend.clone()));
    supervisor.start().map_err(|e| {
        error!(error = %e, "Failed to start backend process");
        anyhow::Error::from(e)
    })?;

    // Fixed warm-up interval before accepting external traffic
    let warmup = config.backend.warmup();
    info!(warmup_secs = warmup.as_secs(), "Waiting for backend warm-up");
    tokio::time::sleep(warmup).await;

    // Create the proxy server
    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.listen_port())
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let proxy = ProxyServer::new(bind_addr, &config.backend, shutdown_rx.clone());
    let proxy_handle = tokio::spawn(async move {
        if let Err(e) = proxy.run().await {
            error!(error = %e, "Proxy server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and stop the backend before exiting
    let _ = shutdown_tx.send(true);

    info!("Stopping backend process...");
    supervisor.stop().await;

    // Wait for the proxy to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), proxy_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting supervisor and proxy"
    );
    info!(
        bind = %config.server.bind,
        port = config.server.listen_port(),
        "Listener configuration"
    );
    info!(
        command = %config.backend.command,
        args = ?config.backend.args,
        working_dir = ?config.backend.working_dir,
        backend_port = config.backend.port,
        mode = %config.backend.mode,
        "Backend configuration"
    );
    info!(
        warmup_secs = config.backend.warmup_secs,
        request_timeout_secs = config.backend.request_timeout_secs,
        health_timeout_secs = config.backend.health_timeout_secs,
        shutdown_grace_period_secs = config.backend.shutdown_grace_period_secs,
        health_path = %config.backend.health_path,
        "Timing and health settings"
    );
}
