use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use janus::cache::PreparedStatementCache;
use janus::config::{self, Config};
use janus::metrics;
use janus::proxy::ClientHandler;

/// Global connection counter for generating unique session IDs
static CONNECTION_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Graceful shutdown timeout (wait for connections to close)
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = Arc::new(load_or_default_config());

    info!(
        origin = %config.origin.addr(),
        target = %config.target.addr(),
        "Clusters configured"
    );

    // Prepared statement cache is shared by every client connection
    let cache = Arc::new(PreparedStatementCache::new(config.cache.max_entries));

    let addr = format!("{}:{}", config.server.listen_addr, config.server.listen_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Janus CQL proxy listening");

    // Start metrics server in background
    let metrics_addr = config.server.metrics_addr.clone();
    info!(metrics_addr = %metrics_addr, "Metrics server starting");
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(&metrics_addr).await {
            error!(error = %e, "Metrics server failed");
        }
    });

    // Shutdown fans out to every session through this token
    let shutdown = CancellationToken::new();

    // Track active sessions for graceful shutdown
    let mut sessions: JoinSet<()> = JoinSet::new();

    // Main accept loop with graceful shutdown support
    loop {
        tokio::select! {
            // Handle shutdown signals
            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping accept loop");
                shutdown.cancel();
                break;
            }

            // Accept new connections
            accept_result = listener.accept() => {
                let (stream, peer_addr) = match accept_result {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let session_id = CONNECTION_COUNTER.fetch_add(1, Ordering::SeqCst);
                let config = config.clone();
                let cache = cache.clone();
                let shutdown = shutdown.clone();

                info!(session_id, peer = %peer_addr, "New connection");
                metrics::metrics().record_connection_accepted();

                sessions.spawn(async move {
                    match ClientHandler::run(session_id, stream, &config, cache, &shutdown).await {
                        Ok(()) => info!(session_id, "Session ended"),
                        Err(e) => warn!(session_id, error = %e, "Session ended with error"),
                    }
                    metrics::metrics().record_connection_closed();
                });
            }
        }
    }

    // Graceful shutdown: the cancelled sessions tear themselves down; give
    // them a bounded window to flush and exit before aborting the rest
    if !sessions.is_empty() {
        info!(
            active_sessions = sessions.len(),
            timeout_secs = GRACEFUL_SHUTDOWN_TIMEOUT.as_secs(),
            "Draining active sessions"
        );

        let drain = async {
            while let Some(result) = sessions.join_next().await {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        error!(error = %e, "Session task panicked");
                    }
                }
            }
        };

        let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, drain).await;
        if drained.is_ok() {
            info!("All sessions completed gracefully");
        } else {
            warn!(
                remaining_sessions = sessions.len(),
                "Drain timed out, aborting remaining sessions"
            );
            sessions.shutdown().await;
        }
    }

    info!("Janus CQL proxy shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

fn load_or_default_config() -> Config {
    // Try to load from config file
    let config_paths = ["config/janus.toml", "janus.toml"];

    let mut config = None;
    for path in config_paths {
        match config::load_config(path) {
            Ok(loaded) => {
                info!(path, "Loaded configuration");
                config = Some(loaded);
                break;
            }
            Err(e) => {
                warn!(path, error = %e, "Failed to load config");
            }
        }
    }

    let mut config = config.unwrap_or_else(|| {
        info!("Using default configuration");
        Config::default()
    });

    // Environment wins over the file
    config::apply_env_overrides(&mut config);
    config
}
