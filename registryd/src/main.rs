mod announcer;
mod api;
mod config;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::announcer::Announcer;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("registryd=info")),
        )
        .init();

    tracing::info!("Starting registryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/registryd/registryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Bind the API listener before anything else: a beacon must never
    // advertise a port that is not yet accepting connections.
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    let api_port = listener
        .local_addr()
        .context("Failed to read API listen address")?
        .port();

    tracing::info!("API listening on {}", config.api.listen);

    // Start announcing now that the port is live
    let mut announcer = Announcer::new(
        config.discovery.target(),
        config.discovery.interval(),
        api_port,
    );
    if config.discovery.enabled {
        announcer
            .start()
            .await
            .context("Failed to start discovery announcer")?;
    } else {
        tracing::info!("Discovery announcements disabled by config");
    }

    // Build API router
    let state = api::routes::AppState {
        api_port,
        started_at: Utc::now(),
    };
    let app = api::routes::router(state);

    // Run server with graceful shutdown
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await?;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    let _ = server_handle.await;

    // Release the discovery socket deterministically rather than leaving
    // it to OS cleanup.
    announcer.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on interrupt or, on unix, a terminate request.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
            }
            _ = terminate.recv() => {}
        }

        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")
    }
}
