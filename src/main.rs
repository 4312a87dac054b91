use anyhow::{Context, Result};
use fleetsync::api::{create_router, ApiState};
use fleetsync::config::{load_config, SyncConfig};
use fleetsync::dispatch::LogAlertSink;
use fleetsync::pipeline::SyncPipeline;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetsync=info".into()),
        )
        .init();

    info!("fleetsync starting...");

    let config_path = std::env::var("FLEETSYNC_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1));

    let config = match config_path {
        Some(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?.with_env()
        }
        None => {
            info!("No configuration file given, using defaults");
            SyncConfig::from_env()
        }
    };

    info!(
        transport = ?config.transport.kind,
        url = %config.transport.url,
        max_retries = config.reconnect.max_retries,
        api_enabled = config.api.enabled,
        "Configuration loaded"
    );

    let pipeline = SyncPipeline::start(&config, config.transport.dialer(), Arc::new(LogAlertSink));

    let server_handle = if config.api.enabled {
        let state = Arc::new(ApiState::new(
            pipeline.handle(),
            Duration::from_secs(config.api.status_interval_seconds),
        ));
        let router = create_router(state);
        let listener = tokio::net::TcpListener::bind(&config.api.bind)
            .await
            .with_context(|| format!("Failed to bind read API to {}", config.api.bind))?;
        info!(bind = %config.api.bind, "Read API listening");

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Read API server error");
            }
        }))
    } else {
        None
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    if let Some(handle) = server_handle {
        handle.abort();
    }
    pipeline.shutdown().await;
    info!("fleetsync stopped");

    Ok(())
}
