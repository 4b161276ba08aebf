use anyhow::{Context, Result};
use media_service::config::Config;
use media_service::{
    start_api_server, AppState, DynamoMetadataStore, InMemoryMetadataStore, InMemoryObjectStore,
    MetadataStore, ObjectStore, S3ObjectStore, StorageBackend,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        backend = ?config.storage.backend,
        "Starting media service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let (metadata, objects): (Arc<dyn MetadataStore>, Arc<dyn ObjectStore>) =
        match config.storage.backend {
            StorageBackend::Aws => (
                Arc::new(DynamoMetadataStore::new(&config.dynamodb).await),
                Arc::new(S3ObjectStore::new(&config.s3).await),
            ),
            StorageBackend::Memory => {
                warn!("Using in-memory storage, nothing will be persisted");
                (
                    Arc::new(InMemoryMetadataStore::new()),
                    Arc::new(InMemoryObjectStore::new()),
                )
            }
        };

    let state = AppState::new(
        metadata,
        objects,
        config.s3.bucket.clone(),
        config.presigned_url_expiry(),
        config.thumbnail.size,
    );

    start_api_server(state, &config.api, shutdown_signal())
        .await
        .context("API server failed")?;

    info!("Media service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down media service");
}
