//! HiveDB Server - HTTP API for the multi-tenant storage layer

mod api;

use hivedb_core::storage::{StorageConfig, StorageEngine};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Storage root directory
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8090".parse().unwrap(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl ServerConfig {
    /// Defaults overridable through HIVEDB_ADDR / HIVEDB_DATA_DIR.
    fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("HIVEDB_ADDR") {
            config.http_addr = addr.parse()?;
        }
        if let Ok(dir) = std::env::var("HIVEDB_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;

    info!("Starting HiveDB server...");
    info!("Data directory: {:?}", config.data_dir);
    info!("HTTP server: http://{}", config.http_addr);

    // Initialize storage engine
    let storage_config = StorageConfig {
        data_dir: config.data_dir.clone(),
        ..Default::default()
    };
    let engine = Arc::new(StorageEngine::new(storage_config)?);

    // Create router
    let app = api::create_router(engine.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("HiveDB server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Drain queues and release store files before exiting.
    engine.shutdown();

    Ok(())
}
