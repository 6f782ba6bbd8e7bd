//! GalleryStore - storage abstraction and access-control core for a
//! self-hosted photo gallery platform
//!
//! Presents one uniform interface over heterogeneous backing stores
//! (local filesystem, OAuth2 drive, S3-compatible object stores) and
//! gates every asset read behind the hierarchical access-control rules
//! of the album tree.

mod access;
mod config;
mod credentials;
mod errors;
mod gallery;
mod manager;
mod metrics;
mod providers;
mod routes;
mod server;
mod store;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::credentials::CredentialMonitor;
use crate::gallery::GalleryStore;
use crate::manager::StorageManager;
use crate::routes::AppState;
use crate::server::Server;
use crate::store::ConfigStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with JSON output for structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Initialize Prometheus metrics
    crate::metrics::init_metrics();

    info!("Starting GalleryStore");

    // Load configuration from environment and optional config file
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    info!(?config, "Configuration loaded");

    // Open the provider configuration store and the content snapshot
    let config_store = Arc::new(
        ConfigStore::open(&config.paths.provider_store).context("opening provider store")?,
    );
    let gallery = Arc::new(
        GalleryStore::load(&config.paths.gallery_snapshot).context("loading gallery snapshot")?,
    );

    // Wire the storage manager and credential lifecycle tracking
    let credentials = Arc::new(CredentialMonitor::new());
    let manager = Arc::new(StorageManager::new(config_store.clone(), credentials.clone()));

    // Surface credential renewal notices in the log; the notification
    // collaborator (email, UI banner) subscribes the same way.
    let mut notices = credentials.subscribe();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            warn!(
                provider = %notice.provider,
                message = %notice.message,
                "Provider needs re-authorization"
            );
        }
    });

    // Create and start the HTTP server
    let server = Server::new(
        config.clone(),
        AppState {
            manager,
            gallery,
            config_store,
        },
    );

    // Handle graceful shutdown
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal");
    };

    info!("Server starting on {}", config.server.bind_address);
    if let Err(e) = server.start(shutdown_signal).await {
        error!(error = %e, "Server error");
        return Err(anyhow::anyhow!(e.to_string()));
    }

    info!("Server shutdown complete");
    Ok(())
}
