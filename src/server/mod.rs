//! HTTP server implementation
//!
//! Sets up the Axum HTTP server with:
//! - Gallery API and media routes
//! - Middleware (logging, timeout, compression)
//! - Graceful shutdown
//! - Health/readiness probes

use axum::Router;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::config::Config;
use crate::routes::{self, AppState};

/// HTTP server for GalleryStore
pub struct Server {
    config: Config,
    state: AppState,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the Axum router with all middleware
    fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(std::time::Duration::from_secs(
                    self.config.server.timeout_secs,
                )))
                .layer(CompressionLayer::new())
                .into_inner(),
        )
    }

    /// Start the server and run until shutdown signal
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.build_router();

        let listener = tokio::net::TcpListener::bind(self.config.server.bind_address).await?;
        info!(address = %self.config.server.bind_address, "Server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
