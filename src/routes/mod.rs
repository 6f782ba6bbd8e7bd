//! HTTP route handlers for the gallery storage core
//!
//! Implements the surface consumed by the out-of-scope page and admin
//! UIs:
//! - GET /media/local/*path - sandboxed local file streaming
//! - GET /media/drive/*path - gated proxy for private drive files
//! - GET /api/photos/:id/file - access-checked photo read
//! - GET /api/photos/:id/url - access-checked public URL resolution
//! - GET /api/albums/tree - album tree for listing UIs
//! - GET /api/albums/:id/count - recursive published-photo count
//! - PUT /api/albums/reorder - bulk sibling-order batch
//! - /api/admin/providers... - provider config CRUD, test, tree browse

mod handlers;

use axum::http::HeaderMap;
use axum::{
    routing::{get, put},
    Router,
};
use std::sync::Arc;

use crate::access::Principal;
use crate::errors::{Result, StorageError};
use crate::gallery::GalleryStore;
use crate::manager::StorageManager;
use crate::store::ConfigStore;

pub use handlers::{
    album_count, album_tree, health, list_providers, metrics, photo_file, photo_url,
    provider_tree, ready, reorder, serve_drive_media, serve_local_media, test_provider,
    upload_file, upsert_provider,
};

/// Header carrying the pre-authenticated principal, set by the upstream
/// auth layer. Session issuance itself is out of scope.
pub const PRINCIPAL_HEADER: &str = "x-gallery-user";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<StorageManager>,
    pub gallery: Arc<GalleryStore>,
    pub config_store: Arc<ConfigStore>,
}

/// Extract the acting principal, if any, from the request headers.
///
/// A missing header is an anonymous request; a malformed one is a
/// client error, not anonymity, so a broken auth layer cannot silently
/// downgrade everyone to public access.
pub fn principal_from_headers(headers: &HeaderMap) -> Result<Option<Principal>> {
    let Some(value) = headers.get(PRINCIPAL_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| StorageError::Configuration("Invalid principal header".to_string()))?;
    let principal: Principal = serde_json::from_str(raw)
        .map_err(|_| StorageError::Configuration("Invalid principal header".to_string()))?;
    Ok(Some(principal))
}

/// Require an administrator principal for the admin surface.
pub fn require_admin(headers: &HeaderMap) -> Result<Principal> {
    match principal_from_headers(headers)? {
        Some(p) if p.is_admin() => Ok(p),
        _ => Err(StorageError::AccessDenied),
    }
}

/// Query parameters for the album tree
#[derive(Debug, serde::Deserialize)]
pub struct AlbumTreeQuery {
    #[serde(default)]
    pub public_only: bool,
}

/// Query parameters for provider tree browsing
#[derive(Debug, serde::Deserialize)]
pub struct ProviderTreeQuery {
    pub path: Option<String>,
    pub max_depth: Option<usize>,
}

/// Body of a bulk reorder request
#[derive(Debug, serde::Deserialize)]
pub struct ReorderRequest {
    pub updates: Vec<crate::gallery::aggregate::OrderUpdate>,
}

/// Body of a provider upsert
#[derive(Debug, serde::Deserialize)]
pub struct UpsertProviderRequest {
    pub name: String,
    pub is_enabled: bool,
    pub settings: crate::store::ProviderSettings,
}

/// Create the router for the full HTTP surface
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .route("/media/local/*path", get(handlers::serve_local_media))
        .route("/media/drive/*path", get(handlers::serve_drive_media))
        .route("/api/uploads/:provider/*path", put(handlers::upload_file))
        .route("/api/photos/:id/file", get(handlers::photo_file))
        .route("/api/photos/:id/url", get(handlers::photo_url))
        .route("/api/albums/tree", get(handlers::album_tree))
        .route("/api/albums/:id/count", get(handlers::album_count))
        .route("/api/albums/reorder", put(handlers::reorder))
        .route(
            "/api/admin/providers",
            get(handlers::list_providers),
        )
        .route(
            "/api/admin/providers/:id",
            put(handlers::upsert_provider),
        )
        .route(
            "/api/admin/providers/:id/test",
            axum::routing::post(handlers::test_provider),
        )
        .route(
            "/api/admin/providers/:id/tree",
            get(handlers::provider_tree),
        )
        .with_state(state)
}
