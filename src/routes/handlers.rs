//! Request handlers for the gallery storage API

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use percent_encoding::percent_decode_str;
use prometheus::{Encoder, TextEncoder};
use std::str::FromStr;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::access::{authorize_view, can_view};
use crate::errors::{Result, StorageError};
use crate::gallery::aggregate::{build_tree, public_only, recursive_photo_count, reorder_albums};
use crate::manager::MAX_TREE_DEPTH;
use crate::routes::{
    principal_from_headers, require_admin, AlbumTreeQuery, AppState, ProviderTreeQuery,
    ReorderRequest, UpsertProviderRequest,
};
use crate::store::{ProviderId, ProviderRecord};

/// Health check endpoint
#[instrument]
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness probe endpoint
#[instrument]
pub async fn ready() -> impl IntoResponse {
    (StatusCode::OK, "Ready")
}

/// Prometheus metrics endpoint
#[instrument]
pub async fn metrics() -> impl IntoResponse {
    use crate::metrics::REGISTRY;
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

fn file_response(path: &str, data: bytes::Bytes) -> Result<Response> {
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .header("content-length", data.len())
        .body(Body::from(data))
        .map_err(|e| StorageError::Internal(format!("Failed to build response: {}", e)))
}

/// Decode percent-encoded path segments before any resolution, so
/// encoded traversal attempts meet the same sandbox checks as plain
/// ones.
fn decode_path(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| StorageError::AccessDenied)
}

/// Serve a file from the local provider's sandbox - GET /media/local/*path
#[instrument(skip(state))]
pub async fn serve_local_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response> {
    let decoded = decode_path(&path)?;
    let data = state
        .manager
        .get_file_buffer(&decoded, ProviderId::Local)
        .await?;
    file_response(&decoded, data)
}

/// Proxy a private drive file - GET /media/drive/*path
///
/// Unlike local media this path is access-gated: the file is looked up
/// as a photo record and the owning album's visibility decides.
#[instrument(skip(state, headers))]
pub async fn serve_drive_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let principal = principal_from_headers(&headers)?;
    let decoded = decode_path(&path)?;

    let photo = state
        .gallery
        .find_photo_by_storage(ProviderId::Drive, &decoded)
        .await
        .ok_or_else(|| StorageError::NotFound {
            path: decoded.clone(),
        })?;
    let album = state
        .gallery
        .album(photo.album_id)
        .await
        .ok_or(StorageError::AccessDenied)?;
    authorize_view(album.id, &album.visibility(), principal.as_ref())?;

    let data = state
        .manager
        .get_file_buffer(&decoded, ProviderId::Drive)
        .await?;
    file_response(&decoded, data)
}

/// Access-checked photo read - GET /api/photos/:id/file
#[instrument(skip(state, headers))]
pub async fn photo_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response> {
    let principal = principal_from_headers(&headers)?;

    let photo = state
        .gallery
        .photo(id)
        .await
        .ok_or_else(|| StorageError::NotFound {
            path: format!("photo {}", id),
        })?;
    let album = state
        .gallery
        .album(photo.album_id)
        .await
        .ok_or(StorageError::AccessDenied)?;
    authorize_view(album.id, &album.visibility(), principal.as_ref())?;

    let data = state
        .manager
        .get_file_buffer(&photo.storage.path, photo.storage.provider)
        .await?;
    file_response(&photo.storage.path, data)
}

/// Access-checked public URL resolution - GET /api/photos/:id/url
#[instrument(skip(state, headers))]
pub async fn photo_url(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let principal = principal_from_headers(&headers)?;

    let photo = state
        .gallery
        .photo(id)
        .await
        .ok_or_else(|| StorageError::NotFound {
            path: format!("photo {}", id),
        })?;
    let album = state
        .gallery
        .album(photo.album_id)
        .await
        .ok_or(StorageError::AccessDenied)?;
    authorize_view(album.id, &album.visibility(), principal.as_ref())?;

    let url = state
        .manager
        .get_photo_url(&photo.storage.path, photo.storage.provider)
        .await?;
    Ok(Json(serde_json::json!({ "url": url })))
}

/// Upload an original through a provider - PUT /api/uploads/:provider/*path
///
/// Requires a signed-in owner or admin; owners can additionally be
/// restricted to specific providers.
#[instrument(skip(state, headers, body))]
pub async fn upload_file(
    State(state): State<AppState>,
    Path((provider, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Result<Json<crate::providers::StoredRef>> {
    let principal =
        principal_from_headers(&headers)?.ok_or(StorageError::AccessDenied)?;
    if principal.role == crate::access::Role::Guest {
        return Err(StorageError::AccessDenied);
    }

    let provider_id = ProviderId::from_str(&provider)?;
    if !principal.may_upload_via(provider_id) {
        return Err(StorageError::AccessDenied);
    }

    let decoded = decode_path(&path)?;
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let stored = state
        .manager
        .upload_buffer(body, &decoded, provider_id, &content_type)
        .await?;
    Ok(Json(stored))
}

/// Album tree for listing UIs - GET /api/albums/tree
#[instrument(skip(state, headers))]
pub async fn album_tree(
    State(state): State<AppState>,
    Query(query): Query<AlbumTreeQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let principal = principal_from_headers(&headers)?;
    let albums = state.gallery.all_albums().await;

    let visible = match principal.as_ref() {
        // Anonymous callers always get the public-only tree.
        None => public_only(albums),
        Some(_) if query.public_only => public_only(albums),
        Some(p) => albums
            .into_iter()
            .filter(|a| can_view(&a.visibility(), Some(p)))
            .collect(),
    };

    let tree = build_tree(visible);
    Ok(Json(serde_json::json!({ "albums": tree })))
}

/// Recursive published-photo count - GET /api/albums/:id/count
#[instrument(skip(state, headers))]
pub async fn album_count(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let principal = principal_from_headers(&headers)?;

    let album = state
        .gallery
        .album(id)
        .await
        .ok_or_else(|| StorageError::NotFound {
            path: format!("album {}", id),
        })?;
    authorize_view(album.id, &album.visibility(), principal.as_ref())?;

    let count = recursive_photo_count(&state.gallery, id).await?;
    Ok(Json(serde_json::json!({
        "albumId": id,
        "photoCount": count,
    })))
}

/// Bulk sibling-order batch - PUT /api/albums/reorder
#[instrument(skip(state, headers, request))]
pub async fn reorder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReorderRequest>,
) -> Result<Json<serde_json::Value>> {
    require_admin(&headers)?;

    info!(updates = request.updates.len(), "Album reorder batch");
    let outcome = reorder_albums(&state.gallery, request.updates).await;
    Ok(Json(serde_json::to_value(outcome)?))
}

/// List provider records - GET /api/admin/providers
#[instrument(skip(state, headers))]
pub async fn list_providers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProviderRecord>>> {
    require_admin(&headers)?;
    Ok(Json(state.config_store.list()))
}

/// Create or update a provider record - PUT /api/admin/providers/:id
#[instrument(skip(state, headers, request))]
pub async fn upsert_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UpsertProviderRequest>,
) -> Result<Json<ProviderRecord>> {
    require_admin(&headers)?;

    let provider_id = ProviderId::from_str(&id)?;
    if request.settings.provider_id() != provider_id {
        return Err(StorageError::Configuration(format!(
            "Settings variant does not match provider id {}",
            provider_id
        )));
    }

    let record = state.config_store.upsert(ProviderRecord::new(
        request.name,
        request.is_enabled,
        request.settings,
    ))?;
    // The next call through the manager rebuilds from the new record.
    state.manager.invalidate(provider_id).await;

    info!(provider = %provider_id, "Provider configuration updated");
    Ok(Json(record))
}

/// Admin connection test - POST /api/admin/providers/:id/test
///
/// Unlike the serving path, the normalized error message is returned
/// verbatim; this surface is admin-only.
#[instrument(skip(state, headers))]
pub async fn test_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    require_admin(&headers)?;

    let provider_id = ProviderId::from_str(&id)?;
    match state.manager.validate_provider(provider_id).await {
        Ok(()) => Ok(Json(serde_json::json!({ "success": true }))),
        Err(err) => Ok(Json(serde_json::json!({
            "success": false,
            "error": err.to_string(),
        }))),
    }
}

/// Browse a provider's folder structure - GET /api/admin/providers/:id/tree
#[instrument(skip(state, headers))]
pub async fn provider_tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ProviderTreeQuery>,
    headers: HeaderMap,
) -> Result<Json<crate::providers::FileNode>> {
    require_admin(&headers)?;

    let provider_id = ProviderId::from_str(&id)?;
    let path = query.path.unwrap_or_default();
    let depth = query.max_depth.unwrap_or(MAX_TREE_DEPTH);
    let tree = state.manager.provider_tree(provider_id, &path, depth).await?;
    Ok(Json(tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialMonitor;
    use crate::gallery::testutil::{album, photo};
    use crate::gallery::{GallerySnapshot, GalleryStore};
    use crate::manager::StorageManager;
    use crate::routes::{create_router, AppState, PRINCIPAL_HEADER};
    use crate::store::{ConfigStore, ProviderSettings};
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        _dir: tempfile::TempDir,
        router: axum::Router,
        root_album: crate::gallery::Album,
        public_photo: crate::gallery::Photo,
        private_photo: crate::gallery::Photo,
    }

    async fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let config_store =
            Arc::new(ConfigStore::open(dir.path().join("providers.json")).unwrap());
        config_store
            .upsert(crate::store::ProviderRecord::new(
                "Local disk",
                true,
                ProviderSettings::Local {
                    base_path: dir.path().join("data"),
                },
            ))
            .unwrap();

        let manager = Arc::new(StorageManager::new(
            config_store.clone(),
            Arc::new(CredentialMonitor::new()),
        ));

        let root_album = album("Holidays", None, 0, true);
        let private_album = album("Secret", None, 1, false);
        let public_photo = photo(&root_album, "beach.jpg", true);
        let private_photo = photo(&private_album, "hidden.jpg", true);

        // Materialize the public photo's bytes in the sandbox.
        manager
            .upload_buffer(
                bytes::Bytes::from_static(b"beach bytes"),
                &public_photo.storage.path,
                ProviderId::Local,
                "image/jpeg",
            )
            .await
            .unwrap();

        let gallery = Arc::new(GalleryStore::from_snapshot(GallerySnapshot {
            albums: vec![root_album.clone(), private_album],
            photos: vec![public_photo.clone(), private_photo.clone()],
            groups: vec![],
        }));

        let router = create_router(AppState {
            manager,
            gallery,
            config_store,
        });

        TestApp {
            _dir: dir,
            router,
            root_album,
            public_photo,
            private_photo,
        }
    }

    fn admin_header() -> String {
        serde_json::to_string(&crate::access::Principal {
            id: uuid::Uuid::new_v4(),
            role: crate::access::Role::Admin,
            group_aliases: Default::default(),
            allowed_storage_providers: Default::default(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_public_photo_file_served_anonymously() {
        let app = test_app().await;
        let uri = format!("/api/photos/{}/file", app.public_photo.id);
        let response = app
            .router
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"beach bytes");
    }

    #[tokio::test]
    async fn test_private_photo_denied_anonymously() {
        let app = test_app().await;
        let uri = format!("/api/photos/{}/file", app.private_photo.id);
        let response = app
            .router
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_private_photo_served_to_admin() {
        let app = test_app().await;
        let uri = format!("/api/photos/{}/file", app.private_photo.id);
        let response = app
            .router
            .oneshot(
                Request::get(uri.as_str())
                    .header(PRINCIPAL_HEADER, admin_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // The admin passes the access gate; the bytes themselves were
        // never uploaded, so the provider reports absence.
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_local_media_traversal_denied() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(
                Request::get("/media/local/..%2F..%2Fetc%2Fpasswd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_local_media_round_trip() {
        let app = test_app().await;
        let uri = format!("/media/local/{}", app.public_photo.storage.path);
        let response = app
            .router
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "image/jpeg"
        );
    }

    #[tokio::test]
    async fn test_album_tree_anonymous_is_public_only() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(Request::get("/api/albums/tree").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let albums = json["albums"].as_array().unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0]["name"], "Holidays");
    }

    #[tokio::test]
    async fn test_album_count_endpoint() {
        let app = test_app().await;
        let uri = format!("/api/albums/{}/count", app.root_album.id);
        let response = app
            .router
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["photoCount"], 1);
    }

    #[tokio::test]
    async fn test_upload_requires_signed_in_non_guest() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(
                Request::put("/api/uploads/local/new/photo.jpg")
                    .body(Body::from("bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_upload_respects_provider_restriction() {
        let app = test_app().await;
        let mut owner = crate::access::Principal {
            id: uuid::Uuid::new_v4(),
            role: crate::access::Role::Owner,
            group_aliases: Default::default(),
            allowed_storage_providers: Default::default(),
        };
        owner
            .allowed_storage_providers
            .insert(crate::store::ProviderId::S3);

        let response = app
            .router
            .oneshot(
                Request::put("/api/uploads/local/new/photo.jpg")
                    .header(PRINCIPAL_HEADER, serde_json::to_string(&owner).unwrap())
                    .body(Body::from("bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_upload_round_trip_via_media() {
        let app = test_app().await;
        let response = app
            .router
            .clone()
            .oneshot(
                Request::put("/api/uploads/local/new/photo.jpg")
                    .header(PRINCIPAL_HEADER, admin_header())
                    .header("content-type", "image/jpeg")
                    .body(Body::from("fresh bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let stored: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stored["public_url"], "/media/local/new/photo.jpg");

        let response = app
            .router
            .oneshot(
                Request::get("/media/local/new/photo.jpg")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"fresh bytes");
    }

    #[tokio::test]
    async fn test_admin_surface_requires_admin() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(
                Request::get("/api/admin/providers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_test_connection_reports_success() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(
                Request::post("/api/admin/providers/local/test")
                    .header(PRINCIPAL_HEADER, admin_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn test_admin_tree_browse() {
        let app = test_app().await;
        let response = app
            .router
            .oneshot(
                Request::get("/api/admin/providers/local/tree?max_depth=3")
                    .header(PRINCIPAL_HEADER, admin_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["isFile"], false);
    }
}
