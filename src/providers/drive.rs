//! OAuth2 drive storage provider (Google Drive v3 API)
//!
//! Authenticates with a stored refresh token: an access token is minted
//! at the OAuth2 token endpoint on demand and cached until shortly
//! before expiry. There is no automatic re-authorization; when the
//! refresh token itself is rejected the failure surfaces as an
//! authentication error and the credential lifecycle manager takes over.
//!
//! Gallery paths are resolved segment by segment to Drive file ids under
//! the configured root folder. Folders are created as needed on upload.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::errors::{Result, StorageError};
use crate::providers::{normalize_object_path, FileNode, StorageProvider, StoredRef};
use crate::store::{DriveStorageMode, ProviderId};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const MULTIPART_BOUNDARY: &str = "gallerystore_upload_boundary";

/// Refresh the access token this long before its reported expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Base URLs for the three Drive API surfaces; overridable in tests
#[derive(Debug, Clone)]
pub struct DriveEndpoints {
    pub api: String,
    pub upload: String,
    pub token: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            api: "https://www.googleapis.com".to_string(),
            upload: "https://www.googleapis.com".to_string(),
            token: "https://oauth2.googleapis.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

impl DriveFile {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl std::fmt::Debug for DriveProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveProvider")
            .field("root_folder_id", &self.root_folder_id)
            .field("storage_mode", &self.storage_mode)
            .finish()
    }
}

/// OAuth2 drive backend
pub struct DriveProvider {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    root_folder_id: String,
    storage_mode: DriveStorageMode,
    endpoints: DriveEndpoints,
    token: Mutex<Option<CachedToken>>,
}

impl DriveProvider {
    pub fn new(
        client_id: String,
        client_secret: String,
        refresh_token: String,
        root_folder_id: String,
        storage_mode: DriveStorageMode,
    ) -> Self {
        Self::with_endpoints(
            client_id,
            client_secret,
            refresh_token,
            root_folder_id,
            storage_mode,
            DriveEndpoints::default(),
        )
    }

    /// Construct against non-default API endpoints; tests point this at a
    /// mock server.
    pub fn with_endpoints(
        client_id: String,
        client_secret: String,
        refresh_token: String,
        root_folder_id: String,
        storage_mode: DriveStorageMode,
        endpoints: DriveEndpoints,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            client_id,
            client_secret,
            refresh_token,
            root_folder_id,
            storage_mode,
            endpoints,
            token: Mutex::new(None),
        }
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.endpoints.api)
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/drive/v3/files/{}", self.endpoints.api, id)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/drive/v3/files", self.endpoints.upload)
    }

    fn upload_file_url(&self, id: &str) -> String {
        format!("{}/upload/drive/v3/files/{}", self.endpoints.upload, id)
    }

    fn token_url(&self) -> String {
        format!("{}/token", self.endpoints.token)
    }

    fn transport_error(err: reqwest::Error) -> StorageError {
        if err.is_timeout() || err.is_connect() {
            StorageError::Transient(err.to_string())
        } else {
            StorageError::Internal(err.to_string())
        }
    }

    /// Mint or reuse an access token for the stored refresh token.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .post(self.token_url())
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: OAuthErrorResponse =
                serde_json::from_str(&body).unwrap_or(OAuthErrorResponse {
                    error: None,
                    error_description: None,
                });
            let message = parsed
                .error_description
                .or(parsed.error)
                .unwrap_or_else(|| format!("token endpoint returned {}", status));
            // A rejected refresh token is exactly the expired/revoked
            // grant the lifecycle manager exists for.
            return Err(StorageError::Authentication {
                provider: ProviderId::Drive,
                message,
            });
        }

        let token: TokenResponse = response.json().await.map_err(Self::transport_error)?;
        let expires_at = Instant::now()
            + Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });
        Ok(access_token)
    }

    /// Map a non-success Drive API status to the error taxonomy.
    async fn api_error(&self, response: reqwest::Response, path: &str) -> StorageError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => StorageError::Authentication {
                provider: ProviderId::Drive,
                message: format!("access token rejected: {}", body),
            },
            StatusCode::FORBIDDEN => {
                // 403 is overloaded: quota exhaustion is retryable,
                // anything else means the grant lost access.
                if body.contains("RateLimit") || body.contains("rateLimit") || body.contains("quota")
                {
                    StorageError::Transient(body)
                } else {
                    StorageError::Authentication {
                        provider: ProviderId::Drive,
                        message: body,
                    }
                }
            }
            StatusCode::NOT_FOUND => StorageError::NotFound {
                path: path.to_string(),
            },
            StatusCode::TOO_MANY_REQUESTS => StorageError::Transient(body),
            s if s.is_server_error() => StorageError::Transient(body),
            s => StorageError::Internal(format!("drive API returned {}: {}", s, body)),
        }
    }

    /// Find a direct child of `parent_id` by name.
    async fn find_child(&self, parent_id: &str, name: &str) -> Result<Option<DriveFile>> {
        let token = self.access_token().await?;
        let query = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            parent_id,
            name.replace('\'', "\\'")
        );
        let response = self
            .client
            .get(self.files_url())
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name,mimeType)"),
                ("pageSize", "10"),
            ])
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(self.api_error(response, name).await);
        }
        let list: FileList = response.json().await.map_err(Self::transport_error)?;
        Ok(list.files.into_iter().next())
    }

    /// Resolve a gallery path to the Drive file it names, if present.
    async fn resolve_path(&self, path: &str) -> Result<Option<DriveFile>> {
        let normalized = normalize_object_path(path);
        let mut current = DriveFile {
            id: self.root_folder_id.clone(),
            name: String::new(),
            mime_type: FOLDER_MIME.to_string(),
        };
        if normalized.is_empty() {
            return Ok(Some(current));
        }
        for segment in normalized.split('/') {
            match self.find_child(&current.id, segment).await? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Walk folder segments, creating any that are missing; returns the
    /// id of the final folder.
    async fn ensure_folders(&self, segments: &[&str]) -> Result<String> {
        let mut parent_id = self.root_folder_id.clone();
        for segment in segments {
            match self.find_child(&parent_id, segment).await? {
                Some(existing) if existing.is_folder() => parent_id = existing.id,
                Some(_) => {
                    return Err(StorageError::Configuration(format!(
                        "Path segment {} exists as a file",
                        segment
                    )))
                }
                None => parent_id = self.create_folder(&parent_id, segment).await?,
            }
        }
        Ok(parent_id)
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let token = self.access_token().await?;
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent_id],
        });
        let response = self
            .client
            .post(self.files_url())
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .json(&metadata)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(self.api_error(response, name).await);
        }
        let created: DriveFile = response.json().await.map_err(Self::transport_error)?;
        Ok(created.id)
    }

    fn multipart_body(metadata: &serde_json::Value, content_type: &str, data: &Bytes) -> Vec<u8> {
        let mut body = Vec::with_capacity(data.len() + 512);
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{}\r\n",
                MULTIPART_BOUNDARY, metadata
            )
            .as_bytes(),
        );
        body.extend_from_slice(
            format!("--{}\r\nContent-Type: {}\r\n\r\n", MULTIPART_BOUNDARY, content_type).as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--", MULTIPART_BOUNDARY).as_bytes());
        body
    }

    fn list_children<'a>(
        &'a self,
        folder_id: String,
        rel: String,
        depth: usize,
    ) -> BoxFuture<'a, Result<Vec<FileNode>>> {
        Box::pin(async move {
            let token = self.access_token().await?;
            let query = format!("'{}' in parents and trashed = false", folder_id);
            let response = self
                .client
                .get(self.files_url())
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .query(&[
                    ("q", query.as_str()),
                    ("fields", "files(id,name,mimeType)"),
                    ("pageSize", "1000"),
                ])
                .send()
                .await
                .map_err(Self::transport_error)?;

            if !response.status().is_success() {
                return Err(self.api_error(response, &rel).await);
            }
            let list: FileList = response.json().await.map_err(Self::transport_error)?;

            let mut entries = Vec::new();
            for file in list.files {
                let child_rel = if rel.is_empty() {
                    file.name.clone()
                } else {
                    format!("{}/{}", rel, file.name)
                };
                if file.is_folder() {
                    let children = if depth > 1 {
                        self.list_children(file.id.clone(), child_rel.clone(), depth - 1)
                            .await?
                    } else {
                        Vec::new()
                    };
                    entries.push(FileNode::folder(file.name, child_rel, children));
                } else {
                    entries.push(FileNode::file(file.name, child_rel));
                }
            }
            entries.sort_by(|a, b| (a.is_file, &a.name).cmp(&(b.is_file, &b.name)));
            Ok(entries)
        })
    }
}

#[async_trait]
impl StorageProvider for DriveProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Drive
    }

    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<StoredRef> {
        let normalized = normalize_object_path(path);
        let (folders, file_name) = match normalized.rsplit_once('/') {
            Some((dirs, name)) => (dirs.split('/').collect::<Vec<_>>(), name),
            None => (Vec::new(), normalized.as_str()),
        };
        if file_name.is_empty() {
            return Err(StorageError::Configuration("Empty upload path".to_string()));
        }

        let parent_id = self.ensure_folders(&folders).await?;
        let token = self.access_token().await?;

        // Re-uploading an existing path replaces its content in place so
        // the old file id (and any shared link) stays valid.
        let response = match self.find_child(&parent_id, file_name).await? {
            Some(existing) => self
                .client
                .patch(self.upload_file_url(&existing.id))
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .header("Content-Type", content_type)
                .query(&[("uploadType", "media")])
                .body(data.to_vec())
                .send()
                .await
                .map_err(Self::transport_error)?,
            None => {
                let metadata = serde_json::json!({
                    "name": file_name,
                    "parents": [parent_id],
                });
                let body = Self::multipart_body(&metadata, content_type, &data);
                self.client
                    .post(self.upload_url())
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .header(
                        "Content-Type",
                        format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
                    )
                    .query(&[("uploadType", "multipart")])
                    .body(body)
                    .send()
                    .await
                    .map_err(Self::transport_error)?
            }
        };

        if !response.status().is_success() {
            return Err(self.api_error(response, &normalized).await);
        }

        let public_url = self.resolve_public_url(&normalized).await?;
        Ok(StoredRef {
            provider: ProviderId::Drive,
            path: normalized,
            public_url,
        })
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let file = self
            .resolve_path(path)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_string(),
            })?;

        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.file_url(&file.id))
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(self.api_error(response, path).await);
        }
        response.bytes().await.map_err(Self::transport_error)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let Some(file) = self.resolve_path(path).await? else {
            return Ok(());
        };

        let token = self.access_token().await?;
        let response = self
            .client
            .delete(self.file_url(&file.id))
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await
            .map_err(Self::transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(self.api_error(response, path).await),
        }
    }

    async fn tree(&self, root: &str, max_depth: usize) -> Result<FileNode> {
        let folder = self
            .resolve_path(root)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                path: root.to_string(),
            })?;
        if !folder.is_folder() {
            return Err(StorageError::Configuration(format!(
                "Tree root is not a folder: {}",
                root
            )));
        }

        let rel = normalize_object_path(root);
        let name = if rel.is_empty() {
            "/".to_string()
        } else {
            rel.rsplit('/').next().unwrap_or(&rel).to_string()
        };
        let children = if max_depth == 0 {
            Vec::new()
        } else {
            self.list_children(folder.id, rel.clone(), max_depth).await?
        };
        Ok(FileNode::folder(name, rel, children))
    }

    async fn resolve_public_url(&self, path: &str) -> Result<String> {
        let normalized = normalize_object_path(path);
        match self.storage_mode {
            DriveStorageMode::Public => {
                let file = self
                    .resolve_path(&normalized)
                    .await?
                    .ok_or(StorageError::NotFound { path: normalized })?;
                Ok(format!(
                    "https://drive.google.com/uc?export=view&id={}",
                    file.id
                ))
            }
            // Private files stream through the gallery's own gated
            // media endpoint.
            DriveStorageMode::Private => Ok(format!("/media/drive/{}", normalized)),
        }
    }

    async fn validate_connection(&self) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.file_url(&self.root_folder_id))
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .query(&[("fields", "id,name")])
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(self.api_error(response, "").await);
        }
        Ok(())
    }
}
