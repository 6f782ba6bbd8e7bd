//! Storage provider abstraction layer
//!
//! Provides a unified interface over the heterogeneous backing stores a
//! gallery can keep its originals on: the sandboxed local filesystem, an
//! OAuth2 drive, and two key-based S3-compatible object stores. Every
//! backend normalizes its native failures into the crate error taxonomy
//! before they leave this module.

mod b2;
mod drive;
mod local;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;

use crate::errors::{Result, StorageError};
use crate::store::{ProviderId, ProviderRecord, ProviderSettings};

pub use b2::B2Provider;
pub use drive::{DriveEndpoints, DriveProvider};
pub use local::LocalProvider;
pub use s3::S3Provider;

/// Reference to a stored object, returned by uploads
#[derive(Debug, Clone, Serialize)]
pub struct StoredRef {
    pub provider: ProviderId,
    pub path: String,
    pub public_url: String,
}

/// One node of a provider's folder/file tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub name: String,
    pub path: String,
    pub is_file: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<FileNode>,
}

impl FileNode {
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_file: true,
            children: Vec::new(),
        }
    }

    pub fn folder(name: impl Into<String>, path: impl Into<String>, children: Vec<FileNode>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_file: false,
            children,
        }
    }
}

/// Storage provider trait for unified asset operations
///
/// All asset reads and writes flow through this trait. Implementations
/// must treat absence as a definitive `NotFound` error kind (never a
/// panic or a generic failure) and must fail closed with `AccessDenied`
/// on any path that escapes their configured root.
#[async_trait]
pub trait StorageProvider: Send + Sync + std::fmt::Debug {
    /// The provider id this instance serves
    fn id(&self) -> ProviderId;

    /// Write content at the given path, creating intermediate
    /// directories/folders as needed
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<StoredRef>;

    /// Read raw bytes at the given path
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Delete the object at the given path; absence is not an error
    async fn delete(&self, path: &str) -> Result<()>;

    /// Enumerate the folder structure under `root`, at most `max_depth`
    /// levels deep
    async fn tree(&self, root: &str, max_depth: usize) -> Result<FileNode>;

    /// A URL a client can use to fetch the asset directly
    async fn resolve_public_url(&self, path: &str) -> Result<String>;

    /// Cheap round-trip proving the credentials are usable. Used by the
    /// admin "test connection" action, never on the serving path.
    async fn validate_connection(&self) -> Result<()>;
}

/// Construct a provider instance from a stored configuration record
///
/// Callers are expected to have checked `is_enabled`; this only
/// validates that the settings variant matches the record's id.
pub fn create_provider(record: &ProviderRecord) -> Result<Arc<dyn StorageProvider>> {
    if record.settings.provider_id() != record.provider_id {
        return Err(StorageError::Configuration(format!(
            "Settings variant does not match provider id {}",
            record.provider_id
        )));
    }

    match &record.settings {
        ProviderSettings::Local { base_path } => {
            Ok(Arc::new(LocalProvider::new(base_path)?))
        }
        ProviderSettings::Drive {
            client_id,
            client_secret,
            refresh_token,
            folder_id,
            storage_mode,
        } => Ok(Arc::new(DriveProvider::new(
            client_id.clone(),
            client_secret.clone(),
            refresh_token.clone(),
            folder_id.clone(),
            *storage_mode,
        ))),
        ProviderSettings::S3 {
            access_key_id,
            secret_access_key,
            region,
            bucket,
        } => Ok(Arc::new(S3Provider::new(
            access_key_id,
            secret_access_key,
            region,
            bucket,
        )?)),
        ProviderSettings::B2 {
            access_key_id,
            secret_access_key,
            endpoint,
            bucket,
        } => Ok(Arc::new(B2Provider::new(
            access_key_id,
            secret_access_key,
            endpoint,
            bucket,
        )?)),
    }
}

/// Normalize a user-supplied object path: forward slashes, no leading or
/// trailing separator, no empty segments.
pub(crate) fn normalize_object_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_object_path() {
        assert_eq!(normalize_object_path("a/b.jpg"), "a/b.jpg");
        assert_eq!(normalize_object_path("/a//b/"), "a/b");
        assert_eq!(normalize_object_path("./a/./b.jpg"), "a/b.jpg");
        assert_eq!(normalize_object_path("a\\b.jpg"), "a/b.jpg");
        // Parent segments survive normalization; sandbox checks reject them.
        assert_eq!(normalize_object_path("../x"), "../x");
    }

    #[test]
    fn test_file_node_serializes_camel_case() {
        let node = FileNode::folder("2024", "albums/2024", vec![FileNode::file("a.jpg", "albums/2024/a.jpg")]);
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"isFile\":false"));
        assert!(json.contains("\"children\""));

        let leaf = serde_json::to_string(&FileNode::file("a.jpg", "a.jpg")).unwrap();
        assert!(!leaf.contains("children"));
    }
}
