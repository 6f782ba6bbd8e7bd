//! Endpoint-addressed S3-compatible storage provider
//!
//! Covers object stores reached through a custom endpoint with the S3
//! wire protocol (Backblaze B2, MinIO, and similar). Uses
//! object_store::aws::AmazonS3 with path-style addressing; public URLs
//! are `{endpoint}/{bucket}/{path}`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use std::sync::Arc;

use crate::errors::{Result, StorageError};
use crate::providers::{normalize_object_path, FileNode, StorageProvider, StoredRef};
use crate::store::ProviderId;

/// S3-compatible backend behind a custom endpoint
impl std::fmt::Debug for B2Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("B2Provider")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .finish()
    }
}

pub struct B2Provider {
    store: Arc<AmazonS3>,
    endpoint: String,
    bucket: String,
}

impl B2Provider {
    /// Create a new endpoint-addressed backend from static credentials
    pub fn new(
        access_key_id: &str,
        secret_access_key: &str,
        endpoint: &str,
        bucket: &str,
    ) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_endpoint(&endpoint)
            .with_region(region_from_endpoint(&endpoint))
            .with_access_key_id(access_key_id)
            .with_secret_access_key(secret_access_key)
            .with_virtual_hosted_style_request(false);

        if endpoint.starts_with("http://") {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Configuration(e.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            endpoint,
            bucket: bucket.to_string(),
        })
    }

    fn object_path(&self, path: &str) -> Path {
        Path::from(normalize_object_path(path))
    }

    fn normalize(&self, err: object_store::Error, path: &str) -> StorageError {
        StorageError::from_object_store(err, ProviderId::B2, path)
    }

    fn walk<'a>(&'a self, prefix: String, depth: usize) -> BoxFuture<'a, Result<Vec<FileNode>>> {
        Box::pin(async move {
            let prefix_path = if prefix.is_empty() {
                None
            } else {
                Some(Path::from(prefix.clone()))
            };
            let listing = self
                .store
                .list_with_delimiter(prefix_path.as_ref())
                .await
                .map_err(|e| self.normalize(e, &prefix))?;

            let mut entries = Vec::new();
            for dir in listing.common_prefixes {
                let path = dir.to_string();
                let name = dir.filename().unwrap_or_default().to_string();
                let children = if depth > 1 {
                    self.walk(path.clone(), depth - 1).await?
                } else {
                    Vec::new()
                };
                entries.push(FileNode::folder(name, path, children));
            }
            for meta in listing.objects {
                let name = meta.location.filename().unwrap_or_default().to_string();
                entries.push(FileNode::file(name, meta.location.to_string()));
            }
            entries.sort_by(|a, b| (a.is_file, &a.name).cmp(&(b.is_file, &b.name)));
            Ok(entries)
        })
    }
}

/// Derive a signing region from endpoints that embed one
/// (`s3.us-west-004.backblazeb2.com`); anything else signs as us-east-1,
/// which S3-compatible stores accept for static-key auth.
fn region_from_endpoint(endpoint: &str) -> String {
    let host = endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let mut parts = host.split('.');
    if parts.next() == Some("s3") {
        if let Some(region) = parts.next() {
            if region.chars().any(|c| c.is_ascii_digit()) || region.contains('-') {
                return region.to_string();
            }
        }
    }
    "us-east-1".to_string()
}

#[async_trait]
impl StorageProvider for B2Provider {
    fn id(&self) -> ProviderId {
        ProviderId::B2
    }

    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<StoredRef> {
        let location = self.object_path(path);

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&location, data.into(), opts)
            .await
            .map_err(|e| self.normalize(e, path))?;

        let normalized = location.to_string();
        let public_url = self.resolve_public_url(&normalized).await?;
        Ok(StoredRef {
            provider: ProviderId::B2,
            path: normalized,
            public_url,
        })
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let location = self.object_path(path);
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| self.normalize(e, path))?;
        result.bytes().await.map_err(|e| self.normalize(e, path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = self.object_path(path);
        match self.store.delete(&location).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(self.normalize(e, path)),
        }
    }

    async fn tree(&self, root: &str, max_depth: usize) -> Result<FileNode> {
        let prefix = normalize_object_path(root);
        let name = if prefix.is_empty() {
            self.bucket.clone()
        } else {
            prefix.rsplit('/').next().unwrap_or(&prefix).to_string()
        };
        let children = if max_depth == 0 {
            Vec::new()
        } else {
            self.walk(prefix.clone(), max_depth).await?
        };
        Ok(FileNode::folder(name, prefix, children))
    }

    async fn resolve_public_url(&self, path: &str) -> Result<String> {
        Ok(format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            normalize_object_path(path)
        ))
    }

    async fn validate_connection(&self) -> Result<()> {
        self.store
            .list_with_delimiter(None)
            .await
            .map_err(|e| self.normalize(e, ""))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_from_endpoint() {
        assert_eq!(
            region_from_endpoint("https://s3.us-west-004.backblazeb2.com"),
            "us-west-004"
        );
        assert_eq!(
            region_from_endpoint("https://s3.eu-central-003.backblazeb2.com"),
            "eu-central-003"
        );
        assert_eq!(region_from_endpoint("http://minio.internal:9000"), "us-east-1");
    }

    #[tokio::test]
    async fn test_public_url_is_path_style() {
        let provider = B2Provider::new(
            "key",
            "secret",
            "https://s3.us-west-004.backblazeb2.com/",
            "gallery",
        )
        .unwrap();
        let url = provider.resolve_public_url("albums/a.jpg").await.unwrap();
        assert_eq!(
            url,
            "https://s3.us-west-004.backblazeb2.com/gallery/albums/a.jpg"
        );
    }
}
