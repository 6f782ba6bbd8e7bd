//! Amazon S3 storage provider
//!
//! Uses object_store::aws::AmazonS3 with static access keys from the
//! provider configuration record. Region-addressed buckets; public URLs
//! use the virtual-hosted style.

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

/// Amazon S3 backend
impl std::fmt::Debug for S3Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Provider")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}

pub struct S3Provider {
    store: Arc<AmazonS3>,
    bucket: String,
    region: String,
}

impl S3Provider {
    /// Create a new S3 backend from static credentials
    pub fn new(
        access_key_id: &str,
        secret_access_key: &str,
        region: &str,
        bucket: &str,
    ) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(region)
            .with_access_key_id(access_key_id)
            .with_secret_access_key(secret_access_key)
            .build()
            .map_err(|e| StorageError::Configuration(e.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
            region: region.to_string(),
        })
    }

    fn object_path(&self, path: &str) -> Path {
        Path::from(normalize_object_path(path))
    }

    fn normalize(&self, err: object_store::Error, path: &str) -> StorageError {
        StorageError::from_object_store(err, ProviderId::S3, path)
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

#[async_trait]
impl StorageProvider for S3Provider {
    fn id(&self) -> ProviderId {
        ProviderId::S3
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
            provider: ProviderId::S3,
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
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket,
            self.region,
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

    fn provider() -> S3Provider {
        S3Provider::new("AKIATEST", "secret", "eu-central-1", "gallery-originals").unwrap()
    }

    #[tokio::test]
    async fn test_public_url_is_virtual_hosted() {
        let url = provider().resolve_public_url("albums/2024/a.jpg").await.unwrap();
        assert_eq!(
            url,
            "https://gallery-originals.s3.eu-central-1.amazonaws.com/albums/2024/a.jpg"
        );
    }

    #[tokio::test]
    async fn test_public_url_normalizes_path() {
        let url = provider().resolve_public_url("/albums//a.jpg").await.unwrap();
        assert!(url.ends_with("/albums/a.jpg"));
    }
}
