//! Storage manager
//!
//! Registry and facade over the storage providers: the single entry
//! point everything else in the system uses to reach a backing store.
//! Provider instances are constructed lazily from the configuration
//! store and cached per provider id; the cache is dropped explicitly
//! when an administrator edits a record. Centralizing selection here
//! keeps credential and config-shape knowledge out of calling code and
//! gives one place to route authentication failures through the
//! credential lifecycle manager.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::credentials::CredentialMonitor;
use crate::errors::{Result, StorageError};
use crate::providers::{create_provider, FileNode, StorageProvider, StoredRef};
use crate::store::{ConfigStore, ProviderId};

/// Hard cap on tree enumeration depth, applied to every browse request
pub const MAX_TREE_DEPTH: usize = 10;

/// Process-wide storage registry
pub struct StorageManager {
    store: Arc<ConfigStore>,
    credentials: Arc<CredentialMonitor>,
    cache: RwLock<HashMap<ProviderId, Arc<dyn StorageProvider>>>,
}

impl StorageManager {
    pub fn new(store: Arc<ConfigStore>, credentials: Arc<CredentialMonitor>) -> Self {
        Self {
            store,
            credentials,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialMonitor> {
        &self.credentials
    }

    /// Return the cached provider instance, constructing it from the
    /// current configuration record on first use.
    pub async fn provider(&self, id: ProviderId) -> Result<Arc<dyn StorageProvider>> {
        {
            let cache = self.cache.read().await;
            if let Some(provider) = cache.get(&id) {
                return Ok(provider.clone());
            }
        }

        let record = self.store.get(id).ok_or_else(|| {
            StorageError::Configuration(format!("Storage provider {} is not configured", id))
        })?;
        if !record.is_enabled {
            return Err(StorageError::Configuration(format!(
                "Storage provider {} is disabled",
                id
            )));
        }

        let mut cache = self.cache.write().await;
        // A concurrent request may have constructed it while we waited
        // for the write lock.
        if let Some(provider) = cache.get(&id) {
            return Ok(provider.clone());
        }
        let provider = create_provider(&record)?;
        cache.insert(id, provider.clone());
        debug!(provider = %id, "Constructed storage provider instance");
        Ok(provider)
    }

    /// Drop the cached instance for a provider. Called after every
    /// configuration update so the next call rebuilds from the new
    /// record.
    pub async fn invalidate(&self, id: ProviderId) {
        self.cache.write().await.remove(&id);
        debug!(provider = %id, "Invalidated cached provider instance");
    }

    /// Route an operation result through the credential state machine
    /// and the operation metrics.
    fn track<T>(&self, id: ProviderId, operation: &str, result: Result<T>) -> Result<T> {
        let status = if result.is_ok() { "success" } else { "error" };
        let provider_label = id.to_string();
        crate::metrics::STORAGE_OPERATIONS
            .with_label_values(&[provider_label.as_str(), operation, status])
            .inc();
        match result {
            Ok(value) => {
                self.credentials.record_success(id);
                Ok(value)
            }
            Err(err) => {
                self.credentials.record_failure(id, &err);
                Err(err)
            }
        }
    }

    /// Upload a buffer through the given provider
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload_buffer(
        &self,
        data: Bytes,
        path: &str,
        id: ProviderId,
        content_type: &str,
    ) -> Result<StoredRef> {
        let provider = self.provider(id).await?;
        let timer = crate::metrics::STORAGE_OPERATION_DURATION.start_timer();
        let result = provider.put(path, data, content_type).await;
        timer.observe_duration();
        self.track(id, "put", result)
    }

    /// Read a file's raw bytes through the given provider
    #[instrument(skip(self))]
    pub async fn get_file_buffer(&self, path: &str, id: ProviderId) -> Result<Bytes> {
        let provider = self.provider(id).await?;
        let timer = crate::metrics::STORAGE_OPERATION_DURATION.start_timer();
        let result = provider.get(path).await;
        timer.observe_duration();
        self.track(id, "get", result)
    }

    /// Delete a file through the given provider
    #[allow(dead_code)] // Entry point for the photo lifecycle collaborators
    #[instrument(skip(self))]
    pub async fn delete_file(&self, path: &str, id: ProviderId) -> Result<()> {
        let provider = self.provider(id).await?;
        let result = provider.delete(path).await;
        self.track(id, "delete", result)
    }

    /// Resolve a client-usable URL for an asset
    #[instrument(skip(self))]
    pub async fn get_photo_url(&self, path: &str, id: ProviderId) -> Result<String> {
        let provider = self.provider(id).await?;
        let result = provider.resolve_public_url(path).await;
        self.track(id, "resolve_url", result)
    }

    /// Enumerate a provider's folder structure, clamped to the depth cap
    #[instrument(skip(self))]
    pub async fn provider_tree(
        &self,
        id: ProviderId,
        path: &str,
        max_depth: usize,
    ) -> Result<FileNode> {
        let depth = max_depth.min(MAX_TREE_DEPTH);
        let provider = self.provider(id).await?;
        let result = provider.tree(path, depth).await;
        self.track(id, "tree", result)
    }

    /// Prove a provider's credentials are usable. Admin "test
    /// connection" only; never called while serving traffic.
    #[instrument(skip(self))]
    pub async fn validate_provider(&self, id: ProviderId) -> Result<()> {
        let provider = self.provider(id).await?;
        let result = provider.validate_connection().await;
        self.track(id, "validate", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialState;
    use crate::store::{ProviderRecord, ProviderSettings};

    fn manager_with_local(dir: &std::path::Path) -> StorageManager {
        let store_path = dir.join("providers.json");
        let store = Arc::new(ConfigStore::open(store_path).unwrap());
        store
            .upsert(ProviderRecord::new(
                "Local disk",
                true,
                ProviderSettings::Local {
                    base_path: dir.join("data"),
                },
            ))
            .unwrap();
        StorageManager::new(store, Arc::new(CredentialMonitor::new()))
    }

    #[tokio::test]
    async fn test_unknown_provider_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_local(dir.path());
        let err = manager.provider(ProviderId::S3).await.unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_disabled_provider_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(dir.path().join("providers.json")).unwrap());
        store
            .upsert(ProviderRecord::new(
                "Local disk",
                false,
                ProviderSettings::Local {
                    base_path: dir.path().join("data"),
                },
            ))
            .unwrap();
        let manager = StorageManager::new(store, Arc::new(CredentialMonitor::new()));

        let err = manager.provider(ProviderId::Local).await.unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_provider_instance_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_local(dir.path());

        let first = manager.provider(ProviderId::Local).await.unwrap();
        let second = manager.provider(ProviderId::Local).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_invalidate_forces_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_local(dir.path());

        let first = manager.provider(ProviderId::Local).await.unwrap();
        manager.invalidate(ProviderId::Local).await;
        let second = manager.provider(ProviderId::Local).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_upload_and_read_back_through_manager() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_local(dir.path());
        let body = Bytes::from_static(b"photo");

        let stored = manager
            .upload_buffer(body.clone(), "a/b.jpg", ProviderId::Local, "image/jpeg")
            .await
            .unwrap();
        assert_eq!(stored.provider, ProviderId::Local);

        let read = manager
            .get_file_buffer("a/b.jpg", ProviderId::Local)
            .await
            .unwrap();
        assert_eq!(read, body);

        // Local successes still feed the lifecycle state machine.
        assert_eq!(
            manager.credentials().state(ProviderId::Local),
            CredentialState::Valid
        );
    }

    #[tokio::test]
    async fn test_tree_depth_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_local(dir.path());

        // A depth far over the cap still succeeds; the clamp bounds the
        // walk rather than rejecting the request.
        manager
            .upload_buffer(Bytes::from_static(b"x"), "a/b.jpg", ProviderId::Local, "image/jpeg")
            .await
            .unwrap();
        let tree = manager
            .provider_tree(ProviderId::Local, "", 1000)
            .await
            .unwrap();
        assert_eq!(tree.children.len(), 1);
    }
}
