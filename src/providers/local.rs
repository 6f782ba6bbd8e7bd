//! Local filesystem storage provider
//!
//! All paths are resolved inside a configured base directory. The base is
//! canonicalized at construction and every resolved path is checked
//! against it after canonicalization, so `../` segments (plain or
//! URL-decoded upstream) and symlinks pointing outside the root fail
//! closed with an access-denied outcome rather than touching the wider
//! filesystem.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::path::{Component, Path, PathBuf};

use crate::errors::{Result, StorageError};
use crate::providers::{normalize_object_path, FileNode, StorageProvider, StoredRef};
use crate::store::ProviderId;

/// Sandboxed local filesystem backend
impl std::fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProvider")
            .field("base", &self.base)
            .finish()
    }
}

pub struct LocalProvider {
    base: PathBuf,
}

impl LocalProvider {
    /// Create the provider, establishing the sandbox root.
    ///
    /// The base directory is created if missing so canonicalization has
    /// a real path to resolve.
    pub fn new(base_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_path)?;
        let base = std::fs::canonicalize(base_path)?;
        Ok(Self { base })
    }

    /// Lexically validate a relative path and join it under the base.
    ///
    /// Rejects absolute paths and any `..` component before the
    /// filesystem is consulted, so a traversal attempt on a nonexistent
    /// file is still a deny, not a not-found.
    fn join_checked(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize_object_path(path);
        let rel = Path::new(&normalized);
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::AccessDenied),
            }
        }
        Ok(self.base.join(rel))
    }

    /// Canonicalize an existing path and enforce the sandbox prefix.
    fn canonicalize_checked(&self, candidate: &Path, original: &str) -> Result<PathBuf> {
        let canonical = std::fs::canonicalize(candidate).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    path: original.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        if !canonical.starts_with(&self.base) {
            return Err(StorageError::AccessDenied);
        }
        Ok(canonical)
    }

    fn walk<'a>(
        &'a self,
        dir: PathBuf,
        rel: String,
        depth: usize,
    ) -> BoxFuture<'a, Result<Vec<FileNode>>> {
        Box::pin(async move {
            let mut entries = Vec::new();
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child_rel = if rel.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", rel, name)
                };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    let children = if depth > 1 {
                        self.walk(entry.path(), child_rel.clone(), depth - 1).await?
                    } else {
                        Vec::new()
                    };
                    entries.push(FileNode::folder(name, child_rel, children));
                } else {
                    entries.push(FileNode::file(name, child_rel));
                }
            }
            entries.sort_by(|a, b| (a.is_file, &a.name).cmp(&(b.is_file, &b.name)));
            Ok(entries)
        })
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Local
    }

    async fn put(&self, path: &str, data: Bytes, _content_type: &str) -> Result<StoredRef> {
        let candidate = self.join_checked(path)?;

        if let Some(parent) = candidate.parent() {
            tokio::fs::create_dir_all(parent).await?;
            // Re-check after creation: a symlinked intermediate directory
            // could still lead outside the sandbox.
            self.canonicalize_checked(parent, path)?;
        }

        tokio::fs::write(&candidate, &data).await?;

        let normalized = normalize_object_path(path);
        let public_url = self.resolve_public_url(&normalized).await?;
        Ok(StoredRef {
            provider: ProviderId::Local,
            path: normalized,
            public_url,
        })
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let candidate = self.join_checked(path)?;
        let canonical = self.canonicalize_checked(&candidate, path)?;
        let data = tokio::fs::read(&canonical).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    path: path.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let candidate = self.join_checked(path)?;
        match self.canonicalize_checked(&candidate, path) {
            Ok(canonical) => match tokio::fs::remove_file(&canonical).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::Io(e)),
            },
            Err(StorageError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn tree(&self, root: &str, max_depth: usize) -> Result<FileNode> {
        let candidate = self.join_checked(root)?;
        let canonical = self.canonicalize_checked(&candidate, root)?;
        if !canonical.is_dir() {
            return Err(StorageError::Configuration(format!(
                "Tree root is not a directory: {}",
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
            self.walk(canonical, rel.clone(), max_depth).await?
        };
        Ok(FileNode::folder(name, rel, children))
    }

    async fn resolve_public_url(&self, path: &str) -> Result<String> {
        Ok(format!("/media/local/{}", normalize_object_path(path)))
    }

    async fn validate_connection(&self) -> Result<()> {
        tokio::fs::read_dir(&self.base).await?;
        Ok(())
    }
}
