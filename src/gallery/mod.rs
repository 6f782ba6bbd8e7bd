//! Gallery content model
//!
//! Albums form a tree stored flat: each record carries its parent id and
//! the hierarchy is derived on demand. Photos belong to exactly one
//! album and carry a storage reference into the provider layer. The
//! persistence layer proper is an external collaborator; this store
//! holds the content snapshot in memory behind a read/write lock and
//! serves the indexed lookups the aggregation and serving paths need.

pub mod aggregate;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::access::Visibility;
use crate::errors::{Result, StorageError};
use crate::store::ProviderId;

/// Where a photo's bytes live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoStorageRef {
    pub provider: ProviderId,
    pub path: String,
    pub url: String,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
}

/// A single photo record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: Uuid,
    pub album_id: Uuid,
    pub name: String,
    pub is_published: bool,
    #[serde(default)]
    pub is_leading: bool,
    #[serde(default)]
    pub is_gallery_leading: bool,
    pub storage: PhotoStorageRef,
}

/// A node in the album tree, stored flat with a self-reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: Uuid,
    #[serde(default)]
    pub parent_album_id: Option<Uuid>,
    pub name: String,
    /// Depth in the tree; roots are level 0
    pub level: u32,
    /// Sibling ordering, ascending
    pub order: i64,
    pub is_public: bool,
    #[serde(default)]
    pub allowed_groups: BTreeSet<String>,
    #[serde(default)]
    pub allowed_users: BTreeSet<Uuid>,
    pub storage_provider: ProviderId,
    pub storage_path: String,
    #[serde(default)]
    pub cover_photo_id: Option<Uuid>,
    /// Write-time cache only. May drift from the true count; the
    /// recursive aggregator is authoritative and never reads it.
    #[serde(default)]
    pub photo_count: u64,
}

impl Album {
    pub fn visibility(&self) -> Visibility {
        Visibility {
            is_public: self.is_public,
            allowed_groups: self.allowed_groups.clone(),
            allowed_users: self.allowed_users.clone(),
        }
    }
}

/// A named group referenced by album allow-lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub alias: String,
    pub display_name: String,
}

/// On-disk snapshot shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GallerySnapshot {
    #[serde(default)]
    pub albums: Vec<Album>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

#[derive(Default)]
struct GalleryData {
    albums: HashMap<Uuid, Album>,
    photos: HashMap<Uuid, Photo>,
    photos_by_album: HashMap<Uuid, Vec<Uuid>>,
}

/// In-memory indexed gallery content
pub struct GalleryStore {
    inner: RwLock<GalleryData>,
}

impl GalleryStore {
    pub fn from_snapshot(snapshot: GallerySnapshot) -> Self {
        let mut data = GalleryData::default();
        for album in snapshot.albums {
            data.albums.insert(album.id, album);
        }
        for photo in snapshot.photos {
            data.photos_by_album
                .entry(photo.album_id)
                .or_default()
                .push(photo.id);
            data.photos.insert(photo.id, photo);
        }
        Self {
            inner: RwLock::new(data),
        }
    }

    /// Load the snapshot file, or start empty when it does not exist yet
    pub fn load(path: &Path) -> Result<Self> {
        let snapshot = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            GallerySnapshot::default()
        };
        Ok(Self::from_snapshot(snapshot))
    }

    pub async fn album(&self, id: Uuid) -> Option<Album> {
        self.inner.read().await.albums.get(&id).cloned()
    }

    pub async fn photo(&self, id: Uuid) -> Option<Photo> {
        self.inner.read().await.photos.get(&id).cloned()
    }

    pub async fn all_albums(&self) -> Vec<Album> {
        self.inner.read().await.albums.values().cloned().collect()
    }

    /// Photos directly in an album (no descent into children)
    pub async fn photos_in(&self, album_id: Uuid) -> Vec<Photo> {
        let data = self.inner.read().await;
        data.photos_by_album
            .get(&album_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| data.photos.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Count of published photos directly in an album
    pub async fn published_count(&self, album_id: Uuid) -> u64 {
        let data = self.inner.read().await;
        data.photos_by_album
            .get(&album_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| data.photos.get(id).is_some_and(|p| p.is_published))
                    .count() as u64
            })
            .unwrap_or(0)
    }

    /// Locate a photo by its storage coordinates; used by the gated
    /// media proxy, which receives provider and path rather than an id.
    pub async fn find_photo_by_storage(&self, provider: ProviderId, path: &str) -> Option<Photo> {
        let data = self.inner.read().await;
        data.photos
            .values()
            .find(|p| p.storage.provider == provider && p.storage.path == path)
            .cloned()
    }

    /// Replace one album's sibling order. Full-field replacement by id,
    /// safe to resend on retry.
    pub async fn set_album_order(&self, id: Uuid, order: i64) -> Result<()> {
        let mut data = self.inner.write().await;
        match data.albums.get_mut(&id) {
            Some(album) => {
                album.order = order;
                Ok(())
            }
            None => Err(StorageError::NotFound {
                path: format!("album {}", id),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub fn album(name: &str, parent: Option<&Album>, order: i64, is_public: bool) -> Album {
        Album {
            id: Uuid::new_v4(),
            parent_album_id: parent.map(|p| p.id),
            name: name.to_string(),
            level: parent.map_or(0, |p| p.level + 1),
            order,
            is_public,
            allowed_groups: BTreeSet::new(),
            allowed_users: BTreeSet::new(),
            storage_provider: ProviderId::Local,
            storage_path: name.to_lowercase(),
            cover_photo_id: None,
            photo_count: 0,
        }
    }

    pub fn photo(album: &Album, name: &str, is_published: bool) -> Photo {
        Photo {
            id: Uuid::new_v4(),
            album_id: album.id,
            name: name.to_string(),
            is_published,
            is_leading: false,
            is_gallery_leading: false,
            storage: PhotoStorageRef {
                provider: album.storage_provider,
                path: format!("{}/{}", album.storage_path, name),
                url: format!("/media/local/{}/{}", album.storage_path, name),
                thumbnail_path: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{album, photo};
    use super::*;

    #[tokio::test]
    async fn test_snapshot_indexing() {
        let root = album("Holidays", None, 0, true);
        let p1 = photo(&root, "a.jpg", true);
        let p2 = photo(&root, "b.jpg", false);
        let store = GalleryStore::from_snapshot(GallerySnapshot {
            albums: vec![root.clone()],
            photos: vec![p1.clone(), p2],
            groups: vec![],
        });

        assert_eq!(store.photos_in(root.id).await.len(), 2);
        assert_eq!(store.published_count(root.id).await, 1);
        assert_eq!(store.photo(p1.id).await.unwrap().name, "a.jpg");
    }

    #[tokio::test]
    async fn test_find_photo_by_storage() {
        let root = album("Holidays", None, 0, true);
        let p = photo(&root, "a.jpg", true);
        let store = GalleryStore::from_snapshot(GallerySnapshot {
            albums: vec![root.clone()],
            photos: vec![p.clone()],
            groups: vec![],
        });

        let found = store
            .find_photo_by_storage(ProviderId::Local, &p.storage.path)
            .await
            .unwrap();
        assert_eq!(found.id, p.id);
        assert!(store
            .find_photo_by_storage(ProviderId::S3, &p.storage.path)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_set_album_order_unknown_album() {
        let store = GalleryStore::from_snapshot(GallerySnapshot::default());
        let err = store.set_album_order(Uuid::new_v4(), 3).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}
