//! Hierarchical aggregation over the album tree
//!
//! Two related algorithms over the flat, self-referential album
//! collection: building the parent→children tree for listing UIs, and
//! recomputing the authoritative recursive published-photo count for a
//! node. Counts for sibling subtrees are issued concurrently and joined
//! before the parent total is returned; the order of the fan-out is
//! irrelevant since the operation is a pure sum.

use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{Result, StorageError};
use crate::gallery::{Album, GalleryStore};

/// One node of the assembled album tree
#[derive(Debug, Clone, Serialize)]
pub struct AlbumNode {
    #[serde(flatten)]
    pub album: Album,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AlbumNode>,
}

/// Build the parent→children tree from a flat album list.
///
/// One grouping pass, then recursive assembly starting from the roots
/// (`parent_album_id == None`). Siblings are ordered by `order`
/// ascending with ties broken by name. The schema does not enforce
/// acyclicity, so a visited set guards the descent; a node reachable
/// twice is attached only once. Albums whose parent is filtered out of
/// the input are dropped with their subtrees.
pub fn build_tree(albums: Vec<Album>) -> Vec<AlbumNode> {
    let mut by_parent: HashMap<Option<Uuid>, Vec<Album>> = HashMap::new();
    for album in albums {
        by_parent.entry(album.parent_album_id).or_default().push(album);
    }
    for siblings in by_parent.values_mut() {
        siblings.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name)));
    }

    let mut visited = HashSet::new();
    let roots = by_parent.remove(&None).unwrap_or_default();
    roots
        .into_iter()
        .filter_map(|album| attach(album, &mut by_parent, &mut visited))
        .collect()
}

fn attach(
    album: Album,
    by_parent: &mut HashMap<Option<Uuid>, Vec<Album>>,
    visited: &mut HashSet<Uuid>,
) -> Option<AlbumNode> {
    if !visited.insert(album.id) {
        return None;
    }
    let children = by_parent
        .remove(&Some(album.id))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|child| attach(child, by_parent, visited))
        .collect();
    Some(AlbumNode { album, children })
}

/// Filter a flat album list to publicly visible albums before building
/// the tree shown to anonymous callers.
pub fn public_only(albums: Vec<Album>) -> Vec<Album> {
    albums.into_iter().filter(|a| a.is_public).collect()
}

struct CountContext {
    published: HashMap<Uuid, u64>,
    public_children: HashMap<Uuid, Vec<Uuid>>,
}

/// Live, authoritative recursive count of published photos under an
/// album: its own published photos plus the totals of its public child
/// subtrees. The denormalized `photo_count` field on the record is
/// never consulted.
pub async fn recursive_photo_count(store: &GalleryStore, album_id: Uuid) -> Result<u64> {
    let albums = store.all_albums().await;
    if !albums.iter().any(|a| a.id == album_id) {
        return Err(StorageError::NotFound {
            path: format!("album {}", album_id),
        });
    }

    let mut published = HashMap::new();
    for album in &albums {
        published.insert(album.id, store.published_count(album.id).await);
    }
    let mut public_children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for album in &albums {
        if let Some(parent) = album.parent_album_id {
            if album.is_public {
                public_children.entry(parent).or_default().push(album.id);
            }
        }
    }

    let ctx = Arc::new(CountContext {
        published,
        public_children,
    });
    Ok(count_subtree(ctx, album_id, HashSet::new()).await)
}

fn count_subtree(
    ctx: Arc<CountContext>,
    album_id: Uuid,
    mut ancestors: HashSet<Uuid>,
) -> BoxFuture<'static, u64> {
    Box::pin(async move {
        // Cycle guard: a parent chain looping back contributes nothing
        // further instead of recursing forever.
        if !ancestors.insert(album_id) {
            return 0;
        }

        let direct = ctx.published.get(&album_id).copied().unwrap_or(0);
        let children = ctx
            .public_children
            .get(&album_id)
            .cloned()
            .unwrap_or_default();

        // Fan out over sibling subtrees; join_all is the barrier that
        // collects every child total before the parent sum is formed.
        let child_futures: Vec<_> = children
            .into_iter()
            .map(|child| count_subtree(ctx.clone(), child, ancestors.clone()))
            .collect();
        let child_totals = futures::future::join_all(child_futures).await;

        direct + child_totals.into_iter().sum::<u64>()
    })
}

/// A single sibling-order replacement
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OrderUpdate {
    pub id: Uuid,
    pub order: i64,
}

/// Result of a bulk reorder batch
#[derive(Debug, Default, Serialize)]
pub struct ReorderOutcome {
    pub updated: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<Uuid>,
}

/// Apply a batch of order updates with no ordering guarantee between
/// them. Each update is an idempotent full replacement by id, so a
/// partially applied batch is safe to resend; failures are reported per
/// album rather than aborting the batch.
pub async fn reorder_albums(store: &GalleryStore, updates: Vec<OrderUpdate>) -> ReorderOutcome {
    let results = futures::future::join_all(
        updates
            .iter()
            .map(|u| store.set_album_order(u.id, u.order)),
    )
    .await;

    let mut outcome = ReorderOutcome::default();
    for (update, result) in updates.iter().zip(results) {
        match result {
            Ok(()) => outcome.updated += 1,
            Err(_) => outcome.failed.push(update.id),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::testutil::{album, photo};
    use crate::gallery::{GallerySnapshot, Photo};

    fn snapshot(albums: Vec<Album>, photos: Vec<Photo>) -> GalleryStore {
        GalleryStore::from_snapshot(GallerySnapshot {
            albums,
            photos,
            groups: vec![],
        })
    }

    #[tokio::test]
    async fn test_recursive_count_depth_three() {
        let root = album("Root", None, 0, true);
        let child = album("Child", Some(&root), 0, true);
        let grandchild = album("Grandchild", Some(&child), 0, true);

        let mut photos = vec![];
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            photos.push(photo(&child, name, true));
        }
        for name in ["d.jpg", "e.jpg"] {
            photos.push(photo(&grandchild, name, true));
        }

        let store = snapshot(vec![root.clone(), child, grandchild], photos);
        assert_eq!(recursive_photo_count(&store, root.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_recursive_count_skips_unpublished_and_private() {
        let root = album("Root", None, 0, true);
        let public_child = album("Public", Some(&root), 0, true);
        let private_child = album("Private", Some(&root), 1, false);

        let photos = vec![
            photo(&root, "r1.jpg", true),
            photo(&root, "draft.jpg", false),
            photo(&public_child, "p1.jpg", true),
            // Photos under a private child never reach a public total.
            photo(&private_child, "hidden.jpg", true),
        ];

        let store = snapshot(vec![root.clone(), public_child, private_child], photos);
        assert_eq!(recursive_photo_count(&store, root.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_recursive_count_ignores_stale_cache_field() {
        let mut root = album("Root", None, 0, true);
        root.photo_count = 9000;
        let photos = vec![photo(&root, "only.jpg", true)];
        let store = snapshot(vec![root.clone()], photos);
        assert_eq!(recursive_photo_count(&store, root.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recursive_count_unknown_album() {
        let store = snapshot(vec![], vec![]);
        let err = recursive_photo_count(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_recursive_count_survives_cycle() {
        let mut a = album("A", None, 0, true);
        let b = album("B", Some(&a), 0, true);
        // Corrupt the parent chain into a cycle: A's parent is B.
        a.parent_album_id = Some(b.id);

        let photos = vec![photo(&a, "x.jpg", true), photo(&b, "y.jpg", true)];
        let store = snapshot(vec![a.clone(), b], photos);
        // Terminates and counts each album at most once.
        assert_eq!(recursive_photo_count(&store, a.id).await.unwrap(), 2);
    }

    #[test]
    fn test_build_tree_sorts_siblings_by_order_then_name() {
        let root = album("Root", None, 0, true);
        let c2 = album("Zebra", Some(&root), 1, true);
        let c1 = album("Alpha", Some(&root), 2, true);
        let c3 = album("Apple", Some(&root), 1, true);

        let tree = build_tree(vec![c1, root.clone(), c2, c3]);
        assert_eq!(tree.len(), 1);
        let names: Vec<_> = tree[0].children.iter().map(|n| n.album.name.as_str()).collect();
        assert_eq!(names, vec!["Apple", "Zebra", "Alpha"]);
    }

    #[test]
    fn test_build_tree_is_idempotent() {
        let root = album("Root", None, 0, true);
        let child = album("Child", Some(&root), 0, true);
        let albums = vec![root, child];

        let first = build_tree(albums.clone());
        let second = build_tree(albums);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_build_tree_drops_orphans_of_filtered_parents() {
        let root = album("Root", None, 0, false);
        let child = album("Child", Some(&root), 0, true);

        // Public-only filtering removes the private root; the child's
        // subtree goes with it.
        let tree = build_tree(public_only(vec![root, child]));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_build_tree_terminates_on_cycle() {
        let mut a = album("A", None, 0, true);
        let b = album("B", Some(&a), 0, true);
        a.parent_album_id = Some(b.id);

        // No roots at all: every node sits in a cycle, so the tree is
        // empty rather than the build hanging.
        let tree = build_tree(vec![a, b]);
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn test_reorder_reports_partial_failures() {
        let a = album("A", None, 0, true);
        let store = snapshot(vec![a.clone()], vec![]);
        let missing = Uuid::new_v4();

        let outcome = reorder_albums(
            &store,
            vec![
                OrderUpdate { id: a.id, order: 5 },
                OrderUpdate { id: missing, order: 1 },
            ],
        )
        .await;

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.failed, vec![missing]);
        assert_eq!(store.album(a.id).await.unwrap().order, 5);
    }

    #[tokio::test]
    async fn test_reorder_is_idempotent() {
        let a = album("A", None, 0, true);
        let store = snapshot(vec![a.clone()], vec![]);
        let updates = vec![OrderUpdate { id: a.id, order: 7 }];

        reorder_albums(&store, updates.clone()).await;
        let outcome = reorder_albums(&store, updates).await;
        assert_eq!(outcome.updated, 1);
        assert_eq!(store.album(a.id).await.unwrap().order, 7);
    }
}
