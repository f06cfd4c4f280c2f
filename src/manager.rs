//! File operations
//!
//! Each operation takes an [`AuthorizedContext`], resolves the caller's
//! key or prefix under their root folder and only then touches storage.
//! Names handed back to callers are relative: to the listed folder for
//! listings, to the root folder for archives and delete reports.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::archive;
use crate::auth::AuthorizedContext;
use crate::error::{Error, Result};
use crate::path::{self, StorageEntry};
use crate::storage::ObjectStore;

/// A key delete-folder could not remove
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDeletion {
    pub key: String,
    pub error: String,
}

/// Outcome of a recursive folder delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<FailedDeletion>,
}

impl DeleteReport {
    /// Whether every key was removed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Dispatches file operations to the object store
pub struct FileManager {
    store: Arc<dyn ObjectStore>,
    bulk_concurrency: usize,
}

impl FileManager {
    pub fn new(store: Arc<dyn ObjectStore>, bulk_concurrency: usize) -> Self {
        Self {
            store,
            bulk_concurrency: bulk_concurrency.max(1),
        }
    }

    /// Folders and files directly under `prefix`.
    ///
    /// Folders come first, each group sorted by name. The folder's own
    /// marker object is not listed.
    pub async fn list(
        &self,
        ctx: &AuthorizedContext,
        prefix: Option<&str>,
    ) -> Result<Vec<StorageEntry>> {
        let folder = path::resolve_folder(&ctx.root_folder, prefix.unwrap_or(""))?;
        let listing = self.store.list(&folder, true).await?;

        let mut folders: Vec<StorageEntry> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.strip_prefix(folder.as_str()))
            .filter(|name| !name.is_empty())
            .map(|name| StorageEntry::FolderPrefix(name.to_string()))
            .collect();

        let mut files: Vec<StorageEntry> = listing
            .objects
            .iter()
            .filter_map(|o| o.key.strip_prefix(folder.as_str()))
            .filter(|name| !name.is_empty())
            .map(|name| StorageEntry::from_key(name))
            .collect();

        folders.sort();
        files.sort();
        folders.append(&mut files);

        tracing::debug!("{} listed {:?} ({} entries)", ctx.username, folder, folders.len());
        Ok(folders)
    }

    /// File names directly under `prefix`, folder markers excluded
    pub async fn list_files(
        &self,
        ctx: &AuthorizedContext,
        prefix: Option<&str>,
    ) -> Result<Vec<String>> {
        Ok(self
            .list(ctx, prefix)
            .await?
            .into_iter()
            .filter(|e| !e.is_folder())
            .map(StorageEntry::into_key)
            .collect())
    }

    /// Object contents
    pub async fn get(&self, ctx: &AuthorizedContext, key: &str) -> Result<Bytes> {
        match path::resolve(&ctx.root_folder, key)? {
            StorageEntry::File(key) => self.store.get(&key).await,
            StorageEntry::FolderPrefix(_) => Err(Error::InvalidRequest(format!(
                "{} is a folder, use download-folder",
                key
            ))),
        }
    }

    /// Write an object, or create a folder when `key` ends in `/`
    pub async fn put(
        &self,
        ctx: &AuthorizedContext,
        key: &str,
        body: Bytes,
    ) -> Result<StorageEntry> {
        let entry = path::resolve(&ctx.root_folder, key)?;
        if entry.is_folder() && !body.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "folder {} cannot have content",
                key
            )));
        }

        let size = body.len();
        self.store.put(entry.key(), body).await?;

        if entry.is_folder() {
            tracing::info!("{} created folder {}", ctx.username, entry.key());
        } else {
            tracing::info!("{} uploaded {} ({} bytes)", ctx.username, entry.key(), size);
        }
        Ok(entry)
    }

    /// Remove one object; an absent key is not an error
    pub async fn delete(&self, ctx: &AuthorizedContext, key: &str) -> Result<()> {
        let entry = path::resolve(&ctx.root_folder, key)?;
        self.store.delete(entry.key()).await?;
        tracing::info!("{} deleted {}", ctx.username, entry.key());
        Ok(())
    }

    /// Every entry under `prefix`, bundled as a zip archive.
    ///
    /// Archive names are relative to the root folder. Objects that vanish
    /// between listing and fetching are skipped.
    pub async fn download_folder(&self, ctx: &AuthorizedContext, prefix: &str) -> Result<Vec<u8>> {
        let folder = self.bulk_prefix(ctx, prefix)?;
        let listing = self.store.list(&folder, false).await?;
        if listing.objects.is_empty() {
            return Err(Error::NotFound(format!("folder {} is empty", prefix)));
        }

        let fetched: Vec<Option<(StorageEntry, Bytes)>> = stream::iter(listing.objects)
            .map(|object| async move {
                let name = match ctx.root_folder.relative(&object.key) {
                    Some(name) if !name.is_empty() => name.to_string(),
                    _ => return Ok(None),
                };

                match StorageEntry::from_key(name) {
                    folder @ StorageEntry::FolderPrefix(_) => Ok(Some((folder, Bytes::new()))),
                    file => match self.store.get(&object.key).await {
                        Ok(body) => Ok(Some((file, body))),
                        Err(Error::NotFound(_)) => {
                            tracing::warn!("{} vanished during folder download", object.key);
                            Ok(None)
                        }
                        Err(e) => Err(e),
                    },
                }
            })
            .buffered(self.bulk_concurrency)
            .try_collect()
            .await?;

        let entries: Vec<(StorageEntry, Bytes)> = fetched.into_iter().flatten().collect();
        let archive = archive::build_zip(entries)?;

        tracing::info!(
            "{} downloaded folder {} ({} bytes zipped)",
            ctx.username,
            folder,
            archive.len()
        );
        Ok(archive)
    }

    /// Remove every entry under `prefix`, including its folder marker.
    ///
    /// Deletions are independent; failures are collected into the report
    /// instead of aborting the rest.
    pub async fn delete_folder(&self, ctx: &AuthorizedContext, prefix: &str) -> Result<DeleteReport> {
        let folder = self.bulk_prefix(ctx, prefix)?;
        let listing = self.store.list(&folder, false).await?;

        let outcomes: Vec<(String, Result<()>)> = stream::iter(listing.objects)
            .map(|object| async move {
                let result = self.store.delete(&object.key).await;
                (object.key, result)
            })
            .buffer_unordered(self.bulk_concurrency)
            .collect()
            .await;

        let mut report = DeleteReport::default();
        for (key, result) in outcomes {
            let name = ctx.root_folder.relative(&key).unwrap_or(key.as_str()).to_string();
            match result {
                Ok(()) => report.deleted.push(name),
                Err(e) => {
                    tracing::error!("Failed to delete {}: {}", key, e);
                    report.failed.push(FailedDeletion {
                        key: name,
                        error: e.to_string(),
                    });
                }
            }
        }
        report.deleted.sort();
        report.failed.sort_by(|a, b| a.key.cmp(&b.key));

        tracing::info!(
            "{} deleted folder {} ({} removed, {} failed)",
            ctx.username,
            folder,
            report.deleted.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Prefix for a recursive operation; never the root itself
    fn bulk_prefix(&self, ctx: &AuthorizedContext, prefix: &str) -> Result<String> {
        let folder = path::resolve_folder(&ctx.root_folder, prefix)?;
        if folder == ctx.root_folder.as_prefix() {
            return Err(Error::InvalidRequest("prefix is required".into()));
        }
        Ok(folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::RootFolder;
    use crate::storage::{MemoryStore, Listing};
    use async_trait::async_trait;
    use std::io::{Cursor, Read};

    fn ctx(username: &str, root: &str) -> AuthorizedContext {
        AuthorizedContext {
            username: username.to_string(),
            root_folder: RootFolder::new(root),
        }
    }

    fn manager() -> (FileManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (FileManager::new(store.clone(), 4), store)
    }

    fn names(entries: Vec<StorageEntry>) -> Vec<String> {
        entries.into_iter().map(StorageEntry::into_key).collect()
    }

    #[tokio::test]
    async fn test_put_lands_under_root_folder() {
        let (manager, store) = manager();
        let user1 = ctx("user1", "user1docs");

        manager
            .put(&user1, "report.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();
        assert_eq!(store.keys().await, vec!["user1docs/report.pdf"]);

        store.put("elsewhere.txt", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(names(manager.list(&user1, None).await.unwrap()), vec!["report.pdf"]);
    }

    #[tokio::test]
    async fn test_unrestricted_user_sees_bucket() {
        let (manager, store) = manager();
        store.put("user1docs/report.pdf", Bytes::from_static(b"x")).await.unwrap();
        store.put("top.txt", Bytes::from_static(b"x")).await.unwrap();

        let admin = ctx("admin", "");
        assert_eq!(
            names(manager.list(&admin, None).await.unwrap()),
            vec!["user1docs/", "top.txt"]
        );
        assert_eq!(
            manager.get(&admin, "user1docs/report.pdf").await.unwrap(),
            Bytes::from_static(b"x")
        );
    }

    #[tokio::test]
    async fn test_round_trip_and_delete() {
        let (manager, _) = manager();
        let user1 = ctx("user1", "user1docs");
        let body = Bytes::from(vec![0u8, 159, 146, 150, 255]);

        manager.put(&user1, "bin/data.bin", body.clone()).await.unwrap();
        assert_eq!(manager.get(&user1, "bin/data.bin").await.unwrap(), body);

        manager.delete(&user1, "bin/data.bin").await.unwrap();
        assert!(matches!(
            manager.get(&user1, "bin/data.bin").await,
            Err(Error::NotFound(_))
        ));

        // Deleting an absent key succeeds
        manager.delete(&user1, "bin/data.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_never_reaches_storage() {
        let (manager, store) = manager();
        store.put("user2docs/secret", Bytes::from_static(b"s")).await.unwrap();
        let user1 = ctx("user1", "user1docs");

        assert!(matches!(
            manager.get(&user1, "../user2docs/secret").await,
            Err(Error::PathViolation(_))
        ));
        assert!(matches!(
            manager.put(&user1, "../x", Bytes::new()).await,
            Err(Error::PathViolation(_))
        ));
        assert!(matches!(
            manager.list(&user1, Some("..")).await,
            Err(Error::PathViolation(_))
        ));
        assert!(matches!(
            manager.delete_folder(&user1, "../user2docs").await,
            Err(Error::PathViolation(_))
        ));
        assert_eq!(store.keys().await, vec!["user2docs/secret"]);
    }

    #[tokio::test]
    async fn test_list_folders_then_files() {
        let (manager, _) = manager();
        let user1 = ctx("user1", "user1docs");
        for key in ["b.txt", "a.txt", "zeta/", "alpha/x.txt", "alpha/deeper/y.txt"] {
            manager.put(&user1, key, Bytes::new()).await.unwrap();
        }

        assert_eq!(
            names(manager.list(&user1, None).await.unwrap()),
            vec!["alpha/", "zeta/", "a.txt", "b.txt"]
        );
        assert_eq!(
            names(manager.list(&user1, Some("alpha")).await.unwrap()),
            vec!["deeper/", "x.txt"]
        );
        assert_eq!(manager.list_files(&user1, None).await.unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(manager.list_files(&user1, Some("alpha/")).await.unwrap(), vec!["x.txt"]);
        assert!(manager.list_files(&user1, Some("zeta")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_folder_marker() {
        let (manager, store) = manager();
        let user1 = ctx("user1", "user1docs");

        let entry = manager.put(&user1, "photos/", Bytes::new()).await.unwrap();
        assert_eq!(entry, StorageEntry::FolderPrefix("user1docs/photos/".into()));
        assert_eq!(store.get("user1docs/photos/").await.unwrap(), Bytes::new());

        assert!(matches!(
            manager.put(&user1, "docs/", Bytes::from_static(b"data")).await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            manager.get(&user1, "photos/").await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_download_folder() {
        let (manager, store) = manager();
        let user1 = ctx("user1", "user1docs");
        manager.put(&user1, "photos/", Bytes::new()).await.unwrap();
        manager.put(&user1, "photos/a.jpg", Bytes::from_static(b"A")).await.unwrap();
        manager.put(&user1, "photos/2024/b.jpg", Bytes::from_static(b"BB")).await.unwrap();
        store.put("user1docs/photos-old/c.jpg", Bytes::from_static(b"C")).await.unwrap();

        let data = manager.download_folder(&user1, "photos").await.unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(data)).unwrap();
        assert_eq!(archive.len(), 3);

        let mut body = String::new();
        archive
            .by_name("photos/2024/b.jpg")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "BB");
        assert!(archive.by_name("photos-old/c.jpg").is_err());
    }

    #[tokio::test]
    async fn test_download_folder_errors() {
        let (manager, _) = manager();
        let user1 = ctx("user1", "user1docs");

        assert!(matches!(
            manager.download_folder(&user1, "nothing").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            manager.download_folder(&user1, "/").await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_folder_removes_everything() {
        let (manager, store) = manager();
        let user1 = ctx("user1", "user1docs");
        manager.put(&user1, "old/", Bytes::new()).await.unwrap();
        for i in 0..10 {
            manager
                .put(&user1, &format!("old/sub{}/f{}.txt", i % 3, i), Bytes::from(vec![i as u8]))
                .await
                .unwrap();
        }
        manager.put(&user1, "keep.txt", Bytes::new()).await.unwrap();

        let report = manager.delete_folder(&user1, "old").await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.deleted.len(), 11);
        assert!(report.deleted.contains(&"old/".to_string()));

        assert!(manager.list(&user1, Some("old")).await.unwrap().is_empty());
        assert_eq!(store.keys().await, vec!["user1docs/keep.txt"]);
    }

    #[tokio::test]
    async fn test_delete_folder_requires_prefix() {
        let (manager, store) = manager();
        let admin = ctx("admin", "");
        store.put("a.txt", Bytes::new()).await.unwrap();

        assert!(matches!(
            manager.delete_folder(&admin, "").await,
            Err(Error::InvalidRequest(_))
        ));
        assert_eq!(store.len().await, 1);
    }

    /// Store that refuses to delete keys containing "locked"
    struct StickyStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl ObjectStore for StickyStore {
        fn name(&self) -> &str {
            "sticky"
        }

        async fn list(&self, prefix: &str, delimited: bool) -> Result<Listing> {
            self.inner.list(prefix, delimited).await
        }

        async fn get(&self, key: &str) -> Result<Bytes> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, body: Bytes) -> Result<()> {
            self.inner.put(key, body).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            if key.contains("locked") {
                return Err(Error::BackendStatus {
                    key: key.to_string(),
                    status: 403,
                });
            }
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_delete_folder_reports_partial_failure() {
        let store = Arc::new(StickyStore {
            inner: MemoryStore::new(),
        });
        let manager = FileManager::new(store.clone(), 2);
        let user1 = ctx("user1", "user1docs");
        for key in ["old/a.txt", "old/locked.txt", "old/b.txt"] {
            manager.put(&user1, key, Bytes::new()).await.unwrap();
        }

        let report = manager.delete_folder(&user1, "old").await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.deleted, vec!["old/a.txt", "old/b.txt"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "old/locked.txt");
        assert_eq!(store.inner.keys().await, vec!["user1docs/old/locked.txt"]);
    }
}
