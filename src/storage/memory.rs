//! In-process object store

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Listing, ObjectInfo, ObjectStore};
use crate::error::{Error, Result};
use crate::path::DELIMITER;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    modified: DateTime<Utc>,
}

/// Objects kept in a sorted map, mirroring S3 listing order
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// All keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, prefix: &str, delimited: bool) -> Result<Listing> {
        let objects = self.objects.read().await;

        let mut listing = Listing::default();
        let mut common_prefixes = BTreeSet::new();

        for (key, object) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }

            let rest = &key[prefix.len()..];
            if delimited {
                if let Some(pos) = rest.find(DELIMITER) {
                    common_prefixes.insert(format!("{}{}", prefix, &rest[..=pos]));
                    continue;
                }
            }

            listing.objects.push(ObjectInfo {
                key: key.clone(),
                size: object.body.len() as u64,
                last_modified: Some(object.modified),
            });
        }

        listing.common_prefixes = common_prefixes.into_iter().collect();
        Ok(listing)
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for key in [
            "user1docs/",
            "user1docs/report.pdf",
            "user1docs/photos/",
            "user1docs/photos/a.jpg",
            "user1docs/photos/2024/b.jpg",
            "user1docs2/other.txt",
            "top.txt",
        ] {
            store.put(key, Bytes::from(key.to_string())).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put("a/b.txt", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(store.get("a/b.txt").await.unwrap(), Bytes::from_static(b"hello"));

        store.delete("a/b.txt").await.unwrap();
        assert!(matches!(store.get("a/b.txt").await, Err(Error::NotFound(_))));

        // Deleting again is not an error
        store.delete("a/b.txt").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delimited_listing() {
        let store = seeded().await;
        let listing = store.list("user1docs/", true).await.unwrap();

        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["user1docs/", "user1docs/report.pdf"]);
        assert_eq!(listing.common_prefixes, vec!["user1docs/photos/"]);
    }

    #[tokio::test]
    async fn test_recursive_listing() {
        let store = seeded().await;
        let listing = store.list("user1docs/photos/", false).await.unwrap();

        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["user1docs/photos/", "user1docs/photos/2024/b.jpg", "user1docs/photos/a.jpg"]
        );
        assert!(listing.common_prefixes.is_empty());
        assert_eq!(listing.objects[2].size, "user1docs/photos/a.jpg".len() as u64);
    }

    #[tokio::test]
    async fn test_listing_whole_bucket() {
        let store = seeded().await;
        let listing = store.list("", true).await.unwrap();
        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["top.txt"]);
        assert_eq!(listing.common_prefixes, vec!["user1docs/", "user1docs2/"]);
    }
}
