//! Object storage backends
//!
//! The gateway only needs five primitives from a backend: list, get, put,
//! delete and a delimiter-aware listing. `S3Store` talks to S3 or any
//! S3-compatible service; `MemoryStore` keeps objects in process for local
//! development and tests.

mod memory;
mod s3_store;

pub use memory::MemoryStore;
pub use s3_store::S3Store;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of a list call
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Objects whose key starts with the prefix, sorted by key
    pub objects: Vec<ObjectInfo>,
    /// Sub-prefixes ending in the delimiter (delimited listings only), sorted
    pub common_prefixes: Vec<String>,
}

/// Minimal object storage interface
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// List keys under `prefix`.
    ///
    /// With `delimited`, keys containing a `/` after the prefix are rolled up
    /// into `common_prefixes` instead of being returned as objects.
    async fn list(&self, prefix: &str, delimited: bool) -> Result<Listing>;

    /// Fetch an object, `Error::NotFound` if absent
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Create or replace an object
    async fn put(&self, key: &str, body: Bytes) -> Result<()>;

    /// Remove an object; removing an absent key succeeds
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Build the configured backend
pub fn store_from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::S3 => {
            let store = S3Store::new(config)?;
            tracing::info!("Using S3 bucket '{}' in {}", config.bucket, config.region);
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, objects are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Run `call`, retrying retryable errors up to `max_retries` times with
/// linearly growing backoff.
pub async fn with_retry<T, F, Fut>(
    max_retries: u32,
    backoff: Duration,
    op: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = backoff * attempt;
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    op,
                    attempt,
                    max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(2, Duration::from_millis(1), "get a", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Backend("connection reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(1, Duration::from_millis(1), "put a", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::BackendStatus { key: "a".into(), status: 503 })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_skips_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(5, Duration::from_millis(1), "get a", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::NotFound("a".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_memory_backend_from_config() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        assert_eq!(store_from_config(&config).unwrap().name(), "memory");
    }
}
