//! S3 backend
//!
//! Works against AWS S3 and S3-compatible services (custom endpoint plus
//! path-style addressing). Credentials come from the config or, when absent,
//! from the environment / profile / instance metadata chain.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;

use super::{with_retry, Listing, ObjectInfo, ObjectStore};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::path::DELIMITER;

/// S3 bucket client
pub struct S3Store {
    bucket: Box<Bucket>,
    max_retries: u32,
    backoff: Duration,
}

impl S3Store {
    /// Create a client for the configured bucket
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse::<Region>()
                .map_err(|e| Error::Config(format!("invalid region {}: {}", config.region, e)))?,
        };

        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| Error::Config(format!("cannot resolve S3 credentials: {}", e)))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| Error::Config(format!("invalid bucket {}: {}", config.bucket, e)))?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self {
            bucket,
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
        })
    }

    async fn list_once(&self, prefix: &str, delimited: bool) -> Result<Listing> {
        let delimiter = delimited.then(|| DELIMITER.to_string());
        let pages = self
            .bucket
            .list(prefix.to_string(), delimiter)
            .await
            .map_err(|e| Error::Backend(format!("list {}: {}", prefix, e)))?;

        let mut listing = Listing::default();
        for page in pages {
            for object in page.contents {
                listing.objects.push(ObjectInfo {
                    last_modified: parse_timestamp(&object.last_modified),
                    key: object.key,
                    size: object.size,
                });
            }
            for common in page.common_prefixes.unwrap_or_default() {
                listing.common_prefixes.push(common.prefix);
            }
        }

        listing.objects.sort_by(|a, b| a.key.cmp(&b.key));
        listing.common_prefixes.sort();
        listing.common_prefixes.dedup();
        Ok(listing)
    }

    async fn get_once(&self, key: &str) -> Result<Bytes> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| Error::Backend(format!("get {}: {}", key, e)))?;

        check_status(key, response.status_code(), OnMissing::NotFound)?;
        Ok(response.bytes().clone())
    }

    async fn put_once(&self, key: &str, body: &[u8]) -> Result<()> {
        let response = self
            .bucket
            .put_object(key, body)
            .await
            .map_err(|e| Error::Backend(format!("put {}: {}", key, e)))?;

        check_status(key, response.status_code(), OnMissing::Fail)
    }

    async fn delete_once(&self, key: &str) -> Result<()> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| Error::Backend(format!("delete {}: {}", key, e)))?;

        // Deleting an absent key succeeds
        check_status(key, response.status_code(), OnMissing::Ok)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn list(&self, prefix: &str, delimited: bool) -> Result<Listing> {
        let op = format!("S3 list {}", prefix);
        with_retry(self.max_retries, self.backoff, &op, || {
            self.list_once(prefix, delimited)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let op = format!("S3 get {}", key);
        with_retry(self.max_retries, self.backoff, &op, || self.get_once(key)).await
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        let op = format!("S3 put {}", key);
        with_retry(self.max_retries, self.backoff, &op, || self.put_once(key, &body)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let op = format!("S3 delete {}", key);
        with_retry(self.max_retries, self.backoff, &op, || self.delete_once(key)).await
    }
}

/// What a 404 from the bucket means to the calling operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnMissing {
    NotFound,
    Ok,
    Fail,
}

fn check_status(key: &str, status: u16, on_missing: OnMissing) -> Result<()> {
    match (status, on_missing) {
        (200..=299, _) | (404, OnMissing::Ok) => Ok(()),
        (404, OnMissing::NotFound) => Err(Error::NotFound(key.to_string())),
        (status, _) => Err(Error::BackendStatus {
            key: key.to_string(),
            status,
        }),
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        let t = parse_timestamp("2025-01-01T12:30:00.000Z").unwrap();
        assert_eq!(t.to_rfc3339(), "2025-01-01T12:30:00+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_client_for_custom_endpoint() {
        let config = StorageConfig {
            bucket: "files".into(),
            endpoint: Some("http://127.0.0.1:9000".into()),
            path_style: true,
            access_key: Some("AKID".into()),
            secret_key: Some("secret".into()),
            ..Default::default()
        };
        let store = S3Store::new(&config).unwrap();
        assert_eq!(store.name(), "s3");
        assert_eq!(store.max_retries, 2);
        assert_eq!(store.backoff, config.retry_backoff());
    }

    #[test]
    fn test_get_status_mapping() {
        assert!(check_status("a.txt", 200, OnMissing::NotFound).is_ok());
        assert!(matches!(
            check_status("a.txt", 404, OnMissing::NotFound),
            Err(Error::NotFound(key)) if key == "a.txt"
        ));
        assert!(matches!(
            check_status("a.txt", 403, OnMissing::NotFound),
            Err(Error::BackendStatus { status: 403, .. })
        ));

        let err = check_status("a.txt", 503, OnMissing::NotFound).unwrap_err();
        assert!(matches!(err, Error::BackendStatus { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_put_status_mapping() {
        assert!(check_status("a.txt", 200, OnMissing::Fail).is_ok());
        // 404 on write is a missing bucket, never a missing file
        assert!(matches!(
            check_status("a.txt", 404, OnMissing::Fail),
            Err(Error::BackendStatus { status: 404, .. })
        ));

        let denied = check_status("a.txt", 403, OnMissing::Fail).unwrap_err();
        assert!(!denied.is_retryable());
        assert!(check_status("a.txt", 503, OnMissing::Fail).unwrap_err().is_retryable());
    }

    #[test]
    fn test_delete_status_mapping() {
        assert!(check_status("a.txt", 204, OnMissing::Ok).is_ok());
        assert!(check_status("a.txt", 404, OnMissing::Ok).is_ok());
        assert!(matches!(
            check_status("a.txt", 403, OnMissing::Ok),
            Err(Error::BackendStatus { status: 403, .. })
        ));
        assert!(check_status("a.txt", 503, OnMissing::Ok).unwrap_err().is_retryable());
    }
}
