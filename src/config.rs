//! S3Desk Configuration
//!
//! This module provides configuration structures for the S3Desk
//! file manager gateway.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main S3Desk configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct S3DeskConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Credential store configuration
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Path prefix all routes are mounted under (e.g. "/prod")
    #[serde(default)]
    pub base_path: String,

    /// Maximum accepted upload size in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

/// Storage backend kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// S3 or any S3-compatible service
    #[default]
    S3,
    /// In-process store, contents are lost on restart
    Memory,
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: StorageBackend,

    /// Bucket name
    #[serde(default)]
    pub bucket: String,

    /// Bucket region
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible services (MinIO, Ceph, ...)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Use path-style addressing instead of virtual-hosted buckets
    #[serde(default)]
    pub path_style: bool,

    /// Static access key (falls back to the environment credential chain)
    #[serde(default)]
    pub access_key: Option<String>,

    /// Static secret key
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Retries for transient backend failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between retries in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Concurrent backend calls for folder download/delete
    #[serde(default = "default_bulk_concurrency")]
    pub bulk_concurrency: usize,
}

/// Where the credential secret is read from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// `<secrets_dir>/<secret_name>`
    #[default]
    File,
    /// Environment variable named `secret_name`
    Env,
}

/// Credential store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Secret source
    #[serde(default)]
    pub source: CredentialSource,

    /// Name of the secret holding the user directory
    #[serde(default = "default_secret_name")]
    pub secret_name: String,

    /// Directory holding mounted secrets
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: PathBuf,

    /// How long a loaded user directory may be reused (0 = reload per request)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_upload_mb() -> usize {
    100
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_bulk_concurrency() -> usize {
    8
}

fn default_secret_name() -> String {
    "s3desk-users".to_string()
}

fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/run/secrets")
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            base_path: String::new(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            path_style: false,
            access_key: None,
            secret_key: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            bulk_concurrency: default_bulk_concurrency(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            source: CredentialSource::default(),
            secret_name: default_secret_name(),
            secrets_dir: default_secrets_dir(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ServerConfig {
    /// Get the maximum upload size in bytes
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

impl StorageConfig {
    /// Get the retry backoff as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl CredentialsConfig {
    /// Get the cache TTL as Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Path of the mounted credential secret
    pub fn secret_path(&self) -> PathBuf {
        self.secrets_dir.join(&self.secret_name)
    }
}

impl S3DeskConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: S3DeskConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.bind_address.is_empty() {
            return Err(crate::Error::Config("server.bind_address cannot be empty".into()));
        }

        let base = &self.server.base_path;
        if !base.is_empty() && (!base.starts_with('/') || base == "/") {
            return Err(crate::Error::Config(
                "server.base_path must be empty or start with '/' followed by a segment".into(),
            ));
        }

        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.is_empty() {
            return Err(crate::Error::Config("storage.bucket cannot be empty".into()));
        }

        if self.storage.access_key.is_some() != self.storage.secret_key.is_some() {
            return Err(crate::Error::Config(
                "storage.access_key and storage.secret_key must be set together".into(),
            ));
        }

        if self.storage.bulk_concurrency == 0 {
            return Err(crate::Error::Config("storage.bulk_concurrency must be at least 1".into()));
        }

        if self.credentials.secret_name.is_empty() {
            return Err(crate::Error::Config("credentials.secret_name cannot be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:9000"
base_path = "/prod"
max_upload_mb = 10

[storage]
bucket = "my-s3-file-manager"
region = "eu-west-1"
endpoint = "http://localhost:9000"
path_style = true

[credentials]
source = "env"
secret_name = "MY_S3_USERS"
cache_ttl_secs = 0
"#;

        let config = S3DeskConfig::from_str(toml).unwrap();
        assert_eq!(config.server.base_path, "/prod");
        assert_eq!(config.server.max_upload_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert!(config.storage.path_style);
        assert_eq!(config.credentials.source, CredentialSource::Env);
        assert_eq!(config.credentials.cache_ttl(), Duration::ZERO);
        assert_eq!(config.storage.retry_backoff(), Duration::from_millis(200));
        assert_eq!(config.storage.max_retries, 2);
    }

    #[test]
    fn test_memory_backend_needs_no_bucket() {
        let config = S3DeskConfig::from_str("[storage]\nbackend = \"memory\"\n").unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.credentials.secret_path(), PathBuf::from("/run/secrets/s3desk-users"));
    }

    #[test]
    fn test_oversized_upload_limit_saturates() {
        let server = ServerConfig {
            max_upload_mb: usize::MAX,
            ..Default::default()
        };
        assert_eq!(server.max_upload_bytes(), usize::MAX);
        assert_eq!(ServerConfig::default().max_upload_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn test_validation_errors() {
        assert!(S3DeskConfig::from_str("").is_err()); // s3 backend without bucket
        assert!(S3DeskConfig::from_str(
            "[storage]\nbackend = \"memory\"\n[server]\nbase_path = \"prod\"\n"
        )
        .is_err());
        assert!(S3DeskConfig::from_str(
            "[storage]\nbucket = \"b\"\naccess_key = \"AKID\"\n"
        )
        .is_err());
    }
}
