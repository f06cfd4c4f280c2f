//! Credential store
//!
//! The user directory lives in an external JSON secret of the form
//! `{"<username>": {"password": "...", "root_folder": "..."}}`. Every request
//! takes a snapshot of it through [`CredentialStore::load`] and hands that
//! snapshot to the authorizer explicitly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::{CredentialSource, CredentialsConfig};
use crate::error::{Error, Result};

/// One user's entry in the credential secret
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Plaintext password or `sha256:<hex>` digest
    pub password: String,

    /// Key prefix the user is confined to; empty means the whole bucket
    #[serde(default)]
    pub root_folder: String,
}

impl CredentialRecord {
    pub fn new(password: impl Into<String>, root_folder: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            root_folder: root_folder.into(),
        }
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("password", &"<redacted>")
            .field("root_folder", &self.root_folder)
            .finish()
    }
}

/// Snapshot of the credential secret, keyed by username
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserDirectory {
    users: HashMap<String, CredentialRecord>,
}

impl UserDirectory {
    /// Parse the JSON secret string
    pub fn from_json(secret: &str) -> Result<Self> {
        Ok(serde_json::from_str(secret)?)
    }

    /// Add or replace a user
    pub fn with_user(mut self, username: impl Into<String>, record: CredentialRecord) -> Self {
        self.users.insert(username.into(), record);
        self
    }

    pub fn get(&self, username: &str) -> Option<&CredentialRecord> {
        self.users.get(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Source of user directory snapshots
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the current user directory
    async fn load(&self) -> Result<Arc<UserDirectory>>;
}

/// A fixed directory, for embedding and tests
#[async_trait]
impl CredentialStore for UserDirectory {
    async fn load(&self) -> Result<Arc<UserDirectory>> {
        Ok(Arc::new(self.clone()))
    }
}

/// Secret mounted as a file (`<secrets_dir>/<secret_name>`)
pub struct SecretFileStore {
    path: PathBuf,
}

impl SecretFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for SecretFileStore {
    async fn load(&self) -> Result<Arc<UserDirectory>> {
        let secret = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::CredentialStore(format!("cannot read secret {:?}: {}", self.path, e))
        })?;
        Ok(Arc::new(UserDirectory::from_json(&secret)?))
    }
}

/// Secret passed through an environment variable
pub struct EnvSecretStore {
    var: String,
}

impl EnvSecretStore {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialStore for EnvSecretStore {
    async fn load(&self) -> Result<Arc<UserDirectory>> {
        let secret = std::env::var(&self.var).map_err(|e| {
            Error::CredentialStore(format!("cannot read secret variable {}: {}", self.var, e))
        })?;
        Ok(Arc::new(UserDirectory::from_json(&secret)?))
    }
}

/// Reuses a loaded directory for at most `ttl`.
///
/// A password change or a new user becomes visible once the cached
/// snapshot expires, so `ttl` is the staleness window. A zero `ttl`
/// reads the inner store on every call.
pub struct CachedCredentialStore<S> {
    inner: S,
    ttl: Duration,
    cached: RwLock<Option<(Instant, Arc<UserDirectory>)>>,
}

impl<S: CredentialStore> CachedCredentialStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Drop the cached snapshot so the next load reads the secret again
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    fn fresh(&self, entry: &Option<(Instant, Arc<UserDirectory>)>) -> Option<Arc<UserDirectory>> {
        match entry {
            Some((loaded_at, users)) if loaded_at.elapsed() < self.ttl => Some(Arc::clone(users)),
            _ => None,
        }
    }
}

#[async_trait]
impl<S: CredentialStore> CredentialStore for CachedCredentialStore<S> {
    async fn load(&self) -> Result<Arc<UserDirectory>> {
        if self.ttl.is_zero() {
            return self.inner.load().await;
        }

        if let Some(users) = self.fresh(&*self.cached.read().await) {
            return Ok(users);
        }

        let mut cached = self.cached.write().await;
        // Another request may have refreshed it while we waited for the lock
        if let Some(users) = self.fresh(&cached) {
            return Ok(users);
        }

        let users = self.inner.load().await?;
        tracing::debug!("Loaded credential secret ({} users)", users.len());
        *cached = Some((Instant::now(), Arc::clone(&users)));
        Ok(users)
    }
}

/// Build the configured credential store
pub fn store_from_config(config: &CredentialsConfig) -> Arc<dyn CredentialStore> {
    let ttl = config.cache_ttl();
    match config.source {
        CredentialSource::File => {
            let path = config.secret_path();
            tracing::info!("Reading credentials from {:?} (cache ttl {:?})", path, ttl);
            Arc::new(CachedCredentialStore::new(SecretFileStore::new(path), ttl))
        }
        CredentialSource::Env => {
            tracing::info!(
                "Reading credentials from ${} (cache ttl {:?})",
                config.secret_name,
                ttl
            );
            Arc::new(CachedCredentialStore::new(
                EnvSecretStore::new(config.secret_name.clone()),
                ttl,
            ))
        }
    }
}
