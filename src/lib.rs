//! S3Desk - File Manager Gateway for S3 Buckets
//!
//! A small HTTP service that lets a browser file manager list, upload,
//! download and delete objects in a single bucket. Every request carries
//! basic-auth credentials that are checked against a user directory held
//! in an external secret.
//!
//! # Architecture
//!
//! ```text
//! request -> auth (authorize) -> path (resolve) -> manager (dispatch) -> storage
//! ```
//!
//! Each user may be confined to a root folder: a key prefix that every
//! storage key touched on their behalf must start with. Folders follow the
//! usual object-storage convention of keys ending in `/`.
//!
//! # Features
//!
//! - Basic auth with constant-time password checks and optional hashed credentials
//! - Per-user root folders with traversal rejection
//! - Folder creation, zip download and recursive delete with partial-failure reports
//! - S3 and S3-compatible backends, plus an in-memory backend for development
//! - Permissive CORS for browser front ends

pub mod api;
pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod manager;
pub mod path;
pub mod storage;

pub use config::S3DeskConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::auth::{AuthorizedContext, CredentialStore, UserDirectory};
    pub use crate::config::S3DeskConfig;
    pub use crate::error::{Error, Result};
    pub use crate::manager::{DeleteReport, FileManager};
    pub use crate::path::{RootFolder, StorageEntry};
    pub use crate::storage::{MemoryStore, ObjectStore, S3Store};
}
