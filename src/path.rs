//! Path isolation
//!
//! Maps caller-supplied relative keys onto storage keys under the caller's
//! root folder. Folders are a key-prefix convention: a key ending in `/` is a
//! folder marker, everything else is a file.

use crate::error::{Error, Result};

/// Key delimiter used for the folder convention
pub const DELIMITER: char = '/';

/// Prefix a user is confined to.
///
/// Stored normalized: either empty (whole bucket) or `seg/seg/` with a
/// single trailing delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootFolder {
    prefix: String,
}

impl RootFolder {
    /// Normalize a root folder as written in the credential secret
    pub fn new(raw: &str) -> Self {
        let segments: Vec<&str> = raw
            .split(DELIMITER)
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();

        let prefix = if segments.is_empty() {
            String::new()
        } else {
            format!("{}{}", segments.join("/"), DELIMITER)
        };

        Self { prefix }
    }

    /// Whole-bucket access
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.prefix.is_empty()
    }

    /// Storage prefix every key of this user starts with
    pub fn as_prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether a storage key lies under this root
    pub fn contains(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Storage key as the user sees it, or None if it lies outside the root
    pub fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())
    }
}

/// An object-storage key, tagged by the folder convention
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageEntry {
    /// Leaf object
    File(String),
    /// Folder marker or common prefix, always ending in `/`
    FolderPrefix(String),
}

impl StorageEntry {
    /// Classify a raw storage key
    pub fn from_key(key: impl Into<String>) -> Self {
        let key = key.into();
        if key.ends_with(DELIMITER) {
            StorageEntry::FolderPrefix(key)
        } else {
            StorageEntry::File(key)
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StorageEntry::File(k) | StorageEntry::FolderPrefix(k) => k,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, StorageEntry::FolderPrefix(_))
    }

    pub fn into_key(self) -> String {
        match self {
            StorageEntry::File(k) | StorageEntry::FolderPrefix(k) => k,
        }
    }
}

/// Split a requested key into clean segments.
///
/// Empty and `.` segments are dropped; `..` and control characters are
/// rejected outright rather than resolved.
fn clean_segments(requested: &str) -> Result<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in requested.split(DELIMITER) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::PathViolation(format!(
                    "parent directory reference in {:?}",
                    requested
                )))
            }
            s if s.chars().any(char::is_control) => {
                return Err(Error::PathViolation(format!(
                    "control character in {:?}",
                    requested
                )))
            }
            s => segments.push(s),
        }
    }
    Ok(segments)
}

/// Resolve a single-object key under `root`.
///
/// A trailing `/` yields a folder marker, anything else a file.
pub fn resolve(root: &RootFolder, requested: &str) -> Result<StorageEntry> {
    let segments = clean_segments(requested)?;
    if segments.is_empty() {
        return Err(Error::InvalidRequest("key cannot be empty".into()));
    }

    let key = format!("{}{}", root.as_prefix(), segments.join("/"));
    debug_assert!(root.contains(&key));

    if requested.ends_with(DELIMITER) {
        Ok(StorageEntry::FolderPrefix(format!("{}{}", key, DELIMITER)))
    } else {
        Ok(StorageEntry::File(key))
    }
}

/// Resolve a folder prefix under `root`.
///
/// An empty request resolves to the root prefix itself.
pub fn resolve_folder(root: &RootFolder, requested: &str) -> Result<String> {
    let segments = clean_segments(requested)?;
    if segments.is_empty() {
        return Ok(root.as_prefix().to_string());
    }
    Ok(format!("{}{}{}", root.as_prefix(), segments.join("/"), DELIMITER))
}
