//! Basic authentication
//!
//! Decodes `Authorization: Basic <base64(user:password)>`, looks the user up
//! in a [`UserDirectory`] snapshot and resolves their root folder.
//!
//! Passwords are compared as SHA-256 digests in constant time. A stored
//! password is either plaintext or `sha256:<hex digest>`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::credentials::UserDirectory;
use crate::path::RootFolder;

/// Prefix marking a hashed password in the credential secret
pub const HASH_PREFIX: &str = "sha256:";

/// Why a request failed authorization.
///
/// Only logged; callers always see a plain 401.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("missing Authorization header")]
    MissingCredentials,

    #[error("malformed basic credentials")]
    MalformedCredentials,

    #[error("unknown user")]
    UnknownUser,

    #[error("invalid password")]
    InvalidPassword,
}

/// Identity of an authorized request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedContext {
    pub username: String,
    pub root_folder: RootFolder,
}

/// Split a basic-auth header value into username and password
pub fn decode_basic(header: &str) -> Result<(String, String), AuthFailure> {
    let (scheme, encoded) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthFailure::MalformedCredentials)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthFailure::MalformedCredentials);
    }

    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthFailure::MalformedCredentials)?;
    let decoded = String::from_utf8(raw).map_err(|_| AuthFailure::MalformedCredentials)?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthFailure::MalformedCredentials)?;
    if username.is_empty() {
        return Err(AuthFailure::MalformedCredentials);
    }

    Ok((username.to_string(), password.to_string()))
}

/// Encode a basic-auth header value
pub fn encode_basic(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}

/// Authorize a request against a directory snapshot
pub fn authorize(
    header: Option<&str>,
    users: &UserDirectory,
) -> Result<AuthorizedContext, AuthFailure> {
    let header = header.ok_or(AuthFailure::MissingCredentials)?;
    let (username, password) = decode_basic(header)?;

    let record = match users.get(&username) {
        Some(r) => r,
        None => {
            // Burn the same work as a real check
            let _ = verify_password(&password, "");
            return Err(AuthFailure::UnknownUser);
        }
    };

    if !verify_password(&password, &record.password) {
        return Err(AuthFailure::InvalidPassword);
    }

    Ok(AuthorizedContext {
        root_folder: RootFolder::new(&record.root_folder),
        username,
    })
}

/// Check a supplied password against the stored form
pub fn verify_password(supplied: &str, stored: &str) -> bool {
    let supplied_digest = Sha256::digest(supplied.as_bytes());

    let expected = match stored.strip_prefix(HASH_PREFIX) {
        Some(hex_digest) => match hex::decode(hex_digest.trim()) {
            Ok(d) if d.len() == 32 => d,
            _ => return false,
        },
        None => Sha256::digest(stored.as_bytes()).to_vec(),
    };

    constant_time_eq(&supplied_digest, &expected)
}

/// Hashed form of a password for the credential secret
pub fn hash_password(password: &str) -> String {
    format!("{}{}", HASH_PREFIX, hex::encode(Sha256::digest(password.as_bytes())))
}

/// Constant-time comparison of byte slices.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}
