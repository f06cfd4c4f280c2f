//! Request authorization
//!
//! Every request carries basic-auth credentials that are checked against the
//! user directory held in an external secret. A successful check yields an
//! [`AuthorizedContext`] naming the user and the root folder they are
//! confined to.

pub mod basic;
pub mod credentials;

pub use basic::{authorize, hash_password, AuthFailure, AuthorizedContext};
pub use credentials::{
    store_from_config, CachedCredentialStore, CredentialRecord, CredentialStore,
    EnvSecretStore, SecretFileStore, UserDirectory,
};
