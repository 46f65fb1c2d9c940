//! Archive store contract.
//!
//! The authoritative cache archive lives in durable, versioned object
//! storage addressed by a fixed key. The synchronizer only needs three
//! operations from it: last-modified metadata, fetch, and publish.
//! [`DirStore`] is the bundled local-directory implementation; remote
//! transports plug in behind the same trait.

mod dir;

pub use dir::DirStore;

use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;
use thiserror::Error;

/// Errors from archive store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("object digest mismatch for {key}: expected {expected}, got {actual}")]
    DigestMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("store error for {key}: {message}")]
    Remote { key: String, message: String },
}

impl StoreError {
    /// True when the object simply does not exist (not a failure).
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Durable object storage holding the authoritative cache archive.
pub trait ArchiveStore {
    /// Last-modified timestamp of the object at `key`.
    fn head(&self, key: &str) -> Result<DateTime<Utc>, StoreError>;

    /// Fetch the object at `key` into the local file `dest`.
    fn get(&self, key: &str, dest: &Path) -> Result<(), StoreError>;

    /// Publish the file at `src` under `key`, replacing any existing object.
    fn put(&self, key: &str, src: &Path) -> Result<(), StoreError>;
}
