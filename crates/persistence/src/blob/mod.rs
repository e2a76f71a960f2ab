//! Blob-store interface.
//!
//! Offloaded payload fields live in a blob store with put/get/delete by key
//! and prefix-delete for cleanup. Presigned URL issuance is an engine
//! concern the core never calls.

mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use memory::InMemoryBlob;
#[cfg(feature = "s3")]
pub use s3::S3Blob;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by blob engines.
#[derive(Error, Debug)]
pub enum BlobError {
    /// No object under the requested key.
    #[error("blob not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The engine is temporarily unreachable.
    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    /// Internal engine error.
    #[error("blob store internal error: {0}")]
    Internal(String),
}

/// Interface of the blob store.
#[async_trait]
pub trait BlobApi: Send + Sync {
    /// Stores an object under `key`, replacing any existing one.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), BlobError>;

    /// Returns the object stored under `key`, or `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError>;

    /// Deletes the object under `key`. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Deletes every object whose key starts with `prefix`, returning the
    /// number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, BlobError>;
}
