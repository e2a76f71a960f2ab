//! Search-index interface.
//!
//! The change propagator mirrors the primary table into an inverted-index
//! engine through this trait: index/alias bootstrap plus batched document
//! upserts and deletes addressed through a stable alias.

mod memory;

#[cfg(feature = "elasticsearch")]
mod elasticsearch;

pub use memory::InMemorySearch;

#[cfg(feature = "elasticsearch")]
pub use self::elasticsearch::ElasticsearchIndex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by index engines.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The alias used by a bulk operation does not resolve to an index.
    #[error("unknown alias: {alias}")]
    UnknownAlias {
        /// The unresolved alias.
        alias: String,
    },

    /// One or more operations of a bulk request were rejected.
    #[error("bulk execution failed for ids: {ids:?}")]
    BulkFailed {
        /// Document ids of the rejected operations.
        ids: Vec<String>,
    },

    /// The engine is temporarily unreachable.
    #[error("search index unavailable: {0}")]
    Unavailable(String),

    /// Internal engine error.
    #[error("search index internal error: {0}")]
    Internal(String),
}

/// One operation of a bulk request, addressed through an alias.
#[derive(Debug, Clone)]
pub enum IndexOp {
    /// Insert or replace the document stored under `id`.
    Upsert {
        /// Target alias.
        alias: String,
        /// Document id.
        id: String,
        /// Document body.
        document: Value,
    },
    /// Delete the document stored under `id`. Absent ids are a no-op.
    Delete {
        /// Target alias.
        alias: String,
        /// Document id.
        id: String,
    },
}

impl IndexOp {
    /// The document id this operation addresses.
    pub fn id(&self) -> &str {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

/// Interface of the search-index engine.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Returns `true` if the physical index exists.
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError>;

    /// Returns `true` if the alias exists.
    async fn alias_exists(&self, alias: &str) -> Result<bool, IndexError>;

    /// Creates a physical index with the given mapping. Racing an existing
    /// index is tolerated.
    async fn create_index(&self, index: &str, mapping: Value) -> Result<(), IndexError>;

    /// Attaches an alias to an existing physical index.
    async fn attach_alias(&self, index: &str, alias: &str) -> Result<(), IndexError>;

    /// Executes a batch of upserts and deletes.
    async fn bulk(&self, operations: Vec<IndexOp>) -> Result<(), IndexError>;
}
