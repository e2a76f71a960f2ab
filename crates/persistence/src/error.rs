//! Error types for the persistence core.
//!
//! This module defines all error types surfaced by the persistence core,
//! organized as a hierarchy that separates resource-state errors, tenancy
//! errors, bundle errors, export errors, and engine errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::service::bundle::BatchResponse;

/// The primary error type for all persistence operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Tenancy errors
    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    /// Bundle transaction errors
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// Export admission and lifecycle errors
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Engine-level errors (KV, blob, index)
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors related to resource state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// No current version of the resource is visible.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// The specific version of the resource was not found or is not readable.
    #[error("version not found: {resource_type}/{id}/_history/{vid}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        vid: u64,
    },

    /// The resource payload or its id is unusable for the requested write.
    #[error("invalid resource: {message}")]
    InvalidResource { message: String },
}

impl ResourceError {
    /// Not-found error for a `(resourceType, id)` pair.
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Version-not-found error for a `(resourceType, id, vid)` triple.
    pub fn version_not_found(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        vid: u64,
    ) -> Self {
        Self::VersionNotFound {
            resource_type: resource_type.into(),
            id: id.into(),
            vid,
        }
    }

    /// Invalid-resource error with the given message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }
}

/// Errors related to tenancy.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// The request's tenant presence disagrees with the configured mode.
    #[error(
        "tenancy mismatch: tenant supplied = {tenant_supplied}, multi-tenancy enabled = {multi_tenancy_enabled}"
    )]
    Mismatch {
        tenant_supplied: bool,
        multi_tenancy_enabled: bool,
    },
}

/// Errors related to bundle transactions.
#[derive(Error, Debug)]
pub enum BundleError {
    /// One or more participants of the bundle failed; the bundle was rolled back.
    #[error("bundle failed: {reason}")]
    Failed {
        reason: String,
        responses: Vec<BatchResponse>,
    },

    /// The bundle input itself was unusable (e.g. update without an id).
    #[error("malformed bundle entry {index}: {message}")]
    MalformedEntry { index: usize, message: String },
}

/// Errors related to export jobs.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Admission cap hit, per user or system-wide.
    #[error("too many concurrent export requests")]
    TooManyConcurrentRequests,

    /// The job is in a state that does not permit the requested transition.
    #[error("export job {job_id} is already in state {status}")]
    InvalidStatusTransition { job_id: String, status: String },
}

/// Errors originating from the KV, blob, or index engines.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The engine is temporarily unreachable.
    #[error("{engine} unavailable: {message}")]
    Unavailable { engine: String, message: String },

    /// Internal engine error.
    #[error("internal error in {engine}: {message}")]
    Internal { engine: String, message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl BackendError {
    /// Internal-error constructor for the named engine.
    pub fn internal(engine: &str, message: impl Into<String>) -> Self {
        Self::Internal {
            engine: engine.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for persistence operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::Serialization {
            message: err.to_string(),
        })
    }
}
