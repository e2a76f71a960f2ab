//! Resource-facing services over the version store.

pub mod bundle;
pub mod data;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-facing result of a successful single-resource operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceResult {
    /// Resource type of the payload.
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    /// Logical id.
    pub id: String,
    /// Version this result reflects.
    pub vid: u64,
    /// System stamp of that version.
    #[serde(rename = "lastModified")]
    pub last_modified: Option<DateTime<Utc>>,
    /// The decoded resource payload.
    pub resource: Value,
}
