//! Meridian Persistence Core
//!
//! This crate is the persistence and change-propagation core of a
//! multi-tenant, versioned document store for structured medical resources.
//! It provides:
//!
//! - **Versioned CRUD with optimistic concurrency**: every mutation of a
//!   logical resource produces a new immutable version whose lifecycle
//!   field moves through a small state machine.
//! - **Atomic bundles**: mixed create/update/delete/read batches committed
//!   all-or-nothing via two-phase commit over bounded conditional-write
//!   transactions, with the lifecycle states doubling as locks.
//! - **Hybrid storage**: oversized payload fields of registered resource
//!   types are offloaded to a blob store, blob-first, and spliced back on
//!   read.
//! - **Change propagation**: a stateless consumer of the primary table's
//!   change feed mirrors steady-state items into per-resource-type search
//!   indices behind stable aliases.
//! - **Export registration**: long-running export jobs with per-user and
//!   system-wide admission caps.
//!
//! # Engines
//!
//! The KV, blob, and index engines sit behind the [`kv::KvApi`],
//! [`blob::BlobApi`], and [`index::SearchApi`] traits. In-memory engines
//! ship by default; `s3` and `elasticsearch` cargo features add AWS S3 and
//! Elasticsearch implementations.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use meridian_persistence::config::CoreConfig;
//! use meridian_persistence::kv::InMemoryKv;
//! use meridian_persistence::service::bundle::BundleService;
//! use meridian_persistence::service::data::DataService;
//! use meridian_persistence::store::VersionStore;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::default();
//! let store = Arc::new(VersionStore::new(Arc::new(InMemoryKv::new())));
//! let bundle = Arc::new(BundleService::new(store.clone(), config.clone()));
//! let data = DataService::new(store, bundle, config);
//!
//! let created = data
//!     .create_resource(
//!         &json!({
//!             "resourceType": "Patient",
//!             "name": [{"family": "Jameson", "given": ["Matt"]}]
//!         }),
//!         "Patient",
//!         None,
//!     )
//!     .await?;
//! assert_eq!(created.vid, 1);
//!
//! let read = data.read_resource("Patient", &created.id, None).await?;
//! assert_eq!(read.resource["meta"]["versionId"], "1");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod blob;
pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod hybrid;
pub mod index;
pub mod kv;
pub mod params;
pub mod propagator;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use config::CoreConfig;
pub use error::{StorageError, StorageResult};
pub use types::{DocumentStatus, ItemKey, StoredItem};

pub use export::ExportRegistry;
pub use hybrid::{HybridStore, OffloadRegistry};
pub use propagator::ChangePropagator;
pub use service::bundle::BundleService;
pub use service::data::DataService;
pub use store::VersionStore;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
