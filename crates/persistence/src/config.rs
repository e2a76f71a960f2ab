//! Runtime configuration for the persistence core.
//!
//! Configuration is environment-derived, with programmatic construction for
//! tests and embedders.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ENABLE_MULTI_TENANCY` | false | Whether requests must carry a tenantId |
//! | `UPDATE_CREATE_SUPPORTED` | false | Whether updating a missing id synthesizes a create |
//! | `LOCK_DURATION_MS` | 35000 | Stale-lock reclaim threshold |
//! | `MAX_CONCURRENT_EXPORT_PER_USER` | 1 | Per-requester export admission cap |
//! | `MAX_SYSTEM_CONCURRENT_EXPORT` | 2 | System-wide export admission cap |
//! | `BULK_KEY_SEPARATOR` | `_` | Separator between id and object uuid in blob keys |
//!
//! # Example
//!
//! ```rust
//! use meridian_persistence::config::CoreConfig;
//!
//! // From the environment
//! let config = CoreConfig::from_env();
//!
//! // Or programmatically
//! let config = CoreConfig {
//!     enable_multi_tenancy: true,
//!     ..Default::default()
//! };
//! ```

use clap::Parser;

use crate::error::{StorageResult, TenancyError};

/// Configuration for the persistence core.
#[derive(Debug, Clone, Parser)]
#[command(name = "meridian-persistence")]
pub struct CoreConfig {
    /// Require (true) or forbid (false) a tenantId on every request.
    #[arg(long, env = "ENABLE_MULTI_TENANCY", default_value = "false")]
    pub enable_multi_tenancy: bool,

    /// Allow updates to a missing id to fall through to a create.
    #[arg(long, env = "UPDATE_CREATE_SUPPORTED", default_value = "false")]
    pub update_create_supported: bool,

    /// Milliseconds after which a transient lock may be forcibly reclaimed.
    #[arg(long, env = "LOCK_DURATION_MS", default_value = "35000")]
    pub lock_duration_ms: u64,

    /// Maximum active export jobs per requester.
    #[arg(long, env = "MAX_CONCURRENT_EXPORT_PER_USER", default_value = "1")]
    pub max_concurrent_export_per_user: usize,

    /// Maximum active export jobs system-wide.
    #[arg(long, env = "MAX_SYSTEM_CONCURRENT_EXPORT", default_value = "2")]
    pub max_system_concurrent_export: usize,

    /// Single character separating the resource id from the object uuid in
    /// blob keys. Must not appear in resource ids.
    #[arg(long, env = "BULK_KEY_SEPARATOR", default_value = "_")]
    pub bulk_key_separator: char,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            enable_multi_tenancy: false,
            update_create_supported: false,
            lock_duration_ms: 35_000,
            max_concurrent_export_per_user: 1,
            max_system_concurrent_export: 2,
            bulk_key_separator: '_',
        }
    }
}

impl CoreConfig {
    /// Creates a config from environment variables, ignoring command-line
    /// arguments.
    pub fn from_env() -> Self {
        Self::parse_from(["meridian-persistence"])
    }

    /// Checks that the presence of `tenant_id` matches the configured
    /// multi-tenancy mode.
    pub fn assert_tenancy(&self, tenant_id: Option<&str>) -> StorageResult<()> {
        if tenant_id.is_some() != self.enable_multi_tenancy {
            return Err(TenancyError::Mismatch {
                tenant_supplied: tenant_id.is_some(),
                multi_tenancy_enabled: self.enable_multi_tenancy,
            }
            .into());
        }
        Ok(())
    }

    /// A multi-tenant config with defaults otherwise, for tests and examples.
    pub fn multi_tenant() -> Self {
        Self {
            enable_multi_tenancy: true,
            ..Default::default()
        }
    }
}
