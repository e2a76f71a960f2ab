//! Shared test harness: the full service stack over in-memory engines.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use meridian_persistence::blob::InMemoryBlob;
use meridian_persistence::config::CoreConfig;
use meridian_persistence::export::{ExportRegistry, InMemoryJobs};
use meridian_persistence::hybrid::{HybridStore, OffloadRegistry};
use meridian_persistence::index::InMemorySearch;
use meridian_persistence::kv::{ChangeRecord, InMemoryKv};
use meridian_persistence::propagator::ChangePropagator;
use meridian_persistence::service::bundle::BundleService;
use meridian_persistence::service::data::DataService;
use meridian_persistence::store::VersionStore;
use meridian_persistence::StorageResult;

/// Everything a test needs, wired over shared in-memory engines.
pub struct TestContext {
    pub config: CoreConfig,
    pub kv: Arc<InMemoryKv>,
    pub blob: Arc<InMemoryBlob>,
    pub search: Arc<InMemorySearch>,
    pub jobs: Arc<InMemoryJobs>,
    pub store: Arc<VersionStore>,
    pub bundle: Arc<BundleService>,
    pub data: Arc<DataService>,
    pub propagator: ChangePropagator,
    pub exports: ExportRegistry,
}

impl TestContext {
    /// Single-tenant stack with default config.
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    /// Multi-tenant stack with default config otherwise.
    pub fn multi_tenant() -> Self {
        Self::with_config(CoreConfig::multi_tenant())
    }

    /// Stack over the given config.
    pub fn with_config(config: CoreConfig) -> Self {
        let kv = Arc::new(InMemoryKv::new());
        let blob = Arc::new(InMemoryBlob::new());
        let search = Arc::new(InMemorySearch::new());
        let jobs = Arc::new(InMemoryJobs::new());

        let store = Arc::new(VersionStore::new(kv.clone()));
        let bundle = Arc::new(BundleService::new(store.clone(), config.clone()));
        let data = Arc::new(DataService::new(
            store.clone(),
            bundle.clone(),
            config.clone(),
        ));
        let propagator = ChangePropagator::new(search.clone(), &config);
        let exports = ExportRegistry::new(jobs.clone(), config.clone());

        Self {
            config,
            kv,
            blob,
            search,
            jobs,
            store,
            bundle,
            data,
            propagator,
            exports,
        }
    }

    /// Builds a hybrid store over this stack with the given registration.
    pub fn hybrid(&self, registry: OffloadRegistry) -> HybridStore {
        HybridStore::new(
            self.data.clone(),
            self.blob.clone(),
            registry,
            self.config.clone(),
        )
    }

    /// Drains the change feed without processing it.
    pub fn drain_feed(&self) -> Vec<ChangeRecord> {
        self.kv.drain_feed()
    }

    /// Drains the change feed into the propagator, mirroring the primary
    /// table into the search engine.
    pub async fn pump_feed(&self) -> StorageResult<Vec<ChangeRecord>> {
        let records = self.kv.drain_feed();
        self.propagator.process(&records).await?;
        Ok(records)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
