//! Export-job table interface and in-memory engine.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::kv::KvError;
use crate::types::ItemKey;

use super::{ExportJob, JobStatus};

/// Conditional insert of a new job row.
#[derive(Debug, Clone)]
pub struct JobPutDescriptor {
    /// The row to store.
    pub job: ExportJob,
    /// Require that the `jobId` is unused.
    pub if_absent: bool,
}

/// Guarded job status transition.
#[derive(Debug, Clone)]
pub struct JobTransitionDescriptor {
    /// Target job.
    pub job_id: String,
    /// Statuses the transition may start from.
    pub from: Vec<JobStatus>,
    /// Status to transition to.
    pub to: JobStatus,
    /// Output URLs to record, for completion transitions.
    pub exported_file_urls: Option<Vec<String>>,
    /// Failure summary to record, for failure transitions.
    pub error_message: Option<String>,
}

/// Query over the `jobStatus` secondary index.
///
/// `projection` names the fields the caller needs; engines may return full
/// rows when projecting is not worth the trip.
#[derive(Debug, Clone)]
pub struct JobQueryDescriptor {
    /// Status to select.
    pub status: JobStatus,
    /// Fields the caller needs.
    pub projection: Option<Vec<String>>,
}

/// Interface of the export-job table.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Inserts a job row, conditional on the id being unused.
    async fn put(&self, descriptor: JobPutDescriptor) -> Result<(), KvError>;

    /// Applies a guarded status transition, returning the updated row.
    async fn transition(&self, descriptor: JobTransitionDescriptor) -> Result<ExportJob, KvError>;

    /// Point-get of one job row.
    async fn get(&self, job_id: &str) -> Result<Option<ExportJob>, KvError>;

    /// Returns every job currently in the given status.
    async fn query_by_status(
        &self,
        descriptor: JobQueryDescriptor,
    ) -> Result<Vec<ExportJob>, KvError>;
}

/// In-memory implementation of [`JobApi`].
#[derive(Default)]
pub struct InMemoryJobs {
    jobs: Mutex<HashMap<String, ExportJob>>,
}

impl InMemoryJobs {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored jobs. Test hook.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Returns `true` if no jobs are stored.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[async_trait]
impl JobApi for InMemoryJobs {
    async fn put(&self, descriptor: JobPutDescriptor) -> Result<(), KvError> {
        let mut jobs = self.jobs.lock();
        if descriptor.if_absent && jobs.contains_key(&descriptor.job.job_id) {
            return Err(KvError::ConditionFailed {
                key: ItemKey::new(descriptor.job.job_id.clone(), 0),
            });
        }
        jobs.insert(descriptor.job.job_id.clone(), descriptor.job);
        Ok(())
    }

    async fn transition(&self, descriptor: JobTransitionDescriptor) -> Result<ExportJob, KvError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&descriptor.job_id).ok_or_else(|| {
            KvError::ConditionFailed {
                key: ItemKey::new(descriptor.job_id.clone(), 0),
            }
        })?;
        if !descriptor.from.contains(&job.job_status) {
            return Err(KvError::ConditionFailed {
                key: ItemKey::new(descriptor.job_id.clone(), 0),
            });
        }
        job.job_status = descriptor.to;
        if let Some(urls) = descriptor.exported_file_urls {
            job.exported_file_urls = Some(urls);
        }
        if let Some(message) = descriptor.error_message {
            job.error_message = Some(message);
        }
        Ok(job.clone())
    }

    async fn get(&self, job_id: &str) -> Result<Option<ExportJob>, KvError> {
        Ok(self.jobs.lock().get(job_id).cloned())
    }

    async fn query_by_status(
        &self,
        descriptor: JobQueryDescriptor,
    ) -> Result<Vec<ExportJob>, KvError> {
        Ok(self
            .jobs
            .lock()
            .values()
            .filter(|job| job.job_status == descriptor.status)
            .cloned()
            .collect())
    }
}
