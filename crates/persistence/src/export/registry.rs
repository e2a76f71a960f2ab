//! Export-job admission and lifecycle.

use std::sync::Arc;

use tracing::info;

use crate::config::CoreConfig;
use crate::error::{ExportError, ResourceError, StorageResult};
use crate::kv::KvError;
use crate::params;

use super::store::JobApi;
use super::{ExportJob, ExportRequest, ExportStatusResponse, JobStatus};

/// Registers export jobs with per-user and system-wide admission caps.
pub struct ExportRegistry {
    jobs: Arc<dyn JobApi>,
    config: CoreConfig,
}

impl ExportRegistry {
    /// Creates a registry over the given job table.
    pub fn new(jobs: Arc<dyn JobApi>, config: CoreConfig) -> Self {
        Self { jobs, config }
    }

    /// Admits a new export job, returning its id.
    ///
    /// Admission fails when the requester already has an active job (up to
    /// the per-user cap), or when the system-wide count of in-progress and
    /// canceling jobs has reached the system cap.
    pub async fn initiate_export(&self, request: &ExportRequest) -> StorageResult<String> {
        let in_progress = self
            .jobs
            .query_by_status(params::job_query_by_status(JobStatus::InProgress))
            .await
            .map_err(map_kv)?;
        let canceling = self
            .jobs
            .query_by_status(params::job_query_by_status(JobStatus::Canceling))
            .await
            .map_err(map_kv)?;

        let owned_by_requester = in_progress
            .iter()
            .chain(canceling.iter())
            .filter(|job| job.job_owner_id == request.requester_user_id)
            .count();
        if owned_by_requester >= self.config.max_concurrent_export_per_user {
            return Err(ExportError::TooManyConcurrentRequests.into());
        }

        if in_progress.len() + canceling.len() >= self.config.max_system_concurrent_export {
            return Err(ExportError::TooManyConcurrentRequests.into());
        }

        let job = ExportJob::admit(request);
        let job_id = job.job_id.clone();
        self.jobs
            .put(params::job_insert(job))
            .await
            .map_err(map_kv)?;

        info!(job_id, owner = request.requester_user_id, "admitted export job");
        Ok(job_id)
    }

    /// Requests cancellation of a running job.
    pub async fn cancel_export(&self, job_id: &str) -> StorageResult<()> {
        let job = self.require_job(job_id).await?;
        if job.job_status.is_terminal() {
            return Err(ExportError::InvalidStatusTransition {
                job_id: job_id.to_string(),
                status: job.job_status.to_string(),
            }
            .into());
        }

        self.jobs
            .transition(params::job_transition(
                job_id,
                vec![JobStatus::InProgress, JobStatus::Canceling],
                JobStatus::Canceling,
            ))
            .await
            .map_err(map_kv)?;
        Ok(())
    }

    /// Confirms a requested cancellation, settling the job as canceled.
    pub async fn confirm_cancellation(&self, job_id: &str) -> StorageResult<()> {
        self.guarded_transition(job_id, vec![JobStatus::Canceling], JobStatus::Canceled, None, None)
            .await
    }

    /// Settles a job as completed, recording its output URLs.
    pub async fn complete_export(
        &self,
        job_id: &str,
        exported_file_urls: Vec<String>,
    ) -> StorageResult<()> {
        self.guarded_transition(
            job_id,
            vec![JobStatus::InProgress],
            JobStatus::Completed,
            Some(exported_file_urls),
            None,
        )
        .await
    }

    /// Settles a job as failed, recording the failure summary.
    pub async fn fail_export(&self, job_id: &str, error_message: String) -> StorageResult<()> {
        self.guarded_transition(
            job_id,
            vec![JobStatus::InProgress, JobStatus::Canceling],
            JobStatus::Failed,
            None,
            Some(error_message),
        )
        .await
    }

    /// Returns the normalised public view of a job.
    pub async fn get_export_status(&self, job_id: &str) -> StorageResult<ExportStatusResponse> {
        let job = self.require_job(job_id).await?;
        Ok(ExportStatusResponse::from(job))
    }

    async fn require_job(&self, job_id: &str) -> StorageResult<ExportJob> {
        self.jobs
            .get(job_id)
            .await
            .map_err(map_kv)?
            .ok_or_else(|| ResourceError::not_found("$export", job_id).into())
    }

    async fn guarded_transition(
        &self,
        job_id: &str,
        from: Vec<JobStatus>,
        to: JobStatus,
        exported_file_urls: Option<Vec<String>>,
        error_message: Option<String>,
    ) -> StorageResult<()> {
        let job = self.require_job(job_id).await?;
        if !from.contains(&job.job_status) {
            return Err(ExportError::InvalidStatusTransition {
                job_id: job_id.to_string(),
                status: job.job_status.to_string(),
            }
            .into());
        }

        let mut descriptor = params::job_transition(job_id, from, to);
        descriptor.exported_file_urls = exported_file_urls;
        descriptor.error_message = error_message;
        self.jobs.transition(descriptor).await.map_err(map_kv)?;
        Ok(())
    }
}

fn map_kv(err: KvError) -> crate::error::StorageError {
    crate::error::BackendError::internal("export-table", err.to_string()).into()
}
