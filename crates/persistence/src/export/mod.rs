//! Export-job registration and admission control.

mod registry;
pub mod store;

pub use registry::ExportRegistry;
pub use store::{InMemoryJobs, JobApi};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Job admitted and running.
    InProgress,
    /// Cancellation requested, not yet confirmed by the job runner.
    Canceling,
    /// Cancellation confirmed.
    Canceled,
    /// Job finished successfully.
    Completed,
    /// Job finished with an error.
    Failed,
}

impl JobStatus {
    /// The stored string token for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` while the job counts against admission caps.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress | Self::Canceling)
    }

    /// Returns `true` once the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-progress" => Ok(Self::InProgress),
            "canceling" => Ok(Self::Canceling),
            "canceled" => Ok(Self::Canceled),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown job status: {}", s)),
        }
    }
}

/// Parameters of an export request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Who is asking.
    #[serde(rename = "requesterUserId")]
    pub requester_user_id: String,
    /// Export scope, e.g. `system` or `group`.
    #[serde(rename = "exportType")]
    pub export_type: String,
    /// Group to export, for group-scoped requests.
    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Only include resources modified since this time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Comma-separated resource types to export.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub types: Option<String>,
    /// Output format hint.
    #[serde(rename = "outputFormat", skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

/// A row of the export table, keyed by `jobId` with a secondary index on
/// `jobStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    /// Primary key.
    #[serde(rename = "jobId")]
    pub job_id: String,
    /// The requester.
    #[serde(rename = "jobOwnerId")]
    pub job_owner_id: String,
    /// Current lifecycle state; also the secondary-index key.
    #[serde(rename = "jobStatus")]
    pub job_status: JobStatus,
    /// Echoed request scope.
    #[serde(rename = "exportType")]
    pub export_type: String,
    /// Echoed group, for group-scoped requests.
    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Echoed since-filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Echoed type filter.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub types: Option<String>,
    /// Echoed output format.
    #[serde(rename = "outputFormat", skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    /// When the job was admitted.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Output object URLs, populated on completion.
    #[serde(rename = "exportedFileUrls", skip_serializing_if = "Option::is_none")]
    pub exported_file_urls: Option<Vec<String>>,
    /// Per-file error details, populated on failure.
    #[serde(rename = "errorArray", skip_serializing_if = "Option::is_none")]
    pub error_array: Option<Vec<String>>,
    /// Failure summary, populated on failure.
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExportJob {
    /// Admits a new job for the given request under a fresh uuid.
    pub fn admit(request: &ExportRequest) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            job_owner_id: request.requester_user_id.clone(),
            job_status: JobStatus::InProgress,
            export_type: request.export_type.clone(),
            group_id: request.group_id.clone(),
            since: request.since,
            types: request.types.clone(),
            output_format: request.output_format.clone(),
            created_at: Utc::now(),
            exported_file_urls: None,
            error_array: None,
            error_message: None,
        }
    }
}

/// Public, normalised view of an export job.
///
/// Optional stored fields are defaulted so callers never see `null` lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStatusResponse {
    /// The job id.
    #[serde(rename = "jobId")]
    pub job_id: String,
    /// Current lifecycle state.
    #[serde(rename = "jobStatus")]
    pub job_status: JobStatus,
    /// Echoed request scope.
    #[serde(rename = "exportType")]
    pub export_type: String,
    /// Output object URLs; empty until completion.
    #[serde(rename = "exportedFileUrls")]
    pub exported_file_urls: Vec<String>,
    /// Per-file error details; empty unless failed.
    #[serde(rename = "errorArray")]
    pub error_array: Vec<String>,
    /// Failure summary; empty unless failed.
    #[serde(rename = "errorMessage")]
    pub error_message: String,
}

impl From<ExportJob> for ExportStatusResponse {
    fn from(job: ExportJob) -> Self {
        Self {
            job_id: job.job_id,
            job_status: job.job_status,
            export_type: job.export_type,
            exported_file_urls: job.exported_file_urls.unwrap_or_default(),
            error_array: job.error_array.unwrap_or_default(),
            error_message: job.error_message.unwrap_or_default(),
        }
    }
}
