//! Descriptor builders for every primitive step of the state machine.
//!
//! Pure functions, no I/O. Every guarded write descriptor in the crate is
//! constructed here, so the compound condition of the lifecycle state
//! machine and the string tokens the engines persist have exactly one home.
//! Engines evaluate the descriptors; they never invent guards.

use crate::export::store::{JobPutDescriptor, JobQueryDescriptor, JobTransitionDescriptor};
use crate::export::{ExportJob, JobStatus};
use crate::kv::{
    DeleteDescriptor, GetDescriptor, PutDescriptor, QueryLatestDescriptor, TransitionDescriptor,
};
use crate::types::{DocumentStatus, ItemKey, StoredItem};

/// Default stale-lock reclaim threshold in milliseconds.
pub const DEFAULT_LOCK_DURATION_MS: u64 = 35_000;

/// Stored field names. Defined once; the codec and the engines reuse these.
pub mod fields {
    /// Logical/storage id of the payload.
    pub const ID: &str = "id";
    /// Resource type discriminator.
    pub const RESOURCE_TYPE: &str = "resourceType";
    /// Resource metadata object.
    pub const META: &str = "meta";
    /// Version id inside `meta`.
    pub const META_VERSION_ID: &str = "versionId";
    /// Last-updated timestamp inside `meta`.
    pub const META_LAST_UPDATED: &str = "lastUpdated";
    /// Lifecycle state of a stored version.
    pub const DOCUMENT_STATUS: &str = "documentStatus";
    /// Stale-lock reclaim timestamp.
    pub const LOCK_END_TS: &str = "lockEndTs";
    /// Range-key version number.
    pub const VID: &str = "vid";
    /// Extracted reference fingerprints.
    pub const REFERENCES: &str = "_references";
    /// Owning tenant.
    pub const TENANT_ID: &str = "tenantId";
    /// Blob-store key of offloaded payload fields.
    pub const BULK_DATA_LINK: &str = "bulkDataLink";
    /// Export-job partition key.
    pub const JOB_ID: &str = "jobId";
    /// Export-job requester.
    pub const JOB_OWNER_ID: &str = "jobOwnerId";
    /// Export-job status, also the secondary-index key.
    pub const JOB_STATUS: &str = "jobStatus";
}

/// Insert descriptor for a freshly encoded version.
///
/// Conditional on no item existing under the same `(storageId, vid)` key.
pub fn insert_new_version(item: StoredItem) -> PutDescriptor {
    PutDescriptor {
        item,
        if_absent: true,
    }
}

/// Guarded status-transition descriptor.
///
/// The guard is the sole concurrency primitive of the core: the transition
/// applies when the stored resource type matches and the current status
/// equals `from`, or (the stale-lock escape) the item sits in a reclaimable
/// transient state whose `lockEndTs` precedes `now_ms`.
///
/// Transitions into [`DocumentStatus::Locked`] stamp `lockEndTs` a full
/// `lock_duration_ms` into the future, which is the earliest instant a
/// conflicting writer may forcibly take the lock. All other transitions
/// stamp the current time.
pub fn transition(
    key: ItemKey,
    resource_type: &str,
    from: DocumentStatus,
    to: DocumentStatus,
    now_ms: i64,
    lock_duration_ms: u64,
) -> TransitionDescriptor {
    let lock_end_ts = if to == DocumentStatus::Locked {
        now_ms + lock_duration_ms as i64
    } else {
        now_ms
    };
    TransitionDescriptor {
        key,
        resource_type: resource_type.to_string(),
        from,
        to,
        reclaim_before: now_ms,
        lock_end_ts,
    }
}

/// Query descriptor for the most recent `limit` versions of a partition,
/// descending on `vid`.
pub fn query_latest(storage_id: impl Into<String>, limit: usize) -> QueryLatestDescriptor {
    QueryLatestDescriptor {
        storage_id: storage_id.into(),
        limit,
    }
}

/// Point-get descriptor for one `(storageId, vid)`.
pub fn get_version(key: ItemKey) -> GetDescriptor {
    GetDescriptor { key }
}

/// Unconditional delete descriptor for one `(storageId, vid)`.
pub fn delete_version(key: ItemKey) -> DeleteDescriptor {
    DeleteDescriptor { key }
}

/// Insert descriptor for a new export job, conditional on the `jobId` being
/// unused.
pub fn job_insert(job: ExportJob) -> JobPutDescriptor {
    JobPutDescriptor {
        job,
        if_absent: true,
    }
}

/// Guarded export-job status transition.
pub fn job_transition(
    job_id: impl Into<String>,
    from: Vec<JobStatus>,
    to: JobStatus,
) -> JobTransitionDescriptor {
    JobTransitionDescriptor {
        job_id: job_id.into(),
        from,
        to,
        exported_file_urls: None,
        error_message: None,
    }
}

/// Query descriptor for export jobs in one status, via the `jobStatus`
/// secondary index, projecting only the admission-relevant fields.
pub fn job_query_by_status(status: JobStatus) -> JobQueryDescriptor {
    JobQueryDescriptor {
        status,
        projection: Some(vec![
            fields::JOB_OWNER_ID.to_string(),
            fields::JOB_STATUS.to_string(),
        ]),
    }
}
