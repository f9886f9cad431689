//! Server-driven streaming upload jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a streaming upload job.
///
/// `Queued → Uploading → {Completed | Failed | Cancelled}`. There is no
/// transition out of a terminal state; terminal snapshots are retained in
/// the registry for a bounded window before eviction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// True once the job can no longer make progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Snapshot of an in-flight streaming upload.
///
/// Written only by the background task that owns the job; every update
/// replaces the whole snapshot in the registry, so polling readers always
/// observe a consistent view and never a half-updated one.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// Server-generated job identifier, distinct from the store session id.
    pub job_id: Uuid,

    pub status: JobStatus,

    /// Percent of `total_bytes` uploaded, 0–100.
    pub progress: f64,

    pub uploaded_parts: i32,
    pub total_parts: i32,
    pub uploaded_bytes: i64,
    pub total_bytes: i64,

    /// Destination key in the object store.
    pub object_key: String,

    /// Store session token, known once the job has opened its session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// Set when the job reaches a terminal state; drives registry eviction.
    #[serde(skip)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    /// Fresh QUEUED snapshot for a newly submitted job.
    pub fn queued(job_id: Uuid, object_key: String, total_parts: i32, total_bytes: i64) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            progress: 0.0,
            uploaded_parts: 0,
            total_parts,
            uploaded_bytes: 0,
            total_bytes,
            object_key,
            upload_id: None,
            error_message: None,
            download_url: None,
            finished_at: None,
        }
    }
}
