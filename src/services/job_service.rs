//! Server-side streaming upload job manager.
//!
//! Accepts a locally buffered file and uploads it to the object store as a
//! multipart session in a background task: fixed-size windows read
//! sequentially through one reused buffer, one part in flight at a time.
//! The concurrency unit is the job, not the part — a bounded semaphore caps
//! how many jobs upload at once, and jobs waiting for a slot stay QUEUED.
//!
//! Progress lives in a concurrent registry keyed by job id. Every update
//! replaces the whole snapshot, so polling readers always see a consistent
//! view. Terminal snapshots are evicted by a background sweeper after a
//! retention window.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::UploadPolicy;
use crate::models::job::{JobProgress, JobStatus};
use crate::models::upload::CompletedPartInput;
use crate::services::metadata_store::MetadataStore;
use crate::services::object_store::{ObjectStore, StoreError};
use crate::services::upload_service::{self, UploadError, UploadResult};

/// Outcome of the transfer stage, distinguishing cooperative cancellation
/// from genuine failures.
enum JobError {
    Cancelled,
    Upload(UploadError),
}

impl From<UploadError> for JobError {
    fn from(err: UploadError) -> Self {
        JobError::Upload(err)
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        JobError::Upload(err.into())
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Upload(err.into())
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Upload(err.into())
    }
}

/// Runs server-driven uploads in the background and tracks their progress.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn ObjectStore>,
    metadata: MetadataStore,
    policy: UploadPolicy,
    registry: Arc<DashMap<Uuid, JobProgress>>,
    cancellations: Arc<DashMap<Uuid, CancellationToken>>,
    permits: Arc<Semaphore>,
}

impl JobService {
    pub fn new(store: Arc<dyn ObjectStore>, metadata: MetadataStore, policy: UploadPolicy) -> Self {
        let permits = Arc::new(Semaphore::new(policy.upload_workers.max(1)));
        Self {
            store,
            metadata,
            policy,
            registry: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            permits,
        }
    }

    /// Validate and enqueue a streaming upload of `temp_file`.
    ///
    /// Returns `(job_id, object_key)` immediately; the transfer itself runs
    /// in a background task and is observed via [`JobService::status`].
    /// Once this returns Ok the job owns the temp file and will delete it
    /// on every exit path. On Err the caller still owns the file.
    pub async fn submit(
        &self,
        temp_file: PathBuf,
        original_filename: &str,
        content_type: &str,
        chunk_size: Option<i64>,
    ) -> UploadResult<(Uuid, String)> {
        let filename = upload_service::sanitize_filename(original_filename)?;
        upload_service::ensure_content_type(&self.policy, content_type)?;

        let file_meta = tokio::fs::metadata(&temp_file).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                UploadError::MissingFile(temp_file.display().to_string())
            } else {
                UploadError::Io(err)
            }
        })?;
        let total_bytes = file_meta.len() as i64;
        upload_service::ensure_size(&self.policy, total_bytes)?;

        let part_size = match chunk_size {
            None => self.policy.default_part_size,
            Some(size)
                if size >= self.policy.min_part_size && size <= self.policy.max_part_size =>
            {
                size
            }
            Some(size) => {
                return Err(UploadError::InvalidChunkSize {
                    size,
                    min: self.policy.min_part_size,
                    max: self.policy.max_part_size,
                });
            }
        };

        let total_parts = ((total_bytes + part_size - 1) / part_size) as i32;
        let object_key = upload_service::generate_object_key(filename);
        let job_id = Uuid::new_v4();

        self.registry.insert(
            job_id,
            JobProgress::queued(job_id, object_key.clone(), total_parts, total_bytes),
        );
        let token = CancellationToken::new();
        self.cancellations.insert(job_id, token.clone());

        info!(
            %job_id,
            object_key = %object_key,
            total_bytes,
            total_parts,
            "queued streaming upload job"
        );

        let svc = self.clone();
        let key = object_key.clone();
        let content_type = content_type.to_string();
        tokio::spawn(async move {
            svc.run_job(job_id, temp_file, key, content_type, part_size, total_bytes, token)
                .await;
        });

        Ok((job_id, object_key))
    }

    /// Current snapshot for a job, or None when it never existed or has
    /// already been evicted — the two cases are indistinguishable.
    pub fn status(&self, job_id: &Uuid) -> Option<JobProgress> {
        self.registry.get(job_id).map(|entry| entry.clone())
    }

    /// Flag a job for cooperative cancellation. The flag is checked between
    /// part uploads, so an in-flight part still completes first. Returns
    /// false when the job is unknown or already finished.
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        match self.cancellations.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Start the background eviction sweep for terminal snapshots.
    pub fn spawn_sweeper(&self) {
        let svc = self.clone();
        let interval = Duration::from_secs(self.policy.sweep_interval_secs.max(1));
        let retention = chrono::Duration::seconds(self.policy.job_retention_secs as i64);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                svc.evict_finished_before(Utc::now() - retention);
            }
        });
    }

    /// Drop terminal snapshots that finished before `cutoff`.
    fn evict_finished_before(&self, cutoff: DateTime<Utc>) {
        self.registry.retain(|_, progress| match progress.finished_at {
            Some(finished) => finished > cutoff,
            None => true,
        });
    }

    async fn run_job(
        &self,
        job_id: Uuid,
        temp_file: PathBuf,
        object_key: String,
        content_type: String,
        part_size: i64,
        total_bytes: i64,
        token: CancellationToken,
    ) {
        // Bounded worker pool: wait for a slot. A job cancelled while still
        // queued never opens a store session.
        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = token.cancelled() => {
                self.cleanup(job_id, &temp_file).await;
                self.finish(job_id, |p| p.status = JobStatus::Cancelled);
                return;
            }
        };

        let mut opened_upload_id: Option<String> = None;
        let result = self
            .stream_file(
                job_id,
                &temp_file,
                &object_key,
                &content_type,
                part_size,
                total_bytes,
                &token,
                &mut opened_upload_id,
            )
            .await;

        // Settle everything before publishing the terminal snapshot: a
        // poller that observes a terminal status must not find the temp
        // file still on disk or the session still open.
        if result.is_err() {
            self.abort_opened(&opened_upload_id, &object_key).await;
        }
        self.cleanup(job_id, &temp_file).await;

        match result {
            Ok(download_url) => {
                self.finish(job_id, |p| {
                    p.status = JobStatus::Completed;
                    p.progress = 100.0;
                    p.download_url = Some(download_url);
                });
                info!(%job_id, object_key = %object_key, "streaming upload completed");
            }
            Err(JobError::Cancelled) => {
                self.finish(job_id, |p| p.status = JobStatus::Cancelled);
                info!(%job_id, object_key = %object_key, "streaming upload cancelled");
            }
            Err(JobError::Upload(err)) => {
                let message = err.to_string();
                self.finish(job_id, |p| {
                    p.status = JobStatus::Failed;
                    p.error_message = Some(message.clone());
                });
                warn!(%job_id, object_key = %object_key, error = %message, "streaming upload failed");
            }
        }
    }

    /// The transfer itself: open the session, push windows in order, then
    /// complete, persist, and sign the download URL.
    #[allow(clippy::too_many_arguments)]
    async fn stream_file(
        &self,
        job_id: Uuid,
        temp_file: &Path,
        object_key: &str,
        content_type: &str,
        part_size: i64,
        total_bytes: i64,
        token: &CancellationToken,
        opened: &mut Option<String>,
    ) -> Result<String, JobError> {
        self.update(job_id, |p| p.status = JobStatus::Uploading);

        let upload_id = self
            .store
            .create_multipart_upload(object_key, content_type)
            .await?;
        *opened = Some(upload_id.clone());
        {
            let upload_id = upload_id.clone();
            self.update(job_id, move |p| p.upload_id = Some(upload_id));
        }

        let mut file = File::open(temp_file).await?;
        // One reused read buffer per job; parts go up strictly in order.
        let mut buf = vec![0u8; part_size as usize];
        let mut parts: Vec<CompletedPartInput> = Vec::new();
        let mut uploaded_bytes: i64 = 0;
        let mut part_number: i32 = 1;

        loop {
            if token.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let n = read_window(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }
            let part = self
                .store
                .upload_part(
                    &upload_id,
                    object_key,
                    part_number,
                    Bytes::copy_from_slice(&buf[..n]),
                )
                .await?;
            parts.push(CompletedPartInput {
                part_number,
                etag: part.etag,
            });
            uploaded_bytes += n as i64;

            let done_parts = part_number;
            self.update(job_id, move |p| {
                p.uploaded_parts = done_parts;
                p.uploaded_bytes = uploaded_bytes;
                p.progress = if total_bytes > 0 {
                    uploaded_bytes as f64 / total_bytes as f64 * 100.0
                } else {
                    100.0
                };
            });
            debug!(%job_id, part_number, uploaded_bytes, "uploaded part");

            // Short read means end-of-file.
            if n < buf.len() {
                break;
            }
            part_number += 1;
        }

        let final_etag = self
            .store
            .complete_multipart_upload(&upload_id, object_key, &parts)
            .await?;
        let head = self.store.head_object(object_key).await?;
        let checksum = head.etag.or(final_etag);
        self.metadata
            .save_completed(
                upload_service::display_filename(object_key),
                head.size_bytes,
                object_key,
                checksum.as_deref(),
            )
            .await?;

        let ttl = Duration::from_secs(self.policy.presign_expiry_minutes.max(0) as u64 * 60);
        let download_url = self.store.presign_get(object_key, ttl).await?;
        Ok(download_url)
    }

    /// Replace the whole snapshot so readers never observe a partial
    /// update. No-op once the entry has been evicted.
    fn update<F: FnOnce(&mut JobProgress)>(&self, job_id: Uuid, apply: F) {
        if let Some(entry) = self.registry.get(&job_id) {
            let mut snapshot = entry.clone();
            drop(entry);
            apply(&mut snapshot);
            self.registry.insert(job_id, snapshot);
        }
    }

    /// Terminal-state update; stamps `finished_at` for the sweeper.
    fn finish<F: FnOnce(&mut JobProgress)>(&self, job_id: Uuid, apply: F) {
        self.update(job_id, |progress| {
            apply(progress);
            progress.finished_at = Some(Utc::now());
        });
    }

    /// Best-effort abort: the job is already terminal, so a failure here
    /// only logs.
    async fn abort_opened(&self, upload_id: &Option<String>, object_key: &str) {
        if let Some(upload_id) = upload_id {
            if let Err(err) = self.store.abort_multipart_upload(upload_id, object_key).await {
                warn!(upload_id, object_key, error = %err, "best-effort abort failed");
            }
        }
    }

    /// Delete the job's temp file — on every exit path, success or not —
    /// and drop its cancellation handle.
    async fn cleanup(&self, job_id: Uuid, temp_file: &Path) {
        if let Err(err) = tokio::fs::remove_file(temp_file).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %temp_file.display(), error = %err, "failed to remove upload temp file");
            }
        }
        self.cancellations.remove(&job_id);
    }
}

/// Fill `buf` from the file; a short count only happens at end-of-file.
async fn read_window(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{memory_metadata, test_policy, MockObjectStore};
    use std::sync::atomic::Ordering;

    async fn service_with(store: Arc<MockObjectStore>, policy: UploadPolicy) -> JobService {
        JobService::new(store, memory_metadata().await, policy)
    }

    fn scratch_file(dir: &tempfile::TempDir, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(format!(".upload-{}", Uuid::new_v4()));
        std::fs::write(&path, contents).expect("write scratch file");
        path
    }

    async fn wait_terminal(svc: &JobService, job_id: Uuid) -> JobProgress {
        for _ in 0..1000 {
            if let Some(progress) = svc.status(&job_id) {
                if progress.status.is_terminal() {
                    return progress;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("job did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn job_completes_with_monotonic_progress() {
        let store = MockObjectStore::new();
        store.head_size.store(10, Ordering::SeqCst);
        let svc = service_with(store.clone(), test_policy()).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = scratch_file(&dir, b"0123456789");

        let (job_id, object_key) = svc
            .submit(path.clone(), "movie.mp4", "video/mp4", Some(4))
            .await
            .expect("submit should succeed");

        assert_eq!(svc.status(&job_id).expect("registered").status, JobStatus::Queued);

        let mut observed_bytes = Vec::new();
        let progress = loop {
            if let Some(p) = svc.status(&job_id) {
                observed_bytes.push(p.uploaded_bytes);
                if p.status.is_terminal() {
                    break p;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };

        assert_eq!(progress.status, JobStatus::Completed);
        assert_eq!(progress.uploaded_bytes, 10);
        assert_eq!(progress.uploaded_parts, 3);
        assert_eq!(progress.total_parts, 3);
        assert_eq!(progress.progress, 100.0);
        assert!(progress.download_url.is_some());
        assert!(progress.upload_id.is_some());
        assert!(observed_bytes.windows(2).all(|w| w[0] <= w[1]));

        // Temp file is gone and the completion record exists.
        assert!(!path.exists());
        let record = svc
            .metadata
            .find_by_object_key(&object_key)
            .await
            .expect("query")
            .expect("record persisted");
        assert_eq!(record.size_bytes, 10);
        assert_eq!(store.part_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_job_aborts_session_and_deletes_temp_file() {
        let store = MockObjectStore::new();
        store.fail_on_part(2);
        let svc = service_with(store.clone(), test_policy()).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = scratch_file(&dir, b"0123456789");

        let (job_id, _) = svc
            .submit(path.clone(), "movie.mp4", "video/mp4", Some(4))
            .await
            .expect("submit should succeed");

        let progress = wait_terminal(&svc, job_id).await;
        assert_eq!(progress.status, JobStatus::Failed);
        assert!(progress.error_message.is_some());
        // The first part made it up before the failure.
        assert_eq!(progress.uploaded_parts, 1);
        assert_eq!(store.abort_calls.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn cancelled_job_reaches_cancelled_state() {
        let store = MockObjectStore::new();
        store.set_part_delay(20);
        let svc = service_with(store, test_policy()).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = scratch_file(&dir, b"0123456789");

        let (job_id, _) = svc
            .submit(path.clone(), "movie.mp4", "video/mp4", Some(4))
            .await
            .expect("submit should succeed");

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(svc.cancel(&job_id));

        let progress = wait_terminal(&svc, job_id).await;
        assert_eq!(progress.status, JobStatus::Cancelled);
        assert!(!path.exists());

        // The cancellation handle is cleaned up with the job.
        assert!(!svc.cancel(&job_id));
    }

    #[tokio::test]
    async fn jobs_queue_when_all_workers_are_busy() {
        let store = MockObjectStore::new();
        store.set_part_delay(20);
        let policy = test_policy(); // one worker
        let svc = service_with(store, policy).await;
        let dir = tempfile::tempdir().expect("tempdir");

        let (first, _) = svc
            .submit(scratch_file(&dir, b"01234567"), "a.mp4", "video/mp4", Some(4))
            .await
            .expect("first submit");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(svc.status(&first).expect("first").status, JobStatus::Uploading);

        let (second, _) = svc
            .submit(scratch_file(&dir, b"01234567"), "b.mp4", "video/mp4", Some(4))
            .await
            .expect("second submit");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(svc.status(&second).expect("second").status, JobStatus::Queued);

        assert_eq!(wait_terminal(&svc, first).await.status, JobStatus::Completed);
        assert_eq!(wait_terminal(&svc, second).await.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn status_of_unknown_job_is_none() {
        let svc = service_with(MockObjectStore::new(), test_policy()).await;
        assert!(svc.status(&Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn terminal_jobs_are_evicted_after_retention() {
        let store = MockObjectStore::new();
        let svc = service_with(store, test_policy()).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = scratch_file(&dir, b"0123");

        let (job_id, _) = svc
            .submit(path, "movie.mp4", "video/mp4", Some(4))
            .await
            .expect("submit should succeed");
        wait_terminal(&svc, job_id).await;

        // Still visible before the cutoff passes, gone afterwards.
        svc.evict_finished_before(Utc::now() - chrono::Duration::seconds(60));
        assert!(svc.status(&job_id).is_some());
        svc.evict_finished_before(Utc::now() + chrono::Duration::seconds(1));
        assert!(svc.status(&job_id).is_none());
    }

    #[tokio::test]
    async fn submit_rejects_out_of_bounds_chunk_size() {
        let svc = service_with(MockObjectStore::new(), test_policy()).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = scratch_file(&dir, b"0123456789");
        let max = test_policy().max_part_size;

        let err = svc
            .submit(path, "movie.mp4", "video/mp4", Some(max + 1))
            .await
            .expect_err("oversized chunk must be rejected");
        assert!(matches!(err, UploadError::InvalidChunkSize { .. }));
    }

    #[tokio::test]
    async fn submit_rejects_missing_temp_file() {
        let svc = service_with(MockObjectStore::new(), test_policy()).await;

        let err = svc
            .submit(PathBuf::from("/nonexistent/upload.bin"), "a.mp4", "video/mp4", None)
            .await
            .expect_err("missing file must be rejected");
        assert!(matches!(err, UploadError::MissingFile(_)));
    }
}
