//! Upload session manager for client-driven multipart uploads.
//!
//! Owns the lifecycle of a single multipart session against the object
//! store: session creation, part-count computation, pre-signed URL batch
//! issuance, status aggregation from the store's part listing, completion,
//! and abort. The actual part bytes never pass through this service on the
//! client-driven path; clients PUT them straight to the store using the
//! pre-signed URLs.

use chrono::Utc;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::UploadPolicy;
use crate::models::upload::{
    CompletedPartInput, CompletedUpload, PartRecord, PresignedPartUrl, UploadSession,
};
use crate::services::metadata_store::MetadataStore;
use crate::services::object_store::{ObjectStore, StoreError};

/// S3 caps multipart uploads at 10,000 parts per session.
const MAX_PART_NUMBER: i32 = 10_000;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("content type `{0}` is not accepted for upload")]
    ContentTypeRejected(String),
    #[error("file size {size} exceeds the configured limit of {limit} bytes")]
    FileTooLarge { size: i64, limit: i64 },
    #[error("file size must be positive, got {0}")]
    InvalidFileSize(i64),
    #[error("filename must not be empty")]
    EmptyFilename,
    #[error("chunk size {size} outside allowed range [{min}, {max}]")]
    InvalidChunkSize { size: i64, min: i64, max: i64 },
    #[error("invalid part range [{start}, {end}]")]
    InvalidPartRange { start: i32, end: i32 },
    #[error("presign batch of {requested} parts exceeds the limit of {limit}")]
    PresignBatchTooLarge { requested: i64, limit: i32 },
    #[error("upload file not found: {0}")]
    MissingFile(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Orchestrates client-driven multipart upload sessions.
#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn ObjectStore>,
    metadata: MetadataStore,
    policy: UploadPolicy,
}

impl UploadService {
    pub fn new(store: Arc<dyn ObjectStore>, metadata: MetadataStore, policy: UploadPolicy) -> Self {
        Self {
            store,
            metadata,
            policy,
        }
    }

    /// Open a new multipart session.
    ///
    /// Validation happens before any store call, so a rejected request has
    /// zero store-side effects. On success one store-side session is open
    /// until a later complete or abort call closes it.
    pub async fn initialize_upload(
        &self,
        file_name: &str,
        declared_size: i64,
        content_type: &str,
        chunk_size: Option<i64>,
    ) -> UploadResult<UploadSession> {
        let filename = sanitize_filename(file_name)?;
        ensure_content_type(&self.policy, content_type)?;
        ensure_size(&self.policy, declared_size)?;

        // Client-chosen chunk size wins when positive; bounds are only
        // enforced on the server-driven path.
        let part_size = match chunk_size {
            Some(size) if size > 0 => size,
            _ => self.policy.default_part_size,
        };

        let object_key = generate_object_key(filename);
        let upload_id = self
            .store
            .create_multipart_upload(&object_key, content_type)
            .await?;
        let max_part_number = ((declared_size + part_size - 1) / part_size) as i32;

        info!(
            object_key = %object_key,
            upload_id = %upload_id,
            part_size,
            max_part_number,
            "initialized multipart upload"
        );

        Ok(UploadSession {
            upload_id,
            object_key,
            part_size,
            min_part_number: 1,
            max_part_number,
        })
    }

    /// Issue pre-signed PUT URLs for the inclusive part range
    /// `[start_part, end_part]`.
    ///
    /// Every URL in the batch carries the same expiration instant, computed
    /// once before the signing loop starts.
    pub async fn presigned_part_urls(
        &self,
        upload_id: &str,
        object_key: &str,
        start_part: i32,
        end_part: i32,
    ) -> UploadResult<Vec<PresignedPartUrl>> {
        if start_part < 1 || end_part < start_part || end_part > MAX_PART_NUMBER {
            return Err(UploadError::InvalidPartRange {
                start: start_part,
                end: end_part,
            });
        }
        let requested = i64::from(end_part) - i64::from(start_part) + 1;
        if requested > i64::from(self.policy.max_presign_batch) {
            return Err(UploadError::PresignBatchTooLarge {
                requested,
                limit: self.policy.max_presign_batch,
            });
        }

        let ttl = self.presign_ttl();
        let expires_at = Utc::now() + chrono::Duration::minutes(self.policy.presign_expiry_minutes);

        let mut urls = Vec::with_capacity(requested as usize);
        for part_number in start_part..=end_part {
            let url = self
                .store
                .presign_upload_part(upload_id, object_key, part_number, ttl)
                .await?;
            urls.push(PresignedPartUrl {
                part_number,
                url,
                expires_at,
            });
        }
        debug!(upload_id, start_part, end_part, "issued presigned part urls");
        Ok(urls)
    }

    /// Parts the store has durably recorded for a session.
    ///
    /// This listing is the resumption mechanism: a client diffs it against
    /// `[1, max_part_number]` to find the part numbers still missing.
    pub async fn upload_status(
        &self,
        upload_id: &str,
        object_key: &str,
    ) -> UploadResult<Vec<PartRecord>> {
        Ok(self.store.list_parts(upload_id, object_key).await?)
    }

    /// Finalize a session from the client's `(part_number, etag)` pairs.
    ///
    /// The store validates the part list; this service then reads back the
    /// assembled object's authoritative size via head, persists the
    /// completion record, and signs a download URL. The store completion
    /// and the metadata write are not transactional: a persistence failure
    /// here leaves the assembled object in storage without a record.
    pub async fn complete_upload(
        &self,
        upload_id: &str,
        object_key: &str,
        parts: Vec<CompletedPartInput>,
    ) -> UploadResult<(CompletedUpload, String)> {
        let final_etag = self
            .store
            .complete_multipart_upload(upload_id, object_key, &parts)
            .await?;
        let head = self.store.head_object(object_key).await?;

        let filename = display_filename(object_key);
        let checksum = head.etag.or(final_etag);
        let record = self
            .metadata
            .save_completed(filename, head.size_bytes, object_key, checksum.as_deref())
            .await?;

        let download_url = self.store.presign_get(object_key, self.presign_ttl()).await?;
        info!(
            object_key = %object_key,
            size_bytes = record.size_bytes,
            "completed multipart upload"
        );
        Ok((record, download_url))
    }

    /// Abort a session, releasing all parts uploaded so far. The store
    /// defines the behavior for already-completed or already-aborted
    /// sessions; this layer does not special-case them.
    pub async fn abort_upload(&self, upload_id: &str, object_key: &str) -> UploadResult<()> {
        self.store
            .abort_multipart_upload(upload_id, object_key)
            .await?;
        info!(upload_id, object_key, "aborted multipart upload");
        Ok(())
    }

    fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.policy.presign_expiry_minutes.max(0) as u64 * 60)
    }
}

/// Check a content type against the accepted prefixes.
pub(crate) fn ensure_content_type(policy: &UploadPolicy, content_type: &str) -> UploadResult<()> {
    if policy
        .accepted_content_types
        .iter()
        .any(|prefix| content_type.starts_with(prefix.as_str()))
    {
        Ok(())
    } else {
        Err(UploadError::ContentTypeRejected(content_type.to_string()))
    }
}

/// Check a declared or measured size against the configured ceiling.
pub(crate) fn ensure_size(policy: &UploadPolicy, size: i64) -> UploadResult<()> {
    if size <= 0 {
        return Err(UploadError::InvalidFileSize(size));
    }
    if size > policy.max_file_size {
        return Err(UploadError::FileTooLarge {
            size,
            limit: policy.max_file_size,
        });
    }
    Ok(())
}

/// Reduce a client-supplied filename to its trailing path segment.
///
/// Clients never get to choose storage paths; only the basename survives
/// into the generated object key.
pub(crate) fn sanitize_filename(file_name: &str) -> UploadResult<&str> {
    let trimmed = file_name.trim();
    let basename = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    if basename.is_empty() {
        return Err(UploadError::EmptyFilename);
    }
    Ok(basename)
}

/// `uploads/{uuid}/{filename}` — collision-free and independent of any
/// client-supplied path.
pub(crate) fn generate_object_key(filename: &str) -> String {
    format!("uploads/{}/{}", Uuid::new_v4(), filename)
}

/// Display filename derived from the trailing segment of an object key.
pub(crate) fn display_filename(object_key: &str) -> &str {
    object_key.rsplit('/').next().unwrap_or(object_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{memory_metadata, test_policy, MockObjectStore};
    use std::sync::atomic::Ordering;

    async fn service_with(store: Arc<MockObjectStore>) -> UploadService {
        UploadService::new(store, memory_metadata().await, test_policy())
    }

    #[tokio::test]
    async fn init_computes_part_range() {
        let store = MockObjectStore::new();
        let svc = service_with(store.clone()).await;

        let session = svc
            .initialize_upload("movie.mp4", 100_000_000, "video/mp4", Some(8_388_608))
            .await
            .expect("init should succeed");

        assert_eq!(session.min_part_number, 1);
        assert_eq!(session.max_part_number, 12);
        assert_eq!(session.part_size, 8_388_608);
        assert!(session.object_key.starts_with("uploads/"));
        assert!(session.object_key.ends_with("/movie.mp4"));
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn init_uses_default_chunk_size_when_absent() {
        let svc = service_with(MockObjectStore::new()).await;
        let policy = test_policy();

        let session = svc
            .initialize_upload("movie.mp4", 1000, "video/mp4", None)
            .await
            .expect("init should succeed");

        assert_eq!(session.part_size, policy.default_part_size);
        assert_eq!(
            session.max_part_number,
            ((1000i64 + policy.default_part_size - 1) / policy.default_part_size) as i32
        );
    }

    #[tokio::test]
    async fn init_rejects_content_type_before_any_store_call() {
        let store = MockObjectStore::new();
        let svc = service_with(store.clone()).await;

        let err = svc
            .initialize_upload("report.pdf", 1000, "application/pdf", None)
            .await
            .expect_err("content type must be rejected");

        assert!(matches!(err, UploadError::ContentTypeRejected(_)));
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn init_rejects_oversized_file_before_any_store_call() {
        let store = MockObjectStore::new();
        let svc = service_with(store.clone()).await;
        let limit = test_policy().max_file_size;

        let err = svc
            .initialize_upload("movie.mp4", limit + 1, "video/mp4", None)
            .await
            .expect_err("oversized file must be rejected");

        assert!(matches!(err, UploadError::FileTooLarge { .. }));
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn presign_batch_shares_one_expiry() {
        let svc = service_with(MockObjectStore::new()).await;

        let urls = svc
            .presigned_part_urls("upload-1", "uploads/u/movie.mp4", 3, 7)
            .await
            .expect("presign should succeed");

        assert_eq!(urls.len(), 5);
        let expires = urls[0].expires_at;
        for (i, entry) in urls.iter().enumerate() {
            assert_eq!(entry.part_number, 3 + i as i32);
            assert_eq!(entry.expires_at, expires);
        }
    }

    #[tokio::test]
    async fn presign_rejects_bad_ranges() {
        let svc = service_with(MockObjectStore::new()).await;

        let err = svc
            .presigned_part_urls("u", "k", 0, 5)
            .await
            .expect_err("start below 1 must be rejected");
        assert!(matches!(err, UploadError::InvalidPartRange { .. }));

        let err = svc
            .presigned_part_urls("u", "k", 9, 3)
            .await
            .expect_err("inverted range must be rejected");
        assert!(matches!(err, UploadError::InvalidPartRange { .. }));

        let limit = test_policy().max_presign_batch;
        let err = svc
            .presigned_part_urls("u", "k", 1, limit + 1)
            .await
            .expect_err("oversized batch must be rejected");
        assert!(matches!(err, UploadError::PresignBatchTooLarge { .. }));
    }

    #[tokio::test]
    async fn complete_persists_head_reported_size() {
        let store = MockObjectStore::new();
        store.head_size.store(4242, Ordering::SeqCst);
        let svc = service_with(store.clone()).await;

        let parts = vec![
            CompletedPartInput {
                part_number: 1,
                etag: "etag-1".into(),
            },
            CompletedPartInput {
                part_number: 2,
                etag: "etag-2".into(),
            },
        ];
        let (record, download_url) = svc
            .complete_upload("upload-1", "uploads/u/movie.mp4", parts)
            .await
            .expect("complete should succeed");

        // Head-reported size wins over whatever the client declared at init.
        assert_eq!(record.size_bytes, 4242);
        assert_eq!(record.filename, "movie.mp4");
        assert_eq!(record.status, "COMPLETED");
        assert!(!download_url.is_empty());
        assert_eq!(store.complete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn complete_surfaces_store_rejection() {
        let store = MockObjectStore::new();
        store.reject_completion();
        let svc = service_with(store.clone()).await;

        let parts = vec![CompletedPartInput {
            part_number: 1,
            etag: "bogus".into(),
        }];
        let err = svc
            .complete_upload("upload-1", "uploads/u/movie.mp4", parts)
            .await
            .expect_err("mismatched etag must surface as an error");

        assert!(matches!(err, UploadError::Store(_)));
    }

    #[tokio::test]
    async fn status_returns_store_part_listing() {
        let store = MockObjectStore::new();
        store.set_listed_parts(vec![
            PartRecord {
                part_number: 1,
                etag: "etag-1".into(),
                size_bytes: 8,
            },
            PartRecord {
                part_number: 3,
                etag: "etag-3".into(),
                size_bytes: 8,
            },
        ]);
        let svc = service_with(store).await;

        let parts = svc
            .upload_status("upload-1", "uploads/u/movie.mp4")
            .await
            .expect("status should succeed");
        let numbers: Vec<i32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn filename_is_reduced_to_basename() {
        assert_eq!(sanitize_filename("a/b/c.mp4").unwrap(), "c.mp4");
        assert_eq!(sanitize_filename("c:\\videos\\c.mp4").unwrap(), "c.mp4");
        assert!(matches!(
            sanitize_filename("   "),
            Err(UploadError::EmptyFilename)
        ));
        assert!(matches!(
            sanitize_filename("dir/"),
            Err(UploadError::EmptyFilename)
        ));
    }
}
