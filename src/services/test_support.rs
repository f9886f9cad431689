//! Test doubles shared across the service test modules.

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::UploadPolicy;
use crate::models::upload::{CompletedPartInput, PartRecord};
use crate::services::metadata_store::MetadataStore;
use crate::services::object_store::{ObjectHead, ObjectStore, StoreError, StoreResult};

/// Scripted in-memory object store.
///
/// Counts every call so tests can assert both behavior and the absence of
/// store-side effects, and can be told to fail a specific part upload, to
/// reject completion, or to delay part uploads.
pub struct MockObjectStore {
    pub create_calls: AtomicUsize,
    pub part_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    pub head_size: AtomicI64,
    fail_on_part: AtomicI32,
    reject_complete: AtomicBool,
    part_delay_ms: AtomicU64,
    listed_parts: Mutex<Vec<PartRecord>>,
}

impl MockObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            create_calls: AtomicUsize::new(0),
            part_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            head_size: AtomicI64::new(0),
            fail_on_part: AtomicI32::new(0),
            reject_complete: AtomicBool::new(false),
            part_delay_ms: AtomicU64::new(0),
            listed_parts: Mutex::new(Vec::new()),
        })
    }

    /// Fail the upload of exactly this part number.
    pub fn fail_on_part(&self, part_number: i32) {
        self.fail_on_part.store(part_number, Ordering::SeqCst);
    }

    /// Make the next completion call fail like an etag mismatch would.
    pub fn reject_completion(&self) {
        self.reject_complete.store(true, Ordering::SeqCst);
    }

    /// Sleep this long inside every part upload.
    pub fn set_part_delay(&self, millis: u64) {
        self.part_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn set_listed_parts(&self, parts: Vec<PartRecord>) {
        *self.listed_parts.lock().expect("listed_parts lock") = parts;
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn create_multipart_upload(&self, _key: &str, _content_type: &str) -> StoreResult<String> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("upload-{n}"))
    }

    async fn upload_part(
        &self,
        _upload_id: &str,
        _key: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<PartRecord> {
        let delay = self.part_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.part_calls.fetch_add(1, Ordering::SeqCst);
        let fail_on = self.fail_on_part.load(Ordering::SeqCst);
        if fail_on != 0 && part_number == fail_on {
            return Err(StoreError::Request {
                op: "upload_part",
                message: "injected part failure".into(),
            });
        }
        Ok(PartRecord {
            part_number,
            etag: format!("etag-{part_number}"),
            size_bytes: body.len() as i64,
        })
    }

    async fn list_parts(&self, _upload_id: &str, _key: &str) -> StoreResult<Vec<PartRecord>> {
        Ok(self.listed_parts.lock().expect("listed_parts lock").clone())
    }

    async fn complete_multipart_upload(
        &self,
        _upload_id: &str,
        _key: &str,
        _parts: &[CompletedPartInput],
    ) -> StoreResult<Option<String>> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_complete.load(Ordering::SeqCst) {
            return Err(StoreError::Request {
                op: "complete_multipart_upload",
                message: "InvalidPart: one or more of the specified parts could not be found".into(),
            });
        }
        Ok(Some("final-etag".into()))
    }

    async fn abort_multipart_upload(&self, _upload_id: &str, _key: &str) -> StoreResult<()> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn head_object(&self, _key: &str) -> StoreResult<ObjectHead> {
        Ok(ObjectHead {
            size_bytes: self.head_size.load(Ordering::SeqCst),
            etag: Some("final-etag".into()),
        })
    }

    async fn presign_upload_part(
        &self,
        upload_id: &str,
        key: &str,
        part_number: i32,
        _expires_in: Duration,
    ) -> StoreResult<String> {
        Ok(format!(
            "https://store.test/{key}?partNumber={part_number}&uploadId={upload_id}"
        ))
    }

    async fn presign_get(&self, key: &str, _expires_in: Duration) -> StoreResult<String> {
        Ok(format!("https://store.test/{key}?download=1"))
    }
}

/// Small limits so tests exercise the bounds without huge fixtures.
pub fn test_policy() -> UploadPolicy {
    UploadPolicy {
        accepted_content_types: vec!["video/".to_string()],
        max_file_size: 1024 * 1024,
        default_part_size: 256,
        min_part_size: 1,
        max_part_size: 1024 * 1024,
        presign_expiry_minutes: 15,
        max_presign_batch: 10,
        upload_workers: 1,
        job_retention_secs: 300,
        sweep_interval_secs: 60,
    }
}

/// Metadata store over a fresh in-memory SQLite database with the real
/// schema applied.
pub async fn memory_metadata() -> MetadataStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    for statement in include_str!("../../migrations/0001_init.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("migration statement");
    }
    MetadataStore::new(Arc::new(pool))
}
