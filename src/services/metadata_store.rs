//! Persistence for completed-upload records.
//!
//! The rest of the system consumes this as a save/query collaborator only:
//! a record is written exactly once when an upload completes and never
//! updated afterwards.

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::upload::CompletedUpload;

/// Save/query interface over the `completed_uploads` table.
#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a completion record. `object_key` is unique; completing the
    /// same key twice surfaces the database's constraint error.
    pub async fn save_completed(
        &self,
        filename: &str,
        size_bytes: i64,
        object_key: &str,
        checksum: Option<&str>,
    ) -> Result<CompletedUpload, sqlx::Error> {
        sqlx::query_as::<_, CompletedUpload>(
            r#"
            INSERT INTO completed_uploads (
                id, filename, size_bytes, object_key, status, checksum, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, filename, size_bytes, object_key, status, checksum, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(filename)
        .bind(size_bytes)
        .bind(object_key)
        .bind("COMPLETED")
        .bind(checksum)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    pub async fn find_by_object_key(
        &self,
        object_key: &str,
    ) -> Result<Option<CompletedUpload>, sqlx::Error> {
        sqlx::query_as::<_, CompletedUpload>(
            "SELECT id, filename, size_bytes, object_key, status, checksum, created_at
             FROM completed_uploads WHERE object_key = ?",
        )
        .bind(object_key)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn exists(&self, object_key: &str) -> Result<bool, sqlx::Error> {
        Ok(self.find_by_object_key(object_key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::services::test_support::memory_metadata;

    #[tokio::test]
    async fn save_then_find_round_trips() {
        let store = memory_metadata().await;

        let saved = store
            .save_completed("movie.mp4", 4242, "uploads/u/movie.mp4", Some("final-etag"))
            .await
            .expect("save should succeed");
        assert_eq!(saved.filename, "movie.mp4");
        assert_eq!(saved.size_bytes, 4242);
        assert_eq!(saved.status, "COMPLETED");
        assert_eq!(saved.checksum.as_deref(), Some("final-etag"));

        let found = store
            .find_by_object_key("uploads/u/movie.mp4")
            .await
            .expect("query")
            .expect("row exists");
        assert_eq!(found.id, saved.id);
        assert!(store.exists("uploads/u/movie.mp4").await.expect("exists"));
        assert!(!store.exists("uploads/u/other.mp4").await.expect("exists"));
    }

    #[tokio::test]
    async fn object_key_is_unique() {
        let store = memory_metadata().await;
        store
            .save_completed("a.mp4", 1, "uploads/u/a.mp4", None)
            .await
            .expect("first save");

        let err = store
            .save_completed("a.mp4", 1, "uploads/u/a.mp4", None)
            .await
            .expect_err("duplicate key must be rejected");
        assert!(matches!(err, sqlx::Error::Database(_)));
    }
}
