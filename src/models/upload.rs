//! Client-driven multipart upload sessions and parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A multipart upload session opened against the object store.
///
/// Returned by session initialization. `upload_id` is issued by the store
/// and opaque to this service; `object_key` is generated once at creation
/// and never mutated afterwards.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// Store-issued session token.
    pub upload_id: String,

    /// Final storage path, `uploads/{uuid}/{filename}`.
    pub object_key: String,

    /// Effective bytes per part.
    pub part_size: i64,

    /// Always 1.
    pub min_part_number: i32,

    /// `ceil(declared_size / part_size)`.
    pub max_part_number: i32,
}

/// One uploaded chunk as durably recorded by the store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    /// Part number (1-based).
    pub part_number: i32,

    /// Store-issued integrity token for this part.
    pub etag: String,

    /// Size in bytes.
    pub size_bytes: i64,
}

/// A `(part_number, etag)` pair supplied by the client at completion.
///
/// The store, not this service, checks each etag against what it recorded
/// when the part was uploaded.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPartInput {
    pub part_number: i32,
    pub etag: String,
}

/// A time-boxed PUT URL scoped to one part of one upload session.
///
/// All URLs issued in a single batch share the same `expires_at`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PresignedPartUrl {
    pub part_number: i32,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Persisted record of a finished upload.
///
/// Created exactly once per successful completion and never updated by this
/// service afterwards.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Display filename, the trailing segment of the object key.
    pub filename: String,

    /// Size reported by the store's head call after assembly.
    pub size_bytes: i64,

    /// Object key in the store (unique).
    pub object_key: String,

    /// Record status, `COMPLETED`.
    pub status: String,

    /// Final etag of the assembled object.
    pub checksum: Option<String>,

    /// Timestamp when the record was created.
    pub created_at: DateTime<Utc>,
}
