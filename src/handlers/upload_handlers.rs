//! HTTP handlers for client-driven multipart uploads.
//!
//! The client drives the transfer itself: it initializes a session here,
//! PUTs part bytes straight to the object store through pre-signed URLs,
//! and comes back to list recorded parts, complete, or abort. Part payloads
//! never pass through these handlers.

use crate::{
    errors::AppError,
    models::upload::{CompletedPartInput, CompletedUpload},
    routes::routes::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

/// Body for `POST /uploads`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: String,
    pub size: i64,
    pub content_type: String,
    pub chunk_size: Option<i64>,
}

/// Body for `POST /uploads/presign`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub upload_id: String,
    pub object_key: String,
    pub start_part: i32,
    pub end_part: i32,
}

/// Query params for `GET /uploads/parts`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartsQuery {
    pub upload_id: String,
    pub object_key: String,
}

/// Body for `POST /uploads/complete`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_id: String,
    pub object_key: String,
    pub parts: Vec<CompletedPartInput>,
}

/// Body for `POST /uploads/abort`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    pub upload_id: String,
    pub object_key: String,
}

/// Completion record plus the freshly signed download URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    #[serde(flatten)]
    pub record: CompletedUpload,
    pub download_url: String,
}

/// POST `/uploads` — open a multipart session.
pub async fn init_upload(
    State(state): State<AppState>,
    Json(req): Json<InitUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .uploads
        .initialize_upload(&req.file_name, req.size, &req.content_type, req.chunk_size)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST `/uploads/presign` — issue PUT URLs for an inclusive part range.
pub async fn presign_parts(
    State(state): State<AppState>,
    Json(req): Json<PresignRequest>,
) -> Result<impl IntoResponse, AppError> {
    let urls = state
        .uploads
        .presigned_part_urls(&req.upload_id, &req.object_key, req.start_part, req.end_part)
        .await?;
    Ok(Json(urls))
}

/// GET `/uploads/parts` — parts the store has durably recorded.
///
/// Clients diff this listing against `[1, maxPartNumber]` to resume an
/// interrupted upload.
pub async fn upload_parts(
    State(state): State<AppState>,
    Query(query): Query<PartsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let parts = state
        .uploads
        .upload_status(&query.upload_id, &query.object_key)
        .await?;
    Ok(Json(parts))
}

/// POST `/uploads/complete` — assemble the object and persist its record.
pub async fn complete_upload(
    State(state): State<AppState>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (record, download_url) = state
        .uploads
        .complete_upload(&req.upload_id, &req.object_key, req.parts)
        .await?;
    Ok(Json(CompleteUploadResponse {
        record,
        download_url,
    }))
}

/// POST `/uploads/abort` — release all uploaded parts for a session.
pub async fn abort_upload(
    State(state): State<AppState>,
    Json(req): Json<AbortUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .uploads
        .abort_upload(&req.upload_id, &req.object_key)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
