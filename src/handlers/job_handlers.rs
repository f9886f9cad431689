//! HTTP handlers for server-driven streaming uploads.
//!
//! The client hands over the whole file as multipart/form-data; the server
//! buffers it to a scratch file, submits a background job, and the client
//! polls for progress instead of holding a connection open for the whole
//! transfer.

use crate::{errors::AppError, routes::routes::AppState};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

/// Response for `POST /jobs`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub object_key: String,
    pub message: String,
}

/// POST `/jobs` — accept a file and start a streaming upload job.
///
/// Expects a multipart form with a `file` field and an optional `chunkSize`
/// field. Returns as soon as the file is buffered locally and the job is
/// queued; the transfer happens in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut chunk_size: Option<i64> = None;
    let mut buffered: Option<(PathBuf, String, String)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("chunkSize") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("unreadable chunkSize: {err}")))?;
                let parsed = text.trim().parse::<i64>().map_err(|_| {
                    AppError::bad_request(format!("chunkSize is not a number: `{text}`"))
                })?;
                chunk_size = Some(parsed);
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();

                fs::create_dir_all(&state.scratch_dir)
                    .await
                    .map_err(|err| AppError::internal(format!("scratch dir: {err}")))?;
                let tmp_path = state
                    .scratch_dir
                    .join(format!(".upload-{}", Uuid::new_v4()));
                let mut file = File::create(&tmp_path)
                    .await
                    .map_err(|err| AppError::internal(format!("scratch file: {err}")))?;

                // Stream the field to disk; never hold the file in memory.
                loop {
                    let chunk = match field.chunk().await {
                        Ok(Some(chunk)) => chunk,
                        Ok(None) => break,
                        Err(err) => {
                            let _ = fs::remove_file(&tmp_path).await;
                            return Err(AppError::bad_request(format!(
                                "upload stream interrupted: {err}"
                            )));
                        }
                    };
                    if let Err(err) = file.write_all(&chunk).await {
                        let _ = fs::remove_file(&tmp_path).await;
                        return Err(AppError::internal(format!("buffering upload: {err}")));
                    }
                }
                if let Err(err) = file.flush().await {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(AppError::internal(format!("buffering upload: {err}")));
                }

                buffered = Some((tmp_path, filename, content_type));
            }
            _ => {}
        }
    }

    let (tmp_path, filename, content_type) =
        buffered.ok_or_else(|| AppError::bad_request("missing `file` field"))?;

    // The job owns the scratch file only once submit succeeds; on a
    // validation failure it is removed here.
    match state
        .jobs
        .submit(tmp_path.clone(), &filename, &content_type, chunk_size)
        .await
    {
        Ok((job_id, object_key)) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitJobResponse {
                job_id,
                object_key,
                message: "upload accepted; poll the job status for progress".into(),
            }),
        )),
        Err(err) => {
            let _ = fs::remove_file(&tmp_path).await;
            Err(err.into())
        }
    }
}

/// GET `/jobs/{job_id}` — progress snapshot for a job.
///
/// Unknown and already-evicted jobs are indistinguishable; both produce a
/// NOT_FOUND sentinel body rather than an error.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    match state.jobs.status(&job_id) {
        Some(progress) => Ok(Json(progress).into_response()),
        None => Ok(Json(json!({
            "jobId": job_id,
            "status": "NOT_FOUND",
        }))
        .into_response()),
    }
}

/// POST `/jobs/{job_id}/cancel` — flag a job for cooperative cancellation.
///
/// The flag is honored between part uploads; an in-flight part finishes
/// first. Jobs that are unknown or already terminal report `cancelled:
/// false`.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let cancelled = state.jobs.cancel(&job_id);
    Ok(Json(json!({
        "jobId": job_id,
        "cancelled": cancelled,
    })))
}
