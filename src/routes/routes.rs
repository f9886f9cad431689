//! Defines routes for the upload orchestration API.
//!
//! ## Structure
//! - **Client-driven multipart sessions**
//!   - `POST /uploads`          — initialize a session
//!   - `POST /uploads/presign`  — issue pre-signed PUT URLs for a part range
//!   - `GET  /uploads/parts`    — parts recorded by the store (resumption)
//!   - `POST /uploads/complete` — assemble the object and persist its record
//!   - `POST /uploads/abort`    — release uploaded parts
//!
//! - **Server-driven streaming jobs**
//!   - `POST /jobs`                  — hand over a file, get a job id back
//!   - `GET  /jobs/{job_id}`         — poll progress
//!   - `POST /jobs/{job_id}/cancel`  — cooperative cancellation

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        job_handlers::{cancel_job, job_status, submit_job},
        upload_handlers::{
            abort_upload, complete_upload, init_upload, presign_parts, upload_parts,
        },
    },
    services::{job_service::JobService, upload_service::UploadService},
};
use axum::{
    Router,
    routing::{get, post},
};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared state carried by the router to every handler.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub jobs: JobService,
    pub db: Arc<SqlitePool>,
    pub scratch_dir: PathBuf,
}

/// Build and return the router for all upload-orchestration routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Client-driven multipart sessions
        .route("/uploads", post(init_upload))
        .route("/uploads/presign", post(presign_parts))
        .route("/uploads/parts", get(upload_parts))
        .route("/uploads/complete", post(complete_upload))
        .route("/uploads/abort", post(abort_upload))
        // Server-driven streaming jobs
        .route("/jobs", post(submit_job))
        .route("/jobs/{job_id}", get(job_status))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
}
