//! Core data models for the upload orchestration service.
//!
//! These types describe multipart upload sessions, uploaded parts,
//! streaming-job progress, and the completed-upload records persisted to
//! SQLite. They map to database rows via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod job;
pub mod upload;
