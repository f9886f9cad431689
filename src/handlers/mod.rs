//! HTTP handlers: health probes, client-driven upload sessions, and
//! server-driven streaming jobs.

pub mod health_handlers;
pub mod job_handlers;
pub mod upload_handlers;
