//! Service layer: the object-store gateway, the client-driven upload
//! session manager, the server-driven streaming job manager, and the
//! completed-upload metadata store.

pub mod job_service;
pub mod metadata_store;
pub mod object_store;
pub mod upload_service;

#[cfg(test)]
pub mod test_support;
