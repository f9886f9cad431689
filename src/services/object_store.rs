//! Object-store gateway.
//!
//! Thin wrapper over an S3-compatible store's multipart-upload primitives:
//! session create/complete/abort, part upload and listing, head, and
//! pre-signed URL issuance. Everything above this module talks to the store
//! through the [`ObjectStore`] trait so tests can substitute doubles.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, SharedCredentialsProvider};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::config::AppConfig;
use crate::models::upload::{CompletedPartInput, PartRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} failed: {message}")]
    Request { op: &'static str, message: String },
    #[error("store response missing {0}")]
    MissingField(&'static str),
    #[error("could not build presigning config: {0}")]
    Presign(String),
}

impl StoreError {
    fn request(op: &'static str, err: impl std::fmt::Display) -> Self {
        StoreError::Request {
            op,
            message: err.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Metadata of an assembled object, from a head call.
#[derive(Clone, Debug)]
pub struct ObjectHead {
    pub size_bytes: i64,
    pub etag: Option<String>,
}

/// Multipart-upload operations against an S3-compatible object store.
///
/// `upload_id` values are issued by the store on session creation and are
/// opaque to callers. Part numbers are 1-based.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Open a multipart session for `key`; returns the store session token.
    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> StoreResult<String>;

    /// Upload one part and return its store-recorded etag and size.
    async fn upload_part(
        &self,
        upload_id: &str,
        key: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<PartRecord>;

    /// List the parts the store has durably recorded for a session.
    async fn list_parts(&self, upload_id: &str, key: &str) -> StoreResult<Vec<PartRecord>>;

    /// Assemble the object from the given parts; returns the final etag.
    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        key: &str,
        parts: &[CompletedPartInput],
    ) -> StoreResult<Option<String>>;

    /// Release all parts uploaded for a session.
    async fn abort_multipart_upload(&self, upload_id: &str, key: &str) -> StoreResult<()>;

    async fn head_object(&self, key: &str) -> StoreResult<ObjectHead>;

    /// Time-boxed PUT URL scoped to the exact (session, key, part) triple.
    async fn presign_upload_part(
        &self,
        upload_id: &str,
        key: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> StoreResult<String>;

    /// Time-boxed GET URL for a finished object.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<String>;
}

/// [`ObjectStore`] implementation backed by the AWS S3 SDK.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from the application config.
    ///
    /// Static credentials and an endpoint override are only applied when
    /// configured, so the default AWS provider chain still works for real
    /// S3. Path-style addressing is on by default for compatible stores.
    pub async fn connect(cfg: &AppConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.s3_region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&cfg.s3_access_key, &cfg.s3_secret_key) {
            let creds = Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "upload-gateway-static",
            );
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &cfg.s3_endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        if cfg.s3_force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: cfg.s3_bucket.clone(),
        }
    }

    fn presigning(expires_in: Duration) -> StoreResult<PresigningConfig> {
        PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|err| StoreError::Presign(err.to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> StoreResult<String> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|err| StoreError::request("create_multipart_upload", DisplayErrorContext(&err)))?;

        let upload_id = resp
            .upload_id()
            .ok_or(StoreError::MissingField("upload_id"))?
            .to_string();
        debug!(key, upload_id = %upload_id, "opened multipart session");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        upload_id: &str,
        key: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<PartRecord> {
        let size_bytes = body.len() as i64;
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| StoreError::request("upload_part", DisplayErrorContext(&err)))?;

        let etag = resp
            .e_tag()
            .ok_or(StoreError::MissingField("e_tag"))?
            .to_string();
        Ok(PartRecord {
            part_number,
            etag,
            size_bytes,
        })
    }

    async fn list_parts(&self, upload_id: &str, key: &str) -> StoreResult<Vec<PartRecord>> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_parts()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id);
            if let Some(m) = &marker {
                req = req.part_number_marker(m.as_str());
            }
            let resp = req
                .send()
                .await
                .map_err(|err| StoreError::request("list_parts", DisplayErrorContext(&err)))?;

            for part in resp.parts() {
                parts.push(PartRecord {
                    part_number: part.part_number().unwrap_or_default(),
                    etag: part.e_tag().unwrap_or_default().to_string(),
                    size_bytes: part.size().unwrap_or_default(),
                });
            }

            if resp.is_truncated().unwrap_or(false) {
                marker = resp.next_part_number_marker().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(parts)
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        key: &str,
        parts: &[CompletedPartInput],
    ) -> StoreResult<Option<String>> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag.as_str())
                    .build()
            })
            .collect();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| StoreError::request("complete_multipart_upload", DisplayErrorContext(&err)))?;

        debug!(key, upload_id, "completed multipart session");
        Ok(resp.e_tag().map(str::to_string))
    }

    async fn abort_multipart_upload(&self, upload_id: &str, key: &str) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| StoreError::request("abort_multipart_upload", DisplayErrorContext(&err)))?;
        debug!(key, upload_id, "aborted multipart session");
        Ok(())
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectHead> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StoreError::request("head_object", DisplayErrorContext(&err)))?;

        Ok(ObjectHead {
            size_bytes: resp.content_length().unwrap_or_default(),
            etag: resp.e_tag().map(str::to_string),
        })
    }

    async fn presign_upload_part(
        &self,
        upload_id: &str,
        key: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> StoreResult<String> {
        let presigned = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(Self::presigning(expires_in)?)
            .await
            .map_err(|err| StoreError::request("presign_upload_part", DisplayErrorContext(&err)))?;
        Ok(presigned.uri().to_string())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presigning(expires_in)?)
            .await
            .map_err(|err| StoreError::request("presign_get", DisplayErrorContext(&err)))?;
        Ok(presigned.uri().to_string())
    }
}
