//! S3 (and MinIO-compatible) object store backend.
//!
//! Presigned URLs are signed against the *public* storage endpoint so that
//! hrefs handed to clients resolve from outside the deployment.

use super::{CompletedPart, ObjectStat, ObjectStore, PresignedUrl};
use crate::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use chrono::Utc;
use oxihub_common::config::StorageConfig;
use std::time::Duration;
use tracing::info;

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Builds a client against `signing_endpoint` (the client-reachable one)
    /// when set, otherwise the in-cluster endpoint, otherwise ambient AWS
    /// configuration.
    pub async fn new(cfg: &StorageConfig, signing_endpoint: Option<&str>) -> Result<Self> {
        let client = match (&cfg.access_key, &cfg.secret_key) {
            (Some(access), Some(secret)) => {
                let creds = Credentials::new(access, secret, None, None, "oxihub-config");
                let mut builder = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(cfg.region.clone()))
                    .credentials_provider(creds)
                    .force_path_style(true);
                if let Some(endpoint) = signing_endpoint {
                    builder = builder.endpoint_url(endpoint);
                }
                Client::from_conf(builder.build())
            }
            _ => {
                let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
                Client::new(&sdk_config)
            }
        };

        Ok(Self {
            client,
            bucket: cfg.bucket.clone(),
        })
    }

    /// Creates the bucket if it does not exist yet. Called once at startup.
    pub async fn ensure_bucket(&self) -> Result<()> {
        match self
            .client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => {
                info!(bucket = %self.bucket, "created storage bucket");
                Ok(())
            }
            Err(SdkError::ServiceError(ctx)) => {
                let err = ctx.err();
                if err.is_bucket_already_owned_by_you() || err.is_bucket_already_exists() {
                    Ok(())
                } else {
                    Err(Error::ObjectStore(err.to_string()))
                }
            }
            Err(other) => Err(map_sdk_err(other)),
        }
    }

    fn presign_config(ttl: Duration) -> Result<PresigningConfig> {
        PresigningConfig::expires_in(ttl).map_err(|e| Error::ObjectStore(e.to_string()))
    }
}

/// Dispatch and timeout failures are transient; everything else is a hard
/// object-store error.
fn map_sdk_err<E>(err: SdkError<E>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => Error::BackendUnavailable,
        _ => Error::ObjectStore(err.to_string()),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presign_put(
        &self,
        key: &str,
        ttl: Duration,
        content_length: Option<u64>,
    ) -> Result<PresignedUrl> {
        let expires_at = Utc::now() + ttl;
        let mut req = self.client.put_object().bucket(&self.bucket).key(key);
        if let Some(len) = content_length {
            req = req.content_length(len as i64);
        }
        let presigned = req
            .presigned(Self::presign_config(ttl)?)
            .await
            .map_err(map_sdk_err)?;
        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            expires_at,
        })
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<PresignedUrl> {
        let expires_at = Utc::now() + ttl;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presign_config(ttl)?)
            .await
            .map_err(map_sdk_err)?;
        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            expires_at,
        })
    }

    async fn initiate_multipart(&self, key: &str) -> Result<String> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_err)?;
        out.upload_id()
            .map(String::from)
            .ok_or_else(|| Error::ObjectStore("store returned no upload id".to_string()))
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl: Duration,
    ) -> Result<PresignedUrl> {
        let expires_at = Utc::now() + ttl;
        let presigned = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(Self::presign_config(ttl)?)
            .await
            .map_err(map_sdk_err)?;
        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            expires_at,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let parts: Vec<S3CompletedPart> = parts
            .iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectStat>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(Some(ObjectStat {
                size: out.content_length().unwrap_or(0).max(0) as u64,
                etag: out.e_tag().map(String::from),
            })),
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => Ok(None),
            Err(other) => Err(map_sdk_err(other)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }
}
