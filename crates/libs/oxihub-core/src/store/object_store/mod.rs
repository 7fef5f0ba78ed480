//! Content-addressed blob storage with presigned access.
//!
//! The hub never proxies large-file bytes: clients talk to the object store
//! directly over presigned URLs, and the core only issues URLs, stats keys
//! and drives the multipart lifecycle.
//!
//! Keys are derived deterministically from the content sha256
//! (`sha256/ab/cd/<full-hash>`), so identical content occupies one blob
//! globally, across repositories and namespaces. Keys are write-once: a
//! second upload of the same oid lands on the same key with identical bytes.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub mod memory;
pub mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// Result of a `stat` on a storage key.
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub size: u64,
    pub etag: Option<String>,
}

/// A time-bounded URL authorising one HTTP verb directly against the store.
#[derive(Debug, Clone)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// One completed part of a multipart upload, echoed back by the client.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// S3-shape storage interface.
///
/// Implementations: [`S3ObjectStore`] for production (MinIO/AWS), and
/// [`MemoryObjectStore`] for tests and local smoke runs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn presign_put(
        &self,
        key: &str,
        ttl: Duration,
        content_length: Option<u64>,
    ) -> Result<PresignedUrl>;

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<PresignedUrl>;

    /// Starts a multipart upload, returning the store's upload id.
    async fn initiate_multipart(&self, key: &str) -> Result<String>;

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl: Duration,
    ) -> Result<PresignedUrl>;

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;

    /// `Ok(None)` when the key does not exist.
    async fn stat(&self, key: &str) -> Result<Option<ObjectStat>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Storage key for a content sha256: `sha256/<oid[0:2]>/<oid[2:4]>/<oid>`.
///
/// The caller guarantees `oid` is a validated 64-char lowercase hex digest.
pub fn blob_key(oid: &str) -> String {
    debug_assert!(oid.len() >= 4);
    format!("sha256/{}/{}/{}", &oid[0..2], &oid[2..4], oid)
}
