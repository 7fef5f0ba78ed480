//! Error types for oxihub-core operations.
//!
//! Errors are categorized into:
//!
//! - **External errors**: Wrapped errors from dependencies (libsql, git2,
//!   serde_json, io, the object store)
//! - **Auth errors**: authentication and authorization failures
//! - **Domain errors**: stable, typed failure modes of the pipeline
//!   (quota, transfer protocol, commit engine, resolution)
//!
//! Every domain variant carries a stable symbolic kind via [`Error::kind`];
//! the HTTP layer maps kinds to status codes and the `X-Error-Code` header.

use strum_macros::AsRefStr;
use thiserror::Error;

/// The error type for oxihub-core operations.
#[derive(Debug, Error, AsRefStr)]
pub enum Error {
    // -- External errors from dependencies
    /// Database error from libsql.
    #[error("Libsql Error: {0}")]
    Libsql(#[from] libsql::Error),

    /// Versioning tree error.
    #[error("Git Error: {0}")]
    Git2(#[from] git2::Error),

    /// JSON serialization/deserialization error.
    #[error("Serde JSON Error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Standard I/O error.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// Object store operation failed for a reason other than "not found".
    #[error("Object store error: {0}")]
    ObjectStore(String),

    // -- Auth layer
    /// No credentials were presented where some are required.
    #[error("Authentication required")]
    Unauthenticated,

    /// Credentials were recognised but wrong.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The presented token exists but has been revoked.
    #[error("Token revoked")]
    RevokedToken,

    /// The caller lacks access to the target.
    #[error("Access denied")]
    Forbidden,

    // -- Lookup failures
    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Revision not found: {0}")]
    RevisionNotFound(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Entity not found")]
    NotFound,

    // -- Naming
    /// A namespace, repository or ref name is already in use.
    #[error("Name already taken: {0}")]
    NameTaken(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    // -- Quota
    /// Admission control rejected the write: committed usage would exceed
    /// the effective byte budget.
    #[error("Quota exceeded for {scope}: projected {projected} > limit {limit}")]
    QuotaExceeded {
        scope: String,
        projected: u64,
        limit: u64,
    },

    // -- Transfer protocol
    /// An inline commit record carried bytes at or above the LFS threshold.
    #[error("Inline file too large: {path} ({size} bytes, threshold {threshold})")]
    InlineTooLarge {
        path: String,
        size: u64,
        threshold: u64,
    },

    /// An object exceeds the configured per-object cap.
    #[error("Object too large: {oid} ({size} bytes)")]
    ObjectTooLarge { oid: String, size: u64 },

    /// A commit referenced an oid whose upload has not been verified yet.
    #[error("Object not ready: {0}")]
    ObjectNotReady(String),

    /// Uploaded bytes disagree with the declared size.
    #[error("Size mismatch for {oid}: declared {declared}, stored {stored}")]
    SizeMismatch {
        oid: String,
        declared: u64,
        stored: u64,
    },

    /// An oid that is not a lowercase hex sha256.
    #[error("Unsupported hash: {0}")]
    UnsupportedHash(String),

    // -- Concurrency
    /// The branch tip moved between the start of a commit and its
    /// compare-and-set. The client retries from scratch.
    #[error("Stale revision: expected parent {expected}, tip is {actual}")]
    StaleRevision { expected: String, actual: String },

    /// Generic compare-and-set failure inside the versioning engine.
    #[error("Concurrent update")]
    ConcurrentUpdate,

    // -- Availability
    /// The metadata store is unreachable after retries; safe to retry later.
    #[error("Storage unavailable")]
    StorageUnavailable,

    /// The object store is unreachable after retries; safe to retry later.
    #[error("Backend unavailable")]
    BackendUnavailable,

    // -- Payload
    /// The request body could not be parsed as the documented shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl Error {
    /// Stable symbolic kind, as exposed in the `X-Error-Code` header and the
    /// JSON error envelope. These strings never change across versions.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated => "unauthenticated",
            Error::InvalidCredentials => "invalid_credentials",
            Error::RevokedToken => "revoked_token",
            Error::Forbidden => "forbidden",
            Error::RepoNotFound(_) => "repo_not_found",
            Error::RevisionNotFound(_) => "revision_not_found",
            Error::PathNotFound(_) => "path_not_found",
            Error::UserNotFound(_) | Error::NamespaceNotFound(_) | Error::NotFound => "not_found",
            Error::NameTaken(_) => "name_taken",
            Error::InvalidName(_) => "invalid_name",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::InlineTooLarge { .. } => "inline_too_large",
            Error::ObjectTooLarge { .. } => "object_too_large",
            Error::ObjectNotReady(_) => "object_not_ready",
            Error::SizeMismatch { .. } => "size_mismatch",
            Error::UnsupportedHash(_) => "unsupported_hash",
            Error::StaleRevision { .. } => "stale_revision",
            Error::ConcurrentUpdate => "concurrent_update",
            Error::StorageUnavailable | Error::Libsql(_) => "storage_unavailable",
            Error::BackendUnavailable | Error::ObjectStore(_) => "backend_unavailable",
            Error::MalformedPayload(_) | Error::SerdeJson(_) => "malformed_payload",
            Error::Git2(_) | Error::Io(_) => "internal_error",
        }
    }

    /// True for failures a client may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StorageUnavailable | Error::BackendUnavailable | Error::Libsql(_)
        )
    }
}

/// A specialized [`Result`] type for oxihub-core operations.
pub type Result<T> = core::result::Result<T, Error>;
