//! # oxihub-core: Core Logic for the oxihub Artifact Hub
//!
//! `oxihub-core` contains the upload/commit/download pipeline of the hub:
//! everything between an authenticated HTTP request and a consistent,
//! versioned, content-addressed artifact.
//!
//! ## Architecture
//!
//! - **BMC Layer**: Stateless controllers for all metadata operations
//! - **ModelManager**: Central manager for the database, the per-repo
//!   versioning trees and the object store
//! - **Tree store**: Per-repository bare git trees; inline entries are
//!   blobs, external entries are git-lfs pointer files
//! - **Object store**: Content-addressed blobs behind presigned URLs
//!
//! ## Key Modules
//!
//! - [`model`]: BMC controllers and data models
//! - [`store`]: Database pool, versioning trees, object store
//! - [`access`]: Authorization matrix and quota admission
//! - [`transfer`]: Preupload classifier and large-file batch broker
//! - [`commit`]: Streaming NDJSON commit engine
//! - [`resolve`]: Revision resolution and file resolution
//! - [`gc`]: Staging janitor and blob reclamation
//!
//! ## Example
//!
//! ```no_run
//! use oxihub_core::model::{ModelManager, repo::RepoBmc};
//! use oxihub_core::ctx::Ctx;
//! use oxihub_common::config::AppConfig;
//! use std::sync::Arc;
//!
//! async fn example() -> oxihub_core::Result<()> {
//!     let mm = ModelManager::new(Arc::new(AppConfig::default())).await?;
//!     let ctx = Ctx::root_ctx();
//!     let repos = RepoBmc::list_for_namespace(&ctx, &mm, "alice", None).await?;
//!     println!("{} repos", repos.len());
//!     Ok(())
//! }
//! ```

/// Request context for authentication and authorization.
pub mod ctx;

/// Error types and Result alias for oxihub-core operations.
pub mod error;

/// Backend Model Controllers (BMC) and data models for all entities.
pub mod model;

/// Low-level storage: database pool, versioning trees, object store.
pub mod store;

/// Authorization matrix and quota admission control.
pub mod access;

/// Preupload classifier and large-file transfer broker.
pub mod transfer;

/// Streaming commit engine.
pub mod commit;

/// Revision and file resolution.
pub mod resolve;

/// Background maintenance: staging janitor and blob GC.
pub mod gc;

// Re-export core types
pub use ctx::Ctx;
pub use error::{Error, Result};
pub use model::ModelManager;
