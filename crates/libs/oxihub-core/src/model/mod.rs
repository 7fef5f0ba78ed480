//! # Model Layer - BMC Pattern Implementation
//!
//! Each entity has:
//! - **Data Struct**: Serializable model (e.g., `Repo`, `Token`)
//! - **Bmc Struct**: Stateless controller with async CRUD methods
//!
//! ## Available Controllers
//!
//! | BMC | Description |
//! |-----|-------------|
//! | `user::UserBmc` | Principals and password credentials |
//! | `token::TokenBmc` | API bearer tokens |
//! | `session::SessionBmc` | Cookie sessions |
//! | `org::OrgBmc` | Organizations and membership roles |
//! | `namespace::NamespaceBmc` | Globally-unique names and byte counters |
//! | `repo::RepoBmc` | Repositories and their versioning roots |
//! | `file_entry::FileEntryBmc` | Committed-file mirror rows |
//! | `lfs_object::LfsObjectBmc` | Verified content-addressed blobs |
//! | `staging::StagingBmc` | In-flight multipart uploads |
//! | `quota::QuotaBmc` | Per-namespace byte budgets |
//! | `lfs_config::LfsConfigBmc` | Per-repo large-file policy |
//!
//! ## ModelManager
//!
//! The [`ModelManager`] provides centralized access to the database, the
//! per-repo versioning trees and the object store.

pub mod file_entry;
pub mod lfs_config;
pub mod lfs_object;
pub mod namespace;
pub mod org;
pub mod quota;
pub mod repo;
pub mod session;
pub mod staging;
pub mod token;
pub mod user;

use crate::Result;
use crate::store::object_store::{MemoryObjectStore, ObjectStore, S3ObjectStore};
use crate::store::tree_store::TreeStore;
use crate::store::{self, Db};
use oxihub_common::config::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Clone)]
pub struct ModelManager {
    pub(crate) db: Db,
    /// Per-repository versioning trees. Each repo handle carries its own
    /// lock; branch compare-and-set is serialised through it.
    pub trees: Arc<TreeStore>,
    /// Content-addressed blob store behind presigned URLs.
    pub objects: Arc<dyn ObjectStore>,
    /// Mutex serialising multi-statement transactions - SQLite allows one
    /// open transaction per connection, so they queue at the application
    /// level rather than failing with a nested-transaction error.
    pub(crate) write_lock: Arc<Mutex<()>>,
    /// Application configuration, immutable after startup.
    pub app_config: Arc<AppConfig>,
}

impl ModelManager {
    /// Constructor
    pub async fn new(app_config: Arc<AppConfig>) -> Result<Self> {
        let data_dir = PathBuf::from(&app_config.server.data_dir);
        let db = store::new_db_pool(&data_dir).await?;
        let trees = Arc::new(TreeStore::new(data_dir.join("repos"))?);

        let objects: Arc<dyn ObjectStore> = match app_config.storage.backend.as_str() {
            "s3" => {
                let s3 = S3ObjectStore::new(
                    &app_config.storage,
                    app_config.signing_endpoint(),
                )
                .await?;
                s3.ensure_bucket().await?;
                Arc::new(s3)
            }
            other => {
                info!(backend = other, "using in-memory object store");
                Arc::new(MemoryObjectStore::new())
            }
        };

        Ok(ModelManager {
            db,
            trees,
            objects,
            write_lock: Arc::new(Mutex::new(())),
            app_config,
        })
    }

    /// Constructor for testing with custom db connection and stores.
    /// This is public so integration tests can use it.
    pub fn new_for_test(
        db: Db,
        trees_root: PathBuf,
        objects: Arc<dyn ObjectStore>,
        app_config: Arc<AppConfig>,
    ) -> Result<Self> {
        Ok(ModelManager {
            db,
            trees: Arc::new(TreeStore::new(trees_root)?),
            objects,
            write_lock: Arc::new(Mutex::new(())),
            app_config,
        })
    }

    /// Returns the db connection reference.
    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    /// Returns the db connection for integration tests.
    /// This should only be used in test code.
    pub fn db_for_test(&self) -> &Db {
        &self.db
    }

    /// Health check - verify database connectivity
    pub async fn health_check(&self) -> Result<bool> {
        let stmt = self.db.prepare("SELECT 1").await?;
        let mut rows = stmt.query(()).await?;
        Ok(rows.next().await?.is_some())
    }
}
