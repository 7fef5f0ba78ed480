//! Low-level storage for oxihub-core.
//!
//! Three engines live below the model layer:
//!
//! 1. **SQLite database** (via libsql): durable metadata for users,
//!    namespaces, repositories, file mirror rows, tokens, quotas and
//!    staging records
//! 2. **Versioning trees** (via git2, [`tree_store`]): one bare git
//!    repository per hub repository
//! 3. **Object store** ([`object_store`]): content-addressed blobs behind
//!    presigned URLs
//!
//! # Database Configuration
//!
//! The database is configured for high-concurrency request handling:
//! - WAL mode for concurrent reads during writes
//! - 30-second busy timeout for lock contention
//! - 64MB cache for reduced I/O

use crate::{Error, Result};
use libsql::{Builder, Connection};
use std::path::Path;

/// Type alias for database connections.
pub type Db = Connection;

/// Per-repository versioning trees.
pub mod tree_store;

/// Content-addressed blob storage with presigned access.
pub mod object_store;

/// LRU cache of open git repositories.
pub mod repo_cache;

/// Creates a new database connection with migrations applied.
///
/// Opens (or creates) the SQLite database under `data_dir`, applies
/// concurrency pragmas and runs all embedded migrations in order.
pub async fn new_db_pool(data_dir: &Path) -> Result<Db> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("oxihub.db");

    let db = Builder::new_local(db_path).build().await?;
    let conn = db.connect()?;

    apply_pragmas_and_migrations(&conn).await?;
    Ok(conn)
}

/// Applies concurrency pragmas and embedded migrations to a connection.
/// Exposed so tests can build isolated databases in temp dirs.
pub async fn apply_pragmas_and_migrations(conn: &Connection) -> Result<()> {
    // WAL mode: concurrent reads during writes
    let _ = conn.execute("PRAGMA journal_mode=WAL;", ()).await;
    // Wait up to 30 seconds on lock contention instead of failing immediately
    let _ = conn.execute("PRAGMA busy_timeout=30000;", ()).await;
    let _ = conn.execute("PRAGMA synchronous=NORMAL;", ()).await;
    // negative = KB, so -64000 = 64MB
    let _ = conn.execute("PRAGMA cache_size=-64000;", ()).await;
    let _ = conn.execute("PRAGMA foreign_keys=ON;", ()).await;

    // SQLite's IF NOT EXISTS makes re-application idempotent
    let migrations = [
        include_str!("../../../../../migrations/001_initial_schema.sql"),
        include_str!("../../../../../migrations/002_transfer_state.sql"),
        include_str!("../../../../../migrations/003_policies.sql"),
    ];
    for migration in &migrations {
        conn.execute_batch(migration).await?;
    }
    Ok(())
}

/// Retries a fallible async operation up to two extra times on transient
/// failures, then surfaces the terminal error. Owned by the store layer:
/// nothing above it (in particular the commit engine) retries.
pub async fn with_retries<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last = None;
    for attempt in 0..3 {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => {
                tracing::warn!(attempt, error = %e, "transient storage failure, retrying");
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or(Error::StorageUnavailable))
}
