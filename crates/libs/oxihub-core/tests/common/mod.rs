//! Common test utilities and fixtures
//!
//! Provides test helpers for setting up isolated test environments.
//! Each test gets its own database file, versioning-tree root and
//! in-memory object store inside a TempDir that cleans up via RAII.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use oxihub_common::config::AppConfig;
use oxihub_core::commit::{self, CommitResult};
use oxihub_core::model::repo::{Repo, RepoBmc, RepoKind};
use oxihub_core::model::user::UserBmc;
use oxihub_core::store::object_store::{MemoryObjectStore, blob_key};
use oxihub_core::transfer::{self, VerifyRequest};
use oxihub_core::{Ctx, ModelManager, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Global counter for unique database names
static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Test context managing an isolated ModelManager.
pub struct TestContext {
    pub mm: ModelManager,
    pub ctx: Ctx,
    pub store: Arc<MemoryObjectStore>,
    #[allow(dead_code)]
    temp_dir: TempDir, // Keep alive for duration of test
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        Self::new_with_config(AppConfig::default()).await
    }

    pub async fn new_with_config(config: AppConfig) -> Result<Self> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_path = temp_dir.path().join(format!("test_db_{}.db", counter));

        let db = libsql::Builder::new_local(&db_path)
            .build()
            .await
            .expect("Failed to build test db")
            .connect()
            .expect("Failed to connect test db");
        oxihub_core::store::apply_pragmas_and_migrations(&db).await?;

        let store = Arc::new(MemoryObjectStore::new());
        let mm = ModelManager::new_for_test(
            db,
            temp_dir.path().join("repos"),
            store.clone(),
            Arc::new(config),
        )?;

        let tc = Self {
            mm,
            ctx: Ctx::root_ctx(),
            store,
            temp_dir,
        };

        // The first registered user becomes the instance operator; burn that
        // slot so users created by tests are ordinary principals.
        UserBmc::create(&tc.ctx, &tc.mm, "bootstrap-admin", "bootstrap-pass").await?;

        Ok(tc)
    }

    /// Registers a user and returns a Ctx carrying their actual flags.
    pub async fn create_user(&self, username: &str) -> Result<Ctx> {
        let id = UserBmc::create(&self.ctx, &self.mm, username, "password123").await?;
        let user = UserBmc::get(&self.ctx, &self.mm, id).await?;
        Ok(Ctx::user(user.id, user.username, user.is_operator))
    }

    /// Creates a public model repo owned by `ctx`'s user namespace.
    pub async fn create_repo(&self, ctx: &Ctx, name: &str) -> Result<Repo> {
        let namespace = ctx.username().expect("ctx must carry a user");
        RepoBmc::create(ctx, &self.mm, RepoKind::Model, namespace, name, false).await
    }

    /// Stands in for the full client upload flow: PUT to the presigned URL
    /// (a direct write on the memory store) followed by verification.
    pub async fn upload_and_verify(&self, ctx: &Ctx, repo: &Repo, bytes: &[u8]) -> Result<String> {
        let oid = hex::encode(Sha256::digest(bytes));
        self.store.put(&blob_key(&oid), bytes.to_vec());
        transfer::verify(
            ctx,
            &self.mm,
            repo,
            &VerifyRequest {
                oid: oid.clone(),
                size: bytes.len() as u64,
                parts: vec![],
            },
        )
        .await?;
        Ok(oid)
    }

    /// Runs the streaming commit engine over an NDJSON body.
    pub async fn commit(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        revision: &str,
        body: &str,
    ) -> Result<CommitResult> {
        commit::commit_stream(ctx, &self.mm, repo, revision, body.as_bytes()).await
    }
}

// -- NDJSON record builders

pub fn header_line(summary: &str) -> String {
    format!(r#"{{"key":"header","value":{{"summary":"{summary}"}}}}"#)
}

pub fn file_line(path: &str, bytes: &[u8]) -> String {
    format!(
        r#"{{"key":"file","value":{{"path":"{path}","content":"{}","encoding":"base64"}}}}"#,
        BASE64.encode(bytes)
    )
}

pub fn lfs_line(path: &str, oid: &str, size: u64) -> String {
    format!(
        r#"{{"key":"lfsFile","value":{{"path":"{path}","algo":"sha256","oid":"{oid}","size":{size}}}}}"#
    )
}

pub fn delete_line(path: &str) -> String {
    format!(r#"{{"key":"deletedFile","value":{{"path":"{path}"}}}}"#)
}

pub fn copy_line(from: &str, to: &str) -> String {
    format!(r#"{{"key":"copyFile","value":{{"fromPath":"{from}","toPath":"{to}"}}}}"#)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
