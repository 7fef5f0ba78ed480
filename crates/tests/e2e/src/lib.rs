//! End-to-end test harness: boots the full axum router on an isolated
//! ModelManager and drives it in-process with `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use http_body_util::BodyExt;
use oxihub_common::config::AppConfig;
use oxihub_core::ModelManager;
use oxihub_core::store::object_store::MemoryObjectStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;
use tower::ServiceExt;

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct TestServer {
    pub router: Router,
    pub mm: ModelManager,
    pub store: Arc<MemoryObjectStore>,
    #[allow(dead_code)]
    temp_dir: TempDir,
}

/// A captured response with the body already collected.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestServer {
    pub async fn new() -> Self {
        Self::new_with_config(AppConfig::default()).await
    }

    pub async fn new_with_config(config: AppConfig) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_path = temp_dir.path().join(format!("e2e_{counter}.db"));

        let db = libsql::Builder::new_local(&db_path)
            .build()
            .await
            .expect("build db")
            .connect()
            .expect("connect db");
        oxihub_core::store::apply_pragmas_and_migrations(&db)
            .await
            .expect("migrations");

        let store = Arc::new(MemoryObjectStore::new());
        let mm = ModelManager::new_for_test(
            db,
            temp_dir.path().join("repos"),
            store.clone(),
            Arc::new(config),
        )
        .expect("model manager");

        let router = oxihub_server::router(oxihub_server::build_state(mm.clone()));

        let server = Self {
            router,
            mm,
            store,
            temp_dir,
        };

        // First registered user becomes the operator; burn the slot so test
        // accounts behave like ordinary users.
        server
            .post_json(
                "/api/users/create",
                None,
                serde_json::json!({
                    "username": "bootstrap-admin", "password": "bootstrap-pass"
                }),
            )
            .await;

        server
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router call");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).expect("request")).await
    }

    pub async fn head(&self, path: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("HEAD").uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).expect("request")).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        cookie: Option<&str>,
        body: serde_json::Value,
    ) -> TestResponse {
        self.json_request("POST", path, cookie, body).await
    }

    pub async fn json_request(
        &self,
        method: &str,
        path: &str,
        cookie: Option<&str>,
        body: serde_json::Value,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(
            builder
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
    }

    /// NDJSON commit request.
    pub async fn post_ndjson(
        &self,
        path: &str,
        cookie: Option<&str>,
        body: String,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-ndjson");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body)).expect("request"))
            .await
    }

    /// Registers a user and returns their session cookie pair.
    pub async fn register_and_login(&self, username: &str) -> String {
        let response = self
            .post_json(
                "/api/users/create",
                None,
                serde_json::json!({ "username": username, "password": "password123" }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "register {username}");

        let response = self
            .post_json(
                "/api/users/login",
                None,
                serde_json::json!({ "username": username, "password": "password123" }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "login {username}");
        let set_cookie = response.header("set-cookie").expect("set-cookie");
        set_cookie
            .split(';')
            .next()
            .expect("cookie pair")
            .to_string()
    }

    pub async fn create_repo(&self, cookie: &str, name: &str) -> serde_json::Value {
        let response = self
            .post_json(
                "/api/repos/create",
                Some(cookie),
                serde_json::json!({ "type": "model", "name": name }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "create repo {name}");
        response.json()
    }
}

// -- NDJSON builders shared by the wire tests

pub fn ndjson_header(summary: &str) -> String {
    format!(r#"{{"key":"header","value":{{"summary":"{summary}"}}}}"#)
}

pub fn ndjson_file(path: &str, bytes: &[u8]) -> String {
    use base64::Engine;
    format!(
        r#"{{"key":"file","value":{{"path":"{path}","content":"{}","encoding":"base64"}}}}"#,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

pub fn ndjson_lfs(path: &str, oid: &str, size: u64) -> String {
    format!(
        r#"{{"key":"lfsFile","value":{{"path":"{path}","algo":"sha256","oid":"{oid}","size":{size}}}}}"#
    )
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}
