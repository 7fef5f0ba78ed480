//! Wire-level tests for accounts, repositories and the error envelope.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::StatusCode;
use e2e_tests::TestServer;
use serde_json::json;

#[tokio::test]
async fn test_register_login_whoami() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;

    let response = server.get("/api/whoami-v2", Some(&cookie)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["name"], "alice");

    // Anonymous whoami is a 401 with the stable code.
    let response = server.get("/api/whoami-v2", None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.header("x-error-code"), Some("unauthenticated"));
}

#[tokio::test]
async fn test_duplicate_username_conflict() {
    let server = TestServer::new().await;
    server.register_and_login("alice").await;

    let response = server
        .post_json(
            "/api/users/create",
            None,
            json!({ "username": "alice", "password": "password123" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.json()["error"], "name_taken");
}

#[tokio::test]
async fn test_token_roundtrip() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;

    let response = server
        .post_json(
            "/api/users/tokens/create",
            Some(&cookie),
            json!({ "label": "ci" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let token = response.json()["token"].as_str().expect("token").to_string();
    assert!(token.starts_with("oxh_"));

    // The bearer token authenticates API calls without a cookie.
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/api/whoami-v2")
        .header("authorization", format!("Bearer {token}"))
        .body(axum::body::Body::empty())
        .expect("request");
    let response = server.send(request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["name"], "alice");
}

#[tokio::test]
async fn test_repo_create_and_list() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;

    let created = server.create_repo(&cookie, "m1").await;
    assert_eq!(created["id"], "alice/m1");

    let response = server.get("/api/models/alice", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let repos = response.json();
    assert_eq!(repos.as_array().expect("array").len(), 1);
    assert_eq!(repos[0]["id"], "alice/m1");

    // Duplicate names conflict.
    let response = server
        .post_json(
            "/api/repos/create",
            Some(&cookie),
            json!({ "type": "model", "name": "m1" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_error_envelope_shape() {
    let server = TestServer::new().await;

    let response = server.get("/api/models/ghost/none/revision/main", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["error"], "repo_not_found");
    assert_eq!(response.header("x-error-code"), Some("repo_not_found"));
}

#[tokio::test]
async fn test_foreign_namespace_write_is_forbidden() {
    let server = TestServer::new().await;
    let alice_cookie = server.register_and_login("alice").await;
    server.create_repo(&alice_cookie, "m1").await;
    let bob_cookie = server.register_and_login("bob").await;

    let response = server
        .post_json(
            "/api/models/alice/m1/preupload/main",
            Some(&bob_cookie),
            json!({ "files": [ { "path": "a.json", "size": 5 } ] }),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.header("x-error-code"), Some("forbidden"));
}

#[tokio::test]
async fn test_branch_tag_and_refs_endpoints() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;
    server.create_repo(&cookie, "m1").await;

    let response = server
        .post_json("/api/models/alice/m1/branch/dev", Some(&cookie), json!({}))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let tip = response.json()["target"].as_str().expect("target").to_string();
    let response = server
        .post_json(
            "/api/models/alice/m1/tag/v1",
            Some(&cookie),
            json!({ "revision": "main", "message": "first release" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = server.get("/api/models/alice/m1/refs", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let refs = response.json();
    let branch_names: Vec<_> = refs["branches"]
        .as_array()
        .expect("branches")
        .iter()
        .map(|b| b["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(branch_names.contains(&"main".to_string()));
    assert!(branch_names.contains(&"dev".to_string()));
    assert_eq!(refs["tags"][0]["name"], "v1");
    assert_eq!(refs["tags"][0]["targetCommit"], tip);

    // Tags are immutable: re-creating the same tag conflicts.
    let response = server
        .post_json(
            "/api/models/alice/m1/tag/v1",
            Some(&cookie),
            json!({ "revision": "main" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_quota_settings_endpoint() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;

    let response = server
        .json_request(
            "PUT",
            "/api/quota/alice",
            Some(&cookie),
            json!({ "mode": "custom", "publicQuotaBytes": 1024 }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = server.get("/api/quota/alice", Some(&cookie)).await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["mode"], "custom");
    assert_eq!(body["publicQuotaBytes"], 1024);

    // Other users cannot read someone's quota.
    let bob_cookie = server.register_and_login("bob").await;
    let response = server.get("/api/quota/alice", Some(&bob_cookie)).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}
