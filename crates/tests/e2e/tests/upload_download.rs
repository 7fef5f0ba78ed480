//! The upload/commit/download pipeline over the wire: the scenarios a real
//! client library walks through.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::StatusCode;
use e2e_tests::{TestServer, ndjson_file, ndjson_header, ndjson_lfs, sha256_hex};
use oxihub_common::config::AppConfig;
use oxihub_core::store::object_store::blob_key;
use serde_json::json;

/// Small file round-trip: preupload -> commit -> resolve.
#[tokio::test]
async fn test_small_file_round_trip() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;
    server.create_repo(&cookie, "m1").await;

    // Preupload classifies the file as regular and not ignorable.
    let response = server
        .post_json(
            "/api/models/alice/m1/preupload/main",
            Some(&cookie),
            json!({ "files": [ { "path": "a.json", "size": 2, "sha256": sha256_hex(b"hi") } ] }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["files"][0]["uploadMode"], "regular");
    assert_eq!(body["files"][0]["shouldIgnore"], false);

    // Commit the NDJSON stream.
    let payload = format!("{}\n{}\n", ndjson_header("add a.json"), ndjson_file("a.json", b"hi"));
    let response = server
        .post_ndjson("/api/models/alice/m1/commit/main", Some(&cookie), payload)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let commit = response.json();
    let commit_oid = commit["commitOid"].as_str().expect("oid").to_string();
    assert!(commit["commitUrl"].as_str().expect("url").contains("alice/m1"));
    assert!(commit["pullRequestUrl"].is_null());

    // Resolve: 200 with the bytes and the metadata headers.
    let response = server.get("/alice/m1/resolve/main/a.json", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"hi");
    assert_eq!(response.header("x-linked-size"), Some("2"));
    assert_eq!(response.header("x-repo-commit"), Some(commit_oid.as_str()));
    assert_eq!(
        response.header("x-linked-etag"),
        Some(format!("sha256:{}", sha256_hex(b"hi")).as_str())
    );

    // HEAD returns the same headers, no body.
    let response = server.head("/alice/m1/resolve/main/a.json", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-linked-size"), Some("2"));
    assert!(response.body.is_empty());

    // Preupload again: identical content is ignorable now, twice over.
    for _ in 0..2 {
        let response = server
            .post_json(
                "/api/models/alice/m1/preupload/main",
                Some(&cookie),
                json!({ "files": [ { "path": "a.json", "size": 2, "sha256": sha256_hex(b"hi") } ] }),
            )
            .await;
        assert_eq!(response.json()["files"][0]["shouldIgnore"], true);
    }
}

/// Large-file flow with cross-repo dedup: batch, upload, verify, commit,
/// then a second client skips the upload entirely.
#[tokio::test]
async fn test_large_file_dedup_flow() {
    let mut config = AppConfig::default();
    config.lfs.default_threshold_bytes = 10;
    let server = TestServer::new_with_config(config).await;
    let cookie = server.register_and_login("alice").await;
    server.create_repo(&cookie, "m1").await;

    let bytes = vec![7u8; 1 << 20];
    let oid = sha256_hex(&bytes);

    // Classified as lfs.
    let response = server
        .post_json(
            "/api/models/alice/m1/preupload/main",
            Some(&cookie),
            json!({ "files": [ { "path": "w.bin", "size": bytes.len(), "sha256": oid } ] }),
        )
        .await;
    assert_eq!(response.json()["files"][0]["uploadMode"], "lfs");

    // Batch upload issues exactly one upload action.
    let response = server
        .post_json(
            "/alice/m1.git/info/lfs/objects/batch",
            Some(&cookie),
            json!({
                "operation": "upload",
                "transfers": ["basic", "multipart"],
                "objects": [ { "oid": oid, "size": bytes.len() } ]
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["transfer"], "basic");
    assert!(body["objects"][0]["actions"]["upload"]["href"].is_string());
    assert!(body["objects"][0]["actions"]["verify"]["href"].is_string());

    // Client PUTs against the presigned URL (direct store write here).
    server.store.put(&blob_key(&oid), bytes.clone());

    let response = server
        .post_json(
            "/api/models/alice/m1/lfs/verify",
            Some(&cookie),
            json!({ "oid": oid, "size": bytes.len() }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    // Commit referencing the verified object.
    let payload = format!(
        "{}\n{}\n",
        ndjson_header("add weights"),
        ndjson_lfs("w.bin", &oid, bytes.len() as u64)
    );
    let response = server
        .post_ndjson("/api/models/alice/m1/commit/main", Some(&cookie), payload)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    // Resolve redirects to a presigned GET carrying the oid key.
    let response = server.get("/alice/m1/resolve/main/w.bin", None).await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert!(response.header("location").expect("location").contains(&oid));
    assert_eq!(
        response.header("x-linked-size"),
        Some(bytes.len().to_string().as_str())
    );

    // Second client, different repo, same content: dedup acknowledgement
    // (no actions), and the commit works with no PUT at all.
    let bob_cookie = server.register_and_login("bob").await;
    server.create_repo(&bob_cookie, "m2").await;

    let response = server
        .post_json(
            "/bob/m2.git/info/lfs/objects/batch",
            Some(&bob_cookie),
            json!({
                "operation": "upload",
                "transfers": ["basic"],
                "objects": [ { "oid": oid, "size": bytes.len() } ]
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.json()["objects"][0].get("actions").is_none());

    let payload = format!(
        "{}\n{}\n",
        ndjson_header("reuse weights"),
        ndjson_lfs("w.bin", &oid, bytes.len() as u64)
    );
    let response = server
        .post_ndjson("/api/models/bob/m2/commit/main", Some(&bob_cookie), payload)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    // Exactly one blob exists in the store.
    assert_eq!(server.store.len(), 1);
}

/// Revision resolution over the wire: tags, commit prefixes, misses.
#[tokio::test]
async fn test_revision_resolution_wire() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;
    server.create_repo(&cookie, "m1").await;

    let payload = format!("{}\n{}\n", ndjson_header("add"), ndjson_file("a.json", b"{}"));
    let response = server
        .post_ndjson("/api/models/alice/m1/commit/main", Some(&cookie), payload)
        .await;
    let commit_oid = response.json()["commitOid"].as_str().expect("oid").to_string();

    server
        .post_json(
            "/api/models/alice/m1/tag/v1",
            Some(&cookie),
            json!({ "revision": "main" }),
        )
        .await;

    // Tag resolution.
    let response = server.head("/alice/m1/resolve/v1/a.json", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-repo-commit"), Some(commit_oid.as_str()));

    // Commit-prefix resolution.
    let prefix = &commit_oid[..7];
    let response = server
        .head(&format!("/alice/m1/resolve/{prefix}/a.json"), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-repo-commit"), Some(commit_oid.as_str()));

    // Unknown revision.
    let response = server.head("/alice/m1/resolve/nope/a.json", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.header("x-error-code"), Some("revision_not_found"));
}

/// Tree and paths-info endpoints.
#[tokio::test]
async fn test_tree_endpoints() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;
    server.create_repo(&cookie, "m1").await;

    let payload = format!(
        "{}\n{}\n{}\n",
        ndjson_header("layout"),
        ndjson_file("a.json", b"{}"),
        ndjson_file("dir/b.txt", b"b"),
    );
    server
        .post_ndjson("/api/models/alice/m1/commit/main", Some(&cookie), payload)
        .await;

    let response = server
        .get("/api/models/alice/m1/tree/main?recursive=true", None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let items = response.json();
    let paths: Vec<_> = items
        .as_array()
        .expect("array")
        .iter()
        .map(|i| i["path"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(paths, vec!["a.json", "dir/b.txt"]);

    let response = server
        .post_json(
            "/api/models/alice/m1/paths-info/main",
            None,
            json!({ "paths": ["a.json", "ghost"] }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let infos = response.json();
    assert_eq!(infos.as_array().expect("array").len(), 1);
    assert_eq!(infos[0]["path"], "a.json");
}

/// Commits race on the branch tip; the retry succeeds.
#[tokio::test]
async fn test_commit_conflict_and_retry() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;
    server.create_repo(&cookie, "m1").await;

    // A normal commit to move the tip.
    let payload = format!("{}\n{}\n", ndjson_header("base"), ndjson_file("a.txt", b"a"));
    let response = server
        .post_ndjson("/api/models/alice/m1/commit/main", Some(&cookie), payload)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let first = response.json()["commitOid"].as_str().expect("oid").to_string();

    // Another commit chains onto it.
    let payload = format!("{}\n{}\n", ndjson_header("next"), ndjson_file("b.txt", b"b"));
    let response = server
        .post_ndjson("/api/models/alice/m1/commit/main", Some(&cookie), payload)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = server.get("/api/models/alice/m1/commits/main", None).await;
    let log = response.json();
    let log = log.as_array().expect("array");
    assert_eq!(log.len(), 3); // initial + two commits
    assert_eq!(log[0]["parent"], first);
}

/// Commit bodies that are not a valid stream are a 400.
#[tokio::test]
async fn test_malformed_commit_payload() {
    let server = TestServer::new().await;
    let cookie = server.register_and_login("alice").await;
    server.create_repo(&cookie, "m1").await;

    let response = server
        .post_ndjson(
            "/api/models/alice/m1/commit/main",
            Some(&cookie),
            String::new(),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.header("x-error-code"), Some("malformed_payload"));
}
