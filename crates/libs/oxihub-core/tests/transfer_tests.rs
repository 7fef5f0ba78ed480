//! Transfer protocol tests: classification, dedup, batch actions and
//! verification.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common/mod.rs"]
mod common;

use common::*;
use oxihub_common::config::AppConfig;
use oxihub_core::Error;
use oxihub_core::model::lfs_config::{LfsConfigBmc, RepoLfsConfig};
use oxihub_core::store::object_store::blob_key;
use oxihub_core::transfer::{
    self, BatchObjectRequest, BatchOperation, BatchRequest, PreuploadFile, VerifyRequest,
};

fn upload_request(oid: &str, size: u64, multipart: bool) -> BatchRequest {
    BatchRequest {
        operation: BatchOperation::Upload,
        transfers: if multipart {
            vec!["basic".into(), "multipart".into()]
        } else {
            vec!["basic".into()]
        },
        objects: vec![BatchObjectRequest {
            oid: oid.to_string(),
            size,
        }],
    }
}

#[tokio::test]
async fn test_preupload_threshold_boundary() {
    let mut config = AppConfig::default();
    config.lfs.default_threshold_bytes = 10;
    let tc = TestContext::new_with_config(config).await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let files = vec![
        PreuploadFile {
            path: "at.bin".into(),
            size: 10,
            sha256: None,
        },
        PreuploadFile {
            path: "below.bin".into(),
            size: 9,
            sha256: None,
        },
    ];
    let response = transfer::preupload(&alice, &tc.mm, &repo, "main", &files)
        .await
        .expect("preupload");

    // Exactly at the threshold goes external; strictly below stays regular.
    assert_eq!(response.files[0].upload_mode, "lfs");
    assert_eq!(response.files[1].upload_mode, "regular");
    assert!(!response.files[0].should_ignore);
}

#[tokio::test]
async fn test_preupload_suffix_rule_overrides_size() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    LfsConfigBmc::set(
        &alice,
        &tc.mm,
        repo.id,
        &RepoLfsConfig {
            threshold_bytes: None,
            keep_versions: None,
            suffix_rules: vec![".safetensors".into()],
        },
    )
    .await
    .expect("set config");

    let files = vec![PreuploadFile {
        path: "tiny.safetensors".into(),
        size: 10,
        sha256: None,
    }];
    let response = transfer::preupload(&alice, &tc.mm, &repo, "main", &files)
        .await
        .expect("preupload");
    assert_eq!(response.files[0].upload_mode, "lfs");
}

#[tokio::test]
async fn test_preupload_should_ignore_after_commit() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let body = format!("{}\n{}\n", header_line("add"), file_line("a.json", b"hi"));
    tc.commit(&alice, &repo, "main", &body).await.expect("commit");

    let files = vec![PreuploadFile {
        path: "a.json".into(),
        size: 2,
        sha256: Some(sha256_hex(b"hi")),
    }];

    // Idempotent: same answer on repeated calls.
    for _ in 0..2 {
        let response = transfer::preupload(&alice, &tc.mm, &repo, "main", &files)
            .await
            .expect("preupload");
        assert!(response.files[0].should_ignore);
    }

    // Same path, different bytes: must be sent.
    let files = vec![PreuploadFile {
        path: "a.json".into(),
        size: 2,
        sha256: Some(sha256_hex(b"ho")),
    }];
    let response = transfer::preupload(&alice, &tc.mm, &repo, "main", &files)
        .await
        .expect("preupload");
    assert!(!response.files[0].should_ignore);

    // Omitted sha256 never short-circuits.
    let files = vec![PreuploadFile {
        path: "a.json".into(),
        size: 2,
        sha256: None,
    }];
    let response = transfer::preupload(&alice, &tc.mm, &repo, "main", &files)
        .await
        .expect("preupload");
    assert!(!response.files[0].should_ignore);
}

#[tokio::test]
async fn test_preupload_unknown_revision() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let err = transfer::preupload(&alice, &tc.mm, &repo, "nope", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RevisionNotFound(_)));
}

#[tokio::test]
async fn test_preupload_quota_warning_is_advisory() {
    let mut config = AppConfig::default();
    config.quota.default_public_quota_bytes = 10;
    let tc = TestContext::new_with_config(config).await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let files = vec![PreuploadFile {
        path: "big.bin".into(),
        size: 100,
        sha256: None,
    }];
    let response = transfer::preupload(&alice, &tc.mm, &repo, "main", &files)
        .await
        .expect("preupload succeeds despite quota");
    assert!(response.quota_warning.is_some());
}

#[tokio::test]
async fn test_batch_upload_then_dedup() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let bytes = vec![42u8; 1024];
    let oid = sha256_hex(&bytes);

    let response = transfer::batch(&alice, &tc.mm, &repo, &upload_request(&oid, 1024, false))
        .await
        .expect("batch");
    assert_eq!(response.transfer, "basic");
    let actions = response.objects[0].actions.as_ref().expect("actions");
    assert!(actions.upload.is_some());
    assert!(actions.verify.is_some());

    // Client uploads and verifies.
    tc.store.put(&blob_key(&oid), bytes.clone());
    transfer::verify(
        &alice,
        &tc.mm,
        &repo,
        &VerifyRequest {
            oid: oid.clone(),
            size: 1024,
            parts: vec![],
        },
    )
    .await
    .expect("verify");

    // Second batch, even from a different repo: dedup acknowledgement.
    let bob = tc.create_user("bob").await.expect("user");
    let other = tc.create_repo(&bob, "m2").await.expect("repo");
    let response = transfer::batch(&bob, &tc.mm, &other, &upload_request(&oid, 1024, false))
        .await
        .expect("batch");
    assert!(response.objects[0].actions.is_none());
    assert!(response.objects[0].error.is_none());
}

#[tokio::test]
async fn test_batch_download() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let bytes = b"present".to_vec();
    let oid = sha256_hex(&bytes);

    // Missing object: per-object 404, not a request failure.
    let request = BatchRequest {
        operation: BatchOperation::Download,
        transfers: vec![],
        objects: vec![BatchObjectRequest {
            oid: oid.clone(),
            size: bytes.len() as u64,
        }],
    };
    let response = transfer::batch(&alice, &tc.mm, &repo, &request)
        .await
        .expect("batch");
    assert_eq!(response.objects[0].error.as_ref().expect("error").code, 404);

    tc.upload_and_verify(&alice, &repo, &bytes).await.expect("upload");
    let response = transfer::batch(&alice, &tc.mm, &repo, &request)
        .await
        .expect("batch");
    let actions = response.objects[0].actions.as_ref().expect("actions");
    assert!(actions.download.as_ref().expect("download").href.contains(&oid));
}

#[tokio::test]
async fn test_batch_rejects_bad_oid_per_object() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let response = transfer::batch(&alice, &tc.mm, &repo, &upload_request("NOT-HEX", 10, false))
        .await
        .expect("batch");
    let error = response.objects[0].error.as_ref().expect("error");
    assert_eq!(error.code, 422);
    assert_eq!(error.message, "unsupported_hash");
}

#[tokio::test]
async fn test_batch_object_too_large() {
    let mut config = AppConfig::default();
    config.lfs.max_object_bytes = 100;
    let tc = TestContext::new_with_config(config).await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let oid = sha256_hex(b"whatever");
    let response = transfer::batch(&alice, &tc.mm, &repo, &upload_request(&oid, 101, false))
        .await
        .expect("batch");
    let error = response.objects[0].error.as_ref().expect("error");
    assert_eq!(error.code, 413);
}

#[tokio::test]
async fn test_verify_size_mismatch() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let bytes = b"actual bytes".to_vec();
    let oid = sha256_hex(&bytes);
    tc.store.put(&blob_key(&oid), bytes);

    let err = transfer::verify(
        &alice,
        &tc.mm,
        &repo,
        &VerifyRequest {
            oid,
            size: 9999,
            parts: vec![],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { .. }));
}

#[tokio::test]
async fn test_multipart_plan_and_completion() {
    let mut config = AppConfig::default();
    config.lfs.multipart_threshold_bytes = 8;
    config.lfs.multipart_part_size_bytes = 4;
    let tc = TestContext::new_with_config(config).await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let bytes = b"0123456789".to_vec();
    let oid = sha256_hex(&bytes);

    let response = transfer::batch(&alice, &tc.mm, &repo, &upload_request(&oid, 10, true))
        .await
        .expect("batch");
    assert_eq!(response.transfer, "multipart");

    let object = &response.objects[0];
    let upload_id = object.upload_id.as_ref().expect("upload id");
    let parts = object.parts.as_ref().expect("parts");
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].size_range, [0, 3]);
    assert_eq!(parts[1].size_range, [4, 7]);
    assert_eq!(parts[2].size_range, [8, 9]);
    assert!(
        object
            .actions
            .as_ref()
            .and_then(|a| a.verify.as_ref())
            .is_some()
    );

    // Client uploads the three slices, then verifies with the etags.
    let mut verify_parts = Vec::new();
    for plan in parts {
        let [start, end] = plan.size_range;
        let etag = tc
            .store
            .put_part(upload_id, plan.part_number, bytes[start as usize..=end as usize].to_vec())
            .expect("put part");
        verify_parts.push(transfer::VerifyPart {
            part_number: plan.part_number,
            etag,
        });
    }

    transfer::verify(
        &alice,
        &tc.mm,
        &repo,
        &VerifyRequest {
            oid: oid.clone(),
            size: 10,
            parts: verify_parts,
        },
    )
    .await
    .expect("verify");

    assert_eq!(tc.store.get(&blob_key(&oid)).expect("assembled"), bytes);

    // A not-multipart client never gets a plan for the same size.
    let other_oid = sha256_hex(b"other");
    let response = transfer::batch(&alice, &tc.mm, &repo, &upload_request(&other_oid, 10, false))
        .await
        .expect("batch");
    assert_eq!(response.transfer, "basic");
    assert!(response.objects[0].parts.is_none());
}

#[tokio::test]
async fn test_batch_upload_quota_exceeded_is_fatal() {
    let mut config = AppConfig::default();
    config.quota.default_public_quota_bytes = 10;
    let tc = TestContext::new_with_config(config).await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let oid = sha256_hex(b"huge");
    let err = transfer::batch(&alice, &tc.mm, &repo, &upload_request(&oid, 1000, false))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { .. }));
}
