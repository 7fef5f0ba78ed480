//! Commit engine tests: streaming application, atomicity, quota and the
//! compare-and-set on the branch tip.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common/mod.rs"]
mod common;

use common::*;
use oxihub_common::config::AppConfig;
use oxihub_core::Error;
use oxihub_core::model::namespace::NamespaceBmc;
use oxihub_core::model::repo::RepoBmc;
use oxihub_core::resolve;
use oxihub_core::store::tree_store::StorageKind;

#[tokio::test]
async fn test_small_file_round_trip() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let body = format!("{}\n{}\n", header_line("add a.json"), file_line("a.json", b"hi"));
    let result = tc.commit(&alice, &repo, "main", &body).await.expect("commit");
    assert!(!result.commit_id.is_empty());
    assert_eq!(result.summary, "add a.json");

    // Anonymous read on a public repo.
    let anon = oxihub_core::Ctx::anonymous();
    let resolved = resolve::stat_file(&anon, &tc.mm, &repo, "main", "a.json")
        .await
        .expect("stat");
    assert_eq!(resolved.entry.size, 2);
    assert_eq!(resolved.entry.storage_kind, StorageKind::Inline);
    assert_eq!(resolved.entry.content_sha256, sha256_hex(b"hi"));

    let (_, bytes) = resolve::read_inline(&anon, &tc.mm, &repo, "main", "a.json")
        .await
        .expect("read");
    assert_eq!(bytes, b"hi");
}

#[tokio::test]
async fn test_commit_without_header_is_malformed() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let err = tc.commit(&alice, &repo, "main", "").await.unwrap_err();
    assert!(matches!(err, Error::MalformedPayload(_)));

    let body = format!("{}\n", file_line("a.json", b"hi"));
    let err = tc.commit(&alice, &repo, "main", &body).await.unwrap_err();
    assert!(matches!(err, Error::MalformedPayload(_)));
}

#[tokio::test]
async fn test_inline_above_threshold_is_rejected() {
    let mut config = AppConfig::default();
    config.lfs.default_threshold_bytes = 4;
    let tc = TestContext::new_with_config(config).await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let body = format!("{}\n{}\n", header_line("too big"), file_line("big.bin", b"hello"));
    let err = tc.commit(&alice, &repo, "main", &body).await.unwrap_err();
    assert!(matches!(err, Error::InlineTooLarge { .. }));

    // The branch did not move: still just the initial commit.
    let tip = tc.mm.trees.branch_tip(repo.id, "main").await.expect("tip");
    let log = tc.mm.trees.log(repo.id, &tip, 10, None).await.expect("log");
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn test_delete_missing_path_is_idempotent() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let body = format!("{}\n{}\n", header_line("rm ghost"), delete_line("ghost.txt"));
    let result = tc.commit(&alice, &repo, "main", &body).await.expect("commit");
    assert!(!result.commit_id.is_empty());
}

#[tokio::test]
async fn test_copy_relinks_identical_content() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let body = format!("{}\n{}\n", header_line("add"), file_line("a.json", b"payload"));
    tc.commit(&alice, &repo, "main", &body).await.expect("commit");

    let body = format!("{}\n{}\n", header_line("copy"), copy_line("a.json", "b.json"));
    tc.commit(&alice, &repo, "main", &body).await.expect("copy commit");

    let resolved = resolve::stat_file(&alice, &tc.mm, &repo, "main", "b.json")
        .await
        .expect("stat");
    assert_eq!(resolved.entry.content_sha256, sha256_hex(b"payload"));
    assert_eq!(resolved.entry.size, 7);
}

#[tokio::test]
async fn test_stale_parent_fails_compare_and_set() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let old_tip = tc.mm.trees.branch_tip(repo.id, "main").await.expect("tip");

    let body = format!("{}\n{}\n", header_line("advance"), file_line("a.json", b"x"));
    tc.commit(&alice, &repo, "main", &body).await.expect("commit");

    // A second writer that still believes in the old tip must lose.
    let err = tc
        .mm
        .trees
        .commit(repo.id, "main", &[], "late", "", "bob", Some(&old_tip))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StaleRevision { .. }));
}

#[tokio::test]
async fn test_concurrent_commits_serialize() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let body_a = format!("{}\n{}\n", header_line("a"), file_line("a.txt", b"a"));
    let body_b = format!("{}\n{}\n", header_line("b"), file_line("b.txt", b"b"));
    let (ra, rb) = tokio::join!(
        tc.commit(&alice, &repo, "main", &body_a),
        tc.commit(&alice, &repo, "main", &body_b),
    );

    // At least one side lands; a loser fails fast with stale_revision and
    // retries from scratch in real clients.
    let winners = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert!(winners >= 1);
    for result in [ra, rb] {
        if let Err(e) = result {
            assert!(matches!(e, Error::StaleRevision { .. }));
        }
    }

    // Between any two successful commits the parent chain is intact.
    let tip = tc.mm.trees.branch_tip(repo.id, "main").await.expect("tip");
    let log = tc.mm.trees.log(repo.id, &tip, 10, None).await.expect("log");
    for pair in log.windows(2) {
        assert_eq!(pair[0].parent.as_deref(), Some(pair[1].id.as_str()));
    }
}

#[tokio::test]
async fn test_quota_exceeded_leaves_branch_untouched() {
    let mut config = AppConfig::default();
    config.quota.default_public_quota_bytes = 100;
    let tc = TestContext::new_with_config(config).await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let ninety = vec![b'x'; 90];
    let body = format!("{}\n{}\n", header_line("fill"), file_line("big.txt", &ninety));
    tc.commit(&alice, &repo, "main", &body).await.expect("fits");

    let tip_before = tc.mm.trees.branch_tip(repo.id, "main").await.expect("tip");

    let twenty = vec![b'y'; 20];
    let body = format!("{}\n{}\n", header_line("overflow"), file_line("more.txt", &twenty));
    let err = tc.commit(&alice, &repo, "main", &body).await.unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { .. }));

    let tip_after = tc.mm.trees.branch_tip(repo.id, "main").await.expect("tip");
    assert_eq!(tip_before, tip_after);

    let namespace = NamespaceBmc::get_by_name(&tc.ctx, &tc.mm, "alice")
        .await
        .expect("namespace");
    assert_eq!(namespace.used_public_bytes, 90);
}

#[tokio::test]
async fn test_lfs_commit_requires_verified_object() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let bytes = vec![7u8; 4096];
    let oid = sha256_hex(&bytes);

    let body = format!("{}\n{}\n", header_line("early"), lfs_line("w.bin", &oid, 4096));
    let err = tc.commit(&alice, &repo, "main", &body).await.unwrap_err();
    assert!(matches!(err, Error::ObjectNotReady(_)));

    tc.upload_and_verify(&alice, &repo, &bytes).await.expect("verify");
    let result = tc.commit(&alice, &repo, "main", &body).await.expect("commit");
    assert!(!result.commit_id.is_empty());

    let resolved = resolve::stat_file(&alice, &tc.mm, &repo, "main", "w.bin")
        .await
        .expect("stat");
    assert_eq!(resolved.entry.storage_kind, StorageKind::External);
    assert_eq!(resolved.entry.size, 4096);
    assert_eq!(resolved.entry.content_sha256, oid);
}

#[tokio::test]
async fn test_usage_counters_track_replacements() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let body = format!("{}\n{}\n", header_line("v1"), file_line("a.txt", &vec![b'a'; 50]));
    tc.commit(&alice, &repo, "main", &body).await.expect("commit");

    let body = format!("{}\n{}\n", header_line("v2"), file_line("a.txt", &vec![b'b'; 30]));
    tc.commit(&alice, &repo, "main", &body).await.expect("commit");

    let repo = RepoBmc::get_by_id(&tc.ctx, &tc.mm, repo.id).await.expect("repo");
    assert_eq!(repo.used_bytes, 30);

    let body = format!("{}\n{}\n", header_line("rm"), delete_line("a.txt"));
    tc.commit(&alice, &repo, "main", &body).await.expect("commit");

    let repo = RepoBmc::get_by_id(&tc.ctx, &tc.mm, repo.id).await.expect("repo");
    assert_eq!(repo.used_bytes, 0);
}

#[tokio::test]
async fn test_single_file_tree_helpers() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    // Inline fast path.
    let outcome = tc
        .mm
        .trees
        .upload_inline(repo.id, "main", "notes.md", b"# hello", "alice")
        .await
        .expect("upload");
    let entry = tc
        .mm
        .trees
        .stat(repo.id, &outcome.id, "notes.md")
        .await
        .expect("stat");
    assert_eq!(entry.size, 7);
    assert_eq!(entry.storage_kind, StorageKind::Inline);

    // External registration writes a pointer, not bytes.
    let oid = sha256_hex(b"weights");
    let outcome = tc
        .mm
        .trees
        .link_external(repo.id, "main", "w.bin", &oid, 7, "alice")
        .await
        .expect("link");
    let entry = tc
        .mm
        .trees
        .stat(repo.id, &outcome.id, "w.bin")
        .await
        .expect("stat");
    assert_eq!(entry.storage_kind, StorageKind::External);
    assert_eq!(entry.content_sha256, oid);
}

#[tokio::test]
async fn test_revert_restores_previous_tree() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let body = format!("{}\n{}\n", header_line("add a"), file_line("a.json", b"hi"));
    let c1 = tc.commit(&alice, &repo, "main", &body).await.expect("commit");

    let c2 = oxihub_core::commit::revert(&alice, &tc.mm, &repo, "main", &c1.commit_id, false)
        .await
        .expect("revert");
    assert_eq!(c2.parent, c1.commit_id);

    // Tree is back to the pre-C1 (empty) state, C1 stays in history.
    let err = resolve::stat_file(&alice, &tc.mm, &repo, "main", "a.json")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PathNotFound(_)));

    let tip = tc.mm.trees.branch_tip(repo.id, "main").await.expect("tip");
    let log = tc.mm.trees.log(repo.id, &tip, 10, None).await.expect("log");
    assert_eq!(log.len(), 3);
    assert!(log.iter().any(|c| c.id == c1.commit_id));
}

#[tokio::test]
async fn test_reset_returns_to_earlier_commit() {
    let tc = TestContext::new().await.expect("test context");
    let alice = tc.create_user("alice").await.expect("user");
    let repo = tc.create_repo(&alice, "m1").await.expect("repo");

    let body = format!("{}\n{}\n", header_line("v1"), file_line("a.txt", b"one"));
    let c1 = tc.commit(&alice, &repo, "main", &body).await.expect("commit");

    let body = format!("{}\n{}\n", header_line("v2"), file_line("a.txt", b"two"));
    tc.commit(&alice, &repo, "main", &body).await.expect("commit");

    let result = oxihub_core::commit::reset(
        &alice, &tc.mm, &repo, "main", &c1.commit_id, false, None,
    )
    .await
    .expect("reset");
    assert!(!result.commit_id.is_empty());

    let (_, bytes) = resolve::read_inline(&alice, &tc.mm, &repo, "main", "a.txt")
        .await
        .expect("read");
    assert_eq!(bytes, b"one");
}
