//! Streaming commit engine.
//!
//! One atomic operation per call: an NDJSON stream of records goes in,
//! exactly one new commit (or a typed error and an untouched branch) comes
//! out. Records are parsed and applied in a single pass; file payloads are
//! flushed into the versioning tree's object database as they are read, so
//! the engine never materialises the request in memory.
//!
//! Failure semantics: the branch ref is advanced and the metadata
//! transaction runs while the per-repo lock is still held. If the
//! transaction fails, the ref is rewound before the lock is released, so no
//! reader ever observes a tip whose metadata is missing. The pointer a
//! client reads is either the fully-applied new commit or the unchanged
//! parent.

mod records;

pub use records::{CommitHeader, CommitRecord, CopyPayload, DeletedPayload, InlinePayload, LfsFilePayload};

use crate::access::{self, RepoAction};
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::file_entry::FileEntryBmc;
use crate::model::lfs_config::{EffectiveLfs, LfsConfigBmc};
use crate::model::lfs_object::LfsObjectBmc;
use crate::model::repo::Repo;
use crate::model::staging::StagingBmc;
use crate::store::object_store;
use crate::store::tree_store::{
    self, LfsPointer, RevisionKind, StorageKind, TreeOp,
};
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// Response of a successful commit.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub commit_id: String,
    pub parent: String,
    pub summary: String,
}

/// New state of one path after the commit.
#[derive(Debug, Clone)]
struct NewEntry {
    size: i64,
    sha256: String,
    storage_kind: StorageKind,
}

/// Per-path effect accumulated while streaming: `None` means deleted.
type Changes = HashMap<String, Option<NewEntry>>;

/// Applies an NDJSON commit stream to `branch` of `repo`.
///
/// `reader` yields the raw request body; the first record must be the
/// header. Two concurrent calls for the same branch race at the
/// compare-and-set; the loser gets `stale_revision` and retries from
/// scratch.
pub async fn commit_stream<R>(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    revision: &str,
    reader: R,
) -> Result<CommitResult>
where
    R: AsyncBufRead + Unpin,
{
    access::authorize_repo(ctx, mm, repo, RepoAction::Write).await?;

    // Commits land on branches only.
    let resolved = mm.trees.resolve_revision(repo.id, revision).await?;
    if resolved.kind != RevisionKind::Branch {
        return Err(Error::RevisionNotFound(format!(
            "{revision} is not a branch"
        )));
    }
    let branch = resolved.name.clone();
    let parent = resolved.commit.clone();

    let lfs = LfsConfigBmc::effective(ctx, mm, repo.id).await?;

    // Single pass over the stream.
    let mut lines = reader.lines();
    let header = read_header(&mut lines).await?;

    let mut ops: Vec<TreeOp> = Vec::new();
    let mut changes: Changes = Changes::new();
    let mut old_sizes: HashMap<String, i64> = HashMap::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let record = CommitRecord::parse_line(&line)?;
        match record {
            CommitRecord::Header(_) => {
                return Err(Error::MalformedPayload(
                    "duplicate header record".to_string(),
                ));
            }
            CommitRecord::File(file) => {
                apply_inline(mm, repo, &lfs, file, &mut ops, &mut changes).await?;
            }
            CommitRecord::LfsFile(lfs_file) => {
                apply_lfs(mm, repo, lfs_file, &mut ops, &mut changes).await?;
            }
            CommitRecord::DeletedFile(deleted) => {
                let path = tree_store::normalize_path(&deleted.path)?;
                ops.push(TreeOp::Remove { path: path.clone() });
                changes.insert(path, None);
            }
            CommitRecord::CopyFile(copy) => {
                apply_copy(mm, repo, &parent, copy, &mut ops, &mut changes).await?;
            }
        }
    }

    // Byte delta against the current mirror rows, for quota and counters.
    let mut delta: i64 = 0;
    for (path, change) in &changes {
        let old = match old_sizes.get(path) {
            Some(size) => *size,
            None => {
                let size = FileEntryBmc::get(ctx, mm, repo.id, path)
                    .await?
                    .map(|r| r.size)
                    .unwrap_or(0);
                old_sizes.insert(path.clone(), size);
                size
            }
        };
        delta += change.as_ref().map(|e| e.size).unwrap_or(0) - old;
    }

    // Authoritative quota admission; nothing physical happened yet.
    access::admit_quota(ctx, mm, repo, delta).await?;

    // Compare-and-set commit, metadata transaction, and (on failure)
    // compensation all happen under the per-repo lock.
    let repo_handle = mm.trees.open(repo.id).await?;
    let guard = repo_handle.lock().await;

    let expected = git2::Oid::from_str(&parent)?;
    let outcome = tree_store::commit_in(
        &guard,
        &branch,
        &ops,
        &header.summary,
        header.description.as_deref().unwrap_or(""),
        ctx.username().unwrap_or("anonymous"),
        Some(expected),
    )?;

    match apply_metadata(mm, repo, &changes, delta, &outcome.id).await {
        Ok(()) => {}
        Err(e) => {
            warn!(repo = %repo.full_name(), error = %e, "metadata transaction failed, rewinding branch");
            tree_store::rewind_branch_in(&guard, &branch, expected)?;
            return Err(if e.is_transient() {
                e
            } else {
                Error::StorageUnavailable
            });
        }
    }
    drop(guard);

    metrics::counter!("commits_total").increment(1);
    metrics::counter!("commit_files_total").increment(changes.len() as u64);
    info!(
        repo = %repo.full_name(),
        branch = %branch,
        commit = %outcome.id,
        files = changes.len(),
        "commit applied"
    );

    Ok(CommitResult {
        commit_id: outcome.id,
        parent: outcome.parent,
        summary: header.summary,
    })
}

/// Forward commit undoing `commit` on `branch` (see the tree store for the
/// tree semantics), with the metadata mirror brought along.
pub async fn revert(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    branch: &str,
    commit: &str,
    force: bool,
) -> Result<CommitResult> {
    access::authorize_repo(ctx, mm, repo, RepoAction::Write).await?;
    let outcome = mm
        .trees
        .revert(repo.id, branch, commit, force, ctx.username().unwrap_or("system"))
        .await?;
    finish_ref_rewrite(ctx, mm, repo, branch, outcome).await
}

/// Forward commit returning `branch` to `commit`'s tree.
pub async fn reset(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    branch: &str,
    commit: &str,
    force: bool,
    message: Option<&str>,
) -> Result<CommitResult> {
    access::authorize_repo(ctx, mm, repo, RepoAction::Write).await?;
    let outcome = mm
        .trees
        .reset(
            repo.id,
            branch,
            commit,
            force,
            message,
            ctx.username().unwrap_or("system"),
        )
        .await?;
    finish_ref_rewrite(ctx, mm, repo, branch, outcome).await
}

/// Shared tail of revert/reset: diff the new commit against its parent,
/// rebuild the affected mirror rows and counters, compensate on failure.
async fn finish_ref_rewrite(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    branch: &str,
    outcome: tree_store::CommitOutcome,
) -> Result<CommitResult> {
    let diff = mm.trees.diff(repo.id, &outcome.parent, &outcome.id).await?;

    let mut changes: Changes = Changes::new();
    let mut delta: i64 = 0;
    for entry in &diff {
        let new_entry = match mm.trees.stat(repo.id, &outcome.id, &entry.path).await {
            Ok(e) => Some(NewEntry {
                size: e.size as i64,
                sha256: e.content_sha256,
                storage_kind: e.storage_kind,
            }),
            Err(Error::PathNotFound(_)) => None,
            Err(other) => return Err(other),
        };
        let old_size = FileEntryBmc::get(ctx, mm, repo.id, &entry.path)
            .await?
            .map(|r| r.size)
            .unwrap_or(0);
        delta += new_entry.as_ref().map(|e| e.size).unwrap_or(0) - old_size;
        changes.insert(entry.path.clone(), new_entry);
    }

    if let Err(e) = apply_metadata(mm, repo, &changes, delta, &outcome.id).await {
        warn!(repo = %repo.full_name(), error = %e, "mirror sync failed, rewinding ref rewrite");
        mm.trees.rewind(repo.id, branch, &outcome.parent).await?;
        return Err(Error::StorageUnavailable);
    }

    let log = mm.trees.log(repo.id, &outcome.id, 1, None).await?;
    Ok(CommitResult {
        commit_id: outcome.id,
        parent: outcome.parent,
        summary: log.first().map(|c| c.summary.clone()).unwrap_or_default(),
    })
}

async fn read_header<R>(lines: &mut tokio::io::Lines<R>) -> Result<CommitHeader>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| Error::MalformedPayload("empty commit payload".to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        return match CommitRecord::parse_line(&line)? {
            CommitRecord::Header(header) => {
                if header.summary.trim().is_empty() {
                    Err(Error::MalformedPayload("empty commit summary".to_string()))
                } else {
                    Ok(header)
                }
            }
            _ => Err(Error::MalformedPayload(
                "first record must be the header".to_string(),
            )),
        };
    }
}

/// Inline bytes: decode, enforce the threshold, hash, flush into the tree.
async fn apply_inline(
    mm: &ModelManager,
    repo: &Repo,
    lfs: &EffectiveLfs,
    file: InlinePayload,
    ops: &mut Vec<TreeOp>,
    changes: &mut Changes,
) -> Result<()> {
    let path = tree_store::normalize_path(&file.path)?;
    let bytes = BASE64
        .decode(file.content.as_bytes())
        .map_err(|e| Error::MalformedPayload(format!("invalid base64 for {path}: {e}")))?;

    if lfs.is_external(&path, bytes.len() as u64) {
        return Err(Error::InlineTooLarge {
            path,
            size: bytes.len() as u64,
            threshold: lfs.threshold_bytes,
        });
    }

    let sha256 = hex::encode(Sha256::digest(&bytes));
    let blob = mm.trees.write_blob(repo.id, &bytes).await?;
    ops.push(TreeOp::Upsert {
        path: path.clone(),
        blob,
    });
    changes.insert(
        path,
        Some(NewEntry {
            size: bytes.len() as i64,
            sha256,
            storage_kind: StorageKind::Inline,
        }),
    );
    Ok(())
}

/// External reference: the blob must have been verified; the tree gets a
/// pointer file.
async fn apply_lfs(
    mm: &ModelManager,
    repo: &Repo,
    lfs_file: LfsFilePayload,
    ops: &mut Vec<TreeOp>,
    changes: &mut Changes,
) -> Result<()> {
    let path = tree_store::normalize_path(&lfs_file.path)?;
    if let Some(algo) = &lfs_file.algo {
        if algo != "sha256" {
            return Err(Error::UnsupportedHash(algo.clone()));
        }
    }
    crate::transfer::validate_oid(&lfs_file.oid)?;

    // Verification gate: a verified row, or a store object whose size
    // matches (covers the idempotent two-uploaders case).
    let ready = match LfsObjectBmc::get_size(mm, &lfs_file.oid).await? {
        Some(size) => size == lfs_file.size as i64,
        None => {
            let key = object_store::blob_key(&lfs_file.oid);
            let stat = crate::store::with_retries(|| mm.objects.stat(&key)).await?;
            match stat {
                Some(stat) if stat.size == lfs_file.size => {
                    LfsObjectBmc::record(mm, &lfs_file.oid, lfs_file.size as i64).await?;
                    true
                }
                _ => false,
            }
        }
    };
    if !ready {
        return Err(Error::ObjectNotReady(lfs_file.oid.clone()));
    }

    let pointer = LfsPointer {
        oid: lfs_file.oid.clone(),
        size: lfs_file.size,
    };
    let blob = mm.trees.write_pointer(repo.id, &pointer).await?;
    ops.push(TreeOp::Upsert {
        path: path.clone(),
        blob,
    });
    changes.insert(
        path,
        Some(NewEntry {
            size: lfs_file.size as i64,
            sha256: lfs_file.oid,
            storage_kind: StorageKind::External,
        }),
    );
    Ok(())
}

/// Copy: re-link the source bytes at the destination, no byte movement.
async fn apply_copy(
    mm: &ModelManager,
    repo: &Repo,
    parent: &str,
    copy: CopyPayload,
    ops: &mut Vec<TreeOp>,
    changes: &mut Changes,
) -> Result<()> {
    let from_path = tree_store::normalize_path(&copy.from_path)?;
    let to_path = tree_store::normalize_path(&copy.to_path)?;

    let source_commit = match &copy.from_revision {
        Some(revision) => mm.trees.resolve_revision(repo.id, revision).await?.commit,
        None => parent.to_string(),
    };

    let raw = mm.trees.read_raw(repo.id, &source_commit, &from_path).await?;
    let entry = match LfsPointer::parse(&raw) {
        Some(pointer) => NewEntry {
            size: pointer.size as i64,
            sha256: pointer.oid,
            storage_kind: StorageKind::External,
        },
        None => NewEntry {
            size: raw.len() as i64,
            sha256: hex::encode(Sha256::digest(&raw)),
            storage_kind: StorageKind::Inline,
        },
    };

    let blob = mm.trees.write_blob(repo.id, &raw).await?;
    ops.push(TreeOp::Upsert {
        path: to_path.clone(),
        blob,
    });
    changes.insert(to_path, Some(entry));
    Ok(())
}

/// The single metadata transaction: mirror rows, byte counters, revision
/// bookkeeping and staging closure.
async fn apply_metadata(
    mm: &ModelManager,
    repo: &Repo,
    changes: &Changes,
    delta: i64,
    commit_id: &str,
) -> Result<()> {
    let _write = mm.write_lock.lock().await;
    let tx = mm.db().transaction().await?;

    for (path, change) in changes {
        match change {
            Some(entry) => {
                FileEntryBmc::upsert_in(
                    &tx,
                    repo.id,
                    path,
                    entry.size,
                    &entry.sha256,
                    entry.storage_kind,
                    commit_id,
                )
                .await?;
                if entry.storage_kind == StorageKind::External {
                    StagingBmc::close_for_oid(&tx, &entry.sha256).await?;
                }
            }
            None => {
                FileEntryBmc::delete_in(&tx, repo.id, path).await?;
            }
        }
    }

    tx.execute(
        "UPDATE repos SET used_bytes = MAX(0, used_bytes + ?) WHERE id = ?",
        libsql::params![delta, repo.id],
    )
    .await?;
    let column = if repo.private {
        "used_private_bytes"
    } else {
        "used_public_bytes"
    };
    tx.execute(
        &format!("UPDATE namespaces SET {column} = MAX(0, {column} + ?) WHERE id = ?"),
        libsql::params![delta, repo.namespace_id],
    )
    .await?;

    tx.commit().await?;
    Ok(())
}
