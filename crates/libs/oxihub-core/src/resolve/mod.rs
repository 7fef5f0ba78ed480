//! Revision and file resolution.
//!
//! Maps `(repo, revision, path)` to metadata or bytes. The revision name
//! state machine lives in the tree store (branch, then tag, then commit
//! prefix); this module adds access control, pagination and presigned
//! redirects. Large blobs are never streamed from here: external entries
//! resolve to a fresh presigned GET whose TTL covers a realistic download.

use crate::access::{self, RepoAction};
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::repo::Repo;
use crate::store::object_store::{self, PresignedUrl};
use crate::store::tree_store::{FileEntry, ResolvedRevision, StorageKind};
use crate::{Error, Result};
use serde::Serialize;
use std::time::Duration;

/// Upper bound on one tree page; clients paginate beyond it.
const MAX_TREE_PAGE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub revision: ResolvedRevision,
    pub entry: FileEntry,
}

/// Resolves a revision name with the read gate applied.
pub async fn resolve_revision(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    raw: &str,
) -> Result<ResolvedRevision> {
    access::authorize_repo(ctx, mm, repo, RepoAction::Read).await?;
    mm.trees.resolve_revision(repo.id, raw).await
}

/// Stats one file at a revision.
pub async fn stat_file(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    revision: &str,
    path: &str,
) -> Result<ResolvedFile> {
    let resolved = resolve_revision(ctx, mm, repo, revision).await?;
    let entry = mm.trees.stat(repo.id, &resolved.commit, path).await?;
    metrics::counter!("resolve_requests_total").increment(1);
    Ok(ResolvedFile {
        revision: resolved,
        entry,
    })
}

/// Fresh presigned GET for an external entry.
pub async fn download_url(mm: &ModelManager, entry: &FileEntry) -> Result<PresignedUrl> {
    let pointer = entry
        .lfs_pointer
        .as_ref()
        .ok_or_else(|| Error::PathNotFound(entry.path.clone()))?;
    let key = object_store::blob_key(&pointer.oid);
    let ttl = Duration::from_secs(mm.app_config.storage.presign_get_ttl_secs);
    mm.objects.presign_get(&key, ttl).await
}

/// Bytes of an inline entry (the only case the hub serves directly).
pub async fn read_inline(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    revision: &str,
    path: &str,
) -> Result<(ResolvedRevision, Vec<u8>)> {
    let resolved = resolve_revision(ctx, mm, repo, revision).await?;
    let bytes = mm.trees.read_inline(repo.id, &resolved.commit, path).await?;
    Ok((resolved, bytes))
}

// -- Tree listing

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LfsInfo {
    pub oid: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastCommitInfo {
    pub id: String,
    pub title: String,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeItem {
    #[serde(rename = "type")]
    pub item_type: &'static str,
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lfs: Option<LfsInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<LastCommitInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreePage {
    pub items: Vec<TreeItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Paginated listing. `cursor` is the last path of the previous page;
/// `expand` adds lfs pointers and last-commit summaries (one history walk
/// per entry, so pages stay small).
#[allow(clippy::too_many_arguments)]
pub async fn list_tree(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    revision: &str,
    path: &str,
    recursive: bool,
    expand: bool,
    cursor: Option<&str>,
    limit: Option<usize>,
) -> Result<TreePage> {
    let resolved = resolve_revision(ctx, mm, repo, revision).await?;
    let entries = mm
        .trees
        .list_tree(repo.id, &resolved.commit, path, recursive)
        .await?;

    let limit = limit.unwrap_or(MAX_TREE_PAGE).clamp(1, MAX_TREE_PAGE);
    let start = match cursor {
        Some(cursor) => entries
            .iter()
            .position(|e| e.path.as_str() > cursor)
            .unwrap_or(entries.len()),
        None => 0,
    };
    let page: Vec<_> = entries.into_iter().skip(start).take(limit + 1).collect();
    let has_more = page.len() > limit;

    let mut items = Vec::with_capacity(page.len().min(limit));
    for entry in page.into_iter().take(limit) {
        items.push(tree_item(mm, repo, &resolved.commit, entry, expand).await?);
    }

    let next_cursor = if has_more {
        items.last().map(|i| i.path.clone())
    } else {
        None
    };
    Ok(TreePage { items, next_cursor })
}

async fn tree_item(
    mm: &ModelManager,
    repo: &Repo,
    commit: &str,
    entry: FileEntry,
    expand: bool,
) -> Result<TreeItem> {
    if entry.path.ends_with('/') {
        return Ok(TreeItem {
            item_type: "directory",
            path: entry.path.trim_end_matches('/').to_string(),
            size: 0,
            oid: None,
            lfs: None,
            last_commit: None,
        });
    }

    let lfs = entry.lfs_pointer.as_ref().map(|p| LfsInfo {
        oid: p.oid.clone(),
        size: p.size,
    });
    let last_commit = if expand {
        mm.trees
            .last_commit_touching(repo.id, commit, &entry.path)
            .await?
            .map(|info| LastCommitInfo {
                id: info.id,
                title: info.summary,
                date: chrono::DateTime::from_timestamp(info.timestamp, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
            })
    } else {
        None
    };

    Ok(TreeItem {
        item_type: "file",
        path: entry.path,
        size: entry.size,
        oid: Some(entry.content_sha256),
        lfs: if expand { lfs } else { None },
        last_commit,
    })
}

// -- Batched stat

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathInfo {
    pub path: String,
    #[serde(rename = "type")]
    pub item_type: &'static str,
    pub size: u64,
    pub oid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lfs: Option<LfsInfo>,
}

/// Batched stat; unknown paths are simply absent from the answer.
pub async fn paths_info(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    revision: &str,
    paths: &[String],
) -> Result<Vec<PathInfo>> {
    let resolved = resolve_revision(ctx, mm, repo, revision).await?;

    let mut infos = Vec::new();
    for path in paths {
        match mm.trees.stat(repo.id, &resolved.commit, path).await {
            Ok(entry) => infos.push(PathInfo {
                path: entry.path.clone(),
                item_type: "file",
                size: entry.size,
                oid: entry.content_sha256.clone(),
                lfs: entry.lfs_pointer.as_ref().map(|p| LfsInfo {
                    oid: p.oid.clone(),
                    size: p.size,
                }),
            }),
            Err(Error::PathNotFound(_)) => continue,
            Err(other) => return Err(other),
        }
    }
    Ok(infos)
}

// -- Revision info

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub id: String,
    pub sha: String,
    pub last_modified: String,
    pub private: bool,
}

pub async fn revision_info(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    revision: &str,
) -> Result<RevisionInfo> {
    let resolved = resolve_revision(ctx, mm, repo, revision).await?;
    let log = mm.trees.log(repo.id, &resolved.commit, 1, None).await?;
    let last_modified = log
        .first()
        .and_then(|c| chrono::DateTime::from_timestamp(c.timestamp, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

    Ok(RevisionInfo {
        id: repo.full_name(),
        sha: resolved.commit,
        last_modified,
        private: repo.private,
    })
}
