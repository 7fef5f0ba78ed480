//! Per-repository versioning trees.
//!
//! Every hub repository owns one bare git repository on disk. The mapping
//! is direct:
//!
//! - hub branches and tags are git refs
//! - a hub commit is a git commit; its id is the commit's content hash
//! - an **inline** entry is a git blob holding the file bytes
//! - an **external** entry is a git blob holding a git-lfs pointer file,
//!   which is what keeps `git clone` + git-lfs working against the hub
//!
//! Mutations go through [`TreeStore`], which serialises access per
//! repository via an `Arc<Mutex<Repository>>` from the repo cache. The
//! compare-and-set on a branch tip (`expected_parent`) is only meaningful
//! while that lock is held, so the commit engine uses the `*_in` functions
//! directly under its own guard.

use crate::store::repo_cache::RepoCache;
use crate::{Error, Result};
use git2::build::TreeUpdateBuilder;
use git2::{BranchType, FileMode, ObjectType, Oid, Repository, Signature, Tree, TreeWalkMode, TreeWalkResult};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Name of the default branch of every repository.
pub const DEFAULT_BRANCH: &str = "main";

/// Blobs up to this size are sniffed for the lfs pointer format.
const POINTER_SNIFF_MAX: usize = 1024;

/// How far back `last_commit_touching` walks before giving up.
const LAST_COMMIT_WALK_CAP: usize = 500;

lazy_static! {
    static ref COMMIT_PREFIX_RE: Regex =
        Regex::new("^[0-9a-f]{7,64}$").unwrap_or_else(|_| unreachable!("static regex"));
}

/// Wire form of a large-file reference, stored as a pointer blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsPointer {
    pub oid: String,
    pub size: u64,
}

impl LfsPointer {
    pub fn to_text(&self) -> String {
        format!(
            "version https://git-lfs.github.com/spec/v1\noid sha256:{}\nsize {}\n",
            self.oid, self.size
        )
    }

    /// Parses pointer-file bytes; `None` when the blob is ordinary content.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > POINTER_SNIFF_MAX {
            return None;
        }
        let text = std::str::from_utf8(bytes).ok()?;
        if !text.starts_with("version https://git-lfs.github.com/spec/v1") {
            return None;
        }
        let mut oid = None;
        let mut size = None;
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("oid sha256:") {
                oid = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("size ") {
                size = rest.trim().parse::<u64>().ok();
            }
        }
        Some(LfsPointer {
            oid: oid?,
            size: size?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    Inline,
    External,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Inline => "inline",
            StorageKind::External => "external",
        }
    }
}

/// One entry of a repository tree at some revision.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub content_sha256: String,
    pub storage_kind: StorageKind,
    pub lfs_pointer: Option<LfsPointer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionKind {
    Branch,
    Tag,
    Commit,
}

/// Outcome of the revision-name state machine.
#[derive(Debug, Clone)]
pub struct ResolvedRevision {
    pub kind: RevisionKind,
    /// The name as given (branch or tag name, or the commit prefix).
    pub name: String,
    /// Full hex commit id the revision resolves to.
    pub commit: String,
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: String,
    pub parent: Option<String>,
    pub summary: String,
    pub description: String,
    pub author: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct RefInfo {
    pub name: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct DiffEntry {
    pub path: String,
    pub status: &'static str,
}

/// A pending tree mutation; blobs are already in the object database.
#[derive(Debug, Clone)]
pub enum TreeOp {
    Upsert { path: String, blob: Oid },
    Remove { path: String },
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub id: String,
    pub parent: String,
}

/// Normalizes a client-supplied repo path: strips slashes, rejects empties
/// and traversal components.
pub fn normalize_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidName("empty path".to_string()));
    }
    for component in trimmed.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(Error::InvalidName(format!("invalid path: {raw}")));
        }
    }
    Ok(trimmed.to_string())
}

pub struct TreeStore {
    root: PathBuf,
    cache: RepoCache,
}

impl TreeStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cache: RepoCache::default(),
        })
    }

    pub fn new_with_cache(root: PathBuf, cache: RepoCache) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, cache })
    }

    fn repo_path(&self, repo_id: i64) -> PathBuf {
        self.root.join(format!("{repo_id}.git"))
    }

    /// Creates the bare repository for a new hub repo, with an initial empty
    /// commit on `main` so every repo has a resolvable tip from birth.
    pub fn create_root(&self, repo_id: i64) -> Result<()> {
        let path = self.repo_path(repo_id);
        if path.exists() {
            return Err(Error::NameTaken(format!("versioning root #{repo_id}")));
        }
        let mut opts = git2::RepositoryInitOptions::new();
        opts.bare(true).initial_head(DEFAULT_BRANCH);
        let repo = Repository::init_opts(&path, &opts)?;

        let empty_tree = {
            let mut builder = repo.treebuilder(None)?;
            builder.write()?
        };
        let tree = repo.find_tree(empty_tree)?;
        let sig = signature("system")?;
        repo.commit(
            Some(&branch_ref(DEFAULT_BRANCH)),
            &sig,
            &sig,
            "Initial commit",
            &tree,
            &[],
        )?;
        info!(repo_id, path = %path.display(), "created versioning root");
        Ok(())
    }

    /// Removes the versioning root from disk. Blob reclamation is GC's job.
    pub async fn drop_root(&self, repo_id: i64) -> Result<()> {
        let path = self.repo_path(repo_id);
        self.cache.evict(&path).await;
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        info!(repo_id, "dropped versioning root");
        Ok(())
    }

    /// Opens the repository handle; lock it before any git operation.
    pub async fn open(&self, repo_id: i64) -> Result<Arc<Mutex<Repository>>> {
        let path = self.repo_path(repo_id);
        if !path.exists() {
            return Err(Error::RepoNotFound(format!("versioning root #{repo_id}")));
        }
        self.cache.get(&path).await
    }

    /// Writes raw bytes as a blob; content-addressed, so duplicates are free.
    pub async fn write_blob(&self, repo_id: i64, bytes: &[u8]) -> Result<Oid> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        Ok(repo.blob(bytes)?)
    }

    /// Writes an lfs pointer blob for an external entry.
    pub async fn write_pointer(&self, repo_id: i64, pointer: &LfsPointer) -> Result<Oid> {
        self.write_blob(repo_id, pointer.to_text().as_bytes()).await
    }

    pub async fn branch_tip(&self, repo_id: i64, branch: &str) -> Result<String> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        branch_tip_in(&repo, branch).map(|oid| oid.to_string())
    }

    /// Applies `ops` on top of the branch tip and advances the branch.
    pub async fn commit(
        &self,
        repo_id: i64,
        branch: &str,
        ops: &[TreeOp],
        summary: &str,
        description: &str,
        author: &str,
        expected_parent: Option<&str>,
    ) -> Result<CommitOutcome> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        let expected = expected_parent
            .map(|hex| Oid::from_str(hex).map_err(Error::from))
            .transpose()?;
        commit_in(&repo, branch, ops, summary, description, author, expected)
    }

    /// Small-file fast path: writes `bytes` at `path` as a single commit.
    pub async fn upload_inline(
        &self,
        repo_id: i64,
        branch: &str,
        path: &str,
        bytes: &[u8],
        author: &str,
    ) -> Result<CommitOutcome> {
        let path = normalize_path(path)?;
        let blob = self.write_blob(repo_id, bytes).await?;
        self.commit(
            repo_id,
            branch,
            &[TreeOp::Upsert {
                path: path.clone(),
                blob,
            }],
            &format!("Upload {path}"),
            "",
            author,
            None,
        )
        .await
    }

    /// Registers an externally uploaded blob at `path` as a single commit.
    pub async fn link_external(
        &self,
        repo_id: i64,
        branch: &str,
        path: &str,
        oid: &str,
        size: u64,
        author: &str,
    ) -> Result<CommitOutcome> {
        let path = normalize_path(path)?;
        let blob = self
            .write_pointer(
                repo_id,
                &LfsPointer {
                    oid: oid.to_string(),
                    size,
                },
            )
            .await?;
        self.commit(
            repo_id,
            branch,
            &[TreeOp::Upsert {
                path: path.clone(),
                blob,
            }],
            &format!("Upload {path}"),
            "",
            author,
            None,
        )
        .await
    }

    /// Force-moves a branch back to `to`. Compensation only.
    pub async fn rewind(&self, repo_id: i64, branch: &str, to: &str) -> Result<()> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        rewind_branch_in(&repo, branch, Oid::from_str(to)?)
    }

    pub async fn stat(&self, repo_id: i64, commit: &str, path: &str) -> Result<FileEntry> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        entry_at(&repo, Oid::from_str(commit)?, path)
    }

    /// Raw bytes of an inline entry. External entries live in the object
    /// store; asking for their bytes here is a caller bug surfaced as
    /// `PathNotFound`.
    pub async fn read_inline(&self, repo_id: i64, commit: &str, path: &str) -> Result<Vec<u8>> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        let tree = commit_tree(&repo, Oid::from_str(commit)?)?;
        let blob = blob_at(&repo, &tree, path)?;
        if LfsPointer::parse(blob.content()).is_some() {
            return Err(Error::PathNotFound(path.to_string()));
        }
        Ok(blob.content().to_vec())
    }

    /// Raw blob bytes at `(commit, path)`: pointer text for external
    /// entries, file bytes for inline ones. Copy operations re-link these
    /// bytes verbatim, which the content-addressed odb dedups for free.
    pub async fn read_raw(&self, repo_id: i64, commit: &str, path: &str) -> Result<Vec<u8>> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        let tree = commit_tree(&repo, Oid::from_str(commit)?)?;
        let blob = blob_at(&repo, &tree, path)?;
        Ok(blob.content().to_vec())
    }

    pub async fn list_tree(
        &self,
        repo_id: i64,
        commit: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<FileEntry>> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        list_tree_in(&repo, Oid::from_str(commit)?, path, recursive)
    }

    /// Revision-name state machine: branch, then tag, then commit prefix.
    pub async fn resolve_revision(&self, repo_id: i64, raw: &str) -> Result<ResolvedRevision> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        resolve_revision_in(&repo, raw)
    }

    pub async fn create_branch(&self, repo_id: i64, name: &str, from_commit: &str) -> Result<()> {
        validate_ref_name(name)?;
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        let commit = repo.find_commit(Oid::from_str(from_commit)?)?;
        repo.branch(name, &commit, false).map_err(|e| {
            if e.code() == git2::ErrorCode::Exists {
                Error::NameTaken(format!("branch {name}"))
            } else {
                Error::from(e)
            }
        })?;
        Ok(())
    }

    pub async fn delete_branch(&self, repo_id: i64, name: &str) -> Result<()> {
        if name == DEFAULT_BRANCH {
            return Err(Error::InvalidName(
                "the default branch cannot be deleted".to_string(),
            ));
        }
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        let mut branch = repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| Error::RevisionNotFound(name.to_string()))?;
        branch.delete()?;
        Ok(())
    }

    pub async fn create_tag(
        &self,
        repo_id: i64,
        name: &str,
        commit: &str,
        message: Option<&str>,
        author: &str,
    ) -> Result<()> {
        validate_ref_name(name)?;
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        if repo
            .find_reference(&format!("refs/tags/{name}"))
            .is_ok()
        {
            return Err(Error::NameTaken(format!("tag {name}")));
        }
        let object = repo.find_object(Oid::from_str(commit)?, Some(ObjectType::Commit))?;
        match message {
            Some(msg) => {
                let sig = signature(author)?;
                repo.tag(name, &object, &sig, msg, false)?;
            }
            None => {
                repo.tag_lightweight(name, &object, false)?;
            }
        }
        Ok(())
    }

    pub async fn delete_tag(&self, repo_id: i64, name: &str) -> Result<()> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        if repo.find_reference(&format!("refs/tags/{name}")).is_err() {
            return Err(Error::RevisionNotFound(name.to_string()));
        }
        repo.tag_delete(name)?;
        Ok(())
    }

    pub async fn list_refs(&self, repo_id: i64) -> Result<(Vec<RefInfo>, Vec<RefInfo>)> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;

        let mut branches = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let (Some(name), Some(target)) = (branch.name()?, branch.get().target()) {
                branches.push(RefInfo {
                    name: name.to_string(),
                    target: target.to_string(),
                });
            }
        }

        let mut tags = Vec::new();
        for name in repo.tag_names(None)?.iter().flatten() {
            let reference = repo.find_reference(&format!("refs/tags/{name}"))?;
            let commit = reference.peel_to_commit()?;
            tags.push(RefInfo {
                name: name.to_string(),
                target: commit.id().to_string(),
            });
        }

        Ok((branches, tags))
    }

    /// History from `from_commit`, newest first. `after` is an exclusive
    /// cursor: results start at its first ancestor.
    pub async fn log(
        &self,
        repo_id: i64,
        from_commit: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<Vec<CommitInfo>> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;

        let mut walk = repo.revwalk()?;
        walk.push(Oid::from_str(from_commit)?)?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;

        let mut out = Vec::new();
        let mut seen_cursor = after.is_none();
        for oid in walk {
            let oid = oid?;
            if !seen_cursor {
                if oid.to_string() == after.unwrap_or_default() {
                    seen_cursor = true;
                }
                continue;
            }
            out.push(commit_info(&repo.find_commit(oid)?));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    pub async fn diff(&self, repo_id: i64, a: &str, b: &str) -> Result<Vec<DiffEntry>> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        let tree_a = commit_tree(&repo, Oid::from_str(a)?)?;
        let tree_b = commit_tree(&repo, Oid::from_str(b)?)?;
        let diff = repo.diff_tree_to_tree(Some(&tree_a), Some(&tree_b), None)?;

        let mut entries = Vec::new();
        for delta in diff.deltas() {
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let status = match delta.status() {
                git2::Delta::Added => "added",
                git2::Delta::Deleted => "removed",
                _ => "modified",
            };
            entries.push(DiffEntry { path, status });
        }
        Ok(entries)
    }

    /// Forward commit that undoes `commit`: the new tree is the state just
    /// before it. Refuses non-tip targets unless `force`.
    pub async fn revert(
        &self,
        repo_id: i64,
        branch: &str,
        commit: &str,
        force: bool,
        author: &str,
    ) -> Result<CommitOutcome> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        let target = Oid::from_str(commit)?;
        let tip = branch_tip_in(&repo, branch)?;
        if target != tip && !force {
            return Err(Error::ConcurrentUpdate);
        }

        let reverted = repo.find_commit(target)?;
        let restored_tree = match reverted.parent_count() {
            0 => {
                // Reverting the root commit leaves an empty tree.
                let mut builder = repo.treebuilder(None)?;
                repo.find_tree(builder.write()?)?
            }
            _ => reverted.parent(0)?.tree()?,
        };

        let summary = format!("Revert {}", short(&target.to_string()));
        commit_tree_as(&repo, branch, &restored_tree, &summary, "", author, tip)
    }

    /// Forward commit that returns the branch to `commit`'s tree. History is
    /// kept; nothing is rewound.
    pub async fn reset(
        &self,
        repo_id: i64,
        branch: &str,
        commit: &str,
        force: bool,
        message: Option<&str>,
        author: &str,
    ) -> Result<CommitOutcome> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;
        let target = Oid::from_str(commit)?;
        let tip = branch_tip_in(&repo, branch)?;

        // A reset to anything but an ancestor state is almost always a
        // mistake; require force when the target is not reachable from tip.
        if !force && !repo.graph_descendant_of(tip, target)? && target != tip {
            return Err(Error::ConcurrentUpdate);
        }

        let tree = repo.find_commit(target)?.tree()?;
        let summary = message
            .map(String::from)
            .unwrap_or_else(|| format!("Reset to {}", short(&target.to_string())));
        commit_tree_as(&repo, branch, &tree, &summary, "", author, tip)
    }

    /// External oids referenced by the given commits' trees. Used by GC to
    /// build the reserved set.
    pub async fn collect_external_oids(
        &self,
        repo_id: i64,
        commits: &[String],
    ) -> Result<HashSet<String>> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;

        let mut oids = HashSet::new();
        for commit in commits {
            let tree = commit_tree(&repo, Oid::from_str(commit)?)?;
            collect_pointers(&repo, &tree, &mut oids)?;
        }
        Ok(oids)
    }

    /// The most recent commit that changed `path`, walking back from `tip`.
    pub async fn last_commit_touching(
        &self,
        repo_id: i64,
        tip: &str,
        path: &str,
    ) -> Result<Option<CommitInfo>> {
        let repo = self.open(repo_id).await?;
        let repo = repo.lock().await;

        let mut walk = repo.revwalk()?;
        walk.push(Oid::from_str(tip)?)?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;

        let entry_oid = |commit: &git2::Commit| -> Option<Oid> {
            commit
                .tree()
                .ok()
                .and_then(|t| t.get_path(Path::new(path)).ok())
                .map(|e| e.id())
        };

        for (steps, oid) in walk.enumerate() {
            if steps >= LAST_COMMIT_WALK_CAP {
                break;
            }
            let commit = repo.find_commit(oid?)?;
            let current = entry_oid(&commit);
            if current.is_none() {
                continue;
            }
            let parent_entry = match commit.parent(0) {
                Ok(parent) => entry_oid(&parent),
                Err(_) => None,
            };
            if current != parent_entry {
                return Ok(Some(commit_info(&commit)));
            }
        }
        Ok(None)
    }
}

// -- Sync building blocks, usable under an externally held repo lock.

fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

fn signature(author: &str) -> Result<Signature<'static>> {
    let name = if author.is_empty() { "anonymous" } else { author };
    Ok(Signature::now(name, &format!("{name}@oxihub"))?)
}

fn short(id: &str) -> &str {
    &id[..id.len().min(7)]
}

fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('-')
        || name.contains("..")
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Current tip of a branch, or `revision_not_found`.
pub fn branch_tip_in(repo: &Repository, branch: &str) -> Result<Oid> {
    repo.find_reference(&branch_ref(branch))
        .ok()
        .and_then(|r| r.target())
        .ok_or_else(|| Error::RevisionNotFound(branch.to_string()))
}

/// Applies `ops` on the branch tip with a compare-and-set on
/// `expected_parent`, advancing the branch ref on success. Must run under
/// the per-repo lock for the CAS to mean anything.
pub fn commit_in(
    repo: &Repository,
    branch: &str,
    ops: &[TreeOp],
    summary: &str,
    description: &str,
    author: &str,
    expected_parent: Option<Oid>,
) -> Result<CommitOutcome> {
    let tip = branch_tip_in(repo, branch)?;
    if let Some(expected) = expected_parent {
        if expected != tip {
            return Err(Error::StaleRevision {
                expected: expected.to_string(),
                actual: tip.to_string(),
            });
        }
    }

    let parent = repo.find_commit(tip)?;
    let base_tree = parent.tree()?;

    let mut builder = TreeUpdateBuilder::new();
    let mut touched = false;
    for op in ops {
        match op {
            TreeOp::Upsert { path, blob } => {
                builder.upsert(path.as_str(), *blob, FileMode::Blob);
                touched = true;
            }
            TreeOp::Remove { path } => {
                // Idempotent: removing an absent path is not an error.
                if base_tree.get_path(Path::new(path)).is_ok() {
                    builder.remove(path.as_str());
                    touched = true;
                }
            }
        }
    }

    let new_tree_oid = if touched {
        builder.create_updated(repo, &base_tree)?
    } else {
        base_tree.id()
    };
    let new_tree = repo.find_tree(new_tree_oid)?;

    let outcome = commit_tree_as(repo, branch, &new_tree, summary, description, author, tip)?;
    debug!(branch, commit = %outcome.id, "advanced branch");
    Ok(outcome)
}

/// Creates a commit with the given tree on top of `parent_oid` and moves the
/// branch ref to it.
fn commit_tree_as(
    repo: &Repository,
    branch: &str,
    tree: &Tree,
    summary: &str,
    description: &str,
    author: &str,
    parent_oid: Oid,
) -> Result<CommitOutcome> {
    let sig = signature(author)?;
    let message = if description.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}\n\n{description}")
    };
    let parent = repo.find_commit(parent_oid)?;
    let id = repo.commit(
        Some(&branch_ref(branch)),
        &sig,
        &sig,
        &message,
        tree,
        &[&parent],
    )?;
    Ok(CommitOutcome {
        id: id.to_string(),
        parent: parent_oid.to_string(),
    })
}

/// Force-moves the branch ref back to `to`. Compensation path for a failed
/// metadata transaction; must run under the same lock as the commit that is
/// being rolled back.
pub fn rewind_branch_in(repo: &Repository, branch: &str, to: Oid) -> Result<()> {
    repo.reference(&branch_ref(branch), to, true, "rollback")?;
    Ok(())
}

fn commit_tree<'r>(repo: &'r Repository, commit: Oid) -> Result<Tree<'r>> {
    Ok(repo.find_commit(commit)?.tree()?)
}

fn blob_at<'r>(repo: &'r Repository, tree: &Tree<'_>, path: &str) -> Result<git2::Blob<'r>> {
    let entry = tree
        .get_path(Path::new(path))
        .map_err(|_| Error::PathNotFound(path.to_string()))?;
    if entry.kind() != Some(ObjectType::Blob) {
        return Err(Error::PathNotFound(path.to_string()));
    }
    Ok(repo.find_blob(entry.id())?)
}

fn entry_from_blob(path: &str, blob: &git2::Blob<'_>) -> FileEntry {
    match LfsPointer::parse(blob.content()) {
        Some(pointer) => FileEntry {
            path: path.to_string(),
            size: pointer.size,
            content_sha256: pointer.oid.clone(),
            storage_kind: StorageKind::External,
            lfs_pointer: Some(pointer),
        },
        None => FileEntry {
            path: path.to_string(),
            size: blob.size() as u64,
            content_sha256: hex::encode(Sha256::digest(blob.content())),
            storage_kind: StorageKind::Inline,
            lfs_pointer: None,
        },
    }
}

/// Entry at `(commit, path)`, or `path_not_found`.
pub fn entry_at(repo: &Repository, commit: Oid, path: &str) -> Result<FileEntry> {
    let tree = commit_tree(repo, commit)?;
    let blob = blob_at(repo, &tree, path)?;
    Ok(entry_from_blob(path, &blob))
}

fn list_tree_in(
    repo: &Repository,
    commit: Oid,
    path: &str,
    recursive: bool,
) -> Result<Vec<FileEntry>> {
    let root_tree = commit_tree(repo, commit)?;

    let (tree, prefix) = if path.is_empty() {
        (root_tree, String::new())
    } else {
        let entry = root_tree
            .get_path(Path::new(path))
            .map_err(|_| Error::PathNotFound(path.to_string()))?;
        match entry.kind() {
            Some(ObjectType::Tree) => {
                let subtree = repo.find_tree(entry.id())?;
                (subtree, format!("{path}/"))
            }
            Some(ObjectType::Blob) => {
                // Listing a file path yields that single entry.
                let blob = repo.find_blob(entry.id())?;
                return Ok(vec![entry_from_blob(path, &blob)]);
            }
            _ => return Err(Error::PathNotFound(path.to_string())),
        }
    };

    let mut entries = Vec::new();
    if recursive {
        let mut walk_err = None;
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                match repo.find_blob(entry.id()) {
                    Ok(blob) => {
                        let name = entry.name().unwrap_or_default();
                        let full = format!("{prefix}{root}{name}");
                        entries.push(entry_from_blob(&full, &blob));
                    }
                    Err(e) => {
                        walk_err = Some(e);
                        return TreeWalkResult::Abort;
                    }
                }
            }
            TreeWalkResult::Ok
        })?;
        if let Some(e) = walk_err {
            return Err(e.into());
        }
    } else {
        for entry in tree.iter() {
            let name = entry.name().unwrap_or_default().to_string();
            match entry.kind() {
                Some(ObjectType::Blob) => {
                    let blob = repo.find_blob(entry.id())?;
                    entries.push(entry_from_blob(&format!("{prefix}{name}"), &blob));
                }
                Some(ObjectType::Tree) => {
                    // Directories surface as zero-size markers; the wire
                    // layer renders them with type "directory".
                    entries.push(FileEntry {
                        path: format!("{prefix}{name}/"),
                        size: 0,
                        content_sha256: String::new(),
                        storage_kind: StorageKind::Inline,
                        lfs_pointer: None,
                    });
                }
                _ => {}
            }
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn resolve_revision_in(repo: &Repository, raw: &str) -> Result<ResolvedRevision> {
    if let Ok(reference) = repo.find_reference(&branch_ref(raw)) {
        if let Some(target) = reference.target() {
            return Ok(ResolvedRevision {
                kind: RevisionKind::Branch,
                name: raw.to_string(),
                commit: target.to_string(),
            });
        }
    }

    if let Ok(reference) = repo.find_reference(&format!("refs/tags/{raw}")) {
        let commit = reference.peel_to_commit()?;
        return Ok(ResolvedRevision {
            kind: RevisionKind::Tag,
            name: raw.to_string(),
            commit: commit.id().to_string(),
        });
    }

    if COMMIT_PREFIX_RE.is_match(raw) {
        if let Ok(object) = repo.revparse_single(raw) {
            if let Ok(commit) = object.peel(ObjectType::Commit) {
                return Ok(ResolvedRevision {
                    kind: RevisionKind::Commit,
                    name: raw.to_string(),
                    commit: commit.id().to_string(),
                });
            }
        }
    }

    Err(Error::RevisionNotFound(raw.to_string()))
}

fn commit_info(commit: &git2::Commit<'_>) -> CommitInfo {
    let message = commit.message().unwrap_or_default();
    let (summary, description) = match message.split_once("\n\n") {
        Some((s, d)) => (s.to_string(), d.trim_end().to_string()),
        None => (message.trim_end().to_string(), String::new()),
    };
    CommitInfo {
        id: commit.id().to_string(),
        parent: commit.parent_id(0).ok().map(|p| p.to_string()),
        summary,
        description,
        author: commit.author().name().unwrap_or_default().to_string(),
        timestamp: commit.time().seconds(),
    }
}

fn collect_pointers(
    repo: &Repository,
    tree: &Tree<'_>,
    out: &mut HashSet<String>,
) -> Result<()> {
    tree.walk(TreeWalkMode::PreOrder, |_, entry| {
        if entry.kind() == Some(ObjectType::Blob) {
            if let Ok(blob) = repo.find_blob(entry.id()) {
                if let Some(pointer) = LfsPointer::parse(blob.content()) {
                    out.insert(pointer.oid);
                }
            }
        }
        TreeWalkResult::Ok
    })?;
    Ok(())
}
