//! Preupload classifier and large-file transfer broker.
//!
//! Three operations, all on the hard edge of the system:
//!
//! 1. **preupload** classifies each announced file as `regular` (inline in
//!    the commit payload) or `lfs` (direct-to-store), and short-circuits
//!    content the target already has (`shouldIgnore`)
//! 2. **batch** is the git-lfs batch endpoint: it issues presigned upload
//!    or download actions per object, deduplicating oids that already exist
//! 3. **verify** closes the loop after a client upload: it stats the key,
//!    checks the size, records the blob as ready and closes staging rows
//!
//! The hub never proxies object bytes; every href in a batch response points
//! the client directly at the object store.

use crate::access::{self, RepoAction};
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::file_entry::FileEntryBmc;
use crate::model::lfs_config::LfsConfigBmc;
use crate::model::lfs_object::LfsObjectBmc;
use crate::model::repo::Repo;
use crate::model::staging::StagingBmc;
use crate::store::object_store::{self, CompletedPart};
use crate::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

lazy_static! {
    static ref OID_RE: Regex =
        Regex::new("^[0-9a-f]{64}$").unwrap_or_else(|_| unreachable!("static regex"));
}

/// Validates a client-supplied oid: lowercase hex sha256, nothing else.
pub fn validate_oid(oid: &str) -> Result<()> {
    if OID_RE.is_match(oid) {
        Ok(())
    } else {
        Err(Error::UnsupportedHash(oid.to_string()))
    }
}

// -- Preupload

#[derive(Debug, Clone, Deserialize)]
pub struct PreuploadFile {
    pub path: String,
    pub size: u64,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreuploadResult {
    pub path: String,
    /// `"regular"` or `"lfs"` on the wire.
    pub upload_mode: &'static str,
    pub should_ignore: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreuploadResponse {
    pub files: Vec<PreuploadResult>,
    /// Advisory only; a commit may still fail the authoritative check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_warning: Option<String>,
}

/// Classifies announced files and short-circuits already-known content.
pub async fn preupload(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    revision: &str,
    files: &[PreuploadFile],
) -> Result<PreuploadResponse> {
    access::authorize_repo(ctx, mm, repo, RepoAction::Write).await?;
    // The revision must resolve; dedup answers are about its lineage.
    mm.trees.resolve_revision(repo.id, revision).await?;

    let lfs = LfsConfigBmc::effective(ctx, mm, repo.id).await?;

    let mut results = Vec::with_capacity(files.len());
    let mut claimed: i64 = 0;
    for file in files {
        let external = lfs.is_external(&file.path, file.size);

        // Omitted sha256 always means "send it": the oracle never guesses.
        let should_ignore = match &file.sha256 {
            Some(sha) => {
                FileEntryBmc::exists_with(mm, repo.id, &file.path, sha, file.size as i64).await?
            }
            None => false,
        };

        if !should_ignore {
            claimed += file.size as i64;
        }
        results.push(PreuploadResult {
            path: file.path.clone(),
            upload_mode: if external { "lfs" } else { "regular" },
            should_ignore,
        });
    }

    // Advisory admission against claimed sizes; never fatal here.
    let quota_warning = match access::admit_quota(ctx, mm, repo, claimed).await {
        Ok(()) => None,
        Err(Error::QuotaExceeded {
            scope,
            projected,
            limit,
        }) => Some(format!(
            "commit would exceed the quota of {scope}: {projected} > {limit} bytes"
        )),
        Err(other) => return Err(other),
    };

    Ok(PreuploadResponse {
        files: results,
        quota_warning,
    })
}

// -- Batch

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub operation: BatchOperation,
    #[serde(default)]
    pub transfers: Vec<String>,
    pub objects: Vec<BatchObjectRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOperation {
    Upload,
    Download,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchObjectRequest {
    pub oid: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionDesc {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Actions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<ActionDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<ActionDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<ActionDesc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartPlan {
    pub part_number: i32,
    pub href: String,
    /// Inclusive byte range `[start, end]` this part covers.
    pub size_range: [u64; 2],
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectError {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchObjectResponse {
    pub oid: String,
    pub size: u64,
    /// Absent actions on an upload object means "already have it".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Actions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<PartPlan>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub transfer: &'static str,
    pub objects: Vec<BatchObjectResponse>,
}

/// The git-lfs batch endpoint. Uploads need write access, downloads follow
/// the read matrix.
pub async fn batch(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    req: &BatchRequest,
) -> Result<BatchResponse> {
    let action = match req.operation {
        BatchOperation::Upload => RepoAction::Write,
        BatchOperation::Download => RepoAction::Read,
    };
    access::authorize_repo(ctx, mm, repo, action).await?;

    let multipart_advertised = req.transfers.iter().any(|t| t == "multipart");
    let max_object = mm.app_config.lfs.max_object_bytes;

    // Authoritative-enough admission for the announced upload bytes; the
    // commit itself re-checks.
    if req.operation == BatchOperation::Upload {
        let mut new_bytes: i64 = 0;
        for object in &req.objects {
            if validate_oid(&object.oid).is_ok()
                && !LfsObjectBmc::exists(mm, &object.oid).await?
            {
                new_bytes += object.size as i64;
            }
        }
        access::admit_quota(ctx, mm, repo, new_bytes).await?;
    }

    let mut use_multipart = false;
    let mut objects = Vec::with_capacity(req.objects.len());
    for object in &req.objects {
        let response = match req.operation {
            BatchOperation::Upload => {
                upload_object(ctx, mm, repo, object, multipart_advertised, max_object).await?
            }
            BatchOperation::Download => download_object(mm, object).await?,
        };
        use_multipart |= response.parts.is_some();
        objects.push(response);
    }

    metrics::counter!("lfs_batch_objects_total").increment(objects.len() as u64);
    Ok(BatchResponse {
        transfer: if use_multipart { "multipart" } else { "basic" },
        objects,
    })
}

fn object_error(object: &BatchObjectRequest, code: u16, message: String) -> BatchObjectResponse {
    BatchObjectResponse {
        oid: object.oid.clone(),
        size: object.size,
        actions: None,
        upload_id: None,
        parts: None,
        error: Some(ObjectError { code, message }),
    }
}

fn verify_action(mm: &ModelManager, repo: &Repo) -> ActionDesc {
    ActionDesc {
        href: format!(
            "{}/api/{}/{}/{}/lfs/verify",
            mm.app_config.server.public_base_url,
            repo.kind.plural(),
            repo.namespace,
            repo.name
        ),
        expires_at: None,
        header: None,
    }
}

async fn upload_object(
    _ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    object: &BatchObjectRequest,
    multipart_advertised: bool,
    max_object: u64,
) -> Result<BatchObjectResponse> {
    if validate_oid(&object.oid).is_err() {
        return Ok(object_error(object, 422, "unsupported_hash".to_string()));
    }
    if max_object > 0 && object.size > max_object {
        return Ok(object_error(object, 413, "object_too_large".to_string()));
    }

    // Dedup acknowledgement: an object with no actions. Two clients racing
    // on the same oid are both safe, the key is write-once by content.
    if LfsObjectBmc::exists(mm, &object.oid).await? {
        debug!(oid = %object.oid, "batch upload dedup hit");
        return Ok(BatchObjectResponse {
            oid: object.oid.clone(),
            size: object.size,
            actions: None,
            upload_id: None,
            parts: None,
            error: None,
        });
    }

    let key = object_store::blob_key(&object.oid);
    let put_ttl = Duration::from_secs(mm.app_config.storage.presign_put_ttl_secs);
    let lfs_cfg = &mm.app_config.lfs;

    if multipart_advertised && object.size > lfs_cfg.multipart_threshold_bytes {
        let upload_id = mm.objects.initiate_multipart(&key).await?;
        let part_size = lfs_cfg.multipart_part_size_bytes.max(1);
        let part_count = object.size.div_ceil(part_size);

        let mut parts = Vec::with_capacity(part_count as usize);
        for index in 0..part_count {
            let part_number = (index + 1) as i32;
            let start = index * part_size;
            let end = ((index + 1) * part_size).min(object.size) - 1;
            let url = mm
                .objects
                .presign_part(&key, &upload_id, part_number, put_ttl)
                .await?;
            parts.push(PartPlan {
                part_number,
                href: url.url,
                size_range: [start, end],
            });
        }

        StagingBmc::create(
            mm,
            repo.id,
            &object.oid,
            object.size as i64,
            Some(&upload_id),
        )
        .await?;

        Ok(BatchObjectResponse {
            oid: object.oid.clone(),
            size: object.size,
            actions: Some(Actions {
                verify: Some(verify_action(mm, repo)),
                ..Actions::default()
            }),
            upload_id: Some(upload_id),
            parts: Some(parts),
            error: None,
        })
    } else {
        let url = mm
            .objects
            .presign_put(&key, put_ttl, Some(object.size))
            .await?;
        StagingBmc::create(mm, repo.id, &object.oid, object.size as i64, None).await?;

        Ok(BatchObjectResponse {
            oid: object.oid.clone(),
            size: object.size,
            actions: Some(Actions {
                upload: Some(ActionDesc {
                    href: url.url,
                    expires_at: Some(url.expires_at.to_rfc3339()),
                    header: None,
                }),
                verify: Some(verify_action(mm, repo)),
                ..Actions::default()
            }),
            upload_id: None,
            parts: None,
            error: None,
        })
    }
}

async fn download_object(
    mm: &ModelManager,
    object: &BatchObjectRequest,
) -> Result<BatchObjectResponse> {
    if validate_oid(&object.oid).is_err() {
        return Ok(object_error(object, 422, "unsupported_hash".to_string()));
    }

    let known = LfsObjectBmc::exists(mm, &object.oid).await?;
    let key = object_store::blob_key(&object.oid);
    if !known && mm.objects.stat(&key).await?.is_none() {
        return Ok(object_error(object, 404, "not_found".to_string()));
    }

    let ttl = Duration::from_secs(mm.app_config.storage.presign_get_ttl_secs);
    let url = mm.objects.presign_get(&key, ttl).await?;
    Ok(BatchObjectResponse {
        oid: object.oid.clone(),
        size: object.size,
        actions: Some(Actions {
            download: Some(ActionDesc {
                href: url.url,
                expires_at: Some(url.expires_at.to_rfc3339()),
                header: None,
            }),
            ..Actions::default()
        }),
        upload_id: None,
        parts: None,
        error: None,
    })
}

// -- Verification

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub oid: String,
    pub size: u64,
    /// Present for multipart uploads: the broker completes the upload with
    /// these parts before stat'ing the key.
    #[serde(default)]
    pub parts: Vec<VerifyPart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPart {
    pub part_number: i32,
    pub etag: String,
}

/// Finalises an upload. Until this succeeds, commits referencing the oid
/// fail with `object_not_ready`. Verifying an oid that is already present
/// and consistent succeeds trivially, which is what makes concurrent
/// uploads of identical content idempotent.
pub async fn verify(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    req: &VerifyRequest,
) -> Result<()> {
    access::authorize_repo(ctx, mm, repo, RepoAction::Write).await?;
    validate_oid(&req.oid)?;
    let key = object_store::blob_key(&req.oid);

    if !req.parts.is_empty() {
        // Complete whichever pending multipart upload carries this oid.
        let pending = StagingBmc::find_pending(mm, &req.oid).await?;
        let upload_id = pending
            .iter()
            .find_map(|r| r.upload_id.clone())
            .ok_or_else(|| Error::ObjectNotReady(req.oid.clone()))?;
        let parts: Vec<CompletedPart> = req
            .parts
            .iter()
            .map(|p| CompletedPart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();
        mm.objects.complete_multipart(&key, &upload_id, &parts).await?;
    }

    let stat = crate::store::with_retries(|| mm.objects.stat(&key))
        .await?
        .ok_or_else(|| Error::ObjectNotReady(req.oid.clone()))?;
    if stat.size != req.size {
        return Err(Error::SizeMismatch {
            oid: req.oid.clone(),
            declared: req.size,
            stored: stat.size,
        });
    }

    LfsObjectBmc::record(mm, &req.oid, req.size as i64).await?;
    StagingBmc::close_for_oid(mm.db(), &req.oid).await?;
    info!(oid = %req.oid, size = req.size, "verified upload");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_oid() {
        assert!(validate_oid(&"a".repeat(64)).is_ok());
        assert!(validate_oid(&"A".repeat(64)).is_err());
        assert!(validate_oid("abc").is_err());
        assert!(validate_oid(&"g".repeat(64)).is_err());
    }

    #[test]
    fn test_batch_request_parses_wire_shape() {
        let req: BatchRequest = serde_json::from_str(
            r#"{"operation":"upload","transfers":["basic","multipart"],
                "objects":[{"oid":"abc","size":123}]}"#,
        )
        .unwrap_or_else(|e| panic!("parse: {e}"));
        assert_eq!(req.operation, BatchOperation::Upload);
        assert_eq!(req.objects.len(), 1);
    }

    #[test]
    fn test_dedup_object_serialises_without_actions() {
        let object = BatchObjectResponse {
            oid: "a".repeat(64),
            size: 9,
            actions: None,
            upload_id: None,
            parts: None,
            error: None,
        };
        let json = serde_json::to_string(&object).unwrap_or_default();
        assert!(!json.contains("actions"));
        assert!(!json.contains("error"));
    }
}
