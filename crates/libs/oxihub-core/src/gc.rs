//! Background maintenance: staging janitor and blob reclamation.
//!
//! The janitor sweeps staging records older than the configured TTL and
//! aborts their multipart uploads so the store drops orphaned parts. The
//! blob sweep deletes content-addressed objects that nothing reachable
//! references any more.
//!
//! The reserved set for a blob sweep is: every branch and tag tip of every
//! repository, plus the last `keep_versions` commits of each default
//! branch, plus everything the mirror rows still point at. The sweep holds
//! no long locks and deletes in small batches.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::file_entry::FileEntryBmc;
use crate::model::lfs_config::LfsConfigBmc;
use crate::model::lfs_object::LfsObjectBmc;
use crate::model::repo::RepoBmc;
use crate::model::staging::StagingBmc;
use crate::store::object_store;
use crate::store::tree_store::DEFAULT_BRANCH;
use crate::Result;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Blobs deleted per sweep pass; keeps each pass short.
const SWEEP_BATCH: usize = 100;

/// Aborts and removes staging records older than the staging TTL.
pub async fn sweep_staging(mm: &ModelManager) -> Result<u64> {
    let ttl_hours = mm.app_config.lfs.staging_ttl_hours;
    let stale = StagingBmc::sweep_older_than(mm, ttl_hours).await?;

    let mut swept = 0u64;
    for record in stale {
        if let Some(upload_id) = &record.upload_id {
            let key = object_store::blob_key(&record.oid);
            if let Err(e) = mm.objects.abort_multipart(&key, upload_id).await {
                warn!(oid = %record.oid, error = %e, "failed to abort stale multipart upload");
                continue;
            }
        }
        StagingBmc::delete(mm, record.id).await?;
        swept += 1;
    }

    let purged = StagingBmc::purge_complete(mm).await?;
    if swept > 0 || purged > 0 {
        info!(swept, purged, "staging janitor pass done");
    }
    Ok(swept)
}

/// Deletes unreferenced blobs, at most [`SWEEP_BATCH`] per pass.
pub async fn sweep_blobs(mm: &ModelManager) -> Result<u64> {
    let ctx = Ctx::root_ctx();
    let mut reserved: HashSet<String> = HashSet::new();

    // Mirror rows first: cheap, and they cover every branch's latest state.
    reserved.extend(FileEntryBmc::referenced_external_oids(mm).await?);

    for repo in RepoBmc::list_all(mm).await? {
        let (branches, tags) = match mm.trees.list_refs(repo.id).await {
            Ok(refs) => refs,
            Err(e) => {
                warn!(repo = %repo.full_name(), error = %e, "skipping repo in blob sweep");
                continue;
            }
        };

        let mut commits: Vec<String> = branches.iter().map(|r| r.target.clone()).collect();
        commits.extend(tags.iter().map(|r| r.target.clone()));

        // Retention window on the default branch.
        let keep = LfsConfigBmc::effective(&ctx, mm, repo.id).await?.keep_versions;
        if keep > 0 {
            if let Some(main_tip) = branches
                .iter()
                .find(|r| r.name == DEFAULT_BRANCH)
                .map(|r| r.target.clone())
            {
                let recent = mm.trees.log(repo.id, &main_tip, keep as usize, None).await?;
                commits.extend(recent.into_iter().map(|c| c.id));
            }
        }

        commits.sort();
        commits.dedup();
        reserved.extend(mm.trees.collect_external_oids(repo.id, &commits).await?);
    }

    let ttl_hours = mm.app_config.lfs.staging_ttl_hours;
    let mut deleted = 0u64;
    for (oid, _size) in LfsObjectBmc::reclaimable(mm, ttl_hours).await? {
        if reserved.contains(&oid) {
            continue;
        }
        let key = object_store::blob_key(&oid);
        if let Err(e) = mm.objects.delete(&key).await {
            warn!(oid = %oid, error = %e, "failed to delete blob, will retry next sweep");
            continue;
        }
        LfsObjectBmc::delete(mm, &oid).await?;
        deleted += 1;
        if deleted as usize >= SWEEP_BATCH {
            break;
        }
    }

    if deleted > 0 {
        info!(deleted, "blob sweep pass done");
    }
    Ok(deleted)
}

/// Runs both sweeps on a timer until `shutdown` flips. Spawned by the
/// binary next to the listener.
pub async fn run_background(mm: ModelManager, mut shutdown: watch::Receiver<bool>) {
    let staging_every = Duration::from_secs(
        (mm.app_config.lfs.staging_ttl_hours.max(1) * 3600 / 4).max(60),
    );
    let blobs_every = Duration::from_secs(6 * 3600);

    let mut staging_tick = tokio::time::interval(staging_every);
    let mut blob_tick = tokio::time::interval(blobs_every);
    // The immediate first tick would race startup; skip it.
    staging_tick.tick().await;
    blob_tick.tick().await;

    info!(
        staging_every_secs = staging_every.as_secs(),
        blobs_every_secs = blobs_every.as_secs(),
        "background maintenance started"
    );

    loop {
        tokio::select! {
            _ = staging_tick.tick() => {
                if let Err(e) = sweep_staging(&mm).await {
                    warn!(error = %e, "staging sweep failed");
                }
            }
            _ = blob_tick.tick() => {
                if let Err(e) = sweep_blobs(&mm).await {
                    warn!(error = %e, "blob sweep failed");
                }
            }
            _ = shutdown.changed() => {
                info!("background maintenance stopping");
                return;
            }
        }
    }
}
