//! Repository lifecycle, settings, refs and history endpoints.

use axum::response::IntoResponse;
use axum::{Extension, Json, extract::Path, extract::Query, extract::State};
use oxihub_core::model::lfs_config::{LfsConfigBmc, RepoLfsConfig};
use oxihub_core::model::namespace::NamespaceBmc;
use oxihub_core::model::quota::{QuotaBmc, QuotaMode, QuotaPolicy};
use oxihub_core::model::repo::{Repo, RepoBmc, RepoKind};
use oxihub_core::{Ctx, Error, access, commit as commit_engine, resolve};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::api::load_repo;
use crate::error::Result;

fn repo_json(repo: &Repo) -> serde_json::Value {
    json!({
        "id": repo.full_name(),
        "kind": repo.kind.as_str(),
        "private": repo.private,
        "usedBytes": repo.used_bytes,
        "createdAt": repo.created_at.and_utc().to_rfc3339(),
    })
}

#[derive(Deserialize)]
pub struct RepoCreatePayload {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, alias = "organization")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub private: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Json(payload): Json<RepoCreatePayload>,
) -> Result<impl IntoResponse> {
    let kind = match payload.kind.as_deref() {
        Some(raw) => RepoKind::parse(raw)?,
        None => RepoKind::Model,
    };
    let namespace_name = payload
        .namespace
        .or_else(|| ctx.username().map(String::from))
        .ok_or(Error::Unauthenticated)?;

    let namespace = NamespaceBmc::get_by_name(&ctx, &state.mm, &namespace_name).await?;
    access::authorize_repo_create(&ctx, &state.mm, &namespace).await?;

    let repo = RepoBmc::create(
        &ctx,
        &state.mm,
        kind,
        &namespace_name,
        &payload.name,
        payload.private,
    )
    .await?;

    let url = format!(
        "{}/{}/{}",
        state.mm.app_config.server.public_base_url, repo.namespace, repo.name
    );
    Ok(Json(json!({ "url": url, "id": repo.full_name() })))
}

#[derive(Deserialize)]
pub struct RepoDeletePayload {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, alias = "organization")]
    pub namespace: Option<String>,
    pub name: String,
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Json(payload): Json<RepoDeletePayload>,
) -> Result<impl IntoResponse> {
    let kind = match payload.kind.as_deref() {
        Some(raw) => RepoKind::parse(raw)?,
        None => RepoKind::Model,
    };
    let namespace_name = payload
        .namespace
        .or_else(|| ctx.username().map(String::from))
        .ok_or(Error::Unauthenticated)?;

    let repo = RepoBmc::get(&ctx, &state.mm, kind, &namespace_name, &payload.name).await?;
    access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Settings).await?;
    RepoBmc::delete(&ctx, &state.mm, &repo).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_namespace(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let kind = RepoKind::parse_plural(&kind)?;
    let repos = RepoBmc::list_for_namespace(&ctx, &state.mm, &namespace, Some(kind)).await?;

    // Private repos stay invisible to callers without read access.
    let mut visible = Vec::new();
    for repo in repos {
        if !repo.private
            || access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Read)
                .await
                .is_ok()
        {
            visible.push(repo_json(&repo));
        }
    }
    Ok(Json(visible))
}

#[derive(Deserialize)]
pub struct SettingsPayload {
    pub private: Option<bool>,
    #[serde(default, rename = "quotaBytes")]
    pub quota_bytes: Option<i64>,
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    Json(payload): Json<SettingsPayload>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Settings).await?;

    if let Some(private) = payload.private {
        RepoBmc::set_visibility(&ctx, &state.mm, &repo, private).await?;
    }
    if let Some(quota_bytes) = payload.quota_bytes {
        let value = (quota_bytes > 0).then_some(quota_bytes);
        RepoBmc::set_quota_bytes(&ctx, &state.mm, repo.id, value).await?;
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn get_lfs_settings(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Settings).await?;
    let config = LfsConfigBmc::get(&ctx, &state.mm, repo.id)
        .await?
        .unwrap_or_default();
    Ok(Json(config))
}

pub async fn put_lfs_settings(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    Json(config): Json<RepoLfsConfig>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Settings).await?;
    LfsConfigBmc::set(&ctx, &state.mm, repo.id, &config).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct QuotaPayload {
    pub mode: String,
    #[serde(default, rename = "publicQuotaBytes")]
    pub public_quota_bytes: Option<i64>,
    #[serde(default, rename = "privateQuotaBytes")]
    pub private_quota_bytes: Option<i64>,
}

pub async fn get_quota(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(namespace): Path<String>,
) -> Result<impl IntoResponse> {
    let ns = NamespaceBmc::get_by_name(&ctx, &state.mm, &namespace).await?;
    access::authorize_namespace_admin(&ctx, &state.mm, &ns).await?;

    let policy = QuotaBmc::get(&ctx, &state.mm, ns.id).await?;
    let effective = QuotaBmc::effective(&ctx, &state.mm, &ns).await?;
    Ok(Json(json!({
        "namespace": ns.name,
        "usedPublicBytes": ns.used_public_bytes,
        "usedPrivateBytes": ns.used_private_bytes,
        "mode": policy.as_ref().map(|p| p.mode.as_str()).unwrap_or("inherit"),
        "publicQuotaBytes": effective.public_limit,
        "privateQuotaBytes": effective.private_limit,
    })))
}

pub async fn put_quota(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(namespace): Path<String>,
    Json(payload): Json<QuotaPayload>,
) -> Result<impl IntoResponse> {
    let ns = NamespaceBmc::get_by_name(&ctx, &state.mm, &namespace).await?;
    access::authorize_namespace_admin(&ctx, &state.mm, &ns).await?;

    let mode = match payload.mode.as_str() {
        "custom" => QuotaMode::Custom,
        "inherit" => QuotaMode::Inherit,
        other => return Err(Error::InvalidName(format!("quota mode {other}")).into()),
    };
    QuotaBmc::set(
        &ctx,
        &state.mm,
        &QuotaPolicy {
            namespace_id: ns.id,
            mode,
            public_quota_bytes: payload.public_quota_bytes,
            private_quota_bytes: payload.private_quota_bytes,
        },
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn refs(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Read).await?;

    let (branches, tags) = state.mm.trees.list_refs(repo.id).await?;
    Ok(Json(json!({
        "branches": branches.iter().map(|r| json!({"name": r.name, "targetCommit": r.target})).collect::<Vec<_>>(),
        "tags": tags.iter().map(|r| json!({"name": r.name, "targetCommit": r.target})).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub after: Option<String>,
}

pub async fn commits(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, revision)): Path<(String, String, String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    let resolved = resolve::resolve_revision(&ctx, &state.mm, &repo, &revision).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let log = state
        .mm
        .trees
        .log(repo.id, &resolved.commit, limit, query.after.as_deref())
        .await?;

    let commits: Vec<_> = log
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "parent": c.parent,
                "title": c.summary,
                "message": c.description,
                "author": c.author,
                "date": chrono::DateTime::from_timestamp(c.timestamp, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
            })
        })
        .collect();
    Ok(Json(commits))
}

#[derive(Deserialize)]
pub struct BranchCreatePayload {
    #[serde(default)]
    pub revision: Option<String>,
}

pub async fn create_branch(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, branch)): Path<(String, String, String, String)>,
    payload: Option<Json<BranchCreatePayload>>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Write).await?;

    let start = payload
        .and_then(|Json(p)| p.revision)
        .unwrap_or_else(|| oxihub_core::store::tree_store::DEFAULT_BRANCH.to_string());
    let resolved = state.mm.trees.resolve_revision(repo.id, &start).await?;
    state
        .mm
        .trees
        .create_branch(repo.id, &branch, &resolved.commit)
        .await?;
    Ok(Json(json!({ "success": true, "target": resolved.commit })))
}

pub async fn delete_branch(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, branch)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Write).await?;
    state.mm.trees.delete_branch(repo.id, &branch).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct TagCreatePayload {
    pub revision: String,
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn create_tag(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, tag)): Path<(String, String, String, String)>,
    Json(payload): Json<TagCreatePayload>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Write).await?;

    let resolved = state
        .mm
        .trees
        .resolve_revision(repo.id, &payload.revision)
        .await?;
    state
        .mm
        .trees
        .create_tag(
            repo.id,
            &tag,
            &resolved.commit,
            payload.message.as_deref(),
            ctx.username().unwrap_or("system"),
        )
        .await?;
    Ok(Json(json!({ "success": true, "target": resolved.commit })))
}

pub async fn delete_tag(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, tag)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    access::authorize_repo(&ctx, &state.mm, &repo, access::RepoAction::Write).await?;
    state.mm.trees.delete_tag(repo.id, &tag).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct RewritePayload {
    pub commit: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn revert(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, revision)): Path<(String, String, String, String)>,
    Json(payload): Json<RewritePayload>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    let result = commit_engine::revert(
        &ctx,
        &state.mm,
        &repo,
        &revision,
        &payload.commit,
        payload.force,
    )
    .await?;
    Ok(Json(result))
}

pub async fn reset(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, revision)): Path<(String, String, String, String)>,
    Json(payload): Json<RewritePayload>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    let result = commit_engine::reset(
        &ctx,
        &state.mm,
        &repo,
        &revision,
        &payload.commit,
        payload.force,
        payload.message.as_deref(),
    )
    .await?;
    Ok(Json(result))
}
