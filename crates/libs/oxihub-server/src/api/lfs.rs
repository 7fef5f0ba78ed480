//! Transfer-protocol endpoints: preupload classification, the git-lfs
//! batch endpoint and upload verification.

use axum::response::IntoResponse;
use axum::{Extension, Json, extract::Path, extract::State};
use oxihub_core::model::repo::RepoKind;
use oxihub_core::transfer::{self, BatchRequest, PreuploadFile, VerifyRequest};
use oxihub_core::{Ctx, Error};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::api::load_repo;
use crate::error::Result;

#[derive(Deserialize)]
pub struct PreuploadPayload {
    pub files: Vec<PreuploadFile>,
}

pub async fn preupload(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, revision)): Path<(String, String, String, String)>,
    Json(payload): Json<PreuploadPayload>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    let response = transfer::preupload(&ctx, &state.mm, &repo, &revision, &payload.files).await?;
    Ok(Json(response))
}

pub async fn verify(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    Json(payload): Json<VerifyRequest>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    transfer::verify(&ctx, &state.mm, &repo, &payload).await?;
    Ok(Json(json!({ "oid": payload.oid, "size": payload.size, "state": "verified" })))
}

/// The batch routes carry the git remote shape `{name}.git`; anything
/// without the suffix is not an lfs remote.
fn strip_git_suffix(name_git: &str) -> Result<&str> {
    name_git
        .strip_suffix(".git")
        .ok_or_else(|| Error::RepoNotFound(name_git.to_string()).into())
}

async fn batch_for(
    state: &AppState,
    ctx: &Ctx,
    kind: RepoKind,
    namespace: &str,
    name_git: &str,
    req: &BatchRequest,
) -> Result<Json<transfer::BatchResponse>> {
    let name = strip_git_suffix(name_git)?;
    let repo = load_repo(state, kind.plural(), namespace, name).await?;
    let response = transfer::batch(ctx, &state.mm, &repo, req).await?;
    Ok(Json(response))
}

pub async fn batch_model(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((namespace, name_git)): Path<(String, String)>,
    Json(req): Json<BatchRequest>,
) -> Result<impl IntoResponse> {
    batch_for(&state, &ctx, RepoKind::Model, &namespace, &name_git, &req).await
}

pub async fn batch_dataset(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((namespace, name_git)): Path<(String, String)>,
    Json(req): Json<BatchRequest>,
) -> Result<impl IntoResponse> {
    batch_for(&state, &ctx, RepoKind::Dataset, &namespace, &name_git, &req).await
}

pub async fn batch_space(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((namespace, name_git)): Path<(String, String)>,
    Json(req): Json<BatchRequest>,
) -> Result<impl IntoResponse> {
    batch_for(&state, &ctx, RepoKind::Space, &namespace, &name_git, &req).await
}
