//! Resolver endpoints: `(repo, revision, path)` to headers, bytes or a
//! presigned redirect, plus tree listing and batched stat.

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, extract::Path, extract::Query, extract::State};
use oxihub_core::model::repo::RepoKind;
use oxihub_core::store::tree_store::StorageKind;
use oxihub_core::{Ctx, resolve};
use serde::Deserialize;

use crate::AppState;
use crate::api::load_repo;
use crate::error::Result;

fn put_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Shared GET/HEAD handler behind the three kind-specific routes.
async fn resolve_file(
    state: AppState,
    ctx: Ctx,
    method: Method,
    kind: RepoKind,
    namespace: String,
    name: String,
    revision: String,
    path: String,
) -> Result<Response> {
    let repo = load_repo(&state, kind.plural(), &namespace, &name).await?;
    let resolved = resolve::stat_file(&ctx, &state.mm, &repo, &revision, &path).await?;

    let mut headers = HeaderMap::new();
    put_header(&mut headers, "x-repo-commit", &resolved.revision.commit);
    put_header(
        &mut headers,
        "x-linked-etag",
        &format!("sha256:{}", resolved.entry.content_sha256),
    );
    put_header(
        &mut headers,
        "x-linked-size",
        &resolved.entry.size.to_string(),
    );

    match resolved.entry.storage_kind {
        StorageKind::External => {
            // Never stream large blobs: hand out a fresh presigned GET.
            let url = resolve::download_url(&state.mm, &resolved.entry).await?;
            if let Ok(value) = HeaderValue::from_str(&url.url) {
                headers.insert(header::LOCATION, value);
            }
            let status = if method == Method::HEAD {
                StatusCode::OK
            } else {
                StatusCode::FOUND
            };
            Ok((status, headers).into_response())
        }
        StorageKind::Inline => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            put_header(&mut headers, "content-type", mime.as_ref());
            if method == Method::HEAD {
                return Ok((StatusCode::OK, headers).into_response());
            }
            let (_, bytes) =
                resolve::read_inline(&ctx, &state.mm, &repo, &revision, &path).await?;
            Ok((StatusCode::OK, headers, bytes).into_response())
        }
    }
}

pub async fn resolve_model(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    method: Method,
    Path((namespace, name, revision, path)): Path<(String, String, String, String)>,
) -> Result<Response> {
    resolve_file(state, ctx, method, RepoKind::Model, namespace, name, revision, path).await
}

pub async fn resolve_dataset(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    method: Method,
    Path((namespace, name, revision, path)): Path<(String, String, String, String)>,
) -> Result<Response> {
    resolve_file(state, ctx, method, RepoKind::Dataset, namespace, name, revision, path).await
}

pub async fn resolve_space(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    method: Method,
    Path((namespace, name, revision, path)): Path<(String, String, String, String)>,
) -> Result<Response> {
    resolve_file(state, ctx, method, RepoKind::Space, namespace, name, revision, path).await
}

#[derive(Deserialize)]
pub struct TreeQuery {
    #[serde(default)]
    pub recursive: Option<bool>,
    #[serde(default)]
    pub expand: Option<bool>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

async fn tree_inner(
    state: AppState,
    ctx: Ctx,
    kind: String,
    namespace: String,
    name: String,
    revision: String,
    path: String,
    query: TreeQuery,
) -> Result<Response> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    let page = resolve::list_tree(
        &ctx,
        &state.mm,
        &repo,
        &revision,
        &path,
        query.recursive.unwrap_or(false),
        query.expand.unwrap_or(false),
        query.cursor.as_deref(),
        query.limit,
    )
    .await?;

    // The cursor travels in a header; the body is the plain item list.
    let mut response = Json(page.items).into_response();
    if let Some(cursor) = page.next_cursor {
        if let Ok(value) = HeaderValue::from_str(&cursor) {
            response.headers_mut().insert("x-next-cursor", value);
        }
    }
    Ok(response)
}

pub async fn tree_root(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, revision)): Path<(String, String, String, String)>,
    Query(query): Query<TreeQuery>,
) -> Result<Response> {
    tree_inner(state, ctx, kind, namespace, name, revision, String::new(), query).await
}

pub async fn tree_path(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, revision, path)): Path<(String, String, String, String, String)>,
    Query(query): Query<TreeQuery>,
) -> Result<Response> {
    tree_inner(state, ctx, kind, namespace, name, revision, path, query).await
}

#[derive(Deserialize)]
pub struct PathsInfoPayload {
    pub paths: Vec<String>,
}

pub async fn paths_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, revision)): Path<(String, String, String, String)>,
    Json(payload): Json<PathsInfoPayload>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    let infos = resolve::paths_info(&ctx, &state.mm, &repo, &revision, &payload.paths).await?;
    Ok(Json(infos))
}

pub async fn revision_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, revision)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;
    let info = resolve::revision_info(&ctx, &state.mm, &repo, &revision).await?;
    Ok(Json(info))
}
