//! The commit endpoint: NDJSON stream in, one commit out.
//!
//! The body is handed to the core engine as a buffered reader, so the
//! request is applied record-by-record without ever sitting in memory
//! whole.

use axum::body::Body;
use axum::response::IntoResponse;
use axum::{Extension, Json, extract::Path, extract::State};
use futures::TryStreamExt;
use oxihub_core::{Ctx, commit as commit_engine};
use serde_json::json;
use tokio_util::io::StreamReader;

use crate::AppState;
use crate::api::load_repo;
use crate::error::Result;

pub async fn commit(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path((kind, namespace, name, revision)): Path<(String, String, String, String)>,
    body: Body,
) -> Result<impl IntoResponse> {
    let repo = load_repo(&state, &kind, &namespace, &name).await?;

    let stream = body
        .into_data_stream()
        .map_err(|e| std::io::Error::other(e.to_string()));
    let reader = StreamReader::new(stream);

    let result = commit_engine::commit_stream(&ctx, &state.mm, &repo, &revision, reader).await?;

    let commit_url = format!(
        "{}/{}/{}/commit/{}",
        state.mm.app_config.server.public_base_url, repo.namespace, repo.name, result.commit_id
    );
    Ok(Json(json!({
        "commitUrl": commit_url,
        "commitOid": result.commit_id,
        "pullRequestUrl": null,
    })))
}
