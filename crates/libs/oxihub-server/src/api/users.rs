//! Account, session and token endpoints.

use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::{Extension, Json, extract::Path, extract::State};
use oxihub_core::model::session::SessionBmc;
use oxihub_core::model::token::TokenBmc;
use oxihub_core::model::user::UserBmc;
use oxihub_core::{Ctx, Error};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::auth::{clear_session_cookie, session_cookie_value};
use crate::error::Result;

#[derive(Deserialize)]
pub struct CredentialsPayload {
    pub username: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Json(payload): Json<CredentialsPayload>,
) -> Result<impl IntoResponse> {
    let id = UserBmc::create(&ctx, &state.mm, &payload.username, &payload.password).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "id": id, "username": payload.username })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsPayload>,
) -> Result<impl IntoResponse> {
    let user = UserBmc::authenticate_password(&state.mm, &payload.username, &payload.password).await?;
    let session_id = SessionBmc::create(&state.mm, user.id).await?;
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie_value(&session_id))],
        Json(json!({ "username": user.username })),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<impl IntoResponse> {
    // Best effort: remove the session row if the cookie is still present.
    if let Some(cookie_header) = request.headers().get(header::COOKIE) {
        if let Ok(raw) = cookie_header.to_str() {
            if let Some(session_id) = raw.split(';').find_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (name == crate::auth::SESSION_COOKIE).then(|| value.to_string())
            }) {
                SessionBmc::delete(&state.mm, &session_id).await?;
            }
        }
    }
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(json!({ "success": true })),
    ))
}

pub async fn whoami(Extension(ctx): Extension<Ctx>) -> Result<impl IntoResponse> {
    match ctx.username() {
        Some(name) => Ok(Json(json!({
            "name": name,
            "operator": ctx.is_operator(),
        }))),
        None => Err(Error::Unauthenticated.into()),
    }
}

#[derive(Deserialize)]
pub struct TokenCreatePayload {
    pub label: String,
}

pub async fn create_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Json(payload): Json<TokenCreatePayload>,
) -> Result<impl IntoResponse> {
    let (id, secret) = TokenBmc::issue(&ctx, &state.mm, &payload.label).await?;
    // The secret appears in this response and nowhere else, ever.
    Ok(Json(json!({ "id": id, "token": secret })))
}

pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
) -> Result<impl IntoResponse> {
    let tokens = TokenBmc::list_for_user(&ctx, &state.mm).await?;
    Ok(Json(tokens))
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    TokenBmc::revoke(&ctx, &state.mm, id).await?;
    Ok(Json(json!({ "success": true })))
}
