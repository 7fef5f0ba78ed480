//! Authentication middleware.
//!
//! Resolves the caller to a [`Ctx`] from either a `Authorization: Bearer`
//! API token or a `session` cookie, and stores it in request extensions.
//! Requests without credentials proceed as anonymous; every handler applies
//! the access matrix itself, so public reads stay cheap and private
//! operations fail with the right typed error rather than a blanket 401.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use oxihub_core::model::session::SessionBmc;
use oxihub_core::model::token::TokenBmc;
use oxihub_core::{Ctx, Error};
use tracing::debug;

use crate::AppState;
use crate::error::ServerError;

pub const SESSION_COOKIE: &str = "session";

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let ctx = resolve_ctx(&state, &req).await?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

async fn resolve_ctx(state: &AppState, req: &Request) -> Result<Ctx, ServerError> {
    // Bearer token wins over cookie; API clients send both at times.
    if let Some(bearer) = req.headers().typed_get::<Authorization<Bearer>>() {
        let user = TokenBmc::authenticate(&state.mm, bearer.token()).await?;
        debug!(user = %user.username, "authenticated via token");
        return Ok(Ctx::user(user.id, user.username, user.is_operator));
    }

    if let Some(session_id) = session_cookie(req) {
        match SessionBmc::authenticate(&state.mm, &session_id).await {
            Ok(user) => {
                debug!(user = %user.username, "authenticated via session");
                return Ok(Ctx::user(user.id, user.username, user.is_operator));
            }
            // A stale cookie is not an error; the request continues
            // anonymous and hits the gate where it matters.
            Err(Error::InvalidCredentials) => {}
            Err(other) => return Err(other.into()),
        }
    }

    Ok(Ctx::anonymous())
}

fn session_cookie(req: &Request) -> Option<String> {
    let header = req.headers().get(axum::http::header::COOKIE)?;
    let raw = header.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Builds the `Set-Cookie` value for a fresh login session.
pub fn session_cookie_value(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax; Max-Age=604800")
}

/// And for logout: immediate expiry.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
