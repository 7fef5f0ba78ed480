//! Organization and membership endpoints.

use axum::response::IntoResponse;
use axum::{Extension, Json, extract::Path, extract::State};
use oxihub_core::model::namespace::NamespaceBmc;
use oxihub_core::model::org::{OrgBmc, OrgRole};
use oxihub_core::model::user::UserBmc;
use oxihub_core::{Ctx, access};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::error::Result;

#[derive(Deserialize)]
pub struct OrgCreatePayload {
    pub name: String,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Json(payload): Json<OrgCreatePayload>,
) -> Result<impl IntoResponse> {
    let id = OrgBmc::create(&ctx, &state.mm, &payload.name).await?;
    Ok(Json(json!({ "id": id, "name": payload.name })))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(org): Path<String>,
) -> Result<impl IntoResponse> {
    let namespace = NamespaceBmc::get_by_name(&ctx, &state.mm, &org).await?;
    // Membership listing is for members and operators.
    access::authorize_repo_create(&ctx, &state.mm, &namespace).await?;
    let members = OrgBmc::list_members(&ctx, &state.mm, namespace.id).await?;
    Ok(Json(members))
}

#[derive(Deserialize)]
pub struct MemberPayload {
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(org): Path<String>,
    Json(payload): Json<MemberPayload>,
) -> Result<impl IntoResponse> {
    let namespace = NamespaceBmc::get_by_name(&ctx, &state.mm, &org).await?;
    let role = match payload.role.as_deref() {
        Some(raw) => OrgRole::parse(raw)?,
        None => OrgRole::Member,
    };
    access::authorize_member_change(&ctx, &state.mm, &namespace, role == OrgRole::SuperAdmin)
        .await?;

    let user = UserBmc::get_by_username(&ctx, &state.mm, &payload.username).await?;
    OrgBmc::upsert_member(&state.mm, namespace.id, user.id, role).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(org): Path<String>,
    Json(payload): Json<MemberPayload>,
) -> Result<impl IntoResponse> {
    let namespace = NamespaceBmc::get_by_name(&ctx, &state.mm, &org).await?;
    let user = UserBmc::get_by_username(&ctx, &state.mm, &payload.username).await?;

    let target_role = OrgBmc::role_of(&state.mm, namespace.id, user.id).await?;
    let touches_super_admin = target_role == Some(OrgRole::SuperAdmin);
    access::authorize_member_change(&ctx, &state.mm, &namespace, touches_super_admin).await?;

    OrgBmc::remove_member(&state.mm, namespace.id, user.id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct RolePayload {
    pub username: String,
    pub role: String,
}

pub async fn set_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<Ctx>,
    Path(org): Path<String>,
    Json(payload): Json<RolePayload>,
) -> Result<impl IntoResponse> {
    let namespace = NamespaceBmc::get_by_name(&ctx, &state.mm, &org).await?;
    let user = UserBmc::get_by_username(&ctx, &state.mm, &payload.username).await?;
    let new_role = OrgRole::parse(&payload.role)?;

    let current_role = OrgBmc::role_of(&state.mm, namespace.id, user.id).await?;
    let touches_super_admin =
        new_role == OrgRole::SuperAdmin || current_role == Some(OrgRole::SuperAdmin);
    access::authorize_member_change(&ctx, &state.mm, &namespace, touches_super_admin).await?;

    OrgBmc::upsert_member(&state.mm, namespace.id, user.id, new_role).await?;
    Ok(Json(json!({ "success": true })))
}
