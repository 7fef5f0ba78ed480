use axum::Router;
use axum::routing::{delete, get, post, put};

use crate::AppState;
use crate::error::Result;
use oxihub_core::Ctx;
use oxihub_core::model::repo::{Repo, RepoBmc, RepoKind};

pub mod commit;
pub mod lfs;
pub mod orgs;
pub mod repos;
pub mod resolve;
pub mod users;

/// Resolves the `{kind}/{namespace}/{name}` path triple to a repository.
/// Visibility enforcement happens in the core access gate per operation.
pub(crate) async fn load_repo(
    state: &AppState,
    kind_plural: &str,
    namespace: &str,
    name: &str,
) -> Result<Repo> {
    let kind = RepoKind::parse_plural(kind_plural)
        .map_err(|_| oxihub_core::Error::RepoNotFound(format!("{kind_plural}/{namespace}/{name}")))?;
    Ok(RepoBmc::get(&Ctx::anonymous(), &state.mm, kind, namespace, name).await?)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        // Accounts & sessions
        .route("/api/users/create", post(users::register))
        .route("/api/users/login", post(users::login))
        .route("/api/users/logout", post(users::logout))
        .route("/api/whoami-v2", get(users::whoami))
        .route("/api/users/tokens/create", post(users::create_token))
        .route("/api/users/tokens", get(users::list_tokens))
        .route("/api/users/tokens/{id}", delete(users::revoke_token))
        // Organizations
        .route("/api/orgs/create", post(orgs::create))
        .route("/api/orgs/{org}/members", get(orgs::list_members))
        .route("/api/orgs/{org}/members/add", post(orgs::add_member))
        .route("/api/orgs/{org}/members/remove", post(orgs::remove_member))
        .route("/api/orgs/{org}/members/role", post(orgs::set_role))
        // Repository lifecycle
        .route("/api/repos/create", post(repos::create))
        .route("/api/repos/delete", delete(repos::delete))
        .route("/api/{kind}/{namespace}", get(repos::list_namespace))
        .route(
            "/api/{kind}/{namespace}/{name}/settings",
            put(repos::update_settings),
        )
        .route(
            "/api/{kind}/{namespace}/{name}/settings/lfs",
            get(repos::get_lfs_settings).put(repos::put_lfs_settings),
        )
        .route(
            "/api/quota/{namespace}",
            get(repos::get_quota).put(repos::put_quota),
        )
        // Refs & history
        .route("/api/{kind}/{namespace}/{name}/refs", get(repos::refs))
        .route(
            "/api/{kind}/{namespace}/{name}/commits/{revision}",
            get(repos::commits),
        )
        .route(
            "/api/{kind}/{namespace}/{name}/branch/{branch}",
            post(repos::create_branch).delete(repos::delete_branch),
        )
        .route(
            "/api/{kind}/{namespace}/{name}/tag/{tag}",
            post(repos::create_tag).delete(repos::delete_tag),
        )
        .route(
            "/api/{kind}/{namespace}/{name}/revert/{revision}",
            post(repos::revert),
        )
        .route(
            "/api/{kind}/{namespace}/{name}/reset/{revision}",
            post(repos::reset),
        )
        // Transfer protocol
        .route(
            "/api/{kind}/{namespace}/{name}/preupload/{revision}",
            post(lfs::preupload),
        )
        .route("/api/{kind}/{namespace}/{name}/lfs/verify", post(lfs::verify))
        // git-lfs batch endpoints; {name} arrives as "{repo}.git" and the
        // handler strips the suffix
        .route(
            "/{namespace}/{name}/info/lfs/objects/batch",
            post(lfs::batch_model),
        )
        .route(
            "/datasets/{namespace}/{name}/info/lfs/objects/batch",
            post(lfs::batch_dataset),
        )
        .route(
            "/spaces/{namespace}/{name}/info/lfs/objects/batch",
            post(lfs::batch_space),
        )
        // Commit engine
        .route(
            "/api/{kind}/{namespace}/{name}/commit/{revision}",
            post(commit::commit),
        )
        // Resolver
        .route(
            "/api/{kind}/{namespace}/{name}/revision/{revision}",
            get(resolve::revision_info),
        )
        .route(
            "/api/{kind}/{namespace}/{name}/tree/{revision}",
            get(resolve::tree_root),
        )
        .route(
            "/api/{kind}/{namespace}/{name}/tree/{revision}/{*path}",
            get(resolve::tree_path),
        )
        .route(
            "/api/{kind}/{namespace}/{name}/paths-info/{revision}",
            post(resolve::paths_info),
        )
        .route(
            "/{namespace}/{name}/resolve/{revision}/{*path}",
            get(resolve::resolve_model),
        )
        .route(
            "/datasets/{namespace}/{name}/resolve/{revision}/{*path}",
            get(resolve::resolve_dataset),
        )
        .route(
            "/spaces/{namespace}/{name}/resolve/{revision}/{*path}",
            get(resolve::resolve_space),
        )
}
