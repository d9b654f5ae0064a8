use common_x::restful::{
    axum::{
        Json,
        extract::{Path, Query, State},
        response::IntoResponse,
    },
    ok,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    AppView,
    api::{auth::CurrentUser, load_jar, non_blank, require_member, validate_body},
    db::{
        balance::member_balances,
        jar::{NewJar, TipJar, validate_invite_code},
        membership::{JarMembership, Role},
        offense::Offense,
    },
    error::AppError,
};

#[derive(Debug, Default, Validate, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub(crate) struct CreateJarBody {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    /// Eight URL-safe characters. Generated when absent.
    pub invite_code: Option<String>,
}

#[derive(Debug, Default, Validate, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub(crate) struct JoinJarBody {
    #[validate(length(min = 1))]
    pub invite_code: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
pub(crate) struct LookupQuery {
    pub invite_code: String,
}

#[utoipa::path(get, path = "/jars")]
pub(crate) async fn list(
    State(state): State<AppView>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let jars = TipJar::list_for_user(&state.db, current.id()).await?;
    Ok(ok(jars))
}

#[utoipa::path(post, path = "/jars", request_body = CreateJarBody)]
pub(crate) async fn create(
    State(state): State<AppView>,
    current: CurrentUser,
    Json(body): Json<CreateJarBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_body(&body)?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::invalid("jar name is required"));
    }
    let new_jar = NewJar {
        name: name.to_owned(),
        description: non_blank(body.description.as_deref()),
        invite_code: non_blank(body.invite_code.as_deref()),
        creator_id: current.id(),
    };
    let jar = TipJar::create(&state.db, &new_jar).await?;
    Ok(ok(json!({
        "success": true,
        "jar_id": jar.id,
        "invite_code": jar.invite_code,
        "redirect": format!("/jars/{}", jar.id),
    })))
}

#[utoipa::path(post, path = "/jars/join", request_body = JoinJarBody)]
pub(crate) async fn join(
    State(state): State<AppView>,
    current: CurrentUser,
    Json(body): Json<JoinJarBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_body(&body)?;
    let jar = JarMembership::join(&state.db, body.invite_code.trim(), current.id()).await?;
    Ok(ok(json!({
        "success": true,
        "jar_id": jar.id,
        "redirect": format!("/jars/{}", jar.id),
    })))
}

#[utoipa::path(get, path = "/jars/lookup", params(LookupQuery))]
pub(crate) async fn lookup(
    State(state): State<AppView>,
    _current: CurrentUser,
    Query(query): Query<LookupQuery>,
) -> Result<impl IntoResponse, AppError> {
    let code = query.invite_code.trim();
    validate_invite_code(code)?;
    let jar = TipJar::select_by_invite_code(&state.db, code)
        .await?
        .ok_or_else(|| AppError::not_found("jar"))?;
    Ok(ok(json!({
        "id": jar.id,
        "name": jar.name,
        "description": jar.description,
    })))
}

/// Jar page data. Activity and balances are display-only and fall back to
/// empty lists when their queries fail.
#[utoipa::path(get, path = "/jars/{id}", params(("id" = i32, Path, description = "jar id")))]
pub(crate) async fn detail(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let jar = load_jar(&state, id).await?;
    let role = JarMembership::role_of(&state.db, id, current.id())
        .await?
        .ok_or_else(|| AppError::forbidden("not a member of this jar"))?;
    let members = JarMembership::list_members(&state.db, id).await?;

    let activity = Offense::list_recent(&state.db, id)
        .await
        .unwrap_or_else(|e| {
            warn!("load activity failed: jar_id={id} {e}");
            vec![]
        });
    let balances = member_balances(&state.db, id).await.unwrap_or_else(|e| {
        warn!("load balances failed: jar_id={id} {e}");
        vec![]
    });

    Ok(ok(json!({
        "jar": jar,
        "role": role,
        "is_admin": role == Role::Admin,
        "members": members,
        "activity": activity,
        "balances": balances,
    })))
}

#[utoipa::path(get, path = "/jars/{id}/members", params(("id" = i32, Path, description = "jar id")))]
pub(crate) async fn members(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    load_jar(&state, id).await?;
    require_member(&state, id, current.id()).await?;
    let members = JarMembership::list_members(&state.db, id).await?;
    Ok(ok(members))
}

#[utoipa::path(get, path = "/jars/{id}/balances", params(("id" = i32, Path, description = "jar id")))]
pub(crate) async fn balances(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    load_jar(&state, id).await?;
    require_member(&state, id, current.id()).await?;
    let balances = member_balances(&state.db, id).await?;
    Ok(ok(balances))
}
