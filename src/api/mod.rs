use utoipa::OpenApi;
use validator::Validate;

use crate::{
    AppView,
    db::{
        jar::{TipJar, TipJarRow},
        membership::JarMembership,
    },
    error::AppError,
};

pub(crate) mod auth;
pub(crate) mod jar;
pub(crate) mod offense;
pub(crate) mod offense_type;
pub(crate) mod payment;
pub(crate) mod user;

#[derive(OpenApi, Debug)]
#[openapi(
    info(title = "tipjar", description = "Shared offense ledger for groups"),
    paths(
        user::profile,
        user::update,
        jar::list,
        jar::create,
        jar::join,
        jar::lookup,
        jar::detail,
        jar::members,
        jar::balances,
        offense_type::list,
        offense_type::create,
        offense_type::update,
        offense_type::set_active,
        offense::report,
        offense::list,
        offense::detail,
        offense::update_status,
        payment::pay,
        payment::list,
        payment::verify,
    ),
    components(schemas(
        user::UpdateUserBody,
        jar::CreateJarBody,
        jar::JoinJarBody,
        offense_type::OffenseTypeBody,
        offense_type::SetActiveBody,
        offense::ReportBody,
        offense::StatusBody,
        payment::PayBody,
    ))
)]
pub(crate) struct ApiDoc;

pub(crate) fn validate_body<T: Validate>(body: &T) -> Result<(), AppError> {
    body.validate()
        .map_err(|e| AppError::Invalid(e.to_string()))
}

pub(crate) async fn load_jar(state: &AppView, jar_id: i32) -> Result<TipJarRow, AppError> {
    TipJar::select_by_id(&state.db, jar_id)
        .await?
        .ok_or_else(|| AppError::not_found("jar"))
}

pub(crate) async fn require_member(
    state: &AppView,
    jar_id: i32,
    user_id: i32,
) -> Result<(), AppError> {
    if JarMembership::is_member(&state.db, jar_id, user_id).await? {
        Ok(())
    } else {
        Err(AppError::forbidden("not a member of this jar"))
    }
}

pub(crate) async fn require_admin(
    state: &AppView,
    jar_id: i32,
    user_id: i32,
) -> Result<(), AppError> {
    if JarMembership::is_admin(&state.db, jar_id, user_id).await? {
        Ok(())
    } else {
        Err(AppError::forbidden("jar admin required"))
    }
}

/// Trims an optional form field, treating blank input as absent.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
