use common_x::restful::{
    axum::{Json, extract::State, response::IntoResponse},
    ok,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    AppView,
    api::{auth::CurrentUser, non_blank, validate_body},
    db::user::User,
    error::AppError,
};

#[derive(Debug, Default, Validate, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub(crate) struct UpdateUserBody {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 512))]
    pub avatar: Option<String>,
}

#[utoipa::path(get, path = "/api/v1/user")]
pub(crate) async fn profile(current: CurrentUser) -> Result<impl IntoResponse, AppError> {
    Ok(ok(current.user))
}

#[utoipa::path(post, path = "/api/v1/user", request_body = UpdateUserBody)]
pub(crate) async fn update(
    State(state): State<AppView>,
    current: CurrentUser,
    Json(body): Json<UpdateUserBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_body(&body)?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::invalid("name is required"));
    }
    let avatar = non_blank(body.avatar.as_deref());
    let user = User::update_profile(&state.db, current.id(), name, avatar.as_deref())
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    info!("user profile updated: id={}", user.id);
    Ok(ok(user))
}
