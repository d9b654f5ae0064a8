use common_x::restful::{
    axum::{
        Json,
        extract::{Path, Query, State},
        response::IntoResponse,
    },
    ok,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    AppView,
    api::{auth::CurrentUser, load_jar, non_blank, require_admin, require_member, validate_body},
    db::offense_type::{NewOffenseType, OffenseType, OffenseTypeFields, OffenseTypeRow},
    error::AppError,
    money::{AmountInput, parse_optional_amount},
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
pub(crate) struct ListQuery {
    /// Include deactivated types.
    pub all: bool,
}

#[derive(Debug, Default, Validate, Deserialize, ToSchema)]
#[serde(default)]
pub(crate) struct OffenseTypeBody {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[schema(value_type = Option<String>, example = "5.00")]
    pub cost_amount: Option<AmountInput>,
    #[validate(length(max = 32))]
    pub cost_unit: Option<String>,
}

impl OffenseTypeBody {
    fn into_fields(self) -> Result<OffenseTypeFields, AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::invalid("offense type name is required"));
        }
        Ok(OffenseTypeFields {
            name: name.to_owned(),
            description: non_blank(self.description.as_deref()),
            cost_amount: parse_optional_amount(self.cost_amount.as_ref(), "cost amount")?,
            cost_unit: non_blank(self.cost_unit.as_deref()),
        })
    }
}

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub(crate) struct SetActiveBody {
    pub active: bool,
}

async fn load_type(state: &AppView, id: i32) -> Result<OffenseTypeRow, AppError> {
    OffenseType::select_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::not_found("offense type"))
}

#[utoipa::path(
    get,
    path = "/jars/{id}/offense_types",
    params(("id" = i32, Path, description = "jar id"), ListQuery)
)]
pub(crate) async fn list(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(jar_id): Path<i32>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    load_jar(&state, jar_id).await?;
    require_member(&state, jar_id, current.id()).await?;
    let types = if query.all {
        OffenseType::list_all(&state.db, jar_id).await?
    } else {
        OffenseType::list_active(&state.db, jar_id).await?
    };
    Ok(ok(types))
}

#[utoipa::path(
    post,
    path = "/jars/{id}/offense_types",
    params(("id" = i32, Path, description = "jar id")),
    request_body = OffenseTypeBody
)]
pub(crate) async fn create(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(jar_id): Path<i32>,
    Json(body): Json<OffenseTypeBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_body(&body)?;
    load_jar(&state, jar_id).await?;
    require_admin(&state, jar_id, current.id()).await?;

    let new_type = NewOffenseType::new(jar_id, body.into_fields()?);
    let row = OffenseType::insert(&state.db, &new_type)
        .await
        .map_err(|e| AppError::storage("insert offense type", e))?;
    info!("offense type created: id={} jar_id={jar_id}", row.id);
    Ok(ok(row))
}

#[utoipa::path(
    post,
    path = "/offense_types/{id}",
    params(("id" = i32, Path, description = "offense type id")),
    request_body = OffenseTypeBody
)]
pub(crate) async fn update(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(id): Path<i32>,
    Json(body): Json<OffenseTypeBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_body(&body)?;
    let existing = load_type(&state, id).await?;
    require_admin(&state, existing.jar_id, current.id()).await?;

    let row = OffenseType::update(&state.db, id, &body.into_fields()?)
        .await?
        .ok_or_else(|| AppError::not_found("offense type"))?;
    Ok(ok(row))
}

#[utoipa::path(
    post,
    path = "/offense_types/{id}/active",
    params(("id" = i32, Path, description = "offense type id")),
    request_body = SetActiveBody
)]
pub(crate) async fn set_active(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(id): Path<i32>,
    Json(body): Json<SetActiveBody>,
) -> Result<impl IntoResponse, AppError> {
    let existing = load_type(&state, id).await?;
    require_admin(&state, existing.jar_id, current.id()).await?;

    let row = OffenseType::set_active(&state.db, id, body.active)
        .await?
        .ok_or_else(|| AppError::not_found("offense type"))?;
    info!("offense type active set: id={id} active={}", body.active);
    Ok(ok(row))
}
