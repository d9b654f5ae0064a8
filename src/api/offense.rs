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
    api::{auth::CurrentUser, load_jar, require_admin, require_member, validate_body},
    db::{
        membership::JarMembership,
        offense::{
            NewOffense, Offense, OffenseFilter, OffenseRow, OffenseStatus, ParseStatusError,
        },
        offense_type::OffenseType,
    },
    error::AppError,
    money::{AmountInput, parse_optional_amount},
};

#[derive(Debug, Default, Validate, Deserialize, ToSchema)]
#[serde(default)]
pub(crate) struct ReportBody {
    #[validate(range(min = 1))]
    pub offender_id: i32,
    #[validate(range(min = 1))]
    pub offense_type_id: i32,
    #[validate(length(max = 1000))]
    pub notes: String,
    #[schema(value_type = Option<String>, example = "2.50")]
    pub cost_override: Option<AmountInput>,
}

#[derive(Debug, Default, Validate, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub(crate) struct StatusBody {
    #[validate(length(min = 1))]
    pub status: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
pub(crate) struct ListQuery {
    /// pending, paid, disputed or forgiven
    pub status: Option<String>,
    pub offender_id: Option<i32>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListQuery {
    fn into_filter(self) -> Result<OffenseFilter, AppError> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(parse_status(s)?),
        };
        Ok(OffenseFilter {
            status,
            offender_id: self.offender_id,
            page: self.page,
            per_page: self.per_page,
        })
    }
}

fn parse_status(raw: &str) -> Result<OffenseStatus, AppError> {
    raw.parse()
        .map_err(|e: ParseStatusError| AppError::invalid(e.to_string()))
}

pub(crate) async fn load_offense(state: &AppView, id: i32) -> Result<OffenseRow, AppError> {
    Offense::select_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::not_found("offense"))
}

/// Reports an offense against another member. Served on both
/// `/jars/{id}/offenses` and `/jars/{id}/report`.
#[utoipa::path(
    post,
    path = "/jars/{id}/offenses",
    params(("id" = i32, Path, description = "jar id")),
    request_body = ReportBody
)]
pub(crate) async fn report(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(jar_id): Path<i32>,
    Json(body): Json<ReportBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_body(&body)?;
    let cost_override = parse_optional_amount(body.cost_override.as_ref(), "cost override")?;

    load_jar(&state, jar_id).await?;
    require_member(&state, jar_id, current.id()).await?;
    if !JarMembership::is_member(&state.db, jar_id, body.offender_id).await? {
        return Err(AppError::forbidden("offender is not a member of this jar"));
    }

    let offense_type = OffenseType::select_by_id(&state.db, body.offense_type_id)
        .await?
        .filter(|t| t.jar_id == jar_id)
        .ok_or_else(|| AppError::invalid("offense type does not belong to this jar"))?;
    if !offense_type.is_active {
        return Err(AppError::invalid("offense type is inactive"));
    }

    let offense = Offense::report(
        &state.db,
        &NewOffense {
            jar_id,
            offense_type_id: offense_type.id,
            reporter_id: current.id(),
            offender_id: body.offender_id,
            notes: body.notes.trim().to_owned(),
            cost_override,
        },
    )
    .await?;

    Ok(ok(json!({
        "success": true,
        "offense": offense,
        "redirect": format!("/jars/{jar_id}"),
    })))
}

#[utoipa::path(
    get,
    path = "/jars/{id}/offenses",
    params(("id" = i32, Path, description = "jar id"), ListQuery)
)]
pub(crate) async fn list(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(jar_id): Path<i32>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.into_filter()?;
    load_jar(&state, jar_id).await?;
    require_member(&state, jar_id, current.id()).await?;
    let page = Offense::list_for_jar(&state.db, jar_id, &filter).await?;
    Ok(ok(page))
}

#[utoipa::path(
    get,
    path = "/offenses/{id}",
    params(("id" = i32, Path, description = "offense id"))
)]
pub(crate) async fn detail(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let detail = Offense::resolve_detail(&state.db, id).await?;
    require_member(&state, detail.jar_id, current.id()).await?;
    Ok(ok(detail))
}

#[utoipa::path(
    post,
    path = "/offenses/{id}/status",
    params(("id" = i32, Path, description = "offense id")),
    request_body = StatusBody
)]
pub(crate) async fn update_status(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(id): Path<i32>,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_body(&body)?;
    let status = parse_status(&body.status)?;
    let offense = load_offense(&state, id).await?;
    require_admin(&state, offense.jar_id, current.id()).await?;

    let offense = Offense::update_status(&state.db, id, status)
        .await?
        .ok_or_else(|| AppError::not_found("offense"))?;
    Ok(ok(offense))
}
