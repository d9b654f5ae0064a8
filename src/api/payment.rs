use common_x::restful::{
    axum::{
        Json,
        extract::{Path, State},
        response::IntoResponse,
    },
    ok,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    AppView,
    api::{
        auth::CurrentUser, non_blank, offense::load_offense, require_admin, require_member,
        validate_body,
    },
    db::payment::{NewPayment, Payment},
    error::AppError,
    money::{AmountInput, parse_optional_amount},
};

#[derive(Debug, Default, Validate, Deserialize, ToSchema)]
#[serde(default)]
pub(crate) struct PayBody {
    #[schema(value_type = Option<String>, example = "5.00")]
    pub amount: Option<AmountInput>,
    #[validate(length(max = 1024))]
    pub proof_url: Option<String>,
    /// e.g. `image`, `link`, `cash`
    #[validate(length(max = 32))]
    pub proof_type: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: String,
}

/// Records a payment against an offense. The offense stays in its current
/// status until an admin updates it.
#[utoipa::path(
    post,
    path = "/offenses/{id}/pay",
    params(("id" = i32, Path, description = "offense id")),
    request_body = PayBody
)]
pub(crate) async fn pay(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(offense_id): Path<i32>,
    Json(body): Json<PayBody>,
) -> Result<impl IntoResponse, AppError> {
    validate_body(&body)?;
    let amount = parse_optional_amount(body.amount.as_ref(), "amount")?;
    let offense = load_offense(&state, offense_id).await?;
    require_member(&state, offense.jar_id, current.id()).await?;

    let payment = Payment::record(
        &state.db,
        &NewPayment {
            offense_id,
            payer_id: current.id(),
            amount,
            proof_url: non_blank(body.proof_url.as_deref()),
            proof_type: non_blank(body.proof_type.as_deref()),
            notes: body.notes.trim().to_owned(),
        },
    )
    .await?;

    Ok(ok(json!({
        "success": true,
        "payment": payment,
        "offense_status": offense.status()?,
    })))
}

#[utoipa::path(
    get,
    path = "/offenses/{id}/payments",
    params(("id" = i32, Path, description = "offense id"))
)]
pub(crate) async fn list(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(offense_id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let offense = load_offense(&state, offense_id).await?;
    require_member(&state, offense.jar_id, current.id()).await?;
    let payments = Payment::list_for_offense(&state.db, offense_id).await?;
    Ok(ok(payments))
}

#[utoipa::path(
    post,
    path = "/payments/{id}/verify",
    params(("id" = i32, Path, description = "payment id"))
)]
pub(crate) async fn verify(
    State(state): State<AppView>,
    current: CurrentUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let payment = Payment::select_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::not_found("payment"))?;
    let offense = load_offense(&state, payment.offense_id).await?;
    require_admin(&state, offense.jar_id, current.id()).await?;

    let payment = Payment::verify(&state.db, id, current.id())
        .await?
        .ok_or_else(|| AppError::not_found("payment"))?;
    Ok(ok(payment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pay_body_rejects_negative_amount() {
        let body: PayBody = serde_json::from_str(r#"{"amount":"-5"}"#).unwrap();
        assert!(parse_optional_amount(body.amount.as_ref(), "amount").is_err());
    }

    #[test]
    fn pay_body_fields_are_optional() {
        let body: PayBody = serde_json::from_str("{}").unwrap();
        assert!(body.validate().is_ok());
        assert!(body.amount.is_none());
        assert!(body.notes.is_empty());
    }
}
