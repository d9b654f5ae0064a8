use color_eyre::eyre::Error;
use common_x::restful::axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug)]
pub(crate) enum AppError {
    Invalid(String),
    NotFound(String),
    Conflict(String),
    Forbidden(String),
    Unauthorized,
    Internal(String),
}

impl AppError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub(crate) fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub(crate) fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Wraps a storage failure with the operation that hit it.
    pub(crate) fn storage(op: &str, err: sqlx::Error) -> Self {
        Self::Internal(format!("{op}: {err}"))
    }

    pub(crate) const fn status(&self) -> StatusCode {
        match self {
            AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            // clients of the form endpoints expect 400 for duplicates
            AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, message) = match self {
            AppError::Invalid(msg) => ("Invalid", msg),
            AppError::NotFound(msg) => ("NotFound", msg),
            AppError::Conflict(msg) => ("Conflict", msg),
            AppError::Forbidden(msg) => ("Forbidden", msg),
            AppError::Unauthorized => ("Unauthorized", "login required".to_owned()),
            AppError::Internal(msg) => {
                // details stay in the log
                error!("internal error: {msg}");
                ("Internal", "internal server error".to_owned())
            }
        };
        let body = Json(json!({
            "code": status.as_u16(),
            "error": error,
            "message": message,
        }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        let report = err.into();
        let chain: Vec<String> = report.chain().map(ToString::to_string).collect();
        Self::Internal(chain.join(": "))
    }
}
