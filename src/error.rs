use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Internal(String),

    // Billing-specific rejections. Each one maps to an operation the
    // caller attempted against an invoice or payment in the wrong state.
    #[error("{0}")]
    DuplicatePeriod(String),
    #[error("{0}")]
    OverpaymentRejected(String),
    #[error("{0}")]
    HasSettlement(String),
    #[error("{0}")]
    AlreadyConfirmed(String),
    #[error("{0}")]
    InvalidAmount(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_)
            | Self::DuplicatePeriod(_)
            | Self::HasSettlement(_)
            | Self::AlreadyConfirmed(_) => StatusCode::CONFLICT,
            Self::UnprocessableEntity(_) | Self::OverpaymentRejected(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Dependency(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, independent of the localized detail.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::UnprocessableEntity(_) => "unprocessable_entity",
            Self::Dependency(_) => "dependency_failed",
            Self::Internal(_) => "internal_error",
            Self::DuplicatePeriod(_) => "duplicate_period",
            Self::OverpaymentRejected(_) => "overpayment_rejected",
            Self::HasSettlement(_) => "has_settlement",
            Self::AlreadyConfirmed(_) => "already_confirmed",
            Self::InvalidAmount(_) => "invalid_amount",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), detail = %self, "Request failed");
        }
        let body = Json(json!({
            "detail": self.to_string(),
            "error": self.kind(),
        }));
        (status, body).into_response()
    }
}

/// Map a raw sqlx error onto the API surface. Unique-constraint
/// violations surface as Conflict so callers can treat them as
/// idempotent replays where that is the contract.
pub fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::http::StatusCode;

    #[test]
    fn billing_errors_map_to_stable_statuses() {
        assert_eq!(
            AppError::DuplicatePeriod("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::OverpaymentRejected("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::HasSettlement("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::AlreadyConfirmed("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::InvalidAmount("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn kinds_are_snake_case() {
        assert_eq!(AppError::DuplicatePeriod("x".into()).kind(), "duplicate_period");
        assert_eq!(AppError::NotFound("x".into()).kind(), "not_found");
    }
}
