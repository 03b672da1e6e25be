use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy for the whole service. One variant per abstract kind in
/// the error-handling design; each maps to exactly one HTTP status when it
/// escapes to an HTTP handler.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Caller-supplied data fails shape/rule checks.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Identity token invalid/expired, API key invalid/revoked, or service
    /// key mismatch.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// P12 missing, expired, undecryptable, or RUC mismatch.
    #[error("credential error: {0}")]
    Credential(String),

    /// Issuer credit balance is not positive.
    #[error("insufficient credits")]
    InsufficientCredits,

    /// Unknown issuer/emission-point/invoice/establishment.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate RUC registration, duplicate establishment code, etc.
    #[error("conflict: {0}")]
    Conflict(String),

    /// SRI SOAP endpoint timeout/5xx/malformed response. Never surfaced to
    /// the caller of IssueInvoice — the invoice is already FIRMADO by the
    /// time this can occur; this variant exists for worker-internal
    /// propagation and logging only.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(msg) if msg.contains("expired") || msg.contains("invalid token") => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Auth(_) => StatusCode::FORBIDDEN,
            AppError::Credential(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        } else {
            tracing::warn!(error = %self, %status, "request failed");
        }
        let kind = match &self {
            AppError::Validation(_) => "validation_error",
            AppError::Auth(_) => "auth_error",
            AppError::Credential(_) => "credential_error",
            AppError::InsufficientCredits => "insufficient_credits",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Upstream(_) => "upstream_error",
            AppError::Internal(_) => "internal_error",
        };
        let body = ErrorBody {
            error: kind.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<openssl::error::ErrorStack> for AppError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        AppError::Credential(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
