use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError, operator::ResetConfirmError},
};

/// Failures surfaced by the session, roster and observer services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The document store rejected or failed a request.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// No document store is installed yet.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Missing, revoked or expired operator credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Request failed validation before any write.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The session does not accept this action right now.
    #[error("session closed: {0}")]
    SessionClosed(String),
    /// Operator command whose precondition does not hold.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Unknown team or nothing pending to grade.
    #[error("not found: {0}")]
    NotFound(String),
    /// A store write did not finish in time.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::MissingDocument { path } => {
                ServiceError::NotFound(format!("document `{path}` does not exist"))
            }
            StorageError::PreconditionFailed { reason, .. } => ServiceError::InvalidState(reason),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<ResetConfirmError> for ServiceError {
    fn from(err: ResetConfirmError) -> Self {
        ServiceError::Unauthorized(err.to_string())
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

/// HTTP-facing errors; each variant renders as a status code and a `{message}` body.
#[derive(Debug, Error)]
pub enum AppError {
    /// 400.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// 401.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// 404.
    #[error("not found: {0}")]
    NotFound(String),
    /// 409, for closed sessions and failed command preconditions.
    #[error("conflict: {0}")]
    Conflict(String),
    /// 503, while degraded or when the store fails.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::SessionClosed(message) => {
                AppError::Conflict(format!("session closed: {message}"))
            }
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("another session command is in flight".into())
            }
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidState(invalid.to_string())
            }
            PlanError::DeadlineOutOfRange => {
                ServiceError::InvalidInput("countdown deadline is out of range".into())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending transition does not match".into())
            }
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "session version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidState("transition plan does not match".into())
            }
        }
    }
}
