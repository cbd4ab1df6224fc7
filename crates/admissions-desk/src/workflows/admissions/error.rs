use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use super::domain::TransitionError;
use super::repository::RepositoryError;
use super::sequencer::IdentifierKind;
use super::validator::PaymentRejection;

/// Field-level validation message surfaced to staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|error| format!("{}: {}", error.field, error.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error raised by every admission, enrollment and payment operation.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Precondition(String),
    #[error(transparent)]
    PaymentRejected(#[from] PaymentRejection),
    #[error("request is missing a valid staff identity")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("could not allocate a unique {} number, please try again", .kind.label())]
    RetryExhausted { kind: IdentifierKind },
    #[error("{} numbers for {year} are exhausted", .kind.label())]
    SequenceExhausted { kind: IdentifierKind, year: i32 },
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Precondition(_) => "precondition",
            LedgerError::PaymentRejected(_) => "payment_rejected",
            LedgerError::Unauthenticated => "unauthenticated",
            LedgerError::Forbidden(_) => "forbidden",
            LedgerError::RetryExhausted { .. } | LedgerError::SequenceExhausted { .. } => {
                "try_again"
            }
            LedgerError::Unavailable(_) => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
            LedgerError::Conflict(_)
            | LedgerError::Precondition(_)
            | LedgerError::PaymentRejected(_) => StatusCode::BAD_REQUEST,
            LedgerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
            LedgerError::RetryExhausted { .. } | LedgerError::SequenceExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            LedgerError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TransitionError> for LedgerError {
    fn from(value: TransitionError) -> Self {
        LedgerError::Conflict(value.to_string())
    }
}

impl From<RepositoryError> for LedgerError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => LedgerError::not_found("record", "requested"),
            RepositoryError::Unavailable(reason) => LedgerError::Unavailable(reason),
            RepositoryError::Referenced { .. } => LedgerError::Precondition(value.to_string()),
            RepositoryError::DuplicateKey { .. }
            | RepositoryError::ActiveAdmissionExists(_)
            | RepositoryError::EnrollmentExists(_)
            | RepositoryError::OpenClaim(_)
            | RepositoryError::AlreadyFinalized(..)
            | RepositoryError::StaleRevision
            | RepositoryError::Settlement(_) => LedgerError::Conflict(value.to_string()),
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let payload = match &self {
            LedgerError::Validation(fields) => json!({
                "error": self.to_string(),
                "kind": self.kind(),
                "fields": fields,
            }),
            LedgerError::PaymentRejected(rejection) => json!({
                "error": self.to_string(),
                "kind": self.kind(),
                "reason": rejection.code(),
            }),
            LedgerError::Unavailable(reason) => {
                error!(%reason, "datastore failure surfaced to caller");
                json!({
                    "error": "internal server error",
                    "kind": self.kind(),
                })
            }
            _ => json!({
                "error": self.to_string(),
                "kind": self.kind(),
            }),
        };

        (status, Json(payload)).into_response()
    }
}
