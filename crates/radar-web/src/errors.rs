use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use radar_engine::{EngineError, RegistryError, SettingsError};
use radar_storage::StoreError;
use serde_json::json;
use thiserror::Error;

/// Handler error. Renders as `{"error": {"code", "message"}}`; internals are logged, not echoed.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Candidate profile is missing fields Auto-Apply requires.
    #[error("Eligibility not met")]
    Ineligible { missing: Vec<&'static str> },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Ineligible { missing } => {
                let body = Json(json!({
                    "error": {
                        "code": "ELIGIBILITY_NOT_MET",
                        "message": "Complete your profile to enable auto-apply",
                        "missing_prerequisites": missing,
                    }
                }));
                return (StatusCode::UNPROCESSABLE_ENTITY, body).into_response();
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg.clone()),
            AppError::Store(e) => {
                tracing::error!("Store error: {e}");
                let status = if matches!(e, StoreError::Unavailable(_)) {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, "STORE_ERROR", "A storage error occurred".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(e) => AppError::Validation(e.to_string()),
            RegistryError::NotFound(id) => AppError::NotFound(format!("alert {id}")),
            RegistryError::NotEntitled => {
                AppError::Forbidden("Your current plan does not include talent radar".to_string())
            }
            RegistryError::GateUnavailable => {
                AppError::Unavailable("Plan eligibility could not be checked; try again later".to_string())
            }
            RegistryError::Store(e) => AppError::Store(e),
        }
    }
}

impl From<SettingsError> for AppError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::CandidateNotFound(id) => AppError::NotFound(format!("candidate {id}")),
            SettingsError::Ineligible { missing } => AppError::Ineligible { missing },
            SettingsError::NotEntitled => {
                AppError::Forbidden("Your current plan does not include auto-apply".to_string())
            }
            SettingsError::Store(e) => AppError::Store(e),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound { kind, id } => AppError::NotFound(format!("{kind} {id}")),
            EngineError::Store(e) => AppError::Store(e),
            EngineError::Scoring(e) => AppError::Internal(anyhow::Error::new(e).context("scoring failed")),
        }
    }
}
