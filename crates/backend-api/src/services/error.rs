use axum::http::StatusCode;
use chat3d_auth::AuthError;
use chat3d_orchestrator::{GenerationError, RenderError};
use thiserror::Error;

use crate::ApiError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{message}")]
    Rendering { status: StatusCode, message: String },
    #[error("{message}")]
    Llm { status: StatusCode, message: String },
    #[error("{message}")]
    Storage { status: StatusCode, message: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Rendering { status, .. }
            | ServiceError::Llm { status, .. }
            | ServiceError::Storage { status, .. } => *status,
            ServiceError::Auth(error) => ApiError::from_auth_status(error),
            ServiceError::Database(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Classification applied at the query pipeline boundary: client-facing
    /// and upstream errors keep their status, everything else collapses into
    /// an opaque internal error.
    pub fn normalize(self) -> Self {
        match self {
            ServiceError::NotFound(_)
            | ServiceError::Forbidden(_)
            | ServiceError::Validation(_)
            | ServiceError::Conflict(_)
            | ServiceError::Unauthorized(_)
            | ServiceError::Rendering { .. }
            | ServiceError::Llm { .. }
            | ServiceError::Storage { .. } => self,
            other => {
                tracing::error!(error = %other, "unexpected pipeline failure");
                ServiceError::Internal("internal server error".to_string())
            }
        }
    }
}

impl From<RenderError> for ServiceError {
    fn from(error: RenderError) -> Self {
        Self::Rendering {
            status: StatusCode::BAD_GATEWAY,
            message: error.to_string(),
        }
    }
}

impl From<GenerationError> for ServiceError {
    fn from(error: GenerationError) -> Self {
        Self::Llm {
            status: StatusCode::BAD_GATEWAY,
            message: error.to_string(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(db_err) => {
                tracing::error!("Database error: {}", db_err);
                ApiError::internal_server_error("Database operation failed")
            }
            ServiceError::Auth(auth_err) => ApiError::from(auth_err),
            ServiceError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ApiError::internal_server_error("internal server error")
            }
            other => {
                let status = other.status_code();
                if status.is_server_error() {
                    tracing::error!(status = status.as_u16(), error = %other, "upstream failure");
                }
                ApiError::new(status, other.to_string())
            }
        }
    }
}
