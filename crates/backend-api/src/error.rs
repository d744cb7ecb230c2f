use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chat3d_auth::AuthError;
use chat3d_orchestrator::OrchestratorError;
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

/// Body of every non-2xx JSON response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn too_many_requests() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "too many requests")
    }

    pub fn payload_too_large() -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(error: OrchestratorError) -> Self {
        let status = match &error {
            OrchestratorError::ProviderNotFound(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::OpenRouterApiKeyMissing
            | OrchestratorError::OpenRouterUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::ProviderHttp(_) => StatusCode::BAD_GATEWAY,
            OrchestratorError::ProviderIndexMissing
            | OrchestratorError::ProviderLoad { .. }
            | OrchestratorError::ProviderInit { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = ?error, status = status.as_u16(), "model catalogue unavailable");
        Self::new(status, error.to_string())
    }
}

impl ApiError {
    pub(crate) fn from_auth_status(error: &AuthError) -> StatusCode {
        match error {
            AuthError::InvalidCredentials
            | AuthError::SessionNotFound
            | AuthError::SessionExpired
            | AuthError::InvalidSession => StatusCode::UNAUTHORIZED,
            AuthError::UserExists => StatusCode::CONFLICT,
            AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::Database(_) | AuthError::PasswordHash(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        let status = Self::from_auth_status(&error);

        if status.is_server_error() {
            error!(error = ?error, "auth error");
            return Self::new(status, "authentication backend failure");
        }

        warn!(error = %error, "auth request rejected");
        Self::new(status, error.to_string())
    }
}
