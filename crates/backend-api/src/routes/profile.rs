use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{routes::models::UserProfile, util::require_bearer, ApiError, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub user: UserProfile,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    /// New display name. Empty or missing clears it.
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[utoipa::path(
    get,
    path = "/api/profile",
    tag = "Profile",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Current user", body = ProfileResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Account is inactive", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    Ok(Json(ProfileResponse {
        user: UserProfile::from(&user),
    }))
}

#[utoipa::path(
    put,
    path = "/api/profile",
    tag = "Profile",
    security(("bearerAuth" = [])),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 400, description = "Invalid display name", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let user = state
        .authenticator()
        .update_display_name(user.id, display_name)
        .await?;

    Ok(Json(ProfileResponse {
        user: UserProfile::from(&user),
    }))
}

#[utoipa::path(
    post,
    path = "/api/profile/password",
    tag = "Profile",
    security(("bearerAuth" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed, other sessions revoked"),
        (status = 400, description = "New password rejected", body = crate::error::ErrorResponse),
        (status = 401, description = "Current password is wrong", body = crate::error::ErrorResponse)
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, session) = state.authenticate(&token).await?;

    state
        .authenticator()
        .change_password(user.id, &req.current_password, &req.new_password, &session.token)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/profile/logout",
    tag = "Profile",
    security(("bearerAuth" = [])),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let token = require_bearer(&headers)?;
    // inactive accounts may still drop their token
    let (_, session) = state
        .authenticator()
        .authenticate_token(&token)
        .await
        .map_err(ApiError::from)?;

    state.authenticator().revoke_session(&session.token).await?;
    Ok(StatusCode::NO_CONTENT)
}
