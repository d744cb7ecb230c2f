use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    routes::models::Invitation, services::invite as invite_service, util::require_bearer, ApiError,
    AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct InvitationsResponse {
    pub invitations: Vec<Invitation>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InvitationResponse {
    pub invitation: Invitation,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateInvitationRequest {
    /// Restrict the invitation to this email address.
    #[serde(default)]
    pub email: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/invitations",
    tag = "Invitations",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Invitations created by the current user", body = InvitationsResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_invitations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<InvitationsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let invitations = invite_service::list_invitations(state.db_pool(), Some(user.id)).await?;
    Ok(Json(InvitationsResponse { invitations }))
}

#[utoipa::path(
    post,
    path = "/api/invitations",
    tag = "Invitations",
    security(("bearerAuth" = [])),
    request_body = CreateInvitationRequest,
    responses(
        (status = 200, description = "Invitation created", body = InvitationResponse),
        (status = 400, description = "Invalid email", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Invitation quota reached", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateInvitationRequest>,
) -> Result<Json<InvitationResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let invitation =
        invite_service::create_user_invitation(state.db_pool(), &user, req.email.as_deref())
            .await
            .map_err(|e| {
                tracing::warn!("Failed to create invitation: {}", e);
                ApiError::from(e)
            })?;

    Ok(Json(InvitationResponse { invitation }))
}

#[utoipa::path(
    delete,
    path = "/api/invitations/{code}",
    tag = "Invitations",
    security(("bearerAuth" = [])),
    params(("code" = String, Path, description = "Invitation code")),
    responses(
        (status = 200, description = "Invitation revoked", body = InvitationResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 404, description = "Invitation not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Invitation is no longer pending", body = crate::error::ErrorResponse)
    )
)]
pub async fn revoke_invitation(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<InvitationResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let invitation = invite_service::revoke_invitation(state.db_pool(), &user, &code).await?;
    Ok(Json(InvitationResponse { invitation }))
}
