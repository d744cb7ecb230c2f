use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chat3d_auth::UserRole;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    routes::{
        chat::ContextsResponse,
        invitations::{CreateInvitationRequest, InvitationResponse, InvitationsResponse},
        models::{AdminSettings, AdminStats, UserProfile, WaitlistEntry, WaitlistStatus},
    },
    services::{
        admin as admin_service, context as context_service, invite as invite_service, waitlist,
    },
    util::require_bearer,
    ApiError, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct UsersResponse {
    pub users: Vec<UserProfile>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub user: UserProfile,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "admin")]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct WaitlistQuery {
    /// `pending`, `approved` or `rejected`. All entries when absent.
    #[param(value_type = Option<String>)]
    pub status: Option<WaitlistStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WaitlistEntriesResponse {
    pub entries: Vec<WaitlistEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WaitlistEntryResponse {
    pub entry: WaitlistEntry,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettingsResponse {
    pub settings: AdminSettings,
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    tag = "Admin",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "All accounts", body = UsersResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Administrator access required", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsersResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.require_admin(&token).await?;

    let users = admin_service::list_users(state.db_pool()).await?;
    Ok(Json(UsersResponse {
        users: users.iter().map(UserProfile::from).collect(),
    }))
}

#[utoipa::path(
    patch,
    path = "/api/admin/users/{user_id}",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("user_id" = String, Path, description = "User public identifier")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserResponse),
        (status = 403, description = "Not an administrator, or self demotion", body = crate::error::ErrorResponse),
        (status = 404, description = "User not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let admin = state.require_admin(&token).await?;

    let user = admin_service::update_user(
        state.authenticator(),
        &admin,
        &user_id,
        req.role,
        req.is_active,
    )
    .await?;

    Ok(Json(UserResponse {
        user: UserProfile::from(&user),
    }))
}

#[utoipa::path(
    get,
    path = "/api/admin/users/{user_id}/contexts",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("user_id" = String, Path, description = "User public identifier")),
    responses(
        (status = 200, description = "Contexts owned by the user", body = ContextsResponse),
        (status = 403, description = "Administrator access required", body = crate::error::ErrorResponse),
        (status = 404, description = "User not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_user_contexts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ContextsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.require_admin(&token).await?;

    let user = admin_service::find_user(state.db_pool(), &user_id).await?;
    let contexts = context_service::list_contexts(state.db_pool(), user.id).await?;
    Ok(Json(ContextsResponse { contexts }))
}

#[utoipa::path(
    delete,
    path = "/api/admin/contexts/{context_id}",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("context_id" = String, Path, description = "Context public identifier")),
    responses(
        (status = 204, description = "Context removed"),
        (status = 403, description = "Administrator access required", body = crate::error::ErrorResponse),
        (status = 404, description = "Context not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_context(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = require_bearer(&headers)?;
    let admin = state.require_admin(&token).await?;

    let context = context_service::find_context(state.db_pool(), &context_id).await?;
    context_service::remove_context(state.db_pool(), state.storage(), &context)
        .await
        .map_err(|e| {
            tracing::error!("Failed to remove context: {}", e);
            ApiError::from(e)
        })?;

    tracing::info!(admin = %admin.public_id, context_id = %context_id, "context removed by admin");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/admin/waitlist",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(WaitlistQuery),
    responses(
        (status = 200, description = "Waitlist entries, oldest first", body = WaitlistEntriesResponse),
        (status = 403, description = "Administrator access required", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_waitlist(
    State(state): State<AppState>,
    Query(query): Query<WaitlistQuery>,
    headers: HeaderMap,
) -> Result<Json<WaitlistEntriesResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.require_admin(&token).await?;

    let entries = waitlist::list_entries(state.db_pool(), query.status).await?;
    Ok(Json(WaitlistEntriesResponse { entries }))
}

#[utoipa::path(
    post,
    path = "/api/admin/waitlist/{entry_id}/approve",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("entry_id" = String, Path, description = "Waitlist entry identifier")),
    responses(
        (status = 200, description = "Entry approved and invitation issued", body = WaitlistEntryResponse),
        (status = 404, description = "Entry not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Entry already decided", body = crate::error::ErrorResponse)
    )
)]
pub async fn approve_waitlist(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<WaitlistEntryResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let admin = state.require_admin(&token).await?;

    let entry = waitlist::approve(state.db_pool(), admin.id, &entry_id).await?;
    Ok(Json(WaitlistEntryResponse { entry }))
}

#[utoipa::path(
    post,
    path = "/api/admin/waitlist/{entry_id}/reject",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("entry_id" = String, Path, description = "Waitlist entry identifier")),
    responses(
        (status = 200, description = "Entry rejected", body = WaitlistEntryResponse),
        (status = 404, description = "Entry not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Entry already decided", body = crate::error::ErrorResponse)
    )
)]
pub async fn reject_waitlist(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<WaitlistEntryResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.require_admin(&token).await?;

    let entry = waitlist::reject(state.db_pool(), &entry_id).await?;
    Ok(Json(WaitlistEntryResponse { entry }))
}

#[utoipa::path(
    get,
    path = "/api/admin/invitations",
    tag = "Admin",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Every invitation, newest first", body = InvitationsResponse),
        (status = 403, description = "Administrator access required", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_invitations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<InvitationsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.require_admin(&token).await?;

    let invitations = invite_service::list_invitations(state.db_pool(), None).await?;
    Ok(Json(InvitationsResponse { invitations }))
}

#[utoipa::path(
    post,
    path = "/api/admin/invitations",
    tag = "Admin",
    security(("bearerAuth" = [])),
    request_body = CreateInvitationRequest,
    responses(
        (status = 200, description = "Invitation created without quota", body = InvitationResponse),
        (status = 400, description = "Invalid email", body = crate::error::ErrorResponse),
        (status = 403, description = "Administrator access required", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateInvitationRequest>,
) -> Result<Json<InvitationResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let admin = state.require_admin(&token).await?;

    let invitation =
        invite_service::create_user_invitation(state.db_pool(), &admin, req.email.as_deref())
            .await?;
    Ok(Json(InvitationResponse { invitation }))
}

#[utoipa::path(
    delete,
    path = "/api/admin/invitations/{code}",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("code" = String, Path, description = "Invitation code")),
    responses(
        (status = 200, description = "Invitation revoked", body = InvitationResponse),
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
    let admin = state.require_admin(&token).await?;

    let invitation = invite_service::revoke_invitation(state.db_pool(), &admin, &code).await?;
    Ok(Json(InvitationResponse { invitation }))
}

#[utoipa::path(
    get,
    path = "/api/admin/settings",
    tag = "Admin",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Current settings", body = SettingsResponse),
        (status = 403, description = "Administrator access required", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SettingsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.require_admin(&token).await?;

    let settings = admin_service::load_settings(state.db_pool()).await?;
    Ok(Json(SettingsResponse { settings }))
}

#[utoipa::path(
    put,
    path = "/api/admin/settings",
    tag = "Admin",
    security(("bearerAuth" = [])),
    request_body = AdminSettings,
    responses(
        (status = 200, description = "Settings replaced", body = SettingsResponse),
        (status = 400, description = "Settings out of range", body = crate::error::ErrorResponse),
        (status = 403, description = "Administrator access required", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(settings): Json<AdminSettings>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.require_admin(&token).await?;

    let settings = admin_service::save_settings(state.db_pool(), settings).await?;
    Ok(Json(SettingsResponse { settings }))
}

#[utoipa::path(
    get,
    path = "/api/admin/stats",
    tag = "Admin",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Dashboard counters", body = AdminStats),
        (status = 403, description = "Administrator access required", body = crate::error::ErrorResponse)
    )
)]
pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AdminStats>, ApiError> {
    let token = require_bearer(&headers)?;
    state.require_admin(&token).await?;

    let stats = admin_service::stats(state.db_pool()).await?;
    Ok(Json(stats))
}
