use axum::{
    extract::{Path, State},
    Json,
};
use chat3d_auth::{AuthSession, User};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    routes::models::{InvitationLookup, RegistrationMode, UserProfile, WaitlistEntry},
    services::{admin as admin_service, auth as auth_service, invite as invite_service, waitlist},
    ApiError, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub invitation_code: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserProfile,
}

impl AuthResponse {
    fn new(user: &User, session: AuthSession) -> Self {
        Self {
            token: session.token,
            expires_at: session.expires_at.to_rfc3339(),
            user: UserProfile::from(user),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WaitlistRequest {
    pub email: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WaitlistResponse {
    pub entry: WaitlistEntry,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicSettings {
    pub registration_mode: RegistrationMode,
    pub announcement: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/public/register",
    tag = "Public",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created and session issued", body = AuthResponse),
        (status = 400, description = "Invalid registration payload or invitation", body = crate::error::ErrorResponse),
        (status = 403, description = "Registration closed or invitation for another email", body = crate::error::ErrorResponse),
        (status = 409, description = "Email already registered", body = crate::error::ErrorResponse),
        (status = 429, description = "Too many attempts", body = crate::error::ErrorResponse)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (user, session) = auth_service::register(
        state.authenticator(),
        auth_service::Registration {
            email: &req.email,
            password: &req.password,
            display_name: req.display_name.as_deref(),
            invitation_code: req.invitation_code.as_deref(),
        },
    )
    .await?;

    Ok(Json(AuthResponse::new(&user, session)))
}

#[utoipa::path(
    post,
    path = "/api/public/login",
    tag = "Public",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorResponse),
        (status = 403, description = "Account is inactive", body = crate::error::ErrorResponse),
        (status = 429, description = "Too many attempts", body = crate::error::ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (user, session) =
        auth_service::login(state.authenticator(), &req.email, &req.password).await?;

    Ok(Json(AuthResponse::new(&user, session)))
}

#[utoipa::path(
    post,
    path = "/api/public/waitlist",
    tag = "Public",
    request_body = WaitlistRequest,
    responses(
        (status = 200, description = "Waitlist entry, existing or new", body = WaitlistResponse),
        (status = 400, description = "Invalid email or note", body = crate::error::ErrorResponse),
        (status = 429, description = "Too many attempts", body = crate::error::ErrorResponse)
    )
)]
pub async fn join_waitlist(
    State(state): State<AppState>,
    Json(req): Json<WaitlistRequest>,
) -> Result<Json<WaitlistResponse>, ApiError> {
    let entry = waitlist::join(state.db_pool(), &req.email, req.note.as_deref())
        .await
        .map_err(|e| {
            tracing::warn!("Failed to join waitlist: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(WaitlistResponse { entry }))
}

#[utoipa::path(
    get,
    path = "/api/public/invitations/{code}",
    tag = "Public",
    params(("code" = String, Path, description = "Invitation code")),
    responses(
        (status = 200, description = "Invitation validity", body = InvitationLookup),
        (status = 404, description = "Unknown invitation code", body = crate::error::ErrorResponse)
    )
)]
pub async fn lookup_invitation(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<InvitationLookup>, ApiError> {
    let lookup = invite_service::lookup_invitation(state.db_pool(), &code).await?;
    Ok(Json(lookup))
}

#[utoipa::path(
    get,
    path = "/api/public/settings",
    tag = "Public",
    responses(
        (status = 200, description = "Registration mode and announcement", body = PublicSettings)
    )
)]
pub async fn public_settings(State(state): State<AppState>) -> Result<Json<PublicSettings>, ApiError> {
    let settings = admin_service::load_settings(state.db_pool()).await?;

    Ok(Json(PublicSettings {
        registration_mode: settings.registration_mode,
        announcement: settings.announcement,
    }))
}
