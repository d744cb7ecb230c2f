use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(title = "Chat3D API", description = "Natural-language 3D part generation backend"),
    paths(
        crate::routes::health::health_check,
        crate::routes::public::register,
        crate::routes::public::login,
        crate::routes::public::join_waitlist,
        crate::routes::public::lookup_invitation,
        crate::routes::public::public_settings,
        crate::routes::profile::get_profile,
        crate::routes::profile::update_profile,
        crate::routes::profile::change_password,
        crate::routes::profile::logout,
        crate::routes::chat::list_contexts,
        crate::routes::chat::create_context,
        crate::routes::chat::get_context,
        crate::routes::chat::update_context,
        crate::routes::chat::delete_context,
        crate::routes::chat::list_items,
        crate::routes::chat::rate_item,
        crate::routes::query::submit_query,
        crate::routes::query::regenerate,
        crate::routes::query::list_models,
        crate::routes::events::stream_events,
        crate::routes::events::list_events,
        crate::routes::events::mark_read,
        crate::routes::files::upload_file,
        crate::routes::files::download_file,
        crate::routes::invitations::list_invitations,
        crate::routes::invitations::create_invitation,
        crate::routes::invitations::revoke_invitation,
        crate::routes::admin::list_users,
        crate::routes::admin::update_user,
        crate::routes::admin::list_user_contexts,
        crate::routes::admin::delete_context,
        crate::routes::admin::list_waitlist,
        crate::routes::admin::approve_waitlist,
        crate::routes::admin::reject_waitlist,
        crate::routes::admin::list_invitations,
        crate::routes::admin::create_invitation,
        crate::routes::admin::revoke_invitation,
        crate::routes::admin::get_settings,
        crate::routes::admin::update_settings,
        crate::routes::admin::stats
    ),
    components(
        schemas(
            crate::error::ErrorResponse,
            crate::routes::health::HealthResponse,
            crate::routes::models::PipelineStatus,
            crate::routes::models::AttachmentKind,
            crate::routes::models::AttachmentRef,
            crate::routes::models::StoredArtifact,
            crate::routes::models::ArtifactStatus,
            crate::routes::models::ArtifactSummary,
            crate::routes::models::UsageSummary,
            crate::routes::models::ModelsUsed,
            crate::routes::models::ModelPreferences,
            crate::routes::models::Segment,
            crate::routes::models::ItemRole,
            crate::routes::models::ChatContext,
            crate::routes::models::ChatItem,
            crate::routes::models::Notification,
            crate::routes::models::RegistrationMode,
            crate::routes::models::AdminSettings,
            crate::routes::models::InvitationStatus,
            crate::routes::models::Invitation,
            crate::routes::models::InvitationLookup,
            crate::routes::models::WaitlistStatus,
            crate::routes::models::WaitlistEntry,
            crate::routes::models::UserProfile,
            crate::routes::models::AdminStats,
            crate::routes::public::RegisterRequest,
            crate::routes::public::LoginRequest,
            crate::routes::public::AuthResponse,
            crate::routes::public::WaitlistRequest,
            crate::routes::public::WaitlistResponse,
            crate::routes::public::PublicSettings,
            crate::routes::profile::ProfileResponse,
            crate::routes::profile::UpdateProfileRequest,
            crate::routes::profile::ChangePasswordRequest,
            crate::routes::chat::ContextsResponse,
            crate::routes::chat::ContextResponse,
            crate::routes::chat::ContextDetailResponse,
            crate::routes::chat::ItemsResponse,
            crate::routes::chat::ItemResponse,
            crate::routes::chat::CreateContextRequest,
            crate::routes::chat::UpdateContextRequest,
            crate::routes::chat::RateItemRequest,
            crate::routes::query::QueryRequest,
            crate::routes::query::RegenerateRequest,
            crate::routes::query::QueryResponse,
            crate::routes::query::ModelPricingInfo,
            crate::routes::query::ModelInfo,
            crate::routes::query::ModelsResponse,
            crate::routes::events::NotificationsResponse,
            crate::routes::events::MarkReadResponse,
            crate::routes::files::UploadResponse,
            crate::routes::invitations::InvitationsResponse,
            crate::routes::invitations::InvitationResponse,
            crate::routes::invitations::CreateInvitationRequest,
            crate::routes::admin::UsersResponse,
            crate::routes::admin::UserResponse,
            crate::routes::admin::UpdateUserRequest,
            crate::routes::admin::WaitlistEntriesResponse,
            crate::routes::admin::WaitlistEntryResponse,
            crate::routes::admin::SettingsResponse
        )
    ),
    tags(
        (name = "Health", description = "Service health endpoints"),
        (name = "Public", description = "Registration, login, waitlist and invitation lookup"),
        (name = "Profile", description = "Current account management"),
        (name = "Chat", description = "Chat contexts and their items"),
        (name = "Query", description = "Prompt submission, regeneration and model catalogue"),
        (name = "Events", description = "Pipeline notifications over SSE with replay"),
        (name = "Files", description = "Uploads and rendered artifacts"),
        (name = "Invitations", description = "User-issued invitations"),
        (name = "Admin", description = "Administration and moderation")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);

        let mut scheme = SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer));
        if let SecurityScheme::Http(http) = &mut scheme {
            http.bearer_format = Some("session token".to_string());
        }

        components.add_security_scheme("bearerAuth", scheme);
    }
}
