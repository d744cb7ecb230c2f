mod error;
mod state;
mod util;

pub mod docs;
pub mod middleware;
pub mod routes;
pub mod services;

pub use error::{ApiError, ErrorResponse};
pub use middleware::RateLimiter;
pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
        HeaderName, HeaderValue, Method,
    },
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;

const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.storage().max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let limiter = state.rate_limiter().clone();
    let cors = cors_layer(&state.config().http.allowed_origins);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        // Public routes
        .route("/api/public/register", post(routes::public::register))
        .route("/api/public/login", post(routes::public::login))
        .route("/api/public/waitlist", post(routes::public::join_waitlist))
        .route(
            "/api/public/invitations/:code",
            get(routes::public::lookup_invitation),
        )
        .route("/api/public/settings", get(routes::public::public_settings))
        // Profile routes
        .route(
            "/api/profile",
            get(routes::profile::get_profile).put(routes::profile::update_profile),
        )
        .route(
            "/api/profile/password",
            post(routes::profile::change_password),
        )
        .route("/api/profile/logout", post(routes::profile::logout))
        // Chat routes
        .route(
            "/api/chat/contexts",
            get(routes::chat::list_contexts).post(routes::chat::create_context),
        )
        .route(
            "/api/chat/contexts/:context_id",
            get(routes::chat::get_context)
                .put(routes::chat::update_context)
                .delete(routes::chat::delete_context),
        )
        .route(
            "/api/chat/contexts/:context_id/items",
            get(routes::chat::list_items),
        )
        .route(
            "/api/chat/items/:item_id/rating",
            put(routes::chat::rate_item),
        )
        // Query routes
        .route("/api/query", post(routes::query::submit_query))
        .route("/api/query/regenerate", post(routes::query::regenerate))
        .route("/api/query/models", get(routes::query::list_models))
        // Event routes
        .route("/api/events", get(routes::events::list_events))
        .route("/api/events/stream", get(routes::events::stream_events))
        .route("/api/events/read", post(routes::events::mark_read))
        // File routes
        .route(
            "/api/files",
            post(routes::files::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/files/*path", get(routes::files::download_file))
        // Invitation routes
        .route(
            "/api/invitations",
            get(routes::invitations::list_invitations)
                .post(routes::invitations::create_invitation),
        )
        .route(
            "/api/invitations/:code",
            delete(routes::invitations::revoke_invitation),
        )
        // Admin routes
        .route("/api/admin/users", get(routes::admin::list_users))
        .route("/api/admin/users/:user_id", patch(routes::admin::update_user))
        .route(
            "/api/admin/users/:user_id/contexts",
            get(routes::admin::list_user_contexts),
        )
        .route(
            "/api/admin/contexts/:context_id",
            delete(routes::admin::delete_context),
        )
        .route("/api/admin/waitlist", get(routes::admin::list_waitlist))
        .route(
            "/api/admin/waitlist/:entry_id/approve",
            post(routes::admin::approve_waitlist),
        )
        .route(
            "/api/admin/waitlist/:entry_id/reject",
            post(routes::admin::reject_waitlist),
        )
        .route(
            "/api/admin/invitations",
            get(routes::admin::list_invitations).post(routes::admin::create_invitation),
        )
        .route(
            "/api/admin/invitations/:code",
            delete(routes::admin::revoke_invitation),
        )
        .route(
            "/api/admin/settings",
            get(routes::admin::get_settings).put(routes::admin::update_settings),
        )
        .route("/api/admin/stats", get(routes::admin::stats))
        .with_state(state)
        .layer(from_fn_with_state(limiter, middleware::rate_limit_middleware))
        .layer(from_fn(middleware::security_headers))
        .layer(from_fn(middleware::logging_middleware))
        .layer(cors)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(docs::ApiDoc::openapi())
}

/// CORS for the configured origins. An empty list allows any origin.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([
            RETRY_AFTER,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
        ]);

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
