use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    routes::models::{ChatContext, ChatItem, ModelPreferences},
    services::{context as context_service, item as item_service},
    util::require_bearer,
    ApiError, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct ContextsResponse {
    pub contexts: Vec<ChatContext>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContextResponse {
    pub context: ChatContext,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContextDetailResponse {
    pub context: ChatContext,
    pub items: Vec<ChatItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ItemsResponse {
    pub items: Vec<ChatItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ItemResponse {
    pub item: ChatItem,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateContextRequest {
    pub name: String,
    #[serde(default)]
    pub preferred_models: Option<ModelPreferences>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateContextRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// Replaces the stored preferences. An empty object clears them.
    #[serde(default)]
    pub preferred_models: Option<ModelPreferences>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RateItemRequest {
    /// -1, 0 or 1.
    pub rating: i64,
}

#[utoipa::path(
    get,
    path = "/api/chat/contexts",
    tag = "Chat",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Contexts of the current user, most recent first", body = ContextsResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 500, description = "Failed to fetch contexts", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_contexts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ContextsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let contexts = context_service::list_contexts(state.db_pool(), user.id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch contexts: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(ContextsResponse { contexts }))
}

#[utoipa::path(
    post,
    path = "/api/chat/contexts",
    tag = "Chat",
    security(("bearerAuth" = [])),
    request_body = CreateContextRequest,
    responses(
        (status = 200, description = "Context created", body = ContextResponse),
        (status = 400, description = "Invalid context name", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateContextRequest>,
) -> Result<Json<ContextResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let context = context_service::create_context(
        state.db_pool(),
        user.id,
        &req.name,
        req.preferred_models.as_ref(),
    )
    .await?;

    Ok(Json(ContextResponse { context }))
}

#[utoipa::path(
    get,
    path = "/api/chat/contexts/{context_id}",
    tag = "Chat",
    security(("bearerAuth" = [])),
    params(("context_id" = String, Path, description = "Context public identifier")),
    responses(
        (status = 200, description = "Context with its items", body = ContextDetailResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 404, description = "Context not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_context(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ContextDetailResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let context = context_service::get_owned_context(state.db_pool(), user.id, &context_id).await?;
    let items = item_service::list_items(state.db_pool(), &context)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch items: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(ContextDetailResponse { context, items }))
}

#[utoipa::path(
    put,
    path = "/api/chat/contexts/{context_id}",
    tag = "Chat",
    security(("bearerAuth" = [])),
    params(("context_id" = String, Path, description = "Context public identifier")),
    request_body = UpdateContextRequest,
    responses(
        (status = 200, description = "Context updated", body = ContextResponse),
        (status = 400, description = "Invalid context name", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 404, description = "Context not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_context(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateContextRequest>,
) -> Result<Json<ContextResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let context = context_service::update_context(
        state.db_pool(),
        user.id,
        &context_id,
        req.name.as_deref(),
        req.preferred_models.as_ref(),
    )
    .await?;

    Ok(Json(ContextResponse { context }))
}

#[utoipa::path(
    delete,
    path = "/api/chat/contexts/{context_id}",
    tag = "Chat",
    security(("bearerAuth" = [])),
    params(("context_id" = String, Path, description = "Context public identifier")),
    responses(
        (status = 204, description = "Context, items and stored files deleted"),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 404, description = "Context not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_context(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    context_service::delete_context(state.db_pool(), state.storage(), user.id, &context_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete context: {}", e);
            ApiError::from(e)
        })?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/chat/contexts/{context_id}/items",
    tag = "Chat",
    security(("bearerAuth" = [])),
    params(("context_id" = String, Path, description = "Context public identifier")),
    responses(
        (status = 200, description = "Items in chronological order", body = ItemsResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 404, description = "Context not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_items(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ItemsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let context = context_service::get_owned_context(state.db_pool(), user.id, &context_id).await?;
    let items = item_service::list_items(state.db_pool(), &context).await?;

    Ok(Json(ItemsResponse { items }))
}

#[utoipa::path(
    put,
    path = "/api/chat/items/{item_id}/rating",
    tag = "Chat",
    security(("bearerAuth" = [])),
    params(("item_id" = String, Path, description = "Item public identifier")),
    request_body = RateItemRequest,
    responses(
        (status = 200, description = "Rating stored", body = ItemResponse),
        (status = 400, description = "Rating out of range", body = crate::error::ErrorResponse),
        (status = 404, description = "Item not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn rate_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RateItemRequest>,
) -> Result<Json<ItemResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let item = item_service::set_rating(state.db_pool(), user.id, &item_id, req.rating).await?;
    Ok(Json(ItemResponse { item }))
}
