use axum::{extract::State, http::HeaderMap, Json};
use chat3d_orchestrator::ModelSummary;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    routes::models::{ChatContext, ChatItem, ModelsUsed},
    services::query::{QueryInput, QueryOutcome},
    util::require_bearer,
    ApiError, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// Existing context to continue. A new context is created when absent.
    #[serde(default)]
    pub context_id: Option<String>,
    pub prompt: String,
    /// Array of `{path, filename?, mime_type?, kind?}` objects.
    #[serde(default)]
    #[schema(value_type = Option<Vec<Object>>)]
    pub attachments: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegenerateRequest {
    pub context_id: String,
    /// Assistant item whose prompt is run again.
    pub item_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueryResponse {
    pub context: ChatContext,
    pub user_item: ChatItem,
    pub assistant_item: ChatItem,
}

impl From<QueryOutcome> for QueryResponse {
    fn from(outcome: QueryOutcome) -> Self {
        Self {
            context: outcome.context,
            user_item: outcome.user_item,
            assistant_item: outcome.assistant_item,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModelPricingInfo {
    /// USD per million prompt tokens.
    pub prompt_per_million: Option<f64>,
    /// USD per million completion tokens.
    pub completion_per_million: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModelInfo {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
    pub pricing: Option<ModelPricingInfo>,
}

impl From<ModelSummary> for ModelInfo {
    fn from(model: ModelSummary) -> Self {
        Self {
            id: model.id,
            label: model.label,
            description: model.description,
            pricing: model.pricing.map(|pricing| ModelPricingInfo {
                prompt_per_million: pricing.prompt_per_million,
                completion_per_million: pricing.completion_per_million,
            }),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModelsResponse {
    pub defaults: ModelsUsed,
    pub models: Vec<ModelInfo>,
}

#[utoipa::path(
    post,
    path = "/api/query",
    tag = "Query",
    security(("bearerAuth" = [])),
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Prompt answered with model, files and cost summary", body = QueryResponse),
        (status = 400, description = "Empty prompt or malformed attachments", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Attachment outside the caller's storage", body = crate::error::ErrorResponse),
        (status = 404, description = "Context or attachment not found", body = crate::error::ErrorResponse),
        (status = 502, description = "Generation or rendering failed", body = crate::error::ErrorResponse)
    )
)]
pub async fn submit_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let outcome = state
        .pipeline()
        .submit_detached(
            user,
            QueryInput {
                context_id: req.context_id,
                prompt: req.prompt,
                attachments: req.attachments,
            },
        )
        .await?;

    Ok(Json(QueryResponse::from(outcome)))
}

#[utoipa::path(
    post,
    path = "/api/query/regenerate",
    tag = "Query",
    security(("bearerAuth" = [])),
    request_body = RegenerateRequest,
    responses(
        (status = 200, description = "A new answer to the same prompt", body = QueryResponse),
        (status = 400, description = "Item is not an assistant item", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 404, description = "Context or item not found", body = crate::error::ErrorResponse),
        (status = 502, description = "Generation or rendering failed", body = crate::error::ErrorResponse)
    )
)]
pub async fn regenerate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegenerateRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let outcome = state
        .pipeline()
        .regenerate_detached(user, req.context_id, req.item_id)
        .await?;

    Ok(Json(QueryResponse::from(outcome)))
}

#[utoipa::path(
    get,
    path = "/api/query/models",
    tag = "Query",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Selectable models and the configured defaults", body = ModelsResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 502, description = "Model catalogue unavailable", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ModelsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.authenticate(&token).await?;

    let models = state.orchestrator().list_models().await.map_err(|e| {
        tracing::error!("Failed to fetch models: {}", e);
        ApiError::from(e)
    })?;
    let defaults = state.orchestrator().default_models();

    Ok(Json(ModelsResponse {
        defaults: ModelsUsed {
            conversation: defaults.conversation,
            codegen: defaults.codegen,
        },
        models: models.into_iter().map(ModelInfo::from).collect(),
    }))
}
