//! The query-submission pipeline.
//!
//! A prompt becomes a user item and a pending assistant item, then runs
//! through conversation, code generation and rendering. Every phase is
//! published as a `query.state` notification. A single error boundary turns
//! any failure after the items exist into one `failed` notification and an
//! error segment on the assistant item.

use std::sync::Arc;
use std::time::Instant;

use chat3d_auth::User;
use chat3d_config::PricingConfig;
use chat3d_orchestrator::{CadModel, GenerationRequest, ModelSelection, Renderer, TokenUsage};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};

use super::artifact::summarize_artifacts;
use super::attachment::normalize_attachments;
use super::context::{create_context, derive_context_name, get_owned_context, touch_context};
use super::error::ServiceError;
use super::item::{find_owned_item, insert_turn, latest_model_code, regeneration_source, replace_segments};
use super::notification::{record, NotificationHub};
use super::storage::FileStorage;
use crate::routes::models::{
    AttachmentRef, ChatContext, ChatItem, ModelsUsed, PipelineStatus, Segment,
    UsageSummary,
};

pub const QUERY_STATE_KIND: &str = "query.state";

#[derive(Debug, Clone)]
pub struct QueryInput {
    pub context_id: Option<String>,
    pub prompt: String,
    pub attachments: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub context: ChatContext,
    pub user_item: ChatItem,
    pub assistant_item: ChatItem,
}

#[derive(Clone)]
pub struct QueryPipeline {
    pool: SqlitePool,
    hub: NotificationHub,
    storage: FileStorage,
    cad_model: Arc<dyn CadModel>,
    renderer: Arc<dyn Renderer>,
    defaults: ModelSelection,
    pricing: PricingConfig,
}

impl QueryPipeline {
    pub fn new(
        pool: SqlitePool,
        hub: NotificationHub,
        storage: FileStorage,
        cad_model: Arc<dyn CadModel>,
        renderer: Arc<dyn Renderer>,
        defaults: ModelSelection,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            pool,
            hub,
            storage,
            cad_model,
            renderer,
            defaults,
            pricing,
        }
    }

    /// Run [`QueryPipeline::submit`] on its own task so a dropped client
    /// connection does not cancel the external calls.
    pub async fn submit_detached(&self, user: User, input: QueryInput) -> Result<QueryOutcome, ServiceError> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.submit(&user, input).await })
            .await
            .map_err(|error| ServiceError::internal(format!("query task failed: {error}")))?
    }

    pub async fn regenerate_detached(
        &self,
        user: User,
        context_id: String,
        item_id: String,
    ) -> Result<QueryOutcome, ServiceError> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.regenerate(&user, &context_id, &item_id).await })
            .await
            .map_err(|error| ServiceError::internal(format!("regeneration task failed: {error}")))?
    }

    pub async fn submit(&self, user: &User, input: QueryInput) -> Result<QueryOutcome, ServiceError> {
        let prompt = input.prompt.trim();
        if prompt.is_empty() {
            return Err(ServiceError::validation("prompt must not be empty"));
        }

        let attachments = normalize_attachments(input.attachments.as_ref())?;

        let existing = match input
            .context_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            Some(context_id) => Some(get_owned_context(&self.pool, user.id, context_id).await?),
            None => None,
        };

        self.check_attachments(user, &attachments).await?;

        let context = match existing {
            Some(context) => context,
            None => create_context(&self.pool, user.id, &derive_context_name(prompt), None).await?,
        };

        self.run(user, context, prompt.to_string(), attachments).await
    }

    /// Re-run the prompt an assistant item answered, producing a new pair of items.
    pub async fn regenerate(
        &self,
        user: &User,
        context_id: &str,
        item_id: &str,
    ) -> Result<QueryOutcome, ServiceError> {
        let context = get_owned_context(&self.pool, user.id, context_id).await?;
        let target = find_owned_item(&self.pool, user.id, item_id).await?;
        if target.context_id != context.id {
            return Err(ServiceError::not_found("item not found"));
        }

        let source = regeneration_source(&self.pool, &context, &target).await?;
        self.check_attachments(user, &source.attachments).await?;

        info!(context_id = %context.id, item_id, "regenerating assistant item");
        self.run(user, context, source.prompt, source.attachments).await
    }

    async fn check_attachments(&self, user: &User, attachments: &[AttachmentRef]) -> Result<(), ServiceError> {
        for attachment in attachments {
            self.storage.ensure_readable(user, &attachment.path).await?;
        }
        Ok(())
    }

    async fn run(
        &self,
        user: &User,
        context: ChatContext,
        prompt: String,
        attachments: Vec<AttachmentRef>,
    ) -> Result<QueryOutcome, ServiceError> {
        let mut user_segments = vec![Segment::Message {
            text: prompt.clone(),
        }];
        if !attachments.is_empty() {
            user_segments.push(Segment::Attachment {
                files: attachments.clone(),
            });
        }

        let (user_item, mut assistant_item) = insert_turn(
            &self.pool,
            &context,
            &user_segments,
            &[pending_segment(PipelineStatus::Queued)],
        )
        .await
        .map_err(ServiceError::normalize)?;

        match self
            .run_phases(user, &context, &mut assistant_item, &prompt, &attachments)
            .await
        {
            Ok(()) => Ok(QueryOutcome {
                context,
                user_item,
                assistant_item,
            }),
            Err(error) => {
                let error = error.normalize();
                self.fail(user, &context, &mut assistant_item, &error).await;
                Err(error)
            }
        }
    }

    async fn run_phases(
        &self,
        user: &User,
        context: &ChatContext,
        item: &mut ChatItem,
        prompt: &str,
        attachments: &[AttachmentRef],
    ) -> Result<(), ServiceError> {
        let started = Instant::now();
        self.publish(user, context, item, PipelineStatus::Queued, None).await?;

        let models = self.models_for(context);
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            attachments: attachments.iter().map(|file| file.filename.clone()).collect(),
            previous_code: latest_model_code(&self.pool, context).await?,
            conversation_model: models.conversation,
            codegen_model: models.codegen,
        };

        self.advance(user, context, item, PipelineStatus::Conversation).await?;
        let conversation = self.cad_model.conversation(&request).await?;

        self.advance(user, context, item, PipelineStatus::Codegen).await?;
        let code = self.cad_model.codegen(&request, &conversation.text).await?;

        self.advance(user, context, item, PipelineStatus::Rendering).await?;
        let rendered = self
            .renderer
            .render(&code.text, &format!("{}.step", item.id))
            .await?;

        let mut files = Vec::with_capacity(rendered.len());
        for file in &rendered {
            let stored = self
                .storage
                .save_artifact(&user.public_id, &context.id, &item.id, &file.filename, &file.content)
                .await?;
            files.push(stored);
        }

        let filenames: Vec<&str> = files.iter().map(|file| file.filename.as_str()).collect();
        let artifact = summarize_artifacts(&filenames);

        let usage = conversation.usage.combine(code.usage);
        let cost = self.cost(&usage);
        let duration_ms = started.elapsed().as_millis() as u64;

        let segments = vec![
            Segment::Message {
                text: conversation.text,
            },
            Segment::Model {
                text: artifact.message.clone(),
                files,
                artifact,
                code: code.text,
            },
            Segment::Meta {
                text: format!(
                    "{} tokens, ${:.4}, {:.1}s",
                    usage.total(),
                    cost,
                    duration_ms as f64 / 1000.0
                ),
                usage: UsageSummary {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total(),
                },
                cost,
                models: ModelsUsed {
                    conversation: conversation.model,
                    codegen: code.model,
                },
                duration_ms,
            },
        ];

        replace_segments(&self.pool, item, segments).await?;
        touch_context(&self.pool, context.row_id).await?;
        self.publish(user, context, item, PipelineStatus::Completed, None).await?;

        info!(
            context_id = %context.id,
            item_id = %item.id,
            duration_ms,
            total_tokens = usage.total(),
            "query completed"
        );
        Ok(())
    }

    async fn advance(
        &self,
        user: &User,
        context: &ChatContext,
        item: &mut ChatItem,
        phase: PipelineStatus,
    ) -> Result<(), ServiceError> {
        replace_segments(&self.pool, item, vec![pending_segment(phase)]).await?;
        self.publish(user, context, item, phase, None).await
    }

    /// Best effort: the original error is what the caller gets back.
    async fn fail(&self, user: &User, context: &ChatContext, item: &mut ChatItem, error: &ServiceError) {
        warn!(
            context_id = %context.id,
            item_id = %item.id,
            status = error.status_code().as_u16(),
            %error,
            "query failed"
        );

        let message = error.to_string();
        if let Err(publish_error) = self
            .publish(user, context, item, PipelineStatus::Failed, Some(&message))
            .await
        {
            warn!(error = %publish_error, "failed to publish failure notification");
        }

        let segments = vec![Segment::Error {
            text: message,
            status: error.status_code().as_u16(),
        }];
        if let Err(update_error) = replace_segments(&self.pool, item, segments).await {
            warn!(error = %update_error, "failed to record error segment");
        }
    }

    async fn publish(
        &self,
        user: &User,
        context: &ChatContext,
        item: &ChatItem,
        status: PipelineStatus,
        message: Option<&str>,
    ) -> Result<(), ServiceError> {
        let mut payload = json!({
            "context_id": context.id,
            "item_id": item.id,
            "status": status.as_str(),
        });
        if let Some(message) = message {
            payload["message"] = Value::String(message.to_string());
        }

        record(&self.pool, &self.hub, user.id, QUERY_STATE_KIND, payload).await?;
        Ok(())
    }

    fn models_for(&self, context: &ChatContext) -> ModelSelection {
        let preferences = context.preferred_models.as_ref();
        ModelSelection {
            conversation: preferences
                .and_then(|prefs| prefs.conversation.clone())
                .unwrap_or_else(|| self.defaults.conversation.clone()),
            codegen: preferences
                .and_then(|prefs| prefs.codegen.clone())
                .unwrap_or_else(|| self.defaults.codegen.clone()),
        }
    }

    fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.pricing.prompt_per_million
            + usage.completion_tokens as f64 * self.pricing.completion_per_million)
            / 1_000_000.0
    }
}

fn pending_segment(phase: PipelineStatus) -> Segment {
    let text = match phase {
        PipelineStatus::Queued => "Queued",
        PipelineStatus::Conversation => "Thinking about the part",
        PipelineStatus::Codegen => "Writing CAD code",
        PipelineStatus::Rendering => "Rendering the model",
        PipelineStatus::Completed => "Done",
        PipelineStatus::Failed => "Failed",
    };
    Segment::Pending {
        text: text.to_string(),
        phase,
    }
}
