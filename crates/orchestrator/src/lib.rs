//! Generation collaborators for the query pipeline: the LLM-backed CAD
//! model, the renderer client and the provider registry they share.

use std::{path::PathBuf, sync::Arc};

use denkwerk::{providers::LLMProvider, LLMError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use chat3d_config::{AppConfig, GenerationMode, OrchestratorConfig, PricingConfig};

pub mod catalogue;
pub mod generation;
pub mod providers;
pub mod render;

pub use catalogue::{ModelPricing, ModelSummary};
pub use generation::{
    extract_code_block, CadModel, GenerationError, GenerationOutput, GenerationRequest,
    LlmCadModel, MockCadModel, TokenUsage,
};
pub use providers::ProviderMetadata;
pub use render::{build_renderer, HttpRenderer, MockRenderer, RenderError, RenderedFile, Renderer};

use providers::ProviderRegistry;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("provider registry not initialised")]
    ProviderIndexMissing,
    #[error("failed to read provider descriptors at {path:?}: {source}")]
    ProviderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing OpenRouter API key")]
    OpenRouterApiKeyMissing,
    #[error("failed to initialise provider {identifier}: {source}")]
    ProviderInit {
        identifier: &'static str,
        #[source]
        source: LLMError,
    },
    #[error("no provider registered for {0}")]
    ProviderNotFound(String),
    #[error("provider http request failed: {0}")]
    ProviderHttp(#[from] reqwest::Error),
    #[error("openrouter provider is not available")]
    OpenRouterUnavailable,
}

/// Models used for the two generation phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub conversation: String,
    pub codegen: String,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Option<ProviderRegistry>,
}

impl Orchestrator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            config: config.orchestrator.clone(),
            registry: None,
        }
    }

    /// Discover provider descriptors and, in OpenRouter mode, connect the
    /// OpenRouter client. Mock mode needs no credentials.
    pub fn bootstrap(mut self) -> Result<Self, OrchestratorError> {
        let mut registry = ProviderRegistry::discover(&self.config.provider_search_path)?;
        if self.config.mode == GenerationMode::OpenRouter {
            registry.connect_openrouter(&self.config.openrouter)?;
        }

        info!(
            providers = registry.len(),
            mode = ?self.config.mode,
            "provider registry ready"
        );
        self.registry = Some(registry);
        Ok(self)
    }

    pub fn mode(&self) -> GenerationMode {
        self.config.mode
    }

    pub fn default_models(&self) -> ModelSelection {
        ModelSelection {
            conversation: self.config.conversation_model.clone(),
            codegen: self.config.codegen_model.clone(),
        }
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.config.pricing
    }

    pub fn providers(&self) -> Result<Vec<ProviderMetadata>, OrchestratorError> {
        Ok(self.registry()?.descriptors().to_vec())
    }

    pub fn provider_for_model(
        &self,
        model: &str,
    ) -> Result<Arc<dyn LLMProvider>, OrchestratorError> {
        self.registry()?.resolve(model)
    }

    /// Models a user may pick for a context. Mock mode only offers the
    /// configured defaults.
    pub async fn list_models(&self) -> Result<Vec<ModelSummary>, OrchestratorError> {
        if self.config.mode == GenerationMode::Mock {
            let defaults = self.default_models();
            let mut models = vec![ModelSummary::named(&defaults.conversation)];
            if defaults.codegen != defaults.conversation {
                models.push(ModelSummary::named(&defaults.codegen));
            }
            return Ok(models);
        }

        let endpoint = self
            .registry()?
            .openrouter()
            .ok_or(OrchestratorError::OpenRouterUnavailable)?;
        catalogue::fetch_openrouter(endpoint).await
    }

    fn registry(&self) -> Result<&ProviderRegistry, OrchestratorError> {
        self.registry
            .as_ref()
            .ok_or(OrchestratorError::ProviderIndexMissing)
    }
}

/// Build the generation backend selected by `orchestrator.mode`.
pub fn build_cad_model(orchestrator: Arc<Orchestrator>) -> Arc<dyn CadModel> {
    match orchestrator.mode() {
        GenerationMode::OpenRouter => Arc::new(LlmCadModel::new(orchestrator)),
        GenerationMode::Mock => Arc::new(MockCadModel),
    }
}
