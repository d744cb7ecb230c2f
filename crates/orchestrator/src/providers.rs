//! LLM provider registry.
//!
//! Providers come from two places: JSON descriptors found on the configured
//! search path (metadata only, used for the catalogue) and the OpenRouter
//! client, which is the one provider that can actually serve requests.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use denkwerk::{
    providers::{
        openrouter::{OpenRouter, OpenRouterConfig},
        LLMProvider,
    },
    ProviderCapabilities,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chat3d_config::OpenRouterProviderConfig;

use crate::OrchestratorError;

const OPENROUTER: &str = "openrouter";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub identifier: String,
    pub family: String,
    pub capabilities: Vec<String>,
}

/// Connection details kept for direct OpenRouter REST calls such as the
/// model catalogue.
#[derive(Debug, Clone)]
pub(crate) struct OpenRouterEndpoint {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub referer: Option<String>,
    pub title: Option<String>,
}

#[derive(Default)]
pub(crate) struct ProviderRegistry {
    descriptors: Vec<ProviderMetadata>,
    clients: HashMap<String, Arc<dyn LLMProvider>>,
    openrouter: Option<OpenRouterEndpoint>,
}

impl ProviderRegistry {
    /// Read every `*.json` descriptor below the search path. Missing
    /// directories are skipped and malformed descriptors are logged and
    /// ignored; unreadable directories or files are errors.
    pub fn discover(search_path: &[String]) -> Result<Self, OrchestratorError> {
        let mut registry = Self::default();

        for dir in search_path.iter().map(PathBuf::from) {
            if !dir.is_dir() {
                debug!(path = %dir.display(), "provider directory not found");
                continue;
            }

            for path in descriptor_files(&dir)? {
                let raw = fs::read_to_string(&path).map_err(|source| {
                    OrchestratorError::ProviderLoad {
                        path: path.clone(),
                        source,
                    }
                })?;

                match serde_json::from_str::<ProviderMetadata>(&raw) {
                    Ok(descriptor) => registry.upsert_descriptor(descriptor),
                    Err(error) => {
                        warn!(path = %path.display(), %error, "skipping malformed provider descriptor")
                    }
                }
            }
        }

        Ok(registry)
    }

    /// Register the OpenRouter client. The API key comes from config or,
    /// failing that, the `OPENROUTER_API_KEY` environment variable.
    pub fn connect_openrouter(
        &mut self,
        config: &OpenRouterProviderConfig,
    ) -> Result<(), OrchestratorError> {
        let from_config = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty());
        let api_key = match from_config {
            Some(key) => key,
            None => std::env::var("OPENROUTER_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or(OrchestratorError::OpenRouterApiKeyMissing)?,
        };

        let endpoint = OpenRouterEndpoint {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.request_timeout_seconds),
            referer: config.referer.clone(),
            title: config.title.clone(),
        };

        let mut client_config = OpenRouterConfig::new(endpoint.api_key.clone());
        client_config.base_url = endpoint.base_url.clone();
        client_config.request_timeout = endpoint.timeout;
        client_config.referer = endpoint.referer.clone();
        client_config.title = endpoint.title.clone();

        let client = OpenRouter::from_config(client_config).map_err(|source| {
            OrchestratorError::ProviderInit {
                identifier: OPENROUTER,
                source,
            }
        })?;

        self.upsert_descriptor(ProviderMetadata {
            identifier: OPENROUTER.to_string(),
            family: OPENROUTER.to_string(),
            capabilities: capability_labels(client.capabilities()),
        });
        self.clients.insert(OPENROUTER.to_string(), Arc::new(client));
        self.openrouter = Some(endpoint);

        debug!(base_url = %config.base_url, "openrouter client registered");
        Ok(())
    }

    /// Client for `model`, chosen by its vendor prefix (`vendor/name`).
    /// Models without a dedicated client are routed through OpenRouter.
    pub fn resolve(&self, model: &str) -> Result<Arc<dyn LLMProvider>, OrchestratorError> {
        let vendor = vendor_of(model);

        if let Some(client) = self.clients.get(vendor) {
            return Ok(client.clone());
        }

        match self.clients.get(OPENROUTER) {
            Some(client) => {
                debug!(%model, vendor, "routing model through openrouter");
                Ok(client.clone())
            }
            None => Err(OrchestratorError::ProviderNotFound(vendor.to_string())),
        }
    }

    pub fn descriptors(&self) -> &[ProviderMetadata] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn openrouter(&self) -> Option<&OpenRouterEndpoint> {
        self.openrouter.as_ref()
    }

    fn upsert_descriptor(&mut self, descriptor: ProviderMetadata) {
        self.descriptors
            .retain(|existing| existing.identifier != descriptor.identifier);
        self.descriptors.push(descriptor);
    }
}

fn descriptor_files(dir: &Path) -> Result<Vec<PathBuf>, OrchestratorError> {
    let load_error = |source: std::io::Error| OrchestratorError::ProviderLoad {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(load_error)? {
        let path = entry.map_err(load_error)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn capability_labels(capabilities: ProviderCapabilities) -> Vec<String> {
    [
        (true, "chat-completions"),
        (capabilities.supports_streaming, "streaming"),
        (capabilities.supports_reasoning_stream, "reasoning"),
        (capabilities.supports_image_uploads, "image-uploads"),
    ]
    .into_iter()
    .filter(|(supported, _)| *supported)
    .map(|(_, label)| label.to_string())
    .collect()
}

fn vendor_of(model: &str) -> &str {
    match model.split_once('/') {
        Some((vendor, _)) if !vendor.is_empty() => vendor,
        _ => OPENROUTER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_is_the_model_prefix() {
        assert_eq!(vendor_of("anthropic/claude-sonnet-4"), "anthropic");
        assert_eq!(vendor_of("/odd"), OPENROUTER);
        assert_eq!(vendor_of("bare-model"), OPENROUTER);
    }

    #[test]
    fn default_capabilities_only_report_chat() {
        assert_eq!(
            capability_labels(ProviderCapabilities::default()),
            vec!["chat-completions".to_string()]
        );
    }

    #[test]
    fn resolve_without_clients_names_the_vendor() {
        let registry = ProviderRegistry::default();
        match registry.resolve("acme/widget") {
            Err(OrchestratorError::ProviderNotFound(vendor)) => assert_eq!(vendor, "acme"),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("empty registry resolved a provider"),
        }
    }

    #[test]
    fn discover_ignores_non_json_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a descriptor").unwrap();
        fs::write(
            dir.path().join("acme.json"),
            r#"{"identifier":"acme","family":"llm","capabilities":[]}"#,
        )
        .unwrap();

        let registry = ProviderRegistry::discover(&[dir.path().display().to_string()]).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptors()[0].identifier, "acme");
    }
}
