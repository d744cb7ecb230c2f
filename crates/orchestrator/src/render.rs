//! Renderer clients turning generated code into model files.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chat3d_config::{RendererConfig, RendererMode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("renderer returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("renderer returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("renderer produced no files")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Execute `code` and return the produced files. `filename` is the base
    /// name the renderer should use for its outputs.
    async fn render(&self, code: &str, filename: &str) -> Result<Vec<RenderedFile>, RenderError>;
}

/// Build the renderer selected by `renderer.mode`.
pub fn build_renderer(config: &RendererConfig) -> Result<Arc<dyn Renderer>, RenderError> {
    Ok(match config.mode {
        RendererMode::Http => Arc::new(HttpRenderer::new(config)?),
        RendererMode::Mock => Arc::new(MockRenderer),
    })
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    code: &'a str,
    filename: &'a str,
}

#[derive(Deserialize)]
struct RenderResponse {
    #[serde(default)]
    files: Vec<RenderResponseFile>,
}

#[derive(Deserialize)]
struct RenderResponseFile {
    filename: String,
    content: String,
}

pub struct HttpRenderer {
    client: Client,
    url: String,
}

impl HttpRenderer {
    pub fn new(config: &RendererConfig) -> Result<Self, RenderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, code: &str, filename: &str) -> Result<Vec<RenderedFile>, RenderError> {
        let response = self
            .client
            .post(&self.url)
            .json(&RenderRequest { code, filename })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "renderer rejected request");
            return Err(RenderError::Status {
                status: status.as_u16(),
                message: truncate(&message, 500),
            });
        }

        let body = response.bytes().await?;
        let parsed: RenderResponse = serde_json::from_slice(&body)
            .map_err(|error| RenderError::InvalidResponse(error.to_string()))?;

        let files = parsed
            .files
            .into_iter()
            .map(|file| {
                let content = STANDARD.decode(file.content.as_bytes()).map_err(|error| {
                    RenderError::InvalidResponse(format!("{}: {error}", file.filename))
                })?;
                Ok(RenderedFile {
                    filename: file.filename,
                    content,
                })
            })
            .collect::<Result<Vec<_>, RenderError>>()?;

        if files.is_empty() {
            return Err(RenderError::Empty);
        }

        debug!(count = files.len(), "renderer returned files");
        Ok(files)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Offline renderer producing a placeholder STEP file.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockRenderer;

#[async_trait]
impl Renderer for MockRenderer {
    async fn render(&self, code: &str, filename: &str) -> Result<Vec<RenderedFile>, RenderError> {
        let stem = filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename);
        let content = format!(
            "ISO-10303-21;\nHEADER;\nFILE_DESCRIPTION(('mock render of {} bytes of code'),'2;1');\nENDSEC;\nDATA;\nENDSEC;\nEND-ISO-10303-21;\n",
            code.len()
        );
        Ok(vec![RenderedFile {
            filename: format!("{stem}.step"),
            content: content.into_bytes(),
        }])
    }
}
