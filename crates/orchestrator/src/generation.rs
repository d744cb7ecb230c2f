//! Conversation and code generation backends.

use std::sync::Arc;

use async_trait::async_trait;
use denkwerk::{ChatMessage, CompletionRequest, LLMError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{Orchestrator, OrchestratorError};

const CONVERSATION_PROMPT: &str = "You are a mechanical design assistant. \
Restate the part the user asks for, list the key dimensions you will use \
(millimetres unless stated otherwise), and call out any assumption you had to make. \
Keep it short and do not write code.";

const CODEGEN_PROMPT: &str = "You write CadQuery (Python) scripts. \
Produce a single script that builds the described part, assigns the final solid to a \
variable named `result`, and imports nothing except `cadquery as cq` and `math`. \
Reply with exactly one fenced ```python code block and nothing else.";

/// Token counts reported for one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn combine(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
        }
    }
}

impl From<&denkwerk::TokenUsage> for TokenUsage {
    fn from(usage: &denkwerk::TokenUsage) -> Self {
        TokenUsage {
            prompt_tokens: u64::from(usage.prompt_tokens),
            completion_tokens: u64::from(usage.completion_tokens),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Filenames of the attachments the user sent along.
    pub attachments: Vec<String>,
    /// Code from the latest successful turn in the same context, if any.
    pub previous_code: Option<String>,
    pub conversation_model: String,
    pub codegen_model: String,
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model provider error: {0}")]
    Provider(#[from] LLMError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("model {0} returned an empty response")]
    EmptyResponse(String),
}

#[async_trait]
pub trait CadModel: Send + Sync {
    async fn conversation(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError>;

    async fn codegen(
        &self,
        request: &GenerationRequest,
        conversation: &str,
    ) -> Result<GenerationOutput, GenerationError>;
}

/// Calls the configured LLM providers through the orchestrator's index.
pub struct LlmCadModel {
    orchestrator: Arc<Orchestrator>,
}

impl LlmCadModel {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    async fn complete(&self, model: &str, content: String) -> Result<GenerationOutput, GenerationError> {
        let provider = self.orchestrator.provider_for_model(model)?;
        let request = CompletionRequest::new(model.to_string(), vec![ChatMessage::user(content)]);
        let completion = provider.complete(request).await?;

        let text = completion.message.text().unwrap_or_default().to_string();
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse(model.to_string()));
        }

        let usage = completion.usage.as_ref().map(TokenUsage::from).unwrap_or_default();

        debug!(model, tokens = usage.total(), "completion received");
        Ok(GenerationOutput {
            text,
            model: model.to_string(),
            usage,
        })
    }
}

#[async_trait]
impl CadModel for LlmCadModel {
    async fn conversation(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        let content = format!("{CONVERSATION_PROMPT}\n\n{}", describe_request(request));
        self.complete(&request.conversation_model, content).await
    }

    async fn codegen(
        &self,
        request: &GenerationRequest,
        conversation: &str,
    ) -> Result<GenerationOutput, GenerationError> {
        let content = format!(
            "{CODEGEN_PROMPT}\n\n{}\n\nDesign notes:\n{conversation}",
            describe_request(request)
        );
        let mut output = self.complete(&request.codegen_model, content).await?;
        output.text = extract_code_block(&output.text);
        if output.text.is_empty() {
            return Err(GenerationError::EmptyResponse(request.codegen_model.clone()));
        }
        info!(model = %output.model, lines = output.text.lines().count(), "code generated");
        Ok(output)
    }
}

fn describe_request(request: &GenerationRequest) -> String {
    let mut description = format!("Request:\n{}", request.prompt.trim());
    if !request.attachments.is_empty() {
        description.push_str("\n\nAttached files: ");
        description.push_str(&request.attachments.join(", "));
    }
    if let Some(code) = &request.previous_code {
        description.push_str("\n\nCurrent model code:\n```python\n");
        description.push_str(code);
        description.push_str("\n```");
    }
    description
}

/// Deterministic offline backend for development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCadModel;

#[async_trait]
impl CadModel for MockCadModel {
    async fn conversation(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        let text = format!(
            "Plan for \"{}\": a 40 x 20 x 10 mm block with filleted vertical edges.",
            request.prompt.trim()
        );
        Ok(GenerationOutput {
            usage: estimate_usage(&request.prompt, &text),
            text,
            model: request.conversation_model.clone(),
        })
    }

    async fn codegen(
        &self,
        request: &GenerationRequest,
        conversation: &str,
    ) -> Result<GenerationOutput, GenerationError> {
        let title = request.prompt.lines().next().unwrap_or_default().trim();
        let text = format!(
            "import cadquery as cq\n\n# {title}\nresult = cq.Workplane(\"XY\").box(40, 20, 10).edges(\"|Z\").fillet(2)"
        );
        Ok(GenerationOutput {
            usage: estimate_usage(conversation, &text),
            text,
            model: request.codegen_model.clone(),
        })
    }
}

fn estimate_usage(input: &str, output: &str) -> TokenUsage {
    TokenUsage {
        prompt_tokens: input.split_whitespace().count() as u64,
        completion_tokens: output.split_whitespace().count() as u64,
    }
}

/// Return the body of the first fenced code block, or the trimmed text when
/// there is none.
pub fn extract_code_block(text: &str) -> String {
    let Some(start) = text.find("```") else {
        return text.trim().to_string();
    };

    let after_fence = &text[start + 3..];
    let body = match (after_fence.find('\n'), after_fence.find("```")) {
        (Some(newline), Some(close)) if close < newline => &after_fence[..close],
        (Some(newline), _) => &after_fence[newline + 1..],
        (None, _) => after_fence,
    };

    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };

    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "mounting bracket".into(),
            attachments: vec!["sketch.png".into()],
            previous_code: None,
            conversation_model: "mock/conversation".into(),
            codegen_model: "mock/codegen".into(),
        }
    }

    #[test]
    fn extract_code_block_strips_language_fence() {
        let text = "Here you go:\n```python\nimport cadquery as cq\nresult = 1\n```\nthanks";
        assert_eq!(extract_code_block(text), "import cadquery as cq\nresult = 1");
    }

    #[test]
    fn extract_code_block_handles_missing_closing_fence() {
        assert_eq!(extract_code_block("```\nresult = 2\n"), "result = 2");
    }

    #[test]
    fn extract_code_block_returns_plain_text_unchanged() {
        assert_eq!(extract_code_block("  result = 3  "), "result = 3");
    }

    #[test]
    fn extract_code_block_handles_inline_fence() {
        assert_eq!(extract_code_block("```result = 4```"), "result = 4");
    }

    #[test]
    fn describe_request_lists_attachments_and_previous_code() {
        let mut req = request();
        req.previous_code = Some("result = cq.Workplane()".into());
        let text = describe_request(&req);
        assert!(text.contains("mounting bracket"));
        assert!(text.contains("sketch.png"));
        assert!(text.contains("result = cq.Workplane()"));
    }

    #[test]
    fn token_usage_combines_and_totals() {
        let a = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        };
        let b = TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
        };
        assert_eq!(a.combine(b).total(), 18);
    }

    #[test]
    fn provider_usage_keeps_token_counts() {
        let reported = denkwerk::TokenUsage {
            prompt_tokens: 120,
            completion_tokens: 30,
            total_tokens: 150,
        };
        let usage = TokenUsage::from(&reported);
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total(), 150);
    }

    #[tokio::test]
    async fn mock_model_uses_requested_models() {
        let req = request();
        let conversation = MockCadModel.conversation(&req).await.unwrap();
        let code = MockCadModel.codegen(&req, &conversation.text).await.unwrap();

        assert_eq!(conversation.model, "mock/conversation");
        assert_eq!(code.model, "mock/codegen");
        assert!(code.text.contains("result ="));
        assert!(conversation.usage.total() > 0);
    }
}
