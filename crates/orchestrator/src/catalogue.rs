//! Model catalogue offered to users when they pick per-context models.

use std::collections::HashMap;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::OpenRouterEndpoint;
use crate::OrchestratorError;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// USD per million tokens, the unit the cost summary works in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub prompt_per_million: Option<f64>,
    pub completion_per_million: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pricing: Option<ModelPricing>,
}

impl ModelSummary {
    pub(crate) fn named(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: id.to_string(),
            description: None,
            pricing: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogueResponse {
    data: Vec<CatalogueEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogueEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    pricing: HashMap<String, String>,
}

impl From<CatalogueEntry> for ModelSummary {
    fn from(entry: CatalogueEntry) -> Self {
        let prompt = per_million(entry.pricing.get("prompt"));
        let completion = per_million(entry.pricing.get("completion"));
        let pricing = (prompt.is_some() || completion.is_some()).then_some(ModelPricing {
            prompt_per_million: prompt,
            completion_per_million: completion,
        });

        Self {
            label: entry.name.unwrap_or_else(|| entry.id.clone()),
            id: entry.id,
            description: entry.description,
            pricing,
        }
    }
}

/// OpenRouter quotes prices per token as decimal strings.
fn per_million(per_token: Option<&String>) -> Option<f64> {
    per_token
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .map(|value| value * TOKENS_PER_MILLION)
}

pub(crate) async fn fetch_openrouter(
    endpoint: &OpenRouterEndpoint,
) -> Result<Vec<ModelSummary>, OrchestratorError> {
    let client = Client::builder().timeout(endpoint.timeout).build()?;

    let mut request = client
        .get(format!("{}/models", endpoint.base_url))
        .bearer_auth(&endpoint.api_key);
    if let Some(referer) = &endpoint.referer {
        request = request.header("HTTP-Referer", referer);
    }
    if let Some(title) = &endpoint.title {
        request = request.header("X-Title", title);
    }

    let catalogue: CatalogueResponse = request.send().await?.error_for_status()?.json().await?;
    debug!(count = catalogue.data.len(), "openrouter catalogue fetched");

    Ok(catalogue.data.into_iter().map(ModelSummary::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pricing: &[(&str, &str)]) -> CatalogueEntry {
        CatalogueEntry {
            id: "vendor/model".into(),
            name: None,
            description: None,
            pricing: pricing
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    #[test]
    fn per_token_prices_become_per_million() {
        let summary = ModelSummary::from(entry(&[("prompt", "0.000003"), ("completion", "0.000015")]));
        let pricing = summary.pricing.unwrap();
        assert!((pricing.prompt_per_million.unwrap() - 3.0).abs() < 1e-9);
        assert!((pricing.completion_per_million.unwrap() - 15.0).abs() < 1e-9);
        assert_eq!(summary.label, "vendor/model");
    }

    #[test]
    fn unparseable_prices_are_dropped() {
        let summary = ModelSummary::from(entry(&[("prompt", "n/a"), ("completion", "-1")]));
        assert!(summary.pricing.is_none());
    }
}
