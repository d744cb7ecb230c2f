use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "chat3d.toml",
    "config/chat3d.toml",
    "crates/config/chat3d.toml",
    "../chat3d.toml",
    "../config/chat3d.toml",
    "backend/chat3d.toml",
    "backend/config/chat3d.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub orchestrator: OrchestratorConfig,
    pub renderer: RendererConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
    /// Origins allowed by CORS. An empty list allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
            allowed_origins: Vec::new(),
        }
    }
}

/// Which backend produces conversation text and CAD code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    OpenRouter,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub mode: GenerationMode,
    pub conversation_model: String,
    pub codegen_model: String,
    pub provider_search_path: Vec<String>,
    pub openrouter: OpenRouterProviderConfig,
    pub pricing: PricingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: GenerationMode::OpenRouter,
            conversation_model: "openai/gpt-4.1-mini".to_string(),
            codegen_model: "anthropic/claude-sonnet-4".to_string(),
            provider_search_path: vec!["providers".to_string()],
            openrouter: OpenRouterProviderConfig::default(),
            pricing: PricingConfig::default(),
        }
    }
}

/// Configuration options for the built-in OpenRouter provider integration.
///
/// ```
/// use chat3d_config::OpenRouterProviderConfig;
///
/// let provider = OpenRouterProviderConfig::default();
/// assert_eq!(provider.base_url, "https://openrouter.ai/api/v1");
/// assert_eq!(provider.request_timeout_seconds, 120);
/// assert!(provider.api_key.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "OpenRouterProviderConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "OpenRouterProviderConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default = "OpenRouterProviderConfig::default_title")]
    pub title: Option<String>,
}

impl OpenRouterProviderConfig {
    fn default_base_url() -> String {
        "https://openrouter.ai/api/v1".to_string()
    }

    const fn default_request_timeout() -> u64 {
        120
    }

    fn default_title() -> Option<String> {
        Some("Chat3D".to_string())
    }
}

impl Default for OpenRouterProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Self::default_base_url(),
            request_timeout_seconds: Self::default_request_timeout(),
            referer: None,
            title: Self::default_title(),
        }
    }
}

/// Token prices in USD per million tokens, used for the cost summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            prompt_per_million: 3.0,
            completion_per_million: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererMode {
    Http,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub mode: RendererMode,
    pub url: String,
    pub request_timeout_seconds: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            mode: RendererMode::Http,
            url: "http://127.0.0.1:8090/render".to_string(),
            request_timeout_seconds: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: String,
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "data/files".to_string(),
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://chat3d.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// Accounts registered with one of these emails become administrators and
    /// bypass the registration mode.
    #[serde(default)]
    pub bootstrap_admin_emails: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: Self::default_session_ttl(),
            bootstrap_admin_emails: Vec::new(),
        }
    }
}

impl AuthConfig {
    fn default_session_ttl() -> u64 {
        86_400 * 7
    }

    pub fn is_bootstrap_admin(&self, email: &str) -> bool {
        self.bootstrap_admin_emails
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(email.trim()))
    }
}

/// Fixed-window request limits.
///
/// Sensitive requests (login, registration, waitlist) use their own, usually
/// stricter, budget.
///
/// ```
/// use chat3d_config::RateLimitConfig;
///
/// let limits = RateLimitConfig::default();
/// assert!(limits.enabled);
/// assert!(limits.sensitive_max_requests < limits.max_requests);
/// assert!(limits.redis_url.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_seconds: u64,
    pub max_requests: u64,
    pub sensitive_window_seconds: u64,
    pub sensitive_max_requests: u64,
    pub redis_url: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 60,
            max_requests: 120,
            sensitive_window_seconds: 900,
            sensitive_max_requests: 10,
            redis_url: None,
        }
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use chat3d_config::load;
///
/// std::env::remove_var("CHAT3D_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let session_ttl_i64 = i64::try_from(defaults.auth.session_ttl_seconds).unwrap_or(i64::MAX);

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default(
            "orchestrator.conversation_model",
            defaults.orchestrator.conversation_model.clone(),
        )?
        .set_default(
            "orchestrator.codegen_model",
            defaults.orchestrator.codegen_model.clone(),
        )?
        .set_default("renderer.url", defaults.renderer.url.clone())?
        .set_default("storage.root", defaults.storage.root.clone())?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.session_ttl_seconds", session_ttl_i64)?;

    let environment_overrides = config::Environment::with_prefix("CHAT3D").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("CHAT3D_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via CHAT3D_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.auth.session_ttl_seconds > i64::MAX as u64 {
        config.auth.session_ttl_seconds = i64::MAX as u64;
    }

    debug!(?config, "loaded backend configuration");
    Ok(config)
}
