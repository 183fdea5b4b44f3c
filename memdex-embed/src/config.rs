//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GOOGLE_MODEL: &str = "gemini-embedding-001";
pub const DEFAULT_GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Which embedding backend is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ProviderKind {
    /// OpenAI or any OpenAI-compatible `/embeddings` endpoint
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Google AI Studio (`embedContent` / `batchEmbedContents`)
    #[serde(rename = "google_ai_studio")]
    GoogleAiStudio,
    /// No provider; retrieval runs lexical-only
    #[serde(rename = "disabled")]
    Disabled,
}

impl ProviderKind {
    /// Model used when none is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => DEFAULT_OPENAI_MODEL,
            ProviderKind::GoogleAiStudio => DEFAULT_GOOGLE_MODEL,
            ProviderKind::Disabled => "none",
        }
    }

    /// Environment variable holding this provider's API key
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::GoogleAiStudio => Some("GOOGLE_API_KEY"),
            ProviderKind::Disabled => None,
        }
    }

    /// Environment variable overriding the model name
    fn model_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("EMBEDDING_MODEL"),
            ProviderKind::GoogleAiStudio => Some("GOOGLE_EMBEDDING_MODEL"),
            ProviderKind::Disabled => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::GoogleAiStudio => write!(f, "google_ai_studio"),
            ProviderKind::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "google_ai_studio" | "google-ai-studio" | "google" => Ok(ProviderKind::GoogleAiStudio),
            "disabled" | "none" | "off" => Ok(ProviderKind::Disabled),
            _ => Err(format!(
                "Invalid embedding provider: '{s}'. Valid values are: openai, google_ai_studio, disabled"
            )),
        }
    }
}

/// Configuration for the active embedding provider
///
/// Deserialized from the `[embedding]` table of the engine configuration. API
/// keys are never read from the file; they come from the environment through
/// [`with_env_overrides`](Self::with_env_overrides) or
/// [`with_api_key`](Self::with_api_key).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Backend to call
    pub provider: ProviderKind,
    /// Model name; the provider default when unset
    pub model: Option<String>,
    /// Endpoint base URL; the provider default when unset
    pub base_url: Option<String>,
    /// Upper bound for a single embedding call
    pub timeout_secs: u64,
    /// Maximum texts per provider request
    pub batch_size: usize,
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            base_url: None,
            timeout_secs: 5,
            batch_size: 16,
            api_key: None,
        }
    }
}

impl EmbedConfig {
    /// Create a configuration for the given provider with default settings
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    /// Create a configuration with no provider (lexical-only retrieval)
    pub fn disabled() -> Self {
        Self::new(ProviderKind::Disabled)
    }

    /// Set the model name (builder style)
    pub fn with_model<S: Into<String>>(self, model: S) -> Self {
        Self {
            model: Some(model.into()),
            ..self
        }
    }

    /// Set the endpoint base URL (builder style)
    pub fn with_base_url<S: Into<String>>(self, base_url: S) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..self
        }
    }

    /// Set the API key (builder style)
    pub fn with_api_key<S: Into<String>>(self, api_key: S) -> Self {
        Self {
            api_key: Some(SecretString::new(api_key.into())),
            ..self
        }
    }

    /// Set the per-call timeout (builder style)
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout_secs: timeout.as_secs().max(1),
            ..self
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Apply the operator's environment: provider, model, base URL and API key.
    ///
    /// Unknown `EMBEDDING_PROVIDER` values are ignored with a warning, keeping
    /// the configured provider.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an
    /// injectable lookup, so tests don't touch the process environment.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = non_empty("EMBEDDING_PROVIDER") {
            match raw.parse::<ProviderKind>() {
                Ok(provider) => self.provider = provider,
                Err(e) => tracing::warn!("{}; keeping {}", e, self.provider),
            }
        }
        if let Some(model) = self.provider.model_env().and_then(|key| non_empty(key)) {
            self.model = Some(model);
        }
        if self.provider == ProviderKind::OpenAi {
            if let Some(base_url) = non_empty("OPENAI_BASE_URL") {
                self.base_url = Some(base_url);
            }
        }
        if let Some(key) = self.provider.api_key_env().and_then(|key| non_empty(key)) {
            self.api_key = Some(SecretString::new(key));
        }
        self
    }

    /// Model name in effect
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Base URL in effect
    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url,
            (None, ProviderKind::GoogleAiStudio) => DEFAULT_GOOGLE_BASE_URL,
            (None, _) => DEFAULT_OPENAI_BASE_URL,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate settings that can't be checked by the type system
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(EmbedError::invalid_config(
                "embedding timeout must be at least one second",
            ));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config(
                "embedding batch size must be greater than zero",
            ));
        }
        if self.model_name().trim().is_empty() {
            return Err(EmbedError::invalid_config("embedding model name is empty"));
        }
        Ok(())
    }
}
