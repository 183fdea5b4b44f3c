//! Embedding provider implementations

use crate::config::{EmbedConfig, ProviderKind};
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longest provider error body kept in an [`EmbedError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Result of embedding generation
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first embedding vector and is 0 when
    /// there are none.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for multiple texts in one request.
    ///
    /// Implementations return exactly one vector per input, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text.to_string()])
            .await?
            .embeddings
            .pop()
            .ok_or_else(|| EmbedError::invalid_response("empty embedding response"))
    }

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Get the model this provider embeds with
    fn model_name(&self) -> &str;
}

/// Build the provider selected by `config`.
///
/// Fails only on invalid configuration. A missing API key is not an error here;
/// the provider reports it on every call so the engine can run lexical-only.
pub fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;

    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::GoogleAiStudio => Arc::new(GoogleAiStudioProvider::new(config)?),
        ProviderKind::Disabled => Arc::new(DisabledProvider),
    };
    tracing::debug!(
        "Embedding provider {}:{}",
        provider.provider_name(),
        provider.model_name()
    );
    Ok(provider)
}

fn http_client(config: &EmbedConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.timeout())
        .build()?)
}

/// Turn a non-success response into [`EmbedError::Status`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(EmbedError::Status {
        status: status.as_u16(),
        body,
    })
}

fn ensure_count(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(EmbedError::invalid_response(format!(
            "embedding response size mismatch: expected {expected}, got {}",
            vectors.len()
        )));
    }
    Ok(())
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

/// Resolve the `/embeddings` URL for an OpenAI-compatible base URL.
///
/// Accepts a bare host, a versioned base (`.../v1`, `.../v4`) or the full
/// endpoint.
fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with("/embeddings") {
        return normalized;
    }
    if has_version_suffix(&normalized) {
        return format!("{normalized}/embeddings");
    }
    format!("{normalized}/v1/embeddings")
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Order the rows by their `index` field and check one row per input.
fn parse_openai_response(response: OpenAiResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut rows = response.data;
    rows.sort_by_key(|row| row.index);
    let vectors: Vec<Vec<f32>> = rows.into_iter().map(|row| row.embedding).collect();
    ensure_count(&vectors, expected)?;
    Ok(vectors)
}

/// OpenAI (or OpenAI-compatible) embeddings over HTTP
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(config: &EmbedConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            api_key: config.api_key.clone(),
            endpoint: embeddings_endpoint(config.base_url()),
            model: config.model_name().to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(Vec::new()));
        }
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EmbedError::MissingCredentials {
                provider: ProviderKind::OpenAi.to_string(),
                env_var: "OPENAI_API_KEY",
            })?;

        let request = OpenAiRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await?;
        let body: OpenAiResponse = check_status(response).await?.json().await?;

        Ok(EmbeddingResult::new(parse_openai_response(
            body,
            texts.len(),
        )?))
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct GoogleContentRequest<'a> {
    model: &'a str,
    content: GoogleContent<'a>,
}

#[derive(Serialize)]
struct GoogleContent<'a> {
    parts: [GooglePart<'a>; 1],
}

#[derive(Serialize)]
struct GooglePart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GoogleBatchRequest<'a> {
    requests: Vec<GoogleContentRequest<'a>>,
}

#[derive(Deserialize, Default)]
struct GoogleValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct GoogleSingleResponse {
    embedding: GoogleValues,
}

#[derive(Deserialize)]
struct GoogleBatchResponse {
    #[serde(default)]
    embeddings: Vec<GoogleValues>,
}

/// Google AI Studio embeddings (`embedContent` / `batchEmbedContents`)
pub struct GoogleAiStudioProvider {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    /// `models/{model}` as the API addresses it
    model_path: String,
}

impl std::fmt::Debug for GoogleAiStudioProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleAiStudioProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.is_some())
            .finish()
    }
}

impl GoogleAiStudioProvider {
    pub fn new(config: &EmbedConfig) -> Result<Self> {
        let model = config.model_name().trim().to_string();
        let model_path = if model.starts_with("models/") {
            model.clone()
        } else {
            format!("models/{model}")
        };
        Ok(Self {
            client: http_client(config)?,
            api_key: config.api_key.clone(),
            base_url: normalize_base_url(config.base_url()),
            model,
            model_path,
        })
    }

    fn request_for<'a>(&'a self, text: &'a str) -> GoogleContentRequest<'a> {
        GoogleContentRequest {
            model: &self.model_path,
            content: GoogleContent {
                parts: [GooglePart { text }],
            },
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        method: &str,
        api_key: &SecretString,
        body: &T,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/{}:{method}", self.base_url, self.model_path);
        // Errors carry the request URL; strip it so the key never reaches a log.
        let response = self
            .client
            .post(url)
            .query(&[("key", api_key.expose_secret().as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| EmbedError::from(e.without_url()))?;
        check_status(response).await
    }
}

#[async_trait]
impl EmbeddingProvider for GoogleAiStudioProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(Vec::new()));
        }
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EmbedError::MissingCredentials {
                provider: ProviderKind::GoogleAiStudio.to_string(),
                env_var: "GOOGLE_API_KEY",
            })?;

        let vectors = if let [text] = texts {
            let response = self
                .post("embedContent", api_key, &self.request_for(text))
                .await?;
            let body: GoogleSingleResponse =
                response.json().await.map_err(|e| e.without_url())?;
            vec![body.embedding.values]
        } else {
            let request = GoogleBatchRequest {
                requests: texts.iter().map(|t| self.request_for(t)).collect(),
            };
            let response = self.post("batchEmbedContents", api_key, &request).await?;
            let body: GoogleBatchResponse =
                response.json().await.map_err(|e| e.without_url())?;
            body.embeddings.into_iter().map(|e| e.values).collect()
        };

        ensure_count(&vectors, texts.len())?;
        Ok(EmbeddingResult::new(vectors))
    }

    fn provider_name(&self) -> &str {
        "google_ai_studio"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Provider used when embeddings are turned off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    async fn embed_texts(&self, _texts: &[String]) -> Result<EmbeddingResult> {
        Err(EmbedError::Disabled)
    }

    fn provider_name(&self) -> &str {
        "disabled"
    }

    fn model_name(&self) -> &str {
        "none"
    }
}
