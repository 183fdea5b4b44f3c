//! Timeout and failure policy around an [`EmbeddingProvider`].
//!
//! The retrieval engine never talks to a provider directly. Every call goes
//! through [`EmbeddingGateway`], which makes a single attempt bounded by the
//! configured timeout and turns every failure into [`EmbeddingUnavailable`].
//! Nothing here retries.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, EmbeddingUnavailable, Result};
use crate::provider::{DisabledProvider, EmbeddingProvider, create_provider};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
    batch_size: usize,
}

impl std::fmt::Debug for EmbeddingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("provider", &self.identity())
            .field("timeout", &self.timeout)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl EmbeddingGateway {
    /// Wrap an existing provider.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration, batch_size: usize) -> Self {
        Self {
            provider,
            timeout,
            batch_size: batch_size.max(1),
        }
    }

    /// Build the configured provider and wrap it.
    pub fn from_config(config: &EmbedConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        Ok(Self::new(provider, config.timeout(), config.batch_size))
    }

    /// A gateway whose every call is unavailable.
    pub fn disabled() -> Self {
        let config = EmbedConfig::disabled();
        Self::new(Arc::new(DisabledProvider), config.timeout(), config.batch_size)
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// `provider:model`, as recorded next to cached vectors.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.provider_name(), self.model_name())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn unavailable(&self, source: EmbedError) -> EmbeddingUnavailable {
        EmbeddingUnavailable {
            provider: self.identity(),
            source,
        }
    }

    async fn bounded(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let result = tokio::time::timeout(self.timeout, self.provider.embed_texts(texts))
            .await
            .map_err(|_| EmbedError::Timeout {
                after: self.timeout,
            })??;
        if result.len() != texts.len() {
            return Err(EmbedError::invalid_response(format!(
                "expected {} vectors, got {}",
                texts.len(),
                result.len()
            )));
        }
        Ok(result.embeddings)
    }

    /// Embed one text with a single bounded attempt.
    ///
    /// Empty vectors and vectors containing NaN or infinity count as an invalid
    /// response.
    pub async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingUnavailable> {
        let mut vectors = self
            .bounded(&[text.to_string()])
            .await
            .map_err(|e| self.unavailable(e))?;
        match vectors.pop() {
            Some(vector) if is_usable(&vector) => Ok(vector),
            _ => Err(self.unavailable(EmbedError::invalid_response(
                "provider returned an empty or non-finite vector",
            ))),
        }
    }

    /// Embed many texts, best effort.
    ///
    /// Returns one slot per input. Texts are sent `batch_size` at a time; a
    /// failed batch leaves its slots empty. Once the provider looks unreachable
    /// (timeout, transport failure, auth or rate limit) the remaining batches are
    /// skipped, so a dead provider costs at most one timeout.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            match self.bounded(batch).await {
                Ok(vectors) => {
                    out.extend(
                        vectors
                            .into_iter()
                            .map(|v| if is_usable(&v) { Some(v) } else { None }),
                    );
                }
                Err(e) => {
                    let unreachable = e.is_unreachable();
                    tracing::warn!(
                        "{}; {} chunk(s) indexed without vectors",
                        self.unavailable(e),
                        batch.len()
                    );
                    out.extend(std::iter::repeat_n(None, batch.len()));
                    if unreachable {
                        break;
                    }
                }
            }
        }

        out.resize(texts.len(), None);
        out
    }
}

fn is_usable(vector: &[f32]) -> bool {
    !vector.is_empty() && vector.iter().all(|x| x.is_finite())
}
