//! # memdex-embed
//!
//! Remote text embeddings for the memdex retrieval engine.
//!
//! Providers implement [`EmbeddingProvider`]; the engine only ever calls them
//! through an [`EmbeddingGateway`], which bounds each call with a timeout and
//! reports every failure as a recoverable [`EmbeddingUnavailable`]. A missing
//! key, an outage or a rate limit degrades retrieval to lexical scoring, it
//! never fails a query.
//!
//! ## Quick Start
//!
//! ```no_run
//! use memdex_embed::{EmbedConfig, EmbeddingGateway, ProviderKind};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EmbedConfig::new(ProviderKind::OpenAi).with_env_overrides();
//! let gateway = EmbeddingGateway::from_config(&config)?;
//!
//! match gateway.embed("when does the deploy key rotate?").await {
//!     Ok(vector) => println!("{} dimensions", vector.len()),
//!     Err(unavailable) => println!("lexical only: {unavailable}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **openai**: any OpenAI-compatible `/embeddings` endpoint
//! - **google_ai_studio**: Google AI Studio `embedContent` / `batchEmbedContents`
//! - **disabled**: no provider, every call is unavailable
//!
//! ## Modules
//!
//! - [`config`]: provider selection, model, endpoint, timeout and batch size
//! - [`provider`]: the provider trait and HTTP backends
//! - [`gateway`]: timeout and failure policy
//! - [`error`]: error types and result handling

pub mod config;
pub mod error;
pub mod gateway;
pub mod provider;

// Re-export main types for easy access
pub use config::{EmbedConfig, ProviderKind};
pub use error::{EmbedError, EmbeddingUnavailable, Result};
pub use gateway::EmbeddingGateway;
pub use provider::{
    DisabledProvider, EmbeddingProvider, EmbeddingResult, GoogleAiStudioProvider, OpenAiProvider,
    create_provider,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = EmbedConfig::new(ProviderKind::GoogleAiStudio).with_batch_size(8);
        assert_eq!(config.model_name(), "gemini-embedding-001");
        assert_eq!(config.batch_size, 8);

        let gateway = EmbeddingGateway::from_config(&config).unwrap();
        assert_eq!(gateway.identity(), "google_ai_studio:gemini-embedding-001");
        assert_eq!(gateway.batch_size(), 8);
    }
}
