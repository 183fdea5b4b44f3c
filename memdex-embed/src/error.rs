//! Error types for the embedding system

use std::time::Duration;

/// Result type for embedding operations.
///
/// This is a convenience type alias that uses [`EmbedError`] as the error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Every variant describes why a provider could not produce vectors. None of
/// them is fatal to the retrieval engine: the [`EmbeddingGateway`] wraps them in
/// [`EmbeddingUnavailable`] and callers fall back to lexical scoring.
///
/// # Error Categories
///
/// - **Configuration Errors**: missing API keys, invalid settings
/// - **Transport Errors**: connection failures, timeouts
/// - **Provider Errors**: non-success HTTP status (auth, rate limit, server error)
/// - **Response Errors**: malformed or mismatched response bodies
///
/// [`EmbeddingGateway`]: crate::gateway::EmbeddingGateway
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// No provider is configured
    #[error("Embedding provider is disabled")]
    Disabled,

    /// The provider needs an API key that was not supplied
    #[error("{env_var} is required for the {provider} embedding provider")]
    MissingCredentials {
        provider: String,
        env_var: &'static str,
    },

    /// Error when configuration is invalid
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// The call did not finish within the configured timeout
    #[error("Embedding request timed out after {after:?}")]
    Timeout { after: Duration },

    /// Connection, TLS or body decoding failures
    #[error("Embedding transport failed: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },

    /// The provider answered with a non-success status
    #[error("Embedding provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The provider answered, but not with usable vectors
    #[error("Invalid embedding response: {message}")]
    InvalidResponse { message: String },
}

impl EmbedError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid response error with a custom message.
    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Whether further calls to the same provider are pointless right now.
    ///
    /// Timeouts, transport failures, missing credentials and auth/rate-limit
    /// rejections will fail every remaining batch the same way, so batch
    /// embedding stops at the first one.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Disabled
            | Self::MissingCredentials { .. }
            | Self::Timeout { .. }
            | Self::Transport { .. } => true,
            Self::Status { status, .. } => matches!(status, 401 | 403 | 429),
            Self::InvalidConfig { .. } | Self::InvalidResponse { .. } => false,
        }
    }
}

/// A recoverable failure to obtain an embedding.
///
/// Produced by the gateway for every provider error. It is logged and absorbed
/// by the retrieval engine, never shown to an end user.
#[derive(Debug, thiserror::Error)]
#[error("embedding unavailable from {provider}: {source}")]
pub struct EmbeddingUnavailable {
    /// `provider:model` of the provider that failed
    pub provider: String,
    #[source]
    pub source: EmbedError,
}
