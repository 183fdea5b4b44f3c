//! Error types for the retrieval engine

/// SQLite primary result codes that mean the file itself is damaged
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

/// Messages SQLite reports when part of the layout is missing or unreadable
const SCHEMA_ERROR_MARKERS: &[&str] = &[
    "no such table",
    "no such column",
    "malformed",
    "vtable constructor failed",
];

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Error type for all retrieval operations.
///
/// Embedding failures never show up here: the gateway reports them as
/// [`EmbeddingUnavailable`](memdex_embed::EmbeddingUnavailable) and the engine
/// absorbs them by scoring lexically.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The structured store can't be read or its schema is broken
    #[error("Index for agent '{agent_id}' is corrupt: {reason}")]
    IndexCorrupt { agent_id: String, reason: String },

    /// Writing a rebuilt index failed; the previous index is still committed
    #[error("Rebuilding the index for agent '{agent_id}' failed: {source}")]
    RebuildFailed {
        agent_id: String,
        #[source]
        source: Box<RetrievalError>,
    },

    /// Rejected configuration; fatal at load time
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The agent id is not a single safe path component
    #[error("Invalid agent id: '{agent_id}'")]
    InvalidAgentId { agent_id: String },

    /// The memory document could not be read
    #[error("Memory document for agent '{agent_id}' is unavailable: {source}")]
    DocumentUnavailable {
        agent_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed legacy index: {0}")]
    LegacyFormat(#[from] serde_json::Error),
}

impl RetrievalError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub(crate) fn rebuild_failed(agent_id: &str, source: RetrievalError) -> Self {
        Self::RebuildFailed {
            agent_id: agent_id.to_string(),
            source: Box::new(source),
        }
    }

    /// Whether the same call may succeed if simply tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RebuildFailed { .. })
    }

    /// Whether the stored layout is broken, as opposed to a transient failure
    /// such as a busy database or an I/O hiccup. Only damage is repaired by
    /// rebuilding.
    pub fn is_schema_damage(&self) -> bool {
        match self {
            Self::IndexCorrupt { .. } | Self::LegacyFormat(_) => true,
            Self::RebuildFailed { source, .. } => source.is_schema_damage(),
            Self::Storage(sqlx::Error::Database(e)) => {
                let primary = e
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                matches!(primary, Some(SQLITE_CORRUPT | SQLITE_NOTADB))
                    || SCHEMA_ERROR_MARKERS
                        .iter()
                        .any(|marker| e.message().contains(marker))
            }
            Self::Storage(sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. }) => {
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_failed_is_retryable() {
        let err = RetrievalError::rebuild_failed(
            "alice",
            RetrievalError::Io(std::io::Error::other("disk full")),
        );
        assert!(err.is_retryable());
        assert!(err.to_string().contains("alice"));
        assert!(std::error::Error::source(&err).is_some());

        assert!(!RetrievalError::invalid_config("bad").is_retryable());
        assert!(
            !RetrievalError::IndexCorrupt {
                agent_id: "alice".to_string(),
                reason: "no such table".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_schema_damage_is_told_apart_from_transient_failures() {
        assert!(
            RetrievalError::IndexCorrupt {
                agent_id: "alice".to_string(),
                reason: "unreadable".to_string()
            }
            .is_schema_damage()
        );
        assert!(
            RetrievalError::Storage(sqlx::Error::ColumnNotFound("seq".to_string()))
                .is_schema_damage()
        );
        assert!(
            RetrievalError::rebuild_failed(
                "alice",
                RetrievalError::Storage(sqlx::Error::ColumnNotFound("seq".to_string()))
            )
            .is_schema_damage()
        );

        assert!(!RetrievalError::Storage(sqlx::Error::PoolTimedOut).is_schema_damage());
        assert!(!RetrievalError::Io(std::io::Error::other("busy")).is_schema_damage());
        assert!(!RetrievalError::invalid_config("bad").is_schema_damage());
    }
}
