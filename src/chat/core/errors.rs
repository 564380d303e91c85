//! Error types for the chat orchestration core.

use thiserror::Error;

/// Chat subsystem error type.
///
/// Variants are grouped by how they propagate: client input defects and
/// ownership failures are terminal and rejected before any model cost, tool
/// failures are folded back into the model context, and persistence failures
/// are fatal only before the response stream opens.
#[derive(Debug, Error)]
pub enum ChatError {
    /// An incoming message lacks a role or has empty content.
    #[error("malformed message at index {index}: {reason}")]
    MalformedMessage {
        /// Position of the offending message in the request.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },
    /// A request field other than a message is invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The message history holds no user message.
    #[error("no user message found")]
    NoUserMessage,
    /// The caller does not own the requested resource, or has no identity.
    #[error("unauthorized")]
    Unauthorized,
    /// A requested record does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The requested model variant is not in the catalog.
    #[error("model not found: {0}")]
    ModelNotFound(String),
    /// The model could not be reached or failed mid-stream.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// Tool arguments failed schema validation.
    #[error("invalid parameters for tool {tool}: {reason}")]
    InvalidToolParameters {
        /// Tool name.
        tool: String,
        /// Validation failure.
        reason: String,
    },
    /// Tool execution failed.
    #[error("tool {tool} failed: {reason}")]
    ToolExecution {
        /// Tool name.
        tool: String,
        /// Failure description.
        reason: String,
    },
    /// `SQLite` storage error (sync).
    #[error("persistence error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("persistence error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Stored data could not be decoded.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// HTTP client error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The per-request ceiling elapsed.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),
}

impl ChatError {
    /// Build a `MalformedMessage` error.
    #[must_use]
    pub fn malformed(index: usize, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            index,
            reason: reason.into(),
        }
    }

    /// Build a `ToolExecution` error.
    #[must_use]
    pub fn tool_failed(tool: impl Into<String>, reason: impl ToString) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    /// HTTP-equivalent status code for errors surfaced before the stream opens.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::MalformedMessage { .. }
            | Self::NoUserMessage
            | Self::InvalidRequest(_)
            | Self::InvalidToolParameters { .. }
            | Self::Serialization(_) => 400,
            Self::Unauthorized => 401,
            Self::NotFound(_) | Self::ModelNotFound(_) => 404,
            Self::ModelUnavailable(_) | Self::Http(_) => 502,
            Self::Timeout(_) => 504,
            Self::ToolExecution { .. }
            | Self::Sqlite(_)
            | Self::TokioSqlite(_)
            | Self::Persistence(_)
            | Self::Url(_)
            | Self::Regex(_)
            | Self::InvalidConfig(_) => 500,
        }
    }

    /// Whether this error is a storage failure.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(_) | Self::TokioSqlite(_) | Self::Persistence(_)
        )
    }
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
