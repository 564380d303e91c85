//! Errors produced by model backends.

use thiserror::Error;

use crate::chat::core::errors::ChatError;

/// Model backend error type.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP client error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// HTTP response was not a success.
    #[error("model backend returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// Rig client construction error.
    #[error("rig client error: {0}")]
    RigClient(#[from] rig::http_client::Error),
    /// Rig completion error.
    #[error("completion error: {0}")]
    Completion(#[from] rig::completion::CompletionError),
    /// A streamed chunk could not be decoded.
    #[error("malformed stream chunk: {0}")]
    Decode(String),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// The model returned no text.
    #[error("model returned an empty response")]
    Empty,
}

impl From<LlmError> for ChatError {
    fn from(value: LlmError) -> Self {
        Self::ModelUnavailable(value.to_string())
    }
}
