//! Error types for the agent.

use thiserror::Error;

/// Errors that can occur in agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote API answered with a non-success status.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The completion had no text in it.
    #[error("empty completion")]
    EmptyResponse,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AgentError {
    /// Strip any request URL from transport errors.
    pub(crate) fn without_url(self) -> Self {
        match self {
            AgentError::Http(e) => AgentError::Http(e.without_url()),
            other => other,
        }
    }
}
