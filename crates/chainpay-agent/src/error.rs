//! Error Types

use thiserror::Error;

/// Result type alias for text generation
pub type Result<T> = std::result::Result<T, AgentError>;

/// Text generation errors
#[derive(Error, Debug)]
pub enum AgentError {
    /// No backend configured (missing API key, disabled provider)
    #[error("Text generator not configured: {0}")]
    Unconfigured(String),

    /// Backend returned an error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Backend unreachable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Backend answered but produced no text
    #[error("Provider returned an empty completion")]
    EmptyCompletion,

    /// Rate limited by the backend
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderUnavailable(_) | AgentError::RateLimited(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Unconfigured(_) => {
                "Text generation is not configured on this server.".into()
            }
            AgentError::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            AgentError::ProviderUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            AgentError::EmptyCompletion => "The AI service returned no text.".into(),
            AgentError::RateLimited(_) => {
                "You've made too many requests. Please wait a moment.".into()
            }
            AgentError::Auth(_) => "Authentication with the AI service failed.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}
