//! LLM Provider Strategy Pattern
//!
//! Common interface for text generation backends (Gemini, Ollama, mocks).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chainpay_agent::LlmProvider;
//!
//! let provider: Arc<dyn LlmProvider> = Arc::new(GeminiProvider::from_env());
//! let invoice = provider.generate("Generate a professional invoice ...").await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::Message;

/// Configuration for generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gemini-2.0-flash", "llama3.2")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

const fn default_temperature() -> f32 {
    0.7
}
const fn default_max_tokens() -> u32 {
    1024
}
const fn default_top_p() -> f32 {
    0.9
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

impl GenerationOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Response from a completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// Token usage statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}

/// Strategy trait for text generation backends
///
/// The billing core only calls [`LlmProvider::generate`]; backends implement
/// [`LlmProvider::complete`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., "Gemini", "Ollama")
    fn name(&self) -> &str;

    /// Options used by [`LlmProvider::generate`]
    fn default_options(&self) -> GenerationOptions {
        GenerationOptions::default()
    }

    /// Check if the provider is reachable and configured
    async fn health_check(&self) -> Result<bool>;

    /// Generate a completion from messages
    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// Generate text for a single prompt
    async fn generate(&self, prompt: &str) -> Result<String> {
        let options = self.default_options();
        let completion = self
            .complete(&[Message::user(prompt.trim())], &options)
            .await?;

        let text = completion.content.trim();
        if text.is_empty() {
            return Err(AgentError::EmptyCompletion);
        }

        tracing::debug!(
            provider = self.name(),
            model = %completion.model,
            chars = text.len(),
            "Generated text"
        );

        Ok(text.to_string())
    }
}

/// Stand-in used when no backend is configured
#[derive(Clone, Debug)]
pub struct DisabledProvider {
    reason: String,
}

impl DisabledProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for DisabledProvider {
    fn name(&self) -> &str {
        "Disabled"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<Completion> {
        Err(AgentError::Unconfigured(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert!((opts.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(opts.max_tokens, 1024);
        assert_eq!(opts.model, "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn test_disabled_provider_is_unconfigured() {
        let provider = DisabledProvider::new("GEMINI_API_KEY not configured");
        let err = provider.generate("hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Unconfigured(_)));
        assert!(!provider.health_check().await.unwrap());
    }
}
