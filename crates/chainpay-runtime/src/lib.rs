//! # chainpay-runtime
//!
//! Concrete text generators for chainpay agent jobs.
//!
//! ## Providers
//!
//! - **Gemini** (default): Google Generative Language API, keyed by `GEMINI_API_KEY`
//! - **Ollama** (feature `ollama`): local inference
//!
//! ## Usage
//!
//! ```rust,ignore
//! let provider = chainpay_runtime::provider_from_env();
//! let text = provider.generate("Write a renewal reminder ...").await?;
//! ```

use std::sync::Arc;

pub mod gemini;
#[cfg(feature = "ollama")]
pub mod ollama;

pub use gemini::{GeminiConfig, GeminiProvider};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

// Re-export core types for convenience
pub use chainpay_agent::{AgentError, DisabledProvider, LlmProvider, Message, Result, Role};

/// Build the text generator selected by `TEXT_GENERATOR` (`gemini` | `ollama`).
///
/// An unconfigured Gemini backend is still returned; every call then fails
/// with `AgentError::Unconfigured`, which batch jobs treat as a per-item skip.
pub fn provider_from_env() -> Arc<dyn LlmProvider> {
    let choice = std::env::var("TEXT_GENERATOR").unwrap_or_else(|_| "gemini".into());

    match choice.to_lowercase().as_str() {
        #[cfg(feature = "ollama")]
        "ollama" => Arc::new(OllamaProvider::from_env()),
        "gemini" => Arc::new(GeminiProvider::from_env()),
        "none" | "disabled" => Arc::new(DisabledProvider::new("text generation disabled")),
        other => {
            tracing::warn!(text_generator = %other, "Unknown TEXT_GENERATOR, text generation disabled");
            Arc::new(DisabledProvider::new(format!("unknown text generator '{other}'")))
        }
    }
}
