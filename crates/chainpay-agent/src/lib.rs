//! # chainpay-agent
//!
//! Provider-agnostic text generation for the chainpay agent jobs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Agent jobs (billing)                   │
//! │   invoice  ─┐                                             │
//! │   renewal  ─┼──▶  LlmProvider::generate(prompt) ──▶ text  │
//! │   analytics ┘          (Strategy)                         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The billing core only ever asks for `generate(prompt) -> String`. Which
//! backend answers (Gemini, Ollama, a scripted mock) is decided once at
//! startup; a missing backend is represented by [`DisabledProvider`], which
//! fails every call with [`AgentError::Unconfigured`].

pub mod error;
pub mod message;
pub mod mock;
pub mod provider;

pub use error::{AgentError, Result};
pub use message::{Message, Role};
pub use mock::MockProvider;
pub use provider::{DisabledProvider, GenerationOptions, LlmProvider};
