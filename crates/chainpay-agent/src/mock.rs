//! Mock Provider
//!
//! Scripted provider for tests and offline demos. Echoes a short reply per
//! prompt and can be told to fail for prompts containing a marker.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, FinishReason, GenerationOptions, LlmProvider};

/// Scripted text generator
#[derive(Debug, Default)]
pub struct MockProvider {
    reply: Option<String>,
    fail_marker: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `reply`
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Default::default()
        }
    }

    /// Fail any prompt that contains `marker`
    #[must_use]
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    /// Prompts received so far
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        self.prompts.lock().await.push(prompt.clone());

        if let Some(marker) = &self.fail_marker {
            if prompt.contains(marker.as_str()) {
                return Err(AgentError::Provider(format!("scripted failure on '{marker}'")));
            }
        }

        let content = self.reply.clone().unwrap_or_else(|| {
            let first_line = prompt.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            format!("[mock] {}", first_line.trim())
        });

        Ok(Completion {
            content,
            model: options.model.clone(),
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        })
    }
}
