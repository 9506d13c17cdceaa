//! Collaborator seams: text embedding and text completion.
//!
//! The consolidation core only sees these traits; [`llm_client::LlmClient`]
//! implements both against an OpenAI-compatible HTTP API.

pub mod llm_client;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::Message;

pub use llm_client::{LlmClient, LlmClientConfig};

/// Sampling settings for one completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
        }
    }
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self::new("llama-3.1-8b-instant", 0.2, 400)
    }
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Map text to a fixed-dimension vector.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> anyhow::Result<String>;
}
