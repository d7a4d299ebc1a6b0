pub mod gemini;
pub mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{AiProvider, LlmConfig};

/// What a provider produced for one prompt, before it becomes user-facing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderReply {
    /// Generated text, as returned by the provider.
    Text(String),
    /// The provider answered with candidates but none carried text.
    NoText,
    /// The prompt was withheld by safety filtering.
    Blocked(String),
    /// Neither text nor a block reason came back.
    Empty,
}

/// A single-turn completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> AiProvider;

    async fn generate(&self, text: &str) -> Result<ProviderReply>;
}

/// Build the provider selected by the configuration. Called once at startup.
pub fn build_provider(config: &LlmConfig) -> Arc<dyn ChatProvider> {
    match config.provider {
        AiProvider::Openai => Arc::new(openai::OpenAiClient::new(config.clone())),
        AiProvider::Gemini => Arc::new(gemini::GeminiClient::new(config.clone())),
    }
}
