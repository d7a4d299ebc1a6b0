use std::sync::Arc;

use tracing::{error, info};

use crate::config::AiProvider;
use crate::llm::{ChatProvider, ProviderReply};

pub const EMPTY_RESPONSE: &str = "Sorry, I received an empty response from the AI.";
pub const NO_TEXT_RESPONSE: &str = "Sorry, I couldn't generate a text response from that.";

const PREVIEW_CHARS: usize = 50;

/// First `max_chars` characters of `text`, for log lines.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn blocked_message(reason: &str) -> String {
    format!(
        "My response was blocked due to: {}. Please rephrase your request.",
        reason
    )
}

pub fn failure_message(provider: AiProvider) -> String {
    format!(
        "Sorry, I encountered an error trying to reach the AI ({}). Please try again later.",
        provider.display_name()
    )
}

/// Turns inbound text into reply text using the configured provider.
/// Provider failures never escape; they become an apology string.
pub struct Responder {
    provider: Arc<dyn ChatProvider>,
}

impl Responder {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> AiProvider {
        self.provider.kind()
    }

    pub async fn respond(&self, text: &str) -> String {
        let provider = self.provider.kind();
        info!(
            "Sending to AI ({}): {}...",
            provider,
            preview(text, PREVIEW_CHARS)
        );

        let reply = match self.provider.generate(text).await {
            Ok(ProviderReply::Text(content)) if !content.trim().is_empty() => {
                content.trim().to_string()
            }
            Ok(ProviderReply::Text(_)) | Ok(ProviderReply::Empty) => EMPTY_RESPONSE.to_string(),
            Ok(ProviderReply::NoText) => NO_TEXT_RESPONSE.to_string(),
            Ok(ProviderReply::Blocked(reason)) => blocked_message(&reason),
            Err(e) => {
                error!("Error calling {} API: {:#}", provider.display_name(), e);
                return failure_message(provider);
            }
        };

        info!(
            "AI response ({}): {}...",
            provider,
            preview(&reply, PREVIEW_CHARS)
        );
        reply
    }
}
