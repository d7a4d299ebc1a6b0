use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AiProvider, LlmConfig};
use crate::llm::{ChatProvider, ProviderReply};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Client for OpenAI's `/chat/completions` endpoint, or anything speaking
/// the same protocol.
pub struct OpenAiClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn build_request(&self, text: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(ChatMessage::new("system", prompt));
        }
        messages.push(ChatMessage::new("user", text));

        ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    fn kind(&self) -> AiProvider {
        AiProvider::Openai
    }

    async fn generate(&self, text: &str) -> Result<ProviderReply> {
        let request = self.build_request(text);
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!("Sending request to OpenAI: {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({}): {}", status, error_body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        let message = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .context("No choices in OpenAI response")?;

        match message.content.as_deref().map(str::trim) {
            Some(content) if !content.is_empty() => Ok(ProviderReply::Text(content.to_string())),
            _ => Ok(ProviderReply::Empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: &str, system_prompt: Option<&str>) -> OpenAiClient {
        OpenAiClient::new(LlmConfig {
            provider: AiProvider::Openai,
            model: "gpt-3.5-turbo".to_string(),
            api_key: "sk-test".to_string(),
            base_url: base_url.to_string(),
            system_prompt: system_prompt.map(String::from),
            max_tokens: None,
        })
    }

    fn completion(content: serde_json::Value) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn test_request_without_system_prompt() {
        let request = client_for("http://unused", None).build_request("hi");
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-3.5-turbo",
                "messages": [{ "role": "user", "content": "hi" }]
            })
        );
    }

    #[test]
    fn test_request_with_system_prompt() {
        let request = client_for("http://unused", Some("Be terse.")).build_request("hi");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_generate_success_trims_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-3.5-turbo",
                "messages": [{ "role": "user", "content": "Hello" }]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion(json!("  Hi there!\n"))),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), None);
        let reply = client.generate("Hello").await.unwrap();

        assert_eq!(reply, ProviderReply::Text("Hi there!".to_string()));
    }

    #[tokio::test]
    async fn test_generate_null_content_is_empty() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(json!(null))))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), None);
        assert_eq!(client.generate("Hello").await.unwrap(), ProviderReply::Empty);
    }

    #[tokio::test]
    async fn test_generate_no_choices_is_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), None);
        let err = client.generate("Hello").await.unwrap_err();
        assert!(err.to_string().contains("No choices"));
    }

    #[tokio::test]
    async fn test_generate_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "message": "Rate limit exceeded", "type": "rate_limit_error" }
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), None);
        let err = client.generate("Hello").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("429"));
        assert!(message.contains("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn test_generate_network_error() {
        let client = client_for("http://127.0.0.1:1", None);
        assert!(client.generate("Hello").await.is_err());
    }
}
