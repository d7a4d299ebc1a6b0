use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{AiProvider, LlmConfig};
use crate::llm::{ChatProvider, ProviderReply};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_reply(self) -> ProviderReply {
        if let Some(candidate) = self.candidates.into_iter().next() {
            let text = candidate
                .content
                .and_then(|c| c.parts.into_iter().next())
                .and_then(|p| p.text);
            return match text {
                Some(text) => ProviderReply::Text(text),
                None => {
                    warn!(
                        "Gemini candidate carried no text (finish reason: {})",
                        candidate.finish_reason.as_deref().unwrap_or("unknown")
                    );
                    ProviderReply::NoText
                }
            };
        }

        match self.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => {
                warn!("Gemini request blocked: {}", reason);
                ProviderReply::Blocked(reason)
            }
            None => {
                warn!("Gemini returned no candidates and no block reason");
                ProviderReply::Empty
            }
        }
    }
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl GeminiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        )
    }

    fn build_request(&self, text: &str) -> GenerateContentRequest {
        let text_content = |role: Option<&str>, text: &str| Content {
            role: role.map(String::from),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        };

        GenerateContentRequest {
            contents: vec![text_content(Some("user"), text)],
            system_instruction: self
                .config
                .system_prompt
                .as_deref()
                .map(|prompt| text_content(None, prompt)),
            generation_config: self.config.max_tokens.map(|max| GenerationConfig {
                max_output_tokens: max,
            }),
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiClient {
    fn kind(&self) -> AiProvider {
        AiProvider::Gemini
    }

    async fn generate(&self, text: &str) -> Result<ProviderReply> {
        let request = self.build_request(text);
        let url = self.endpoint();

        debug!("Sending request to Gemini: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Gemini")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({}): {}", status, error_body);
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        Ok(body.into_reply())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: &str) -> GeminiClient {
        GeminiClient::new(LlmConfig {
            provider: AiProvider::Gemini,
            model: "gemini-pro".to_string(),
            api_key: "g-test".to_string(),
            base_url: base_url.to_string(),
            system_prompt: None,
            max_tokens: None,
        })
    }

    fn parse(body: serde_json::Value) -> ProviderReply {
        serde_json::from_value::<GenerateContentResponse>(body)
            .unwrap()
            .into_reply()
    }

    #[test]
    fn test_reply_first_part_text() {
        let reply = parse(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Hello" }, { "text": "ignored" }] },
                "finishReason": "STOP"
            }]
        }));
        assert_eq!(reply, ProviderReply::Text("Hello".to_string()));
    }

    #[test]
    fn test_reply_candidate_without_parts() {
        let reply = parse(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        }));
        assert_eq!(reply, ProviderReply::NoText);

        let reply = parse(json!({
            "candidates": [{ "content": { "role": "model", "parts": [] } }]
        }));
        assert_eq!(reply, ProviderReply::NoText);
    }

    #[test]
    fn test_reply_blocked() {
        let reply = parse(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }));
        assert_eq!(reply, ProviderReply::Blocked("SAFETY".to_string()));
    }

    #[test]
    fn test_candidates_take_precedence_over_feedback() {
        let reply = parse(json!({
            "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }],
            "promptFeedback": { "blockReason": "OTHER" }
        }));
        assert_eq!(reply, ProviderReply::Text("ok".to_string()));
    }

    #[test]
    fn test_reply_empty() {
        assert_eq!(parse(json!({})), ProviderReply::Empty);
        assert_eq!(
            parse(json!({ "candidates": [], "promptFeedback": {} })),
            ProviderReply::Empty
        );
    }

    #[test]
    fn test_request_shape() {
        let mut client = client_for("http://unused");
        client.config.system_prompt = Some("Be kind.".to_string());
        client.config.max_tokens = Some(128);

        let body = serde_json::to_value(client.build_request("hi")).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{ "role": "user", "parts": [{ "text": "hi" }] }],
                "systemInstruction": { "parts": [{ "text": "Be kind." }] },
                "generationConfig": { "maxOutputTokens": 128 }
            })
        );
    }

    #[tokio::test]
    async fn test_generate_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .and(header("x-goog-api-key", "g-test"))
            .and(body_partial_json(json!({
                "contents": [{ "parts": [{ "text": "Hello" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "Hi from Gemini" }] },
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri());
        let reply = client.generate("Hello").await.unwrap();
        assert_eq!(reply, ProviderReply::Text("Hi from Gemini".to_string()));
    }

    #[tokio::test]
    async fn test_generate_blocked_over_http() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {
                    "blockReason": "SAFETY",
                    "safetyRatings": [{ "category": "HARM_CATEGORY_HARASSMENT", "probability": "HIGH" }]
                }
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri());
        let reply = client.generate("something rude").await.unwrap();
        assert_eq!(reply, ProviderReply::Blocked("SAFETY".to_string()));
    }

    #[tokio::test]
    async fn test_generate_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT" }
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri());
        let err = client.generate("Hello").await.unwrap_err();
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("API key not valid"));
    }
}
