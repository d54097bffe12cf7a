//! Text-completion service seam.
//!
//! The assistant only ever needs "send a prompt, get text back", so the
//! trait is that and nothing more. `OpenAiCompletion` speaks the
//! chat-completions protocol; tests plug in scripted fakes.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::config::CompletionSettings;

/// One outbound completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    #[error("no completion service configured")]
    NotConfigured,

    /// Network failure, timeout, or a non-success status.
    #[error("completion service unavailable: {0}")]
    Unavailable(String),

    /// The service answered but the body was not what we asked for.
    #[error("malformed completion response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

// ── OpenAI chat completions ────────────────────────────────────

pub struct OpenAiCompletion {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiCompletion {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        })
    }

    /// None when no api key is configured.
    pub fn from_settings(settings: &CompletionSettings) -> Option<Result<Self, CompletionError>> {
        let api_key = settings.api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        Some(Self::new(api_key, settings.endpoint.clone(), settings.timeout()))
    }
}

/// Chat-completions request body.
pub fn chat_payload(request: &CompletionRequest) -> serde_json::Value {
    serde_json::json!({
        "model": request.model,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.prompt },
        ]
    })
}

/// Pull `choices[0].message.content` out of a chat-completions reply, as sent.
pub fn extract_content(json: &serde_json::Value) -> Result<String, CompletionError> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CompletionError::Malformed("missing choices[0].message.content".to_string()))
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        tracing::debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            prompt_chars = request.prompt.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&chat_payload(request))
            .send()
            .await
            .map_err(|e| CompletionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Unavailable(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        extract_content(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-3.5-turbo".into(),
            system: "You are terse.".into(),
            prompt: "Say hi".into(),
            max_tokens: 200,
            temperature: 0.3,
        }
    }

    #[test]
    fn payload_shape() {
        let payload = chat_payload(&request());
        assert_eq!(payload["model"], "gpt-3.5-turbo");
        assert_eq!(payload["max_tokens"], 200);
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][0]["content"], "You are terse.");
        assert_eq!(payload["messages"][1]["role"], "user");
        assert_eq!(payload["messages"][1]["content"], "Say hi");
        assert!((payload["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn extracts_content_as_sent() {
        let reply = serde_json::json!({
            "choices": [ { "message": { "role": "assistant", "content": "  hello \n" } } ]
        });
        assert_eq!(extract_content(&reply).unwrap(), "  hello \n");
    }

    #[test]
    fn missing_content_is_malformed() {
        let reply = serde_json::json!({ "error": { "message": "nope" } });
        assert!(matches!(extract_content(&reply), Err(CompletionError::Malformed(_))));
    }

    #[test]
    fn no_key_means_no_service() {
        let settings = CompletionSettings::default();
        assert!(OpenAiCompletion::from_settings(&settings).is_none());

        let blank = CompletionSettings { api_key: Some("  ".into()), ..CompletionSettings::default() };
        assert!(OpenAiCompletion::from_settings(&blank).is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        // Port 9 (discard) on localhost is closed in test environments.
        let service = OpenAiCompletion::new("sk-test", "http://127.0.0.1:9/v1/chat/completions", Duration::from_secs(2)).unwrap();
        let err = service.complete(&request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Unavailable(_)), "{err:?}");
    }
}
