//! Anthropic-style [`LlmGateway`] variant: `/v1/messages` with `x-api-key`
//! auth. Anthropic has no first-party Rust SDK in wide use
//! upstream, so the Messages API client is built directly on `reqwest`.

use async_trait::async_trait;
use atlas_core::config::env_string_or_default;
use atlas_core::error::{classify_provider_error, Error, FailureKind, Result};
use atlas_core::gateway::{CallOptions, ChatResult, LlmGateway, Message, UsageMetadata};
use serde::{Deserialize, Serialize};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Anthropic defaults to the largest context window in this family when the
/// exact model's window cannot be determined locally.
pub const ANTHROPIC_DEFAULT_CONTEXT_WINDOW: u32 = 200_000;

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    model: String,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorEnvelope {
    error: AnthropicErrorBody,
}

fn classify_http_error(status: reqwest::StatusCode, body: &str) -> (FailureKind, String) {
    if let Ok(envelope) = serde_json::from_str::<AnthropicErrorEnvelope>(body) {
        let kind = match envelope.error.error_type.as_str() {
            "overloaded_error" | "rate_limit_error" | "api_error" => FailureKind::Timeout,
            _ => classify_provider_error(&envelope.error.message),
        };
        return (kind, envelope.error.message);
    }
    let kind = if status.as_u16() == 429 || status.is_server_error() { FailureKind::Timeout } else { FailureKind::HttpError };
    (kind, body.to_string())
}

/// Anthropic-style Gateway, talking to the Messages API directly over
/// `reqwest`. System messages are collapsed into the single top-level
/// `system` field the Messages API expects; human/assistant turns carry
/// through as the `user`/`assistant` roles.
#[derive(Debug, Clone)]
pub struct GatewayAnthropic {
    http_client: reqwest::Client,
    api_url: String,
    api_key: String,
    api_version: String,
    model: String,
    context_window: u32,
}

impl GatewayAnthropic {
    /// A gateway reading `ANTHROPIC_API_KEY` and `ANTHROPIC_API_BASE_URL`
    /// from the environment, defaulting to `claude-3-5-sonnet-latest`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: env_string_or_default("ANTHROPIC_API_BASE_URL", DEFAULT_API_URL),
            api_key: env_string_or_default("ANTHROPIC_API_KEY", ""),
            api_version: DEFAULT_API_VERSION.to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            context_window: ANTHROPIC_DEFAULT_CONTEXT_WINDOW,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Override the detected context window, e.g. for a pinned older model.
    #[must_use]
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = tokens;
        self
    }

    fn split_system(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts = Vec::new();
        let mut turns = Vec::new();
        for message in messages {
            match message {
                Message::System { content } => system_parts.push(content.clone()),
                Message::Human { content } => turns.push(AnthropicMessage { role: "user", content: content.clone() }),
                Message::Assistant { content } => turns.push(AnthropicMessage { role: "assistant", content: content.clone() }),
            }
        }
        let system = if system_parts.is_empty() { None } else { Some(system_parts.join("\n\n")) };
        (system, turns)
    }
}

impl Default for GatewayAnthropic {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmGateway for GatewayAnthropic {
    async fn complete(&self, messages: &[Message], options: &CallOptions) -> Result<ChatResult> {
        if self.api_key.is_empty() {
            return Err(Error::Llm {
                    kind: FailureKind::HttpError,
                    message: "ANTHROPIC_API_KEY is not set; configure it with with_api_key()".to_string(),
            });
        }

        let (system, anthropic_messages) = Self::split_system(messages);
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: options.max_tokens,
            messages: anthropic_messages,
            system,
            temperature: options.temperature,
        };

        let send = self
        .http_client
        .post(&self.api_url)
        .header("x-api-key", &self.api_key)
        .header("anthropic-version", &self.api_version)
        .header("content-type", "application/json")
        .json(&request)
        .send();

        let response = tokio::time::timeout(options.timeout, send)
        .await
        .map_err(|_| Error::Llm { kind: FailureKind::Timeout, message: "anthropic call timed out".to_string() })?
        .map_err(|err| Error::Llm { kind: FailureKind::HttpError, message: err.to_string() })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (kind, message) = classify_http_error(status, &body);
            return Err(Error::Llm { kind, message });
        }

        let parsed: AnthropicResponse = response
        .json()
        .await
        .map_err(|err| Error::Llm { kind: FailureKind::ParseError, message: err.to_string() })?;

        let content = parsed
        .content
        .iter()
        .filter(|block| block.block_type == "text")
        .map(|block| block.text.as_str())
        .collect::<Vec<_>>()
        .join("");

        let usage = Some(UsageMetadata::new(parsed.usage.input_tokens, parsed.usage.output_tokens));

        Ok(ChatResult { content, usage, model_name: parsed.model })
    }

    fn context_window_tokens(&self) -> u32 {
        self.context_window
    }

    fn is_cloud(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_system_collapses_multiple_system_messages() {
        let messages = vec![Message::system("a"), Message::system("b"), Message::human("hi")];
        let (system, turns) = GatewayAnthropic::split_system(&messages);
        assert_eq!(system.as_deref(), Some("a\n\nb"));
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, "user");
    }

    #[test]
    fn split_system_is_none_without_system_messages() {
        let messages = vec![Message::human("hi")];
        let (system, _) = GatewayAnthropic::split_system(&messages);
        assert!(system.is_none());
    }

    #[test]
    fn classify_rate_limit_error_as_transient() {
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"too many requests"}}"#;
        let (kind, _) = classify_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(kind, FailureKind::Timeout);
    }

    #[test]
    fn classify_content_policy_error_from_message_text() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"content_filter triggered"}}"#;
        let (kind, _) = classify_http_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(kind, FailureKind::ContentPolicy);
    }

    #[test]
    fn default_context_window_is_200k() {
        assert_eq!(GatewayAnthropic::new().context_window_tokens(), ANTHROPIC_DEFAULT_CONTEXT_WINDOW);
    }
}

// Live conformance checks against the real Anthropic Messages API. Require a
// funded `ANTHROPIC_API_KEY` in the environment, so they are excluded from
// the default test run and must be opted into explicitly.
#[cfg(test)]
mod live_tests {
    use super::*;
    use atlas_testing::conformance;

    #[tokio::test]
    #[ignore = "requires ANTHROPIC_API_KEY"]
    async fn basic_completion_standard() {
        let gateway = GatewayAnthropic::new();
        conformance::assert_basic_completion(&gateway).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires ANTHROPIC_API_KEY"]
    async fn multi_turn_conversation_standard() {
        let gateway = GatewayAnthropic::new();
        conformance::assert_multi_turn_conversation(&gateway).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires ANTHROPIC_API_KEY"]
    async fn reports_usage_standard() {
        let gateway = GatewayAnthropic::new();
        conformance::assert_reports_usage(&gateway).await.unwrap();
    }
}
