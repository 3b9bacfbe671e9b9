//! `OpenAI`-style [`LlmGateway`] variant: `/chat/completions` with
//! `Authorization: Bearer`, built on `async-openai`.
//!
//! ```no_run
//! use atlas_llm_openai::GatewayOpenAi;
//!
//! let gateway = GatewayOpenAi::new().with_model("gpt-4o-mini").with_api_key("sk-...");
//! ```

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use atlas_core::config::env_string_or_default;
use atlas_core::error::{classify_provider_error, Error, FailureKind, Result};
use atlas_core::gateway::{CallOptions, ChatResult, LlmGateway, Message, UsageMetadata};

/// Context windows for the model names this gateway is commonly configured
/// with. `OpenAI` exposes no runtime introspection endpoint for this, so the
/// Gateway contract's "detect at startup" falls back to a static table,
/// itself falling back to 8192 for an unrecognized model.
const KNOWN_CONTEXT_WINDOWS: &[(&str, u32)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
];

const DEFAULT_CONTEXT_WINDOW: u32 = 8_192;

fn detect_context_window(model: &str) -> u32 {
    KNOWN_CONTEXT_WINDOWS
    .iter()
    .find(|(name, _)| *name == model)
    .map_or(DEFAULT_CONTEXT_WINDOW, |(_, window)| *window)
}

fn convert_message(message: &Message) -> ChatCompletionRequestMessage {
    match message {
        Message::System { content } => ChatCompletionRequestSystemMessageArgs::default()
        .content(content.as_str())
        .build()
        .expect("system message content is always valid")
        .into(),
        Message::Human { content } => ChatCompletionRequestUserMessageArgs::default()
        .content(content.as_str())
        .build()
        .expect("user message content is always valid")
        .into(),
        Message::Assistant { content } => ChatCompletionRequestAssistantMessageArgs::default()
        .content(content.as_str())
        .build()
        .expect("assistant message content is always valid")
        .into(),
    }
}

/// Classify a transport-level `async-openai` error into the §7 taxonomy.
fn classify_openai_error(err: &async_openai::error::OpenAIError) -> (FailureKind, String) {
    let message = err.to_string();
    (classify_provider_error(&message), message)
}

/// `OpenAI`-style Gateway, built on `async-openai`. Mirrors the donor's
/// `ChatOpenAI` builder shape (`with_model`, `with_api_key`,
/// `with_base_url`) but exposes only the single [`LlmGateway::complete`]
/// surface every pipeline stage above the gateway needs.
#[derive(Debug, Clone)]
pub struct GatewayOpenAi {
    client: Client<OpenAIConfig>,
    model: String,
    context_window: u32,
}

impl GatewayOpenAi {
    /// A gateway with the donor's default model (`gpt-3.5-turbo`) and an
    /// API key read from `OPENAI_API_KEY`.
    #[must_use]
    pub fn new() -> Self {
        let config = OpenAIConfig::new().with_api_key(env_string_or_default("OPENAI_API_KEY", ""));
        Self {
            client: Client::with_config(config),
            model: "gpt-3.5-turbo".to_string(),
            context_window: detect_context_window("gpt-3.5-turbo"),
        }
    }

    /// Select the model, re-detecting its context window.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.context_window = detect_context_window(&self.model);
        self
    }

    /// Override the API key rather than reading `OPENAI_API_KEY`.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key.into());
        self.client = Client::with_config(config);
        self
    }

    /// Point at an OpenAI-compatible endpoint other than the default.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let config = OpenAIConfig::new()
        .with_api_key(env_string_or_default("OPENAI_API_KEY", ""))
        .with_api_base(base_url.into());
        self.client = Client::with_config(config);
        self
    }
}

impl Default for GatewayOpenAi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmGateway for GatewayOpenAi {
    async fn complete(&self, messages: &[Message], options: &CallOptions) -> Result<ChatResult> {
        let openai_messages: Vec<ChatCompletionRequestMessage> = messages.iter().map(convert_message).collect();

        let request = CreateChatCompletionRequestArgs::default()
        .model(self.model.clone())
        .messages(openai_messages)
        .max_tokens(options.max_tokens)
        .temperature(options.temperature)
        // The Gateway is the single place the JSON schema is injected
        // for cloud providers; the caller's system prompt
        // already carries the schema instructions, and JSON mode here
        // just enforces that the provider actually emits valid JSON.
        .response_format(ResponseFormat::JsonObject)
        .build()
        .map_err(|err| Error::Llm { kind: FailureKind::Unknown, message: err.to_string() })?;

        let response = tokio::time::timeout(options.timeout, self.client.chat().create(request))
        .await
        .map_err(|_| Error::Llm { kind: FailureKind::Timeout, message: "openai call timed out".to_string() })?
        .map_err(|err| {
                let (kind, message) = classify_openai_error(&err);
                Error::Llm { kind, message }
        })?;

        let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Llm { kind: FailureKind::ParseError, message: "no choices in response".to_string() })?;

        let content = choice.message.content.unwrap_or_default();
        let usage = response.usage.map(|u| UsageMetadata::new(u.prompt_tokens, u.completion_tokens));

        Ok(ChatResult { content, usage, model_name: response.model })
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
    fn known_model_context_window_is_looked_up() {
        assert_eq!(detect_context_window("gpt-4o"), 128_000);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(detect_context_window("some-future-model"), DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn with_model_redetects_context_window() {
        let gateway = GatewayOpenAi::new().with_model("gpt-4o");
        assert_eq!(gateway.context_window_tokens(), 128_000);
        assert_eq!(gateway.model_name(), "gpt-4o");
    }

    #[test]
    fn gateway_reports_cloud() {
        assert!(GatewayOpenAi::new().is_cloud());
    }
}

// Live conformance checks against the real OpenAI API. Require a funded
// `OPENAI_API_KEY` in the environment, so they are excluded from the default
// test run and must be opted into explicitly.
#[cfg(test)]
mod live_tests {
    use super::*;
    use atlas_testing::conformance;

    #[tokio::test]
    #[ignore = "requires OPENAI_API_KEY"]
    async fn basic_completion_standard() {
        let gateway = GatewayOpenAi::new().with_model("gpt-4o-mini");
        conformance::assert_basic_completion(&gateway).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires OPENAI_API_KEY"]
    async fn multi_turn_conversation_standard() {
        let gateway = GatewayOpenAi::new().with_model("gpt-4o-mini");
        conformance::assert_multi_turn_conversation(&gateway).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires OPENAI_API_KEY"]
    async fn reports_usage_standard() {
        let gateway = GatewayOpenAi::new().with_model("gpt-4o-mini");
        conformance::assert_reports_usage(&gateway).await.unwrap();
    }
}
