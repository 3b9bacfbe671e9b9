//! Ollama-backed [`LlmGateway`] variant: local inference, no API key, the
//! context window capped at [`atlas_budget::LOCAL_CONTEXT_WINDOW_CAP`]
//!.

use async_trait::async_trait;
use atlas_budget::LOCAL_CONTEXT_WINDOW_CAP;
use atlas_core::config::env_string_or_default;
use atlas_core::error::{Error, FailureKind, Result};
use atlas_core::gateway::{CallOptions, ChatResult, LlmGateway, Message, UsageMetadata};
use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage};
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

fn convert_message(message: &Message) -> ChatMessage {
    match message {
        Message::System { content } => ChatMessage::system(content.clone()),
        Message::Human { content } => ChatMessage::user(content.clone()),
        Message::Assistant { content } => ChatMessage::assistant(content.clone()),
    }
}

/// Ollama-backed Gateway. Mirrors the donor's `ChatOllama` builder shape
/// (`with_base_url`, `with_model`, `with_num_ctx`) but only the context
/// window actually used by this pipeline is configurable; everything else
/// runs with Ollama's own defaults.
#[derive(Debug, Clone)]
pub struct GatewayOllama {
    client: Arc<Ollama>,
    model: String,
    num_ctx: u64,
}

impl GatewayOllama {
    /// A gateway pointed at `OLLAMA_BASE_URL` (default `localhost:11434`),
    /// running `llama3` with the local context window cap.
    #[must_use]
    pub fn new() -> Self {
        let base_url = env_string_or_default("OLLAMA_BASE_URL", DEFAULT_BASE_URL);
        Self {
            client: Arc::new(Ollama::new(base_url, 11434)),
            model: "llama3".to_string(),
            num_ctx: u64::from(LOCAL_CONTEXT_WINDOW_CAP),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client = Arc::new(Ollama::new(base_url.into(), 11434));
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the context window fed to the Budget Planner. Still capped
    /// at [`LOCAL_CONTEXT_WINDOW_CAP`] by `compute_budget`, so a value above
    /// the cap is harmless but has no effect.
    #[must_use]
    pub fn with_num_ctx(mut self, num_ctx: u64) -> Self {
        self.num_ctx = num_ctx;
        self
    }
}

impl Default for GatewayOllama {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmGateway for GatewayOllama {
    async fn complete(&self, messages: &[Message], options: &CallOptions) -> Result<ChatResult> {
        let ollama_messages: Vec<ChatMessage> = messages.iter().map(convert_message).collect();
        let mut request = ChatMessageRequest::new(self.model.clone(), ollama_messages);

        let model_options = ModelOptions::default().temperature(options.temperature).num_ctx(self.num_ctx);
        request = request.options(model_options);

        let call = self.client.send_chat_messages(request);
        let response = tokio::time::timeout(options.timeout, call)
        .await
        .map_err(|_| Error::Llm { kind: FailureKind::Timeout, message: "ollama call timed out".to_string() })?
        .map_err(|err| Error::Llm { kind: FailureKind::HttpError, message: err.to_string() })?;

        let content = response.message.content;
        let usage = response.final_data.map(|final_data| {
                UsageMetadata::new(u32::from(final_data.prompt_eval_count.unwrap_or_default()), u32::from(final_data.eval_count.unwrap_or_default()))
        });

        Ok(ChatResult { content, usage, model_name: self.model.clone() })
    }

    fn context_window_tokens(&self) -> u32 {
        u32::try_from(self.num_ctx).unwrap_or(LOCAL_CONTEXT_WINDOW_CAP).min(LOCAL_CONTEXT_WINDOW_CAP)
    }

    fn is_cloud(&self) -> bool {
        false
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_window_is_capped_at_local_limit() {
        let gateway = GatewayOllama::new().with_num_ctx(65_536);
        assert_eq!(gateway.context_window_tokens(), LOCAL_CONTEXT_WINDOW_CAP);
    }

    #[test]
    fn gateway_reports_local() {
        assert!(!GatewayOllama::new().is_cloud());
    }

    #[test]
    fn with_model_updates_model_name() {
        let gateway = GatewayOllama::new().with_model("mistral");
        assert_eq!(gateway.model_name(), "mistral");
    }
}

// Live conformance checks against a real local Ollama server. Require the
// server to be running with the configured model pulled, so they are
// excluded from the default test run and must be opted into explicitly.
#[cfg(test)]
mod live_tests {
    use super::*;
    use atlas_testing::conformance;

    #[tokio::test]
    #[ignore = "requires a running Ollama server"]
    async fn basic_completion_standard() {
        let gateway = GatewayOllama::new();
        conformance::assert_basic_completion(&gateway).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Ollama server"]
    async fn multi_turn_conversation_standard() {
        let gateway = GatewayOllama::new();
        conformance::assert_multi_turn_conversation(&gateway).await.unwrap();
    }
}
