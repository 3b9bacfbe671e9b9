//! The unified LLM call surface every provider crate implements. Mirrors the teacher's `ChatModel` trait shape: a single async
//! entry point taking a message list and returning a provider-agnostic
//! result, with usage metadata threaded through for the Budget Planner.

use crate::error::{FailureKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One turn of a conversation sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// The system/instruction prompt.
    System {
        /// Prompt text.
        content: String,
    },
    /// A user turn.
    Human {
        /// Prompt text.
        content: String,
    },
    /// A prior assistant turn, for few-shot or multi-turn context.
    Assistant {
        /// Prompt text.
        content: String,
    },
}

impl Message {
    /// Construct a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Message::System { content: content.into() }
    }

    /// Construct a human message.
    #[must_use]
    pub fn human(content: impl Into<String>) -> Self {
        Message::Human { content: content.into() }
    }

    /// Construct an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant { content: content.into() }
    }

    /// This message's text content, regardless of role.
    #[must_use]
    pub fn as_text(&self) -> &str {
        match self {
            Message::System { content } | Message::Human { content } | Message::Assistant { content } => {
                content.as_str()
            }
        }
    }
}

/// Token accounting returned alongside a completion, used by the Budget
/// Planner to decide whether a retry needs a smaller `retry_chars` window
///.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens consumed by the completion.
    pub completion_tokens: u32,
}

impl UsageMetadata {
    /// Build from the two counters providers report directly.
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self { prompt_tokens, completion_tokens }
    }

    /// Total tokens across prompt and completion.
    #[must_use]
    pub fn total_tokens(self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Per-call tuning knobs every provider accepts, independent of model
/// identity (which is fixed at gateway-construction time, as the teacher's
/// `ChatOpenAI`/`ChatAnthropic` do with `.with_model(...)`).
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Hard ceiling on completion tokens.
    pub max_tokens: u32,
    /// Per-call deadline; a provider that does not answer within this
    /// returns `FailureKind::Timeout`.
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
            timeout: Duration::from_secs(60),
        }
    }
}

/// The outcome of one gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResult {
    /// The completion text.
    pub content: String,
    /// Token usage, if the provider reported it.
    pub usage: Option<UsageMetadata>,
    /// The provider's own model identifier, for logging.
    pub model_name: String,
}

/// A single unified async call surface over any chat-completion provider
/// (cloud or local). Every provider crate (`atlas-llm-openai`,
/// `atlas-llm-anthropic`, `atlas-llm-ollama`) implements this once, so every
/// pipeline stage above the gateway is provider-agnostic.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Send `messages` and return the completion, or a classified
    /// [`FailureKind`] wrapped in [`crate::error::Error::Llm`].
    async fn complete(&self, messages: &[Message], options: &CallOptions) -> Result<ChatResult>;

    /// The context window this gateway's model was calibrated against, used
    /// by the Budget Planner. Providers that cannot introspect
    /// this return a fixed constant (Anthropic defaults to 200k; Ollama
    /// defaults depend on the loaded model's `num_ctx`).
    fn context_window_tokens(&self) -> u32;

    /// Whether this gateway talks to a cloud API (affects budget
    /// interpolation endpoint selection, spec §4.1).
    fn is_cloud(&self) -> bool;

    /// A short identifier for this gateway's backing model, for logs and
    /// the per-chapter `ExtractionMeta`.
    fn model_name(&self) -> &str;
}

/// Classify a raised [`FailureKind`] against `timeout`: callers that catch
/// a `tokio::time::error::Elapsed` should map it through this rather than
/// inventing their own timeout detection per provider.
#[must_use]
pub fn timeout_failure() -> FailureKind {
    FailureKind::Timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_as_text_is_role_agnostic() {
        assert_eq!(Message::human("你好").as_text(), "你好");
        assert_eq!(Message::system("系统提示").as_text(), "系统提示");
    }

    #[test]
    fn usage_metadata_totals_both_counters() {
        let usage = UsageMetadata::new(100, 50);
        assert_eq!(usage.total_tokens(), 150);
    }

    #[test]
    fn call_options_default_is_conservative() {
        let opts = CallOptions::default();
        assert!(opts.temperature < 1.0);
        assert!(opts.max_tokens > 0);
    }
}
