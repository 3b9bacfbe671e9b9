//! Conformance checks shared across the three `LlmGateway` variants, mirroring
//! the donor's `dashflow-standard-tests::chat_model_tests` suite. Each
//! provider crate runs these against its own live client, gated behind
//! `#[ignore]` since they need real credentials.

use atlas_core::error::Result;
use atlas_core::gateway::{CallOptions, LlmGateway, Message};

/// A single human turn gets a non-empty completion back.
pub async fn assert_basic_completion(gateway: &dyn LlmGateway) -> Result<()> {
    let messages = vec![Message::system("Reply with exactly one short word."), Message::human("Say hello.")];
    let result = gateway.complete(&messages, &CallOptions::default()).await?;
    assert!(!result.content.is_empty(), "gateway returned an empty completion");
    Ok(())
}

/// A multi-turn conversation (system, human, assistant, human) round-trips
/// without the gateway rejecting the assistant-authored turn.
pub async fn assert_multi_turn_conversation(gateway: &dyn LlmGateway) -> Result<()> {
    let messages = vec![
        Message::system("You are terse."),
        Message::human("Remember the number 7."),
        Message::assistant("Understood, the number is 7."),
        Message::human("What number did I ask you to remember?"),
    ];
    let result = gateway.complete(&messages, &CallOptions::default()).await?;
    assert!(!result.content.is_empty(), "gateway returned an empty completion on a multi-turn call");
    Ok(())
}

/// The gateway reports some usage accounting, even if zeroed.
pub async fn assert_reports_usage(gateway: &dyn LlmGateway) -> Result<()> {
    let messages = vec![Message::human("Say hello.")];
    let result = gateway.complete(&messages, &CallOptions::default()).await?;
    assert!(result.usage.is_some(), "gateway did not report usage metadata");
    Ok(())
}

/// `context_window_tokens` and `model_name` are non-degenerate.
pub fn assert_identity_is_sane(gateway: &dyn LlmGateway) {
    assert!(gateway.context_window_tokens() > 0, "context window must be positive");
    assert!(!gateway.model_name().is_empty(), "model name must not be empty");
}
