// Allow unwrap in testing utilities - test code should panic on errors
#![allow(clippy::unwrap_used)]

//! Mock `LlmGateway`, `Storage`, and `TextSegmenter` implementations shared
//! across the workspace's tests.
//!
//! ```
//! use atlas_testing::MockGateway;
//!
//! let gateway = MockGateway::new().with_response(r#"{"characters":[]}"#);
//! ```

mod gateway;
mod storage;

/// Conformance checks shared across the three live `LlmGateway` variants,
/// intended to be called from each provider crate's own `#[ignore]`-gated
/// integration tests rather than exercised against the mock here.
pub mod conformance;

pub use gateway::MockGateway;
pub use storage::InMemoryStorage;

// The deterministic `WhitespaceSegmenter` already lives in `atlas-core`
// itself (it needs no LLM or I/O dependency to exist); re-export it here so
// tests reach for mocks in one place, the way the donor crate re-exports
// `MockEmbeddings` from its core crate.
pub use atlas_core::segmenter::WhitespaceSegmenter;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{InMemoryStorage, MockGateway, WhitespaceSegmenter};
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::gateway::{CallOptions, LlmGateway, Message};
    use atlas_core::segmenter::TextSegmenter;
    use atlas_core::storage::Storage;

    #[tokio::test]
    async fn mock_gateway_returns_configured_response() {
        let gateway = MockGateway::new().with_response("hello");
        let result = gateway.complete(&[Message::human("hi")], &CallOptions::default()).await.unwrap();
        assert_eq!(result.content, "hello");
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn mock_gateway_records_message_history() {
        let gateway = MockGateway::new();
        gateway.complete(&[Message::human("first")], &CallOptions::default()).await.unwrap();
        gateway.complete(&[Message::human("second")], &CallOptions::default()).await.unwrap();
        assert_eq!(gateway.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_gateway_fails_next_call_once() {
        let gateway = MockGateway::new();
        gateway.fail_next();
        assert!(gateway.complete(&[Message::human("x")], &CallOptions::default()).await.is_err());
        assert!(gateway.complete(&[Message::human("x")], &CallOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn in_memory_storage_round_trips_chapter_facts() {
        use atlas_core::model::ChapterFact;

        let storage = InMemoryStorage::new();
        let fact = ChapterFact::empty(1);
        storage.put_chapter_fact("novel-1", &fact).await.unwrap();
        let loaded = storage.get_chapter_fact("novel-1", 1).await.unwrap();
        assert_eq!(loaded, Some(fact));
    }

    #[tokio::test]
    async fn in_memory_storage_lists_facts_in_chapter_order() {
        use atlas_core::model::ChapterFact;

        let storage = InMemoryStorage::new();
        storage.put_chapter_fact("novel-1", &ChapterFact::empty(3)).await.unwrap();
        storage.put_chapter_fact("novel-1", &ChapterFact::empty(1)).await.unwrap();
        storage.put_chapter_fact("novel-1", &ChapterFact::empty(2)).await.unwrap();

        let facts = storage.list_chapter_facts("novel-1").await.unwrap();
        let chapter_nums: Vec<u32> = facts.iter().map(|f| f.chapter_num).collect();
        assert_eq!(chapter_nums, vec![1, 2, 3]);
    }

    #[test]
    fn whitespace_segmenter_is_reexported() {
        let tokens = WhitespaceSegmenter.segment("a b c");
        assert_eq!(tokens.len(), 3);
    }

    #[tokio::test]
    async fn mock_gateway_passes_its_own_conformance_checks() {
        let gateway = MockGateway::new().with_response("ok").with_model_name("mock-1");
        crate::conformance::assert_basic_completion(&gateway).await.unwrap();
        crate::conformance::assert_multi_turn_conversation(&gateway).await.unwrap();
        crate::conformance::assert_reports_usage(&gateway).await.unwrap();
        crate::conformance::assert_identity_is_sane(&gateway);
    }
}
