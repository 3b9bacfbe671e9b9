//! A configurable mock [`LlmGateway`].

use async_trait::async_trait;
use atlas_core::error::{Error, FailureKind, Result};
use atlas_core::gateway::{CallOptions, ChatResult, LlmGateway, Message, UsageMetadata};
use parking_lot::Mutex;
use std::sync::Arc;

/// Handler function type for scripted mock responses.
pub type MockGatewayHandler = Arc<dyn Fn(&[Message]) -> String + Send + Sync>;

/// A configurable mock `LlmGateway`, for exercising the orchestrator and
/// context-builder without a real provider.
///
/// ```
/// use atlas_testing::MockGateway;
///
/// let gateway = MockGateway::new().with_response("a fixed reply");
/// ```
#[derive(Clone)]
pub struct MockGateway {
    handler: Option<MockGatewayHandler>,
    fixed_response: String,
    context_window: u32,
    is_cloud: bool,
    model_name: String,
    call_history: Arc<Mutex<Vec<Vec<Message>>>>,
    should_fail_next: Arc<Mutex<bool>>,
    failure_kind: Arc<Mutex<FailureKind>>,
}

impl std::fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGateway")
            .field("model_name", &self.model_name)
            .field("call_count", &self.call_count())
            .finish()
    }
}

impl MockGateway {
    /// A cloud-shaped gateway (8192-token window) that echoes an empty JSON
    /// object by default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handler: None,
            fixed_response: "{}".to_string(),
            context_window: 8_192,
            is_cloud: true,
            model_name: "mock-model".to_string(),
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_next: Arc::new(Mutex::new(false)),
            failure_kind: Arc::new(Mutex::new(FailureKind::HttpError)),
        }
    }

    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.fixed_response = response.into();
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: impl Fn(&[Message]) -> String + Send + Sync + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = tokens;
        self
    }

    #[must_use]
    pub fn with_cloud(mut self, is_cloud: bool) -> Self {
        self.is_cloud = is_cloud;
        self
    }

    #[must_use]
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Fail the very next `complete` call with `kind`, then resume echoing
    /// scripted responses.
    pub fn fail_next_with(&self, kind: FailureKind) {
        *self.failure_kind.lock() = kind;
        *self.should_fail_next.lock() = true;
    }

    /// Fail the very next `complete` call with a generic `HttpError`.
    pub fn fail_next(&self) {
        self.fail_next_with(FailureKind::HttpError);
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_history.lock().len()
    }

    #[must_use]
    pub fn call_history(&self) -> Vec<Vec<Message>> {
        self.call_history.lock().clone()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmGateway for MockGateway {
    async fn complete(&self, messages: &[Message], _options: &CallOptions) -> Result<ChatResult> {
        self.call_history.lock().push(messages.to_vec());

        let mut should_fail = self.should_fail_next.lock();
        if *should_fail {
            *should_fail = false;
            drop(should_fail);
            let kind = *self.failure_kind.lock();
            return Err(Error::Llm { kind, message: "mock gateway scripted failure".to_string() });
        }
        drop(should_fail);

        let content = self.handler.as_ref().map_or_else(|| self.fixed_response.clone(), |handler| handler(messages));

        Ok(ChatResult { content, usage: Some(UsageMetadata::new(0, 0)), model_name: self.model_name.clone() })
    }

    fn context_window_tokens(&self) -> u32 {
        self.context_window
    }

    fn is_cloud(&self) -> bool {
        self.is_cloud
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
