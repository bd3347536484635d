//! A scripted provider for tests.

use super::{LlmConfig, LlmError, LlmMessage, LlmProvider, LlmResponse, LlmUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type Captured = Vec<(Vec<LlmMessage>, LlmConfig)>;

/// A mock LLM provider.
///
/// Each call to `complete` pops the next queued response. If the queue is
/// empty, returns a default response.
#[derive(Clone, Default)]
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<Result<LlmResponse, LlmError>>>>,
    captured_requests: Arc<Mutex<Captured>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn with_response(self, response: LlmResponse) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(response));
        }
        self
    }

    /// Queue a successful response with just this content.
    pub fn with_content(self, content: impl Into<String>) -> Self {
        self.with_response(Self::response(content.into(), "mock-model"))
    }

    /// Queue an error response.
    pub fn with_error(self, error: LlmError) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error));
        }
        self
    }

    /// Requests seen so far, oldest first.
    pub fn captured_requests(&self) -> Captured {
        self.captured_requests
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn response(content: String, model: &str) -> LlmResponse {
        LlmResponse {
            content,
            usage: LlmUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            model: model.to_string(),
            finish_reason: "stop".to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        if let Ok(mut captured) = self.captured_requests.lock() {
            captured.push((messages.to_vec(), config.clone()));
        }

        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        next.unwrap_or_else(|| Ok(Self::response("Mock response".to_string(), &config.model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_queued_then_default() {
        let provider = MockProvider::new().with_content("Custom answer");
        let config = LlmConfig::default();

        let first = provider
            .complete(&[LlmMessage::user("Hi")], &config)
            .await
            .unwrap();
        assert_eq!(first.content, "Custom answer");

        let second = provider
            .complete(&[LlmMessage::user("Hi again")], &config)
            .await
            .unwrap();
        assert_eq!(second.content, "Mock response");
        assert_eq!(second.model, config.model);
        assert_eq!(provider.captured_requests().len(), 2);
    }
}
