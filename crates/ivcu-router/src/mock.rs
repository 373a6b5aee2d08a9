//! In-memory provider for tests, grounded on the prototype's
//! `router.py::MockProvider` — returns a fixed or scripted response without
//! any network call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::{ChatRequest, ChatResponse, LlmProvider};

pub struct MockProvider {
    name: String,
    models: Vec<String>,
    responses: Mutex<Vec<Result<ChatResponse, ProviderError>>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            name: name.into(),
            models,
            responses: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queues a canned success response, consumed in FIFO order by `chat`.
    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push(Ok(ChatResponse {
            text: text.into(),
            input_tokens: 100,
            output_tokens: 50,
        }));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.responses.lock().unwrap().push(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn chat(&self, _model_id: &str, _request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(ChatResponse {
                text: "def solution():\n    pass\n".to_string(),
                input_tokens: 100,
                output_tokens: 50,
            });
        }
        responses.remove(0)
    }
}
