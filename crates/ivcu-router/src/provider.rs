//! Provider-agnostic chat contract every `LlmProvider` implements.
//!
//! Generalized from `ob-agentic::llm_client::LlmClient` (`chat`/`chat_json`/
//! `chat_with_tool`, `model_name`/`provider_name`) down to the subset this
//! router needs: no tool-use or JSON-mode surface, since code generation here
//! goes through a plain prompt/response exchange, not structured tool calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model ids this provider serves, used by the router to decide whether
    /// a request can be routed here at all.
    fn models(&self) -> &[String];

    async fn chat(&self, model_id: &str, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Streaming variant. Providers that don't support token streaming fall
    /// back to the default, which awaits the full response and yields it as
    /// a single chunk.
    async fn chat_stream(
        &self,
        model_id: &str,
        request: &ChatRequest,
    ) -> Result<Vec<String>, ProviderError> {
        Ok(vec![self.chat(model_id, request).await?.text])
    }

    /// Cheap liveness probe the circuit breaker uses to decide when to
    /// move a provider back from `open` to `half_open`.
    async fn health_check(&self) -> bool {
        true
    }
}
