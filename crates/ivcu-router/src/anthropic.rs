//! Anthropic provider — adapted from `ob-agentic::anthropic_client`, widened
//! to serve every Claude model in the catalog instead of one fixed model.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::provider::{ChatRequest, ChatResponse, LlmProvider};

#[derive(Clone)]
pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
    models: Vec<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: String, models: Vec<String>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            models,
        }
    }

    pub fn from_env(models: Vec<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::MissingCredential("ANTHROPIC_API_KEY".to_string()))?;
        Ok(Self::new(api_key, models))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn chat(&self, model_id: &str, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "model": model_id,
                "max_tokens": request.max_tokens,
                "system": request.system_prompt,
                "messages": [{"role": "user", "content": request.user_prompt}],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                provider: self.name().to_string(),
                status,
                body,
            });
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct Usage {
            input_tokens: u32,
            output_tokens: u32,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            content: Vec<ContentBlock>,
            usage: Usage,
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|_| ProviderError::EmptyResponse {
                provider: self.name().to_string(),
            })?;

        let text = api_response
            .content
            .first()
            .and_then(|c| c.text.clone())
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: self.name().to_string(),
            })?;

        Ok(ChatResponse {
            text,
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_only_its_configured_models() {
        let provider = AnthropicProvider::new(
            "test-key".to_string(),
            vec!["claude-haiku".to_string(), "claude-sonnet".to_string()],
        );
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.models().len(), 2);
    }
}
