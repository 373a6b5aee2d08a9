//! OpenAI provider — adapted from `ob-agentic::openai_client`, widened to
//! serve every GPT model in the catalog.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::provider::{ChatRequest, ChatResponse, LlmProvider};

#[derive(Clone)]
pub struct OpenAiProvider {
    api_key: String,
    client: reqwest::Client,
    models: Vec<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, models: Vec<String>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            models,
        }
    }

    pub fn from_env(models: Vec<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::MissingCredential("OPENAI_API_KEY".to_string()))?;
        Ok(Self::new(api_key, models))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn chat(&self, model_id: &str, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "model": model_id,
                "messages": [
                    {"role": "system", "content": request.system_prompt},
                    {"role": "user", "content": request.user_prompt},
                ],
                "max_tokens": request.max_tokens,
                "temperature": 0.1,
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
        struct Message {
            content: String,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Usage {
            prompt_tokens: u32,
            completion_tokens: u32,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
            usage: Usage,
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|_| ProviderError::EmptyResponse {
                provider: self.name().to_string(),
            })?;

        let text = api_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: self.name().to_string(),
            })?;

        Ok(ChatResponse {
            text,
            input_tokens: api_response.usage.prompt_tokens,
            output_tokens: api_response.usage.completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_only_its_configured_models() {
        let provider = OpenAiProvider::new(
            "test-key".to_string(),
            vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()],
        );
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.models().len(), 2);
    }
}
