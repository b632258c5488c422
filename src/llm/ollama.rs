//! Local Ollama chat-completions provider (§4.4), used for judge-side
//! fallback tasks and offline development.
//!
//! Grounded on `extraction/ollama.rs`'s `/api/chat` request shape (no API
//! key, configurable base URL), generalized to a plain chat completion.
//! Ollama has no token-cost concept, so `price_per_million_tokens` prices it
//! at zero in the static table and it never contributes to budget spend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CompletionOptions, CompletionResult, LlmProvider};
use crate::errors::LlmError;

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    prompt_eval_count: i32,
    #[serde(default)]
    eval_count: i32,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: String) -> Self {
        OllamaProvider { client: reqwest::Client::new(), base_url }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        options: CompletionOptions,
    ) -> Result<CompletionResult, LlmError> {
        let started = std::time::Instant::now();

        let request = OllamaChatRequest {
            model: model.to_string(),
            messages: vec![
                OllamaMessage { role: "system".to_string(), content: system_prompt.to_string() },
                OllamaMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_output_tokens,
            },
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return if status.is_server_error() {
                Err(LlmError::Transient(body))
            } else {
                Err(LlmError::Permanent(format!("status {status}: {body}")))
            };
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ProviderInvalid(format!("failed to parse Ollama response: {e}")))?;

        Ok(CompletionResult {
            text: parsed.message.content,
            tokens_prompt: parsed.prompt_eval_count,
            tokens_completion: parsed.eval_count,
            cost_usd: 0.0,
            latency_ms: started.elapsed().as_millis() as u64,
            model_name: model.to_string(),
            provider_name: "ollama".to_string(),
        })
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}
