//! OpenAI-compatible chat-completions provider (§4.4).
//!
//! Grounded on `extraction/openai.rs`'s request/response shape (reqwest
//! client, bearer-token header, JSON body/response structs), generalized
//! from a fixed extraction schema to a plain chat completion that reports
//! token usage for cost computation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{compute_cost, CompletionOptions, CompletionResult, LlmProvider};
use crate::errors::LlmError;

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: i32,
    completion_tokens: i32,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        OpenAiProvider { client: reqwest::Client::new(), api_key }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        options: CompletionOptions,
    ) -> Result<CompletionResult, LlmError> {
        let started = std::time::Instant::now();

        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            temperature: options.temperature,
            max_tokens: options.max_output_tokens,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimit(body));
        }
        if status.as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            if body.to_lowercase().contains("context") || body.to_lowercase().contains("maximum context length") {
                return Err(LlmError::ContextTooLarge(body));
            }
            return Err(LlmError::Permanent(body));
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Transient(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Permanent(format!("status {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ProviderInvalid(format!("failed to parse OpenAI response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::ProviderInvalid("OpenAI returned empty choices list".to_string()))?;

        let cost_usd = compute_cost("openai", model, parsed.usage.prompt_tokens, parsed.usage.completion_tokens);

        Ok(CompletionResult {
            text,
            tokens_prompt: parsed.usage.prompt_tokens,
            tokens_completion: parsed.usage.completion_tokens,
            cost_usd,
            latency_ms: started.elapsed().as_millis() as u64,
            model_name: model.to_string(),
            provider_name: "openai".to_string(),
        })
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
