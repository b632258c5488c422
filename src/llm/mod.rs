//! LLMClient (§4.4): a narrow capability set over chat-completion providers,
//! generalized from the teacher's `extraction`/`query_intelligence` provider-
//! trait pattern (pluggable OpenAI/Ollama implementations behind one trait,
//! retried HTTP calls, structured error classification) to a single
//! `complete(task_name, ...)` entry point with a task -> (provider, model,
//! temperature, max tokens) mapping sourced from `Config` rather than per-
//! call arguments.

pub mod ollama;
pub mod openai;

use async_trait::async_trait;

use crate::config::{Config, TaskModelConfig};
use crate::errors::LlmError;
use crate::retry::{with_retry, RetryVerdict, LLM_RETRY};

#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub text: String,
    pub tokens_prompt: i32,
    pub tokens_completion: i32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub model_name: String,
    pub provider_name: String,
}

/// Implementations never throw on a malformed model response; the caller
/// sees `text` carrying whatever the model said (§4.4).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        options: CompletionOptions,
    ) -> Result<CompletionResult, LlmError>;

    fn provider_name(&self) -> &str;
}

/// Static price table, USD per 1M tokens, keyed by (provider, model).
/// Mirrors the teacher's hardcoded-default-model idiom (e.g.
/// `extraction/openai.rs`'s `"gpt-4o-mini"` default) but as a priced lookup
/// table rather than a single constant, since LLMClient must report cost
/// per §4.4.
fn price_per_million_tokens(provider: &str, model: &str) -> (f64, f64) {
    match (provider, model) {
        ("openai", "gpt-4o-mini") => (0.15, 0.60),
        ("openai", "gpt-4o") => (2.50, 10.00),
        ("openai", "gpt-4.1-mini") => (0.40, 1.60),
        ("ollama", _) => (0.0, 0.0),
        _ => (0.50, 1.50),
    }
}

pub(crate) fn compute_cost(provider: &str, model: &str, tokens_prompt: i32, tokens_completion: i32) -> f64 {
    let (prompt_price, completion_price) = price_per_million_tokens(provider, model);
    let prompt_cost = (tokens_prompt as f64 / 1_000_000.0) * prompt_price;
    let completion_cost = (tokens_completion as f64 / 1_000_000.0) * completion_price;
    prompt_cost + completion_cost
}

/// Dispatches `complete` calls to the configured provider for `task_name`,
/// retrying RATE_LIMIT/TRANSIENT failures up to 3 times with jittered
/// exponential backoff (§4.4).
pub struct LlmClient {
    openai: Option<openai::OpenAiProvider>,
    ollama: ollama::OllamaProvider,
    task_models: std::collections::HashMap<String, TaskModelConfig>,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let openai = config
            .openai_api_key
            .as_ref()
            .filter(|k| !k.trim().is_empty())
            .map(|k| openai::OpenAiProvider::new(k.clone()));

        LlmClient {
            openai,
            ollama: ollama::OllamaProvider::new(config.ollama_base_url.clone()),
            task_models: config.task_models.clone(),
        }
    }

    pub async fn complete(
        &self,
        task_name: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CompletionResult, LlmError> {
        let task_config = self.task_models.get(task_name).ok_or_else(|| {
            LlmError::Permanent(format!("no model configured for task '{task_name}'"))
        })?;

        let options = CompletionOptions {
            temperature: task_config.temperature,
            max_output_tokens: task_config.max_output_tokens,
        };

        let provider: &dyn LlmProvider = match task_config.provider.as_str() {
            "openai" => self
                .openai
                .as_ref()
                .map(|p| p as &dyn LlmProvider)
                .ok_or_else(|| LlmError::Permanent("openai provider not configured (missing API key)".to_string()))?,
            "ollama" => &self.ollama,
            other => return Err(LlmError::Permanent(format!("unknown LLM provider '{other}'"))),
        };

        with_retry(
            LLM_RETRY,
            || provider.complete(&task_config.model, system_prompt, user_prompt, options),
            |e: &LlmError| if e.is_retryable() { RetryVerdict::Retry } else { RetryVerdict::GiveUp },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_priced_above_zero() {
        let (p, c) = price_per_million_tokens("openai", "gpt-4o-mini");
        assert!(p > 0.0 && c > 0.0);
    }

    #[test]
    fn ollama_is_free() {
        assert_eq!(compute_cost("ollama", "llama3.2:3b", 1000, 1000), 0.0);
    }
}
