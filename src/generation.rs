//! GenerationPipeline (§4.8): turns one (database, question) pair into a
//! single candidate SQL statement, in either baseline or enhanced mode.
//!
//! The two modes share nearly all of their machinery — schema lookup, prompt
//! assembly, LLM call, SQL extraction — differing only in whether retrieved
//! semantic chunks are folded into the prompt, mirroring how the teacher's
//! `consolidation/mod.rs` shares one LLM-call path between its synthesis and
//! fallback branches and only swaps the prompt-building step.

use tracing::warn;

use crate::errors::{CoreError, LlmError};
use crate::llm::LlmClient;
use crate::models::SchemaSnapshot;
use crate::prompt::{assemble_prompt, PromptMode};
use crate::retriever::SemanticRetriever;
use crate::schema::SchemaExtractor;

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub generated_sql: String,
    pub tokens_prompt: i32,
    pub tokens_completion: i32,
    pub cost_usd: f64,
    pub execution_time_ms: i64,
    pub semantic_chunks_used: i32,
    /// True only when the prompt actually carried retrieved semantic context
    /// (§4.8); false for baseline calls and for enhanced calls that degraded
    /// to baseline (empty index, no retriever, or context-too-large fallback).
    pub has_semantic_context: bool,
}

pub struct GenerationPipeline<'a> {
    llm: &'a LlmClient,
    schema_extractor: &'a SchemaExtractor,
    retriever: Option<&'a SemanticRetriever<'a>>,
    retrieval_top_k: usize,
}

impl<'a> GenerationPipeline<'a> {
    pub fn new(
        llm: &'a LlmClient,
        schema_extractor: &'a SchemaExtractor,
        retriever: Option<&'a SemanticRetriever<'a>>,
        retrieval_top_k: usize,
    ) -> Self {
        GenerationPipeline { llm, schema_extractor, retriever, retrieval_top_k }
    }

    pub async fn generate_baseline(
        &self,
        database: &str,
        question: &str,
        custom_instructions: Option<&str>,
    ) -> Result<GenerationResult, CoreError> {
        let schema = self.schema_extractor.extract(database).await.map_err(CoreError::Executor)?;
        self.generate_with_chunks(database, question, &schema, &[], custom_instructions).await
    }

    /// Enhanced generation degrades to the baseline prompt — with a logged
    /// warning, not an error — when the database has no indexed semantic
    /// chunks yet (§4.8: "must tolerate an empty index").
    pub async fn generate_enhanced(
        &self,
        database: &str,
        question: &str,
        custom_instructions: Option<&str>,
    ) -> Result<GenerationResult, CoreError> {
        let schema = self.schema_extractor.extract(database).await.map_err(CoreError::Executor)?;

        let Some(retriever) = self.retriever else {
            warn!(database, "enhanced mode requested with no retriever configured, degrading to baseline");
            return self.generate_with_chunks(database, question, &schema, &[], custom_instructions).await;
        };

        if !retriever.has_chunks(database).await.map_err(CoreError::Embedding)? {
            warn!(database, "no semantic chunks indexed for database, degrading to baseline");
            return self.generate_with_chunks(database, question, &schema, &[], custom_instructions).await;
        }

        let chunks = retriever
            .retrieve(database, question, self.retrieval_top_k)
            .await
            .map_err(CoreError::Embedding)?;

        if chunks.is_empty() {
            warn!(database, "index reported chunks for database but retrieval returned none, degrading to baseline");
            return self.generate_with_chunks(database, question, &schema, &[], custom_instructions).await;
        }

        self.generate_with_chunks(database, question, &schema, &chunks, custom_instructions).await
    }

    async fn generate_with_chunks(
        &self,
        database: &str,
        question: &str,
        schema: &SchemaSnapshot,
        chunks: &[crate::embedding::index::ScoredChunk],
        custom_instructions: Option<&str>,
    ) -> Result<GenerationResult, CoreError> {
        let mode = if chunks.is_empty() { PromptMode::Baseline } else { PromptMode::Enhanced };
        let task_name = if mode == PromptMode::Enhanced { "enhanced_sql" } else { "baseline_sql" };

        let prompt = assemble_prompt(question, schema, mode, chunks, custom_instructions);

        let (result, chunks_used) = match self.llm.complete(task_name, &prompt.system_prompt, &prompt.user_prompt).await {
            Ok(result) => (result, chunks.len()),
            // §4.8: on CONTEXT_TOO_LARGE in enhanced mode, progressively drop
            // the lowest-scored chunks (retrieved in descending-score order,
            // so the lowest scores are the tail) and retry once with half as
            // many; if that still overflows, drop all chunks and fall back to
            // a plain baseline call.
            Err(LlmError::ContextTooLarge(_)) if mode == PromptMode::Enhanced && !chunks.is_empty() => {
                let reduced = &chunks[..chunks.len() / 2];
                if reduced.is_empty() {
                    warn!(database, question, "context too large, dropping all semantic chunks and falling back to baseline");
                    let fallback_prompt =
                        assemble_prompt(question, schema, PromptMode::Baseline, &[], custom_instructions);
                    let result = self
                        .llm
                        .complete("baseline_sql", &fallback_prompt.system_prompt, &fallback_prompt.user_prompt)
                        .await
                        .map_err(CoreError::Llm)?;
                    (result, 0)
                } else {
                    warn!(
                        database,
                        question,
                        dropped = chunks.len() - reduced.len(),
                        "context too large, retrying once with fewer semantic chunks"
                    );
                    let reduced_prompt =
                        assemble_prompt(question, schema, PromptMode::Enhanced, reduced, custom_instructions);
                    match self.llm.complete(task_name, &reduced_prompt.system_prompt, &reduced_prompt.user_prompt).await {
                        Ok(result) => (result, reduced.len()),
                        Err(LlmError::ContextTooLarge(_)) => {
                            warn!(database, question, "still too large with fewer chunks, falling back to baseline");
                            let fallback_prompt =
                                assemble_prompt(question, schema, PromptMode::Baseline, &[], custom_instructions);
                            let result = self
                                .llm
                                .complete("baseline_sql", &fallback_prompt.system_prompt, &fallback_prompt.user_prompt)
                                .await
                                .map_err(CoreError::Llm)?;
                            (result, 0)
                        }
                        Err(e) => return Err(CoreError::Llm(e)),
                    }
                }
            }
            Err(e) => return Err(CoreError::Llm(e)),
        };

        Ok(GenerationResult {
            generated_sql: extract_sql(&result.text),
            tokens_prompt: result.tokens_prompt,
            tokens_completion: result.tokens_completion,
            cost_usd: result.cost_usd,
            execution_time_ms: result.latency_ms as i64,
            semantic_chunks_used: chunks_used as i32,
            has_semantic_context: chunks_used > 0,
        })
    }
}

/// Strip markdown code fences and keep only the first statement the model
/// returned (§4.8: models occasionally wrap SQL in ```sql fences or answer
/// with more than one statement despite instructions).
fn extract_sql(text: &str) -> String {
    let mut cleaned = text.trim();

    if let Some(start) = cleaned.find("```") {
        let after_fence = &cleaned[start + 3..];
        let after_fence = after_fence.strip_prefix("sql").unwrap_or(after_fence);
        if let Some(end) = after_fence.find("```") {
            cleaned = after_fence[..end].trim();
        } else {
            cleaned = after_fence.trim();
        }
    }

    let first_statement = cleaned.split(';').next().unwrap_or(cleaned).trim();
    if first_statement.is_empty() {
        cleaned.trim().to_string()
    } else {
        first_statement.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_sql_strips_markdown_fences() {
        let text = "```sql\nSELECT * FROM country\n```";
        assert_eq!(extract_sql(text), "SELECT * FROM country");
    }

    #[test]
    fn extract_sql_keeps_only_first_statement() {
        let text = "SELECT * FROM country; DROP TABLE country;";
        assert_eq!(extract_sql(text), "SELECT * FROM country");
    }

    #[test]
    fn extract_sql_trims_plain_output() {
        assert_eq!(extract_sql("  SELECT 1  "), "SELECT 1");
    }

    #[test]
    fn extract_sql_handles_fence_without_language_tag() {
        let text = "```\nSELECT 1\n```";
        assert_eq!(extract_sql(text), "SELECT 1");
    }
}
