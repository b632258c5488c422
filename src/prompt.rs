//! PromptAssembler (§4.7): a pure function from (question, schema, mode,
//! retrieved chunks, custom instructions) to a `{system_prompt, user_prompt}`
//! pair. No I/O, no randomness, no timestamps — grounded in the teacher's
//! prompt-building idiom of plain string-concatenation functions
//! (`benchmark/prompts.rs`'s `build_answer_prompt`/`build_judge_prompt`,
//! `query_intelligence/mod.rs`'s schema-description builders), generalized
//! from a single template to the baseline/enhanced pair this spec requires.

use crate::embedding::index::ScoredChunk;
use crate::models::SchemaSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Baseline,
    Enhanced,
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Render `schema` as a table-by-table DDL-like block: column names, types,
/// primary-key markers, and FK arrows (§4.7 "Baseline").
fn render_schema_block(schema: &SchemaSnapshot) -> String {
    let mut out = String::new();
    for table in &schema.tables {
        out.push_str(&format!("TABLE {}.{} (\n", schema.database, table.name));
        for column in &table.columns {
            let pk = if column.primary_key { " PRIMARY KEY" } else { "" };
            let nullable = if column.nullable { "" } else { " NOT NULL" };
            out.push_str(&format!("  {} {}{}{},\n", column.name, column.data_type, pk, nullable));
        }
        for fk in &table.foreign_keys {
            out.push_str(&format!(
                "  FOREIGN KEY {} -> {}.{}\n",
                fk.local_column, fk.ref_table, fk.ref_column
            ));
        }
        out.push_str(")\n\n");
    }
    out
}

fn render_semantic_context(chunks: &[ScoredChunk]) -> String {
    let mut out = String::from("Semantic Context:\n");
    for chunk in chunks {
        out.push_str(&format!("[{}] {}\n\n", chunk.chunk_kind, chunk.text_content));
    }
    out
}

const BASELINE_INSTRUCTIONS: &str = "You are a SQL generation assistant for a Postgres database. \
Given the schema below and a natural-language question, emit a single valid SELECT query that \
answers the question. Output only the SQL statement, no prose, no markdown code fences. Always \
use fully qualified table names with the schema prefix shown in the schema block.";

const ENHANCED_GUIDANCE: &str = "Additional guidance: preserve AND-semantics (all conditions must \
hold) versus IN-list semantics (any of a set) exactly as the question implies; use DISTINCT when \
the question implies uniqueness of the result; when a column could come from more than one table, \
prefer the table explicitly identified in the semantic context as the authoritative source of \
that column.";

/// Build the `{system_prompt, user_prompt}` pair for one question (§4.7).
///
/// `chunks` is ignored in `PromptMode::Baseline`; pass retrieved chunks in
/// their retrieval order for `PromptMode::Enhanced`.
pub fn assemble_prompt(
    question: &str,
    schema: &SchemaSnapshot,
    mode: PromptMode,
    chunks: &[ScoredChunk],
    custom_instructions: Option<&str>,
) -> AssembledPrompt {
    let mut system_prompt = String::from(BASELINE_INSTRUCTIONS);

    if mode == PromptMode::Enhanced {
        system_prompt.push(' ');
        system_prompt.push_str(ENHANCED_GUIDANCE);
    }

    if let Some(instructions) = custom_instructions {
        if !instructions.trim().is_empty() {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(instructions);
        }
    }

    let mut user_prompt = String::new();
    user_prompt.push_str("Schema:\n\n");
    user_prompt.push_str(&render_schema_block(schema));

    if mode == PromptMode::Enhanced && !chunks.is_empty() {
        user_prompt.push_str(&render_semantic_context(chunks));
        user_prompt.push('\n');
    }

    user_prompt.push_str(&format!("Question: {question}\n"));

    AssembledPrompt { system_prompt, user_prompt }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SchemaColumn, SchemaTable, SemanticForeignKey};

    fn sample_schema() -> SchemaSnapshot {
        SchemaSnapshot {
            database: "world_1".to_string(),
            tables: vec![SchemaTable {
                name: "country".to_string(),
                columns: vec![SchemaColumn {
                    name: "code".to_string(),
                    data_type: "text".to_string(),
                    nullable: false,
                    primary_key: true,
                }],
                foreign_keys: vec![SemanticForeignKey {
                    local_column: "capital".to_string(),
                    ref_table: "city".to_string(),
                    ref_column: "id".to_string(),
                }],
                row_count: Some(239),
            }],
        }
    }

    #[test]
    fn is_deterministic_given_identical_inputs() {
        let schema = sample_schema();
        let a = assemble_prompt("How many countries?", &schema, PromptMode::Baseline, &[], None);
        let b = assemble_prompt("How many countries?", &schema, PromptMode::Baseline, &[], None);
        assert_eq!(a.system_prompt, b.system_prompt);
        assert_eq!(a.user_prompt, b.user_prompt);
    }

    #[test]
    fn enhanced_prompt_differs_from_baseline_by_guidance_and_context() {
        let schema = sample_schema();
        let chunk = ScoredChunk {
            id: "world_1::table::country".to_string(),
            chunk_kind: "table".to_string(),
            table_name: Some("country".to_string()),
            text_content: "country holds one row per nation".to_string(),
            score: 0.9,
        };
        let baseline = assemble_prompt("How many countries?", &schema, PromptMode::Baseline, &[], None);
        let enhanced =
            assemble_prompt("How many countries?", &schema, PromptMode::Enhanced, &[chunk], None);

        assert!(enhanced.system_prompt.contains("AND-semantics"));
        assert!(!baseline.system_prompt.contains("AND-semantics"));
        assert!(enhanced.user_prompt.contains("Semantic Context"));
        assert!(!baseline.user_prompt.contains("Semantic Context"));
    }

    #[test]
    fn custom_instructions_are_appended_verbatim() {
        let schema = sample_schema();
        let prompt = assemble_prompt(
            "How many countries?",
            &schema,
            PromptMode::Baseline,
            &[],
            Some("Never use SELECT *."),
        );
        assert!(prompt.system_prompt.ends_with("Never use SELECT *."));
    }

    #[test]
    fn schema_block_includes_schema_prefix_and_foreign_key_arrow() {
        let schema = sample_schema();
        let prompt = assemble_prompt("q", &schema, PromptMode::Baseline, &[], None);
        assert!(prompt.user_prompt.contains("TABLE world_1.country"));
        assert!(prompt.user_prompt.contains("FOREIGN KEY capital -> city.id"));
    }
}
