//! Domain types shared across the core: Run, Result, SemanticLayer, SemanticChunk,
//! and the read-through Schema snapshot (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum RunMode {
    Baseline,
    Enhanced,
    Both,
}

impl RunMode {
    pub fn includes_baseline(self) -> bool {
        matches!(self, RunMode::Baseline | RunMode::Both)
    }

    pub fn includes_enhanced(self) -> bool {
        matches!(self, RunMode::Enhanced | RunMode::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Extra,
}

/// Configuration supplied to `MetadataStore::create_run` (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRun {
    pub name: String,
    pub mode: RunMode,
    pub question_count: i64,
    pub databases: Option<Vec<String>>,
    pub notes: Option<String>,
}

/// Per-mode cost and rollup figures stored on a Run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModeRollup {
    pub exact_match_rate: f64,
    pub exec_match_rate: f64,
    pub correct_count: i64,
    pub total_cost_usd: f64,
}

/// A benchmark execution (§3 "Run").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: uuid::Uuid,
    pub name: String,
    pub mode: RunMode,
    pub question_count: i64,
    pub databases: Option<Vec<String>>,
    pub state: RunState,
    pub completed_count: i64,
    pub failed_count: i64,
    pub current_question: Option<String>,
    pub baseline: ModeRollup,
    pub enhanced: ModeRollup,
    pub total_cost_usd: f64,
    pub wall_clock_ms: Option<i64>,
    pub reason: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Per-mode outcome attached to a Result row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeOutcome {
    pub generated_sql: Option<String>,
    pub exact_match: bool,
    pub exec_match: bool,
    pub error: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub tokens_prompt: Option<i32>,
    pub tokens_completion: Option<i32>,
    pub cost_usd: f64,
    /// Only meaningful for the enhanced mode.
    pub semantic_chunks_used: i32,
    /// Only meaningful for the enhanced mode: false when enhanced generation
    /// degraded to a plain baseline prompt (§4.8, §8).
    pub has_semantic_context: bool,
}

/// One row per (Run, question) (§3 "Result").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub run_id: uuid::Uuid,
    pub question_id: String,
    pub database: String,
    pub question_text: String,
    pub gold_sql: String,
    pub difficulty: Option<Difficulty>,
    pub baseline: Option<ModeOutcome>,
    pub enhanced: Option<ModeOutcome>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResultsFilter {
    pub failures_only: bool,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResultsPage {
    pub results: Vec<ResultRow>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Pre-aggregated rollup metrics returned by `get_summary` (§4.1, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: uuid::Uuid,
    pub overall: PerModeRollups,
    pub by_database: Vec<(String, PerModeRollups)>,
    pub by_difficulty: Vec<(String, PerModeRollups)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerModeRollups {
    pub question_count: i64,
    pub baseline: ModeRollup,
    pub enhanced: ModeRollup,
}

/// A versioned semantic-layer document for (connection, database) (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticLayer {
    pub connection: String,
    pub database: String,
    pub version: i32,
    pub overview: SemanticOverview,
    pub tables: Vec<SemanticTable>,
    pub cross_table_insights: Vec<String>,
    pub domain_glossary: Vec<(String, String)>,
    pub ambiguities: Vec<String>,
    pub query_guidelines: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticOverview {
    pub domain: String,
    pub purpose: String,
    pub key_entities: Vec<String>,
    pub typical_questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticTable {
    pub name: String,
    pub business_name: String,
    pub purpose: String,
    pub columns: Vec<SemanticColumn>,
    pub foreign_keys: Vec<SemanticForeignKey>,
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticColumn {
    pub name: String,
    pub business_meaning: String,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticForeignKey {
    pub local_column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Overview,
    Table,
    CrossTable,
    Glossary,
    Ambiguities,
    Guidelines,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Overview => "overview",
            ChunkKind::Table => "table",
            ChunkKind::CrossTable => "cross_table",
            ChunkKind::Glossary => "glossary",
            ChunkKind::Ambiguities => "ambiguities",
            ChunkKind::Guidelines => "guidelines",
        }
    }
}

/// A derived, embeddable fragment of a SemanticLayer (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticChunk {
    pub id: String,
    pub database: String,
    pub chunk_kind: ChunkKind,
    pub table_name: Option<String>,
    pub text_content: String,
}

impl SemanticChunk {
    pub fn make_id(database: &str, kind: ChunkKind, table_name: Option<&str>) -> String {
        match table_name {
            Some(t) => format!("{database}::{}::{t}", kind.as_str()),
            None => format!("{database}::{}", kind.as_str()),
        }
    }
}

/// Read-through catalog snapshot for one database (§3, §4.3). Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub database: String,
    pub tables: Vec<SchemaTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaTable {
    pub name: String,
    pub columns: Vec<SchemaColumn>,
    pub foreign_keys: Vec<SemanticForeignKey>,
    pub row_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_includes_table_name_only_when_present() {
        assert_eq!(
            SemanticChunk::make_id("world_1", ChunkKind::Table, Some("country")),
            "world_1::table::country"
        );
        assert_eq!(
            SemanticChunk::make_id("world_1", ChunkKind::Overview, None),
            "world_1::overview"
        );
    }
}
