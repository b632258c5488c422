//! SemanticRetriever (§4.6): deterministic chunking of a `SemanticLayer` into
//! embeddable `SemanticChunk`s, plus top-k retrieval for a question.
//!
//! Grounded in `embedding/index.rs`'s batch-upsert/query shape, generalized
//! from a flat record list to the six-way chunk taxonomy this spec defines.
//! Chunking itself is pure text-shaping with no I/O, mirroring the teacher's
//! `consolidation/mod.rs`'s deterministic-text-before-embedding pattern
//! (build the text first, embed it only once it is final).

use crate::embedding::index::{EmbeddingIndex, IndexRecord, ScoredChunk};
use crate::errors::EmbeddingError;
use crate::models::{ChunkKind, SemanticChunk, SemanticLayer};

pub struct SemanticRetriever<'a> {
    index: &'a EmbeddingIndex,
}

impl<'a> SemanticRetriever<'a> {
    pub fn new(index: &'a EmbeddingIndex) -> Self {
        SemanticRetriever { index }
    }

    /// Re-chunk and re-index `layer`'s current version, replacing whatever
    /// was indexed for its database before (§4.6 `index_database`).
    pub async fn index_database(&self, layer: &SemanticLayer) -> Result<usize, EmbeddingError> {
        let chunks = chunk_layer(layer);
        let count = chunks.len();

        self.index.delete_by_database(&layer.database).await?;

        let records = chunks
            .into_iter()
            .map(|chunk| IndexRecord {
                id: chunk.id,
                database: chunk.database,
                chunk_kind: chunk.chunk_kind.as_str().to_string(),
                table_name: chunk.table_name,
                text_content: chunk.text_content,
            })
            .collect();
        self.index.upsert_batch(records).await?;

        Ok(count)
    }

    /// Whether `database` has any indexed chunks (§4.8: generation checks
    /// this before retrieving, so a freshly-deleted or never-indexed database
    /// degrades to baseline without spending an embedding call on the question).
    pub async fn has_chunks(&self, database: &str) -> Result<bool, EmbeddingError> {
        self.index.has_chunks(database).await
    }

    /// Embed `question` and return the top-`top_k` chunks for `database`
    /// ordered by descending cosine score (§4.6 `retrieve`).
    pub async fn retrieve(
        &self,
        database: &str,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        let query_vector = self.index.embed(question).await?;
        self.index.query(database, &query_vector, top_k).await
    }
}

/// Derive the deterministic six-kind chunk set from a semantic layer (§3, §4.6).
///
/// Chunk text is built by plain string concatenation, never by an LLM call, so
/// the same layer version always produces byte-identical chunks.
fn chunk_layer(layer: &SemanticLayer) -> Vec<SemanticChunk> {
    let mut chunks = Vec::new();
    let database = &layer.database;

    chunks.push(overview_chunk(database, layer));

    for table in &layer.tables {
        chunks.push(table_chunk(database, table));
    }

    if !layer.cross_table_insights.is_empty() {
        chunks.push(cross_table_chunk(database, layer));
    }

    if !layer.domain_glossary.is_empty() {
        chunks.push(glossary_chunk(database, layer));
    }

    if !layer.ambiguities.is_empty() {
        chunks.push(ambiguities_chunk(database, layer));
    }

    if !layer.query_guidelines.is_empty() {
        chunks.push(guidelines_chunk(database, layer));
    }

    chunks
}

fn overview_chunk(database: &str, layer: &SemanticLayer) -> SemanticChunk {
    let overview = &layer.overview;
    let mut text = format!("Domain: {}\nPurpose: {}\n", overview.domain, overview.purpose);
    if !overview.key_entities.is_empty() {
        text.push_str(&format!("Key entities: {}\n", overview.key_entities.join(", ")));
    }
    if !overview.typical_questions.is_empty() {
        text.push_str("Typical questions:\n");
        for question in &overview.typical_questions {
            text.push_str(&format!("- {question}\n"));
        }
    }
    SemanticChunk {
        id: SemanticChunk::make_id(database, ChunkKind::Overview, None),
        database: database.to_string(),
        chunk_kind: ChunkKind::Overview,
        table_name: None,
        text_content: text,
    }
}

fn table_chunk(database: &str, table: &crate::models::SemanticTable) -> SemanticChunk {
    let mut text = format!("Table: {} ({})\nPurpose: {}\n", table.name, table.business_name, table.purpose);
    if !table.columns.is_empty() {
        text.push_str("Columns:\n");
        for column in &table.columns {
            let synonyms = if column.synonyms.is_empty() {
                String::new()
            } else {
                format!(" (synonyms: {})", column.synonyms.join(", "))
            };
            text.push_str(&format!("- {}: {}{}\n", column.name, column.business_meaning, synonyms));
        }
    }
    if !table.foreign_keys.is_empty() {
        text.push_str("Foreign keys:\n");
        for fk in &table.foreign_keys {
            text.push_str(&format!("- {} -> {}.{}\n", fk.local_column, fk.ref_table, fk.ref_column));
        }
    }
    if !table.sample_values.is_empty() {
        text.push_str(&format!("Sample values: {}\n", table.sample_values.join(", ")));
    }
    SemanticChunk {
        id: SemanticChunk::make_id(database, ChunkKind::Table, Some(&table.name)),
        database: database.to_string(),
        chunk_kind: ChunkKind::Table,
        table_name: Some(table.name.clone()),
        text_content: text,
    }
}

fn cross_table_chunk(database: &str, layer: &SemanticLayer) -> SemanticChunk {
    let mut text = String::from("Cross-table insights:\n");
    for insight in &layer.cross_table_insights {
        text.push_str(&format!("- {insight}\n"));
    }
    SemanticChunk {
        id: SemanticChunk::make_id(database, ChunkKind::CrossTable, None),
        database: database.to_string(),
        chunk_kind: ChunkKind::CrossTable,
        table_name: None,
        text_content: text,
    }
}

fn glossary_chunk(database: &str, layer: &SemanticLayer) -> SemanticChunk {
    let mut text = String::from("Domain glossary:\n");
    for (term, definition) in &layer.domain_glossary {
        text.push_str(&format!("- {term}: {definition}\n"));
    }
    SemanticChunk {
        id: SemanticChunk::make_id(database, ChunkKind::Glossary, None),
        database: database.to_string(),
        chunk_kind: ChunkKind::Glossary,
        table_name: None,
        text_content: text,
    }
}

fn ambiguities_chunk(database: &str, layer: &SemanticLayer) -> SemanticChunk {
    let mut text = String::from("Known ambiguities:\n");
    for ambiguity in &layer.ambiguities {
        text.push_str(&format!("- {ambiguity}\n"));
    }
    SemanticChunk {
        id: SemanticChunk::make_id(database, ChunkKind::Ambiguities, None),
        database: database.to_string(),
        chunk_kind: ChunkKind::Ambiguities,
        table_name: None,
        text_content: text,
    }
}

fn guidelines_chunk(database: &str, layer: &SemanticLayer) -> SemanticChunk {
    let mut text = String::from("Query guidelines:\n");
    for guideline in &layer.query_guidelines {
        text.push_str(&format!("- {guideline}\n"));
    }
    SemanticChunk {
        id: SemanticChunk::make_id(database, ChunkKind::Guidelines, None),
        database: database.to_string(),
        chunk_kind: ChunkKind::Guidelines,
        table_name: None,
        text_content: text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SemanticColumn, SemanticForeignKey, SemanticOverview, SemanticTable};
    use chrono::Utc;

    fn sample_layer() -> SemanticLayer {
        SemanticLayer {
            connection: "spider".to_string(),
            database: "world_1".to_string(),
            version: 1,
            overview: SemanticOverview {
                domain: "geography".to_string(),
                purpose: "country/city facts".to_string(),
                key_entities: vec!["country".to_string(), "city".to_string()],
                typical_questions: vec!["How many countries speak French?".to_string()],
            },
            tables: vec![SemanticTable {
                name: "country".to_string(),
                business_name: "Country".to_string(),
                purpose: "one row per nation".to_string(),
                columns: vec![SemanticColumn {
                    name: "code".to_string(),
                    business_meaning: "ISO country code".to_string(),
                    synonyms: vec!["country code".to_string()],
                }],
                foreign_keys: vec![SemanticForeignKey {
                    local_column: "capital".to_string(),
                    ref_table: "city".to_string(),
                    ref_column: "id".to_string(),
                }],
                sample_values: vec!["USA".to_string(), "FRA".to_string()],
            }],
            cross_table_insights: vec!["country.capital joins city.id".to_string()],
            domain_glossary: vec![("GNP".to_string(), "Gross National Product".to_string())],
            ambiguities: vec!["\"biggest\" could mean area or population".to_string()],
            query_guidelines: vec!["Always filter on IsOfficial when counting languages".to_string()],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let layer = sample_layer();
        let a = chunk_layer(&layer);
        let b = chunk_layer(&layer);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.text_content, y.text_content);
        }
    }

    #[test]
    fn produces_one_chunk_per_present_kind() {
        let layer = sample_layer();
        let chunks = chunk_layer(&layer);
        // overview + 1 table + cross_table + glossary + ambiguities + guidelines
        assert_eq!(chunks.len(), 6);
        assert!(chunks.iter().any(|c| c.chunk_kind == ChunkKind::Overview));
        assert!(chunks.iter().any(|c| c.chunk_kind == ChunkKind::Table && c.table_name.as_deref() == Some("country")));
    }

    #[test]
    fn omits_optional_chunk_kinds_when_layer_section_is_empty() {
        let mut layer = sample_layer();
        layer.cross_table_insights.clear();
        layer.domain_glossary.clear();
        layer.ambiguities.clear();
        layer.query_guidelines.clear();
        let chunks = chunk_layer(&layer);
        // overview + 1 table only
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn chunk_ids_use_the_shared_stable_id_scheme() {
        let layer = sample_layer();
        let chunks = chunk_layer(&layer);
        let table_chunk = chunks.iter().find(|c| c.chunk_kind == ChunkKind::Table).unwrap();
        assert_eq!(table_chunk.id, "world_1::table::country");
        let overview = chunks.iter().find(|c| c.chunk_kind == ChunkKind::Overview).unwrap();
        assert_eq!(overview.id, "world_1::overview");
    }
}
