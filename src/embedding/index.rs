//! EmbeddingIndex (§4.5): embed/upsert/query/delete over a Postgres `vector`
//! column, queried via the cosine-distance operator (`<=>`) with an HNSW
//! index. Grounded in `store/postgres.rs`'s session-scoped `SET` idiom and
//! generalized from the same shape used for executor read-only transactions.

use pgvector::Vector;
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::EmbeddingProvider;
use crate::errors::EmbeddingError;

/// A chunk record to embed and upsert.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: String,
    pub database: String,
    pub chunk_kind: String,
    pub table_name: Option<String>,
    pub text_content: String,
}

/// A scored chunk returned by `query`.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub chunk_kind: String,
    pub table_name: Option<String>,
    pub text_content: String,
    pub score: f64,
}

/// Postgres+pgvector-backed semantic chunk index.
///
/// Identity and dimension are fixed at startup (§4.5): the configured
/// `EmbeddingProvider`'s `dimension()` must match the `semantic_chunks.embedding`
/// column width, established once by the `0002_semantic_chunks` migration.
pub struct EmbeddingIndex {
    pool: PgPool,
    provider: Box<dyn EmbeddingProvider>,
}

impl EmbeddingIndex {
    pub fn new(pool: PgPool, provider: Box<dyn EmbeddingProvider>) -> Self {
        EmbeddingIndex { pool, provider }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed one piece of text (§4.5 `embed`).
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.provider.embed(text).await
    }

    /// Embed every record and upsert it in one batch (§4.5, §4.6
    /// `index_database`'s "embed and upsert all new chunks in one batch").
    pub async fn upsert_batch(&self, records: Vec<IndexRecord>) -> Result<(), EmbeddingError> {
        for record in records {
            let embedding = self.provider.embed(&record.text_content).await?;
            self.upsert_one(&record, embedding).await?;
        }
        Ok(())
    }

    async fn upsert_one(&self, record: &IndexRecord, embedding: Vec<f32>) -> Result<(), EmbeddingError> {
        let vector = Vector::from(embedding);
        sqlx::query(
            "INSERT INTO semantic_chunks (id, database, chunk_kind, table_name, text_content, embedding, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             ON CONFLICT (id) DO UPDATE SET \
                database = EXCLUDED.database, chunk_kind = EXCLUDED.chunk_kind, \
                table_name = EXCLUDED.table_name, text_content = EXCLUDED.text_content, \
                embedding = EXCLUDED.embedding, created_at = EXCLUDED.created_at",
        )
        .bind(&record.id)
        .bind(&record.database)
        .bind(&record.chunk_kind)
        .bind(&record.table_name)
        .bind(&record.text_content)
        .bind(&vector)
        .execute(&self.pool)
        .await
        .map_err(|e| EmbeddingError::Index(e.to_string()))?;
        Ok(())
    }

    /// Top-k cosine search over the chunks belonging to `database` (§4.5, §4.6).
    pub async fn query(
        &self,
        database: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        let vector = Vector::from(query_vector.to_vec());
        let rows = sqlx::query(
            "SELECT id, chunk_kind, table_name, text_content, 1 - (embedding <=> $1) AS score \
             FROM semantic_chunks WHERE database = $2 \
             ORDER BY embedding <=> $1 LIMIT $3",
        )
        .bind(&vector)
        .bind(database)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EmbeddingError::Index(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(ScoredChunk {
                    id: row.try_get("id").map_err(|e| EmbeddingError::Index(e.to_string()))?,
                    chunk_kind: row.try_get("chunk_kind").map_err(|e| EmbeddingError::Index(e.to_string()))?,
                    table_name: row.try_get("table_name").map_err(|e| EmbeddingError::Index(e.to_string()))?,
                    text_content: row
                        .try_get("text_content")
                        .map_err(|e| EmbeddingError::Index(e.to_string()))?,
                    score: row.try_get("score").map_err(|e| EmbeddingError::Index(e.to_string()))?,
                })
            })
            .collect()
    }

    /// Whether `database` has any indexed chunks (§4.8: "must tolerate an
    /// empty index by degrading to baseline").
    pub async fn has_chunks(&self, database: &str) -> Result<bool, EmbeddingError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM semantic_chunks WHERE database = $1")
            .bind(database)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EmbeddingError::Index(e.to_string()))?;
        Ok(count > 0)
    }

    /// Wipe all chunks for `database` before re-indexing (§4.5 `delete_by_database`).
    pub async fn delete_by_database(&self, database: &str) -> Result<(), EmbeddingError> {
        sqlx::query("DELETE FROM semantic_chunks WHERE database = $1")
            .bind(database)
            .execute(&self.pool)
            .await
            .map_err(|e| EmbeddingError::Index(e.to_string()))?;
        Ok(())
    }
}

