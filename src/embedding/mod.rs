//! Embedding provider trait (§4.5) and the Postgres+pgvector-backed
//! `EmbeddingIndex` that sits behind it.
//!
//! Generalized from the teacher's pluggable local/OpenAI provider split:
//! `EmbeddingProvider` and its two implementations keep the exact shape, but
//! the async mpsc-channel background worker (`pipeline.rs`) is dropped — §4.5
//! wants a synchronous embed/upsert/query/delete contract, not a fire-and-
//! forget queue, so `index.rs` calls providers inline.

pub mod index;
pub mod local;
pub mod openai;

use async_trait::async_trait;

use crate::errors::EmbeddingError;

/// Core trait for embedding text into fixed-dimension float vectors.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g. `Arc<dyn EmbeddingProvider>`).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Return the model name identifier (e.g. "text-embedding-3-small").
    fn model_name(&self) -> &str;

    /// Return the dimension of the embedding vectors produced by this model.
    fn dimension(&self) -> usize;
}

