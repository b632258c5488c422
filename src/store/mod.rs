//! MetadataStore abstraction layer (§4.1).
//!
//! Durable storage of Runs, Results, SemanticLayers, and a global
//! custom-instructions blob. The trait abstraction exists so the Runner and
//! ControlAPI never depend on a concrete database engine directly.

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::{
    CreateRun, ListResultsFilter, ListResultsPage, ResultRow, Run, RunState, RunSummary,
    SemanticLayer,
};

pub mod postgres;

/// Summary row returned by `list_runs`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunListEntry {
    pub id: uuid::Uuid,
    pub name: String,
    pub state: RunState,
    pub question_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CostDeltas {
    pub baseline_usd: f64,
    pub enhanced_usd: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Rollups {
    pub baseline: crate::models::ModeRollup,
    pub enhanced: crate::models::ModeRollup,
}

/// Core abstraction over durable storage (§4.1).
///
/// All implementations must be `Send + Sync` to support concurrent access from
/// the Runner's coordination task and the ControlAPI's handlers.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a Run in `pending`. Fails with `Conflict` if policy disallows a
    /// concurrent identical run (default policy: allow concurrent).
    async fn create_run(&self, config: CreateRun) -> Result<uuid::Uuid, StoreError>;

    /// Transition pending->running, stamping `started_at`. Idempotent if
    /// already running; fails with `InvalidState` from a terminal state.
    async fn mark_running(&self, run_id: uuid::Uuid) -> Result<(), StoreError>;

    /// Upsert progress counters. Safe under contention from a single writer
    /// (the owning Runner); readers may observe monotonically advancing counts.
    async fn update_progress(
        &self,
        run_id: uuid::Uuid,
        completed: i64,
        failed: i64,
        current_question: Option<&str>,
        cost_deltas: CostDeltas,
    ) -> Result<(), StoreError>;

    /// Insert-or-ignore keyed by (run_id, question_id). Re-insertion of the
    /// same key is a silent no-op, which is what makes a naive replay safe.
    async fn record_result(&self, result: ResultRow) -> Result<(), StoreError>;

    /// Transition to a terminal state, stamp the terminal timestamp, and
    /// store the final rollups. Idempotent.
    async fn finalize_run(
        &self,
        run_id: uuid::Uuid,
        final_state: RunState,
        reason: Option<&str>,
        rollups: Rollups,
    ) -> Result<(), StoreError>;

    /// If state is pending/running, set state=cancelled, stamp `cancelled_at`,
    /// and record `reason`. No-op (not an error) from a terminal state.
    async fn cancel_run(&self, run_id: uuid::Uuid, reason: &str) -> Result<(), StoreError>;

    async fn list_runs(&self, limit: i64) -> Result<Vec<RunListEntry>, StoreError>;

    async fn get_status(&self, run_id: uuid::Uuid) -> Result<Run, StoreError>;

    async fn get_summary(&self, run_id: uuid::Uuid) -> Result<RunSummary, StoreError>;

    async fn list_results(
        &self,
        run_id: uuid::Uuid,
        filter: ListResultsFilter,
    ) -> Result<ListResultsPage, StoreError>;

    async fn delete_run(&self, run_id: uuid::Uuid) -> Result<(), StoreError>;

    async fn load_semantic_layer(
        &self,
        connection: &str,
        database: &str,
    ) -> Result<Option<SemanticLayer>, StoreError>;

    async fn list_semantic_layers(&self) -> Result<Vec<SemanticLayer>, StoreError>;

    async fn save_semantic_layer(&self, layer: SemanticLayer) -> Result<(), StoreError>;

    async fn delete_semantic_layer(&self, connection: &str, database: &str) -> Result<(), StoreError>;

    async fn get_instructions(&self) -> Result<Option<String>, StoreError>;

    async fn set_instructions(&self, text: &str) -> Result<(), StoreError>;
}
