//! Integration tests against a real Postgres instance.
//!
//! Skipped (not failed) when `DATABASE_URL` isn't set, since CI and local dev
//! both run fine without a live database for the pure/unit test suite.

use sqlbench_core::models::{CreateRun, Difficulty, ModeOutcome, ModeRollup, ResultRow, RunMode, RunState};
use sqlbench_core::store::postgres::PostgresMetadataStore;
use sqlbench_core::store::{CostDeltas, MetadataStore, Rollups};

async fn store() -> Option<PostgresMetadataStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(PostgresMetadataStore::new(&url, true).await.expect("failed to connect/migrate metadata store"))
}

fn sample_run(name: &str) -> CreateRun {
    CreateRun {
        name: name.to_string(),
        mode: RunMode::Both,
        question_count: 2,
        databases: Some(vec!["world_1".to_string()]),
        notes: None,
    }
}

fn sample_result(run_id: uuid::Uuid, question_id: &str) -> ResultRow {
    ResultRow {
        run_id,
        question_id: question_id.to_string(),
        database: "world_1".to_string(),
        question_text: "how many countries are there?".to_string(),
        gold_sql: "SELECT count(*) FROM country".to_string(),
        difficulty: Some(Difficulty::Easy),
        baseline: Some(ModeOutcome {
            generated_sql: Some("SELECT count(*) FROM country".to_string()),
            exact_match: true,
            exec_match: true,
            error: None,
            execution_time_ms: Some(42),
            tokens_prompt: Some(100),
            tokens_completion: Some(10),
            cost_usd: 0.0001,
            semantic_chunks_used: 0,
            has_semantic_context: false,
        }),
        enhanced: None,
        created_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn create_run_starts_pending_and_mark_running_transitions_once() {
    let Some(store) = store().await else { return };

    let run_id = store.create_run(sample_run("pending-to-running")).await.unwrap();
    let run = store.get_status(run_id).await.unwrap();
    assert_eq!(run.state, RunState::Pending);

    store.mark_running(run_id).await.unwrap();
    let run = store.get_status(run_id).await.unwrap();
    assert_eq!(run.state, RunState::Running);
    assert!(run.started_at.is_some());

    // idempotent: calling again from `running` must not error or reset started_at.
    store.mark_running(run_id).await.unwrap();
    let run_again = store.get_status(run_id).await.unwrap();
    assert_eq!(run_again.started_at, run.started_at);
}

#[tokio::test]
async fn record_result_is_idempotent_on_replay() {
    let Some(store) = store().await else { return };

    let run_id = store.create_run(sample_run("replay-safety")).await.unwrap();
    store.mark_running(run_id).await.unwrap();

    store.record_result(sample_result(run_id, "dev_0001")).await.unwrap();
    // Same (run_id, question_id) key again: must be a silent no-op, not a conflict.
    store.record_result(sample_result(run_id, "dev_0001")).await.unwrap();

    let page = store
        .list_results(run_id, sqlbench_core::models::ListResultsFilter { failures_only: false, page: 1, page_size: 50 })
        .await
        .unwrap();
    assert_eq!(page.results.len(), 1);
}

#[tokio::test]
async fn finalize_run_is_idempotent_and_only_transitions_from_non_terminal() {
    let Some(store) = store().await else { return };

    let run_id = store.create_run(sample_run("finalize-idempotence")).await.unwrap();
    store.mark_running(run_id).await.unwrap();

    let rollups = Rollups {
        baseline: ModeRollup { exact_match_rate: 1.0, exec_match_rate: 1.0, correct_count: 2, total_cost_usd: 0.0 },
        enhanced: ModeRollup::default(),
    };

    store.finalize_run(run_id, RunState::Completed, None, rollups.clone()).await.unwrap();
    let run = store.get_status(run_id).await.unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert!(run.completed_at.is_some());

    // Replaying finalize_run against an already-terminal run must be a no-op,
    // not an error and not a state flip to something else.
    store.finalize_run(run_id, RunState::Failed, Some("should not apply"), rollups).await.unwrap();
    let run_again = store.get_status(run_id).await.unwrap();
    assert_eq!(run_again.state, RunState::Completed);
}

#[tokio::test]
async fn update_progress_accumulates_cost_deltas_additively() {
    let Some(store) = store().await else { return };

    let run_id = store.create_run(sample_run("cost-accumulation")).await.unwrap();
    store.mark_running(run_id).await.unwrap();

    store
        .update_progress(run_id, 1, 0, Some("dev_0001"), CostDeltas { baseline_usd: 0.01, enhanced_usd: 0.02 })
        .await
        .unwrap();
    store
        .update_progress(run_id, 2, 0, Some("dev_0002"), CostDeltas { baseline_usd: 0.01, enhanced_usd: 0.02 })
        .await
        .unwrap();

    let run = store.get_status(run_id).await.unwrap();
    assert_eq!(run.completed_count, 2);
    assert!((run.total_cost_usd - 0.06).abs() < 1e-9);
    assert_eq!(run.current_question.as_deref(), Some("dev_0002"));
}

#[tokio::test]
async fn cancel_run_only_applies_from_non_terminal_states() {
    let Some(store) = store().await else { return };

    let run_id = store.create_run(sample_run("cancel-guard")).await.unwrap();
    store.cancel_run(run_id, "user requested").await.unwrap();
    let run = store.get_status(run_id).await.unwrap();
    assert_eq!(run.state, RunState::Cancelled);

    // Already terminal: a second cancel must not error.
    store.cancel_run(run_id, "second attempt").await.unwrap();
}
