//! Integration tests against a real Postgres instance acting as a stand-in
//! benchmark database. Skipped when `BENCHMARK_DATABASE_URL` isn't set.

use std::time::Duration;

use sqlbench_core::executor::QueryExecutor;

async fn executor() -> Option<QueryExecutor> {
    let url = std::env::var("BENCHMARK_DATABASE_URL").ok()?;
    Some(
        QueryExecutor::new(&url, 1, 2, 1_000, Duration::from_millis(5_000))
            .await
            .expect("failed to build query executor pool"),
    )
}

#[tokio::test]
async fn select_literal_executes_without_a_schema() {
    let Some(executor) = executor() else { return };
    // "public" always exists; this exercises the executor's session setup
    // (read-only transaction, statement timeout, search_path) end to end.
    let outcome = executor.execute("public", "SELECT 1 AS one").await.unwrap();
    assert_eq!(outcome.columns, vec!["one".to_string()]);
    assert_eq!(outcome.rows.len(), 1);
}

#[tokio::test]
async fn rejects_data_modifying_statements() {
    let Some(executor) = executor() else { return };
    let err = executor.execute("public", "DELETE FROM pg_stat_activity").await.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("read") || err.to_string().to_lowercase().contains("reject"));
}

#[tokio::test]
async fn rejects_multiple_statements() {
    let Some(executor) = executor() else { return };
    let err = executor.execute("public", "SELECT 1; SELECT 2").await.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("statement"));
}

#[tokio::test]
async fn session_is_set_read_only() {
    let Some(executor) = executor() else { return };
    let result = executor.execute("public", "SELECT current_setting('transaction_read_only')").await.unwrap();
    assert_eq!(result.rows[0][0], sqlbench_core::executor::CellValue::Text("on".to_string()));
}
