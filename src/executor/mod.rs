//! QueryExecutor (§4.2): safe, pooled, retry-aware SQL execution against the
//! benchmark Postgres cluster.
//!
//! No teacher analog exists — the source codebase never executes untrusted
//! SQL — so this module's session-setup idiom (acquire from pool, configure
//! the session, execute, always roll back) is grounded in the
//! acquire-then-configure shape `store/postgres.rs` uses around its pooled
//! connections, generalized to a read-only transaction with a per-statement
//! timeout instead of a write-capable one.

mod safety;

pub use safety::validate_statement;

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::errors::ExecutorError;
use crate::retry::{with_retry, RetryVerdict, EXECUTOR_RETRY};

/// A single executed statement's tabular result, capped at `row_cap` rows.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub truncated: bool,
    pub execution_ms: u64,
}

/// A loosely-typed cell value, sufficient for equivalence comparison and
/// JSON serialization to the ControlAPI without leaking sqlx's row types.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

pub struct QueryExecutor {
    pool: PgPool,
    row_cap: usize,
    statement_timeout: Duration,
}

impl QueryExecutor {
    pub async fn new(
        database_url: &str,
        pool_min: u32,
        pool_max: u32,
        row_cap: usize,
        statement_timeout: Duration,
    ) -> Result<Self, ExecutorError> {
        let pool = PgPoolOptions::new()
            .min_connections(pool_min)
            .max_connections(pool_max)
            .connect(database_url)
            .await
            .map_err(|e| ExecutorError::Pool(e.to_string()))?;

        Ok(QueryExecutor { pool, row_cap, statement_timeout })
    }

    /// Execute `sql` read-only against `database`'s schema namespace (§4.2).
    ///
    /// Rejects data-modifying or multi-statement SQL up front. Transient
    /// connection errors are retried; semantic errors (bad syntax, missing
    /// column) surface on the first failure since they are the subject of
    /// the benchmark, not an executor defect.
    pub async fn execute(&self, database: &str, sql: &str) -> Result<ExecutionOutcome, ExecutorError> {
        validate_statement(sql)?;

        with_retry(
            EXECUTOR_RETRY,
            || self.execute_once(database, sql),
            |e: &ExecutorError| match e {
                ExecutorError::Transient(_) => RetryVerdict::Retry,
                _ => RetryVerdict::GiveUp,
            },
        )
        .await
    }

    async fn execute_once(&self, database: &str, sql: &str) -> Result<ExecutionOutcome, ExecutorError> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(ExecutorError::from)?;

        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await.map_err(ExecutorError::from)?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(ExecutorError::from)?;
        sqlx::query(&format!("SET LOCAL search_path = {}", quote_ident(database)))
            .execute(&mut *tx)
            .await
            .map_err(ExecutorError::from)?;

        let result = sqlx::query(sql).fetch_all(&mut *tx).await;

        // Roll back unconditionally per §4.2 — the executor never mutates state
        // regardless of whether the statement itself would have.
        let _ = tx.rollback().await;

        let elapsed_ms = start.elapsed().as_millis() as u64;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                return Err(classify_execution_error(e, elapsed_ms));
            }
        };

        let columns = if let Some(first) = rows.first() {
            first.columns().iter().map(|c| c.name().to_string()).collect()
        } else {
            Vec::new()
        };

        let truncated = rows.len() > self.row_cap;
        let decoded = rows
            .iter()
            .take(self.row_cap)
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExecutionOutcome { columns, rows: decoded, truncated, execution_ms: elapsed_ms })
    }
}

fn classify_execution_error(e: sqlx::Error, elapsed_ms: u64) -> ExecutorError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ExecutorError::Transient(e.to_string()),
        sqlx::Error::Database(db_err) if is_pg_query_canceled(db_err.code().as_deref()) => {
            ExecutorError::Timeout { timeout_ms: elapsed_ms }
        }
        _ => ExecutorError::ExecutionFailed(e.to_string()),
    }
}

fn is_pg_query_canceled(code: Option<&str>) -> bool {
    code == Some("57014")
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<Vec<CellValue>, ExecutorError> {
    (0..row.len())
        .map(|i| {
            let raw = row.try_get_raw(i).map_err(ExecutorError::from)?;
            if raw.is_null() {
                return Ok(CellValue::Null);
            }
            let type_name = raw.type_info().name();
            let value = match type_name {
                "BOOL" => row
                    .try_get::<bool, _>(i)
                    .map(CellValue::Bool)
                    .map_err(ExecutorError::from)?,
                "INT2" | "INT4" | "INT8" => row
                    .try_get::<i64, _>(i)
                    .map(CellValue::Int)
                    .or_else(|_| row.try_get::<i32, _>(i).map(|v| CellValue::Int(v as i64)))
                    .map_err(ExecutorError::from)?,
                "FLOAT4" | "FLOAT8" => row
                    .try_get::<f64, _>(i)
                    .map(CellValue::Float)
                    .map_err(ExecutorError::from)?,
                // NUMERIC has no sqlx `Decode<f64>` impl; decode through
                // `bigdecimal::BigDecimal` (the `bigdecimal` sqlx feature) and
                // cast down, since equivalence comparison only needs a
                // tolerance-bounded f64, not arbitrary precision.
                "NUMERIC" => row
                    .try_get::<bigdecimal::BigDecimal, _>(i)
                    .map_err(ExecutorError::from)
                    .and_then(|d| {
                        d.to_string()
                            .parse::<f64>()
                            .map(CellValue::Float)
                            .map_err(|e| ExecutorError::ExecutionFailed(format!("numeric cell out of f64 range: {e}")))
                    })?,
                _ => row
                    .try_get::<String, _>(i)
                    .map(CellValue::Text)
                    .unwrap_or_else(|_| CellValue::Text(format!("<{type_name}>"))),
            };
            Ok(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_escapes_double_quotes() {
        assert_eq!(quote_ident("world_1"), "\"world_1\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
