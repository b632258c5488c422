//! PostgreSQL-backed implementation of MetadataStore.
//!
//! Uses sqlx with PgPool for connection pooling. Runs migrations on startup.
//! Every write call is wrapped in the shared retry combinator per §4.1's
//! "wrapped in retry-with-exponential-backoff ... for transient connectivity
//! failures" requirement; constraint violations and other non-transient
//! failures surface immediately (the classifier only retries `StoreError::Transient`).

use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    Row,
};
use std::time::Duration;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{
    CreateRun, Difficulty, ListResultsFilter, ListResultsPage, ModeOutcome, ModeRollup,
    PerModeRollups, ResultRow, Run, RunMode, RunState, RunSummary, SemanticLayer,
};
use crate::retry::{with_retry, RetryVerdict, METADATA_STORE_RETRY};
use crate::store::{CostDeltas, MetadataStore, RunListEntry, Rollups};

pub struct PostgresMetadataStore {
    pool: PgPool,
}

impl PostgresMetadataStore {
    /// Connect and, if requested, run pending migrations from `./migrations`.
    pub async fn new(database_url: &str, run_migrations: bool) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Storage(format!("failed to connect to metadata store: {e}")))?;

        if run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| StoreError::Storage(format!("migration failed: {e}")))?;
        }

        Ok(PostgresMetadataStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn with_write_retry<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        with_retry(METADATA_STORE_RETRY, op, |e: &StoreError| match e {
            StoreError::Transient(_) => RetryVerdict::Retry,
            _ => RetryVerdict::GiveUp,
        })
        .await
    }
}

fn mode_to_str(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Baseline => "baseline",
        RunMode::Enhanced => "enhanced",
        RunMode::Both => "both",
    }
}

fn mode_from_str(s: &str) -> RunMode {
    match s {
        "baseline" => RunMode::Baseline,
        "enhanced" => RunMode::Enhanced,
        _ => RunMode::Both,
    }
}

fn state_to_str(state: RunState) -> &'static str {
    match state {
        RunState::Pending => "pending",
        RunState::Running => "running",
        RunState::Completed => "completed",
        RunState::Failed => "failed",
        RunState::Cancelled => "cancelled",
    }
}

fn state_from_str(s: &str) -> RunState {
    match s {
        "pending" => RunState::Pending,
        "running" => RunState::Running,
        "completed" => RunState::Completed,
        "failed" => RunState::Failed,
        _ => RunState::Cancelled,
    }
}

fn difficulty_to_str(d: Difficulty) -> &'static str {
    match d {
        Difficulty::Easy => "easy",
        Difficulty::Medium => "medium",
        Difficulty::Hard => "hard",
        Difficulty::Extra => "extra",
    }
}

fn difficulty_from_str(s: &str) -> Option<Difficulty> {
    match s {
        "easy" => Some(Difficulty::Easy),
        "medium" => Some(Difficulty::Medium),
        "hard" => Some(Difficulty::Hard),
        "extra" => Some(Difficulty::Extra),
        _ => None,
    }
}

fn row_to_run(row: &PgRow) -> Result<Run, StoreError> {
    let databases: Option<serde_json::Value> = row.try_get("databases")?;
    let databases = databases.and_then(|v| serde_json::from_value::<Vec<String>>(v).ok());

    Ok(Run {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        mode: mode_from_str(row.try_get::<String, _>("mode")?.as_str()),
        question_count: row.try_get("question_count")?,
        databases,
        state: state_from_str(row.try_get::<String, _>("state")?.as_str()),
        completed_count: row.try_get("completed_count")?,
        failed_count: row.try_get("failed_count")?,
        current_question: row.try_get("current_question")?,
        baseline: ModeRollup {
            exact_match_rate: row.try_get("baseline_exact_match_rate")?,
            exec_match_rate: row.try_get("baseline_exec_match_rate")?,
            correct_count: row.try_get("baseline_correct_count")?,
            total_cost_usd: row.try_get("baseline_cost_usd")?,
        },
        enhanced: ModeRollup {
            exact_match_rate: row.try_get("enhanced_exact_match_rate")?,
            exec_match_rate: row.try_get("enhanced_exec_match_rate")?,
            correct_count: row.try_get("enhanced_correct_count")?,
            total_cost_usd: row.try_get("enhanced_cost_usd")?,
        },
        total_cost_usd: row.try_get("total_cost_usd")?,
        wall_clock_ms: row.try_get("wall_clock_ms")?,
        reason: row.try_get("reason")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}

fn mode_outcome_from_row(row: &PgRow, prefix: &str) -> Result<Option<ModeOutcome>, StoreError> {
    let sql: Option<String> = row.try_get(format!("{prefix}_generated_sql").as_str())?;
    let error: Option<String> = row.try_get(format!("{prefix}_error").as_str())?;
    let attempted: bool = row.try_get(format!("{prefix}_attempted").as_str())?;
    if !attempted && sql.is_none() && error.is_none() {
        return Ok(None);
    }

    // Only the enhanced mode ever carries semantic context, so only the
    // `results` table's `enhanced_*` columns exist for these two fields
    // (§3, §4.6) — baseline always reports 0/false.
    let (semantic_chunks_used, has_semantic_context) = if prefix == "enhanced" {
        (
            row.try_get::<Option<i32>, _>("enhanced_semantic_chunks_used")?.unwrap_or(0),
            row.try_get::<Option<bool>, _>("enhanced_has_semantic_context")?.unwrap_or(false),
        )
    } else {
        (0, false)
    };

    Ok(Some(ModeOutcome {
        generated_sql: sql,
        exact_match: row.try_get(format!("{prefix}_exact_match").as_str())?,
        exec_match: row.try_get(format!("{prefix}_exec_match").as_str())?,
        error,
        execution_time_ms: row.try_get(format!("{prefix}_execution_time_ms").as_str())?,
        tokens_prompt: row.try_get(format!("{prefix}_tokens_prompt").as_str())?,
        tokens_completion: row.try_get(format!("{prefix}_tokens_completion").as_str())?,
        cost_usd: row.try_get(format!("{prefix}_cost_usd").as_str())?,
        semantic_chunks_used,
        has_semantic_context,
    }))
}

fn row_to_result(row: &PgRow) -> Result<ResultRow, StoreError> {
    let difficulty: Option<String> = row.try_get("difficulty")?;
    Ok(ResultRow {
        run_id: row.try_get("run_id")?,
        question_id: row.try_get("question_id")?,
        database: row.try_get("database")?,
        question_text: row.try_get("question_text")?,
        gold_sql: row.try_get("gold_sql")?,
        difficulty: difficulty.and_then(|d| difficulty_from_str(&d)),
        baseline: mode_outcome_from_row(row, "baseline")?,
        enhanced: mode_outcome_from_row(row, "enhanced")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn create_run(&self, config: CreateRun) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let databases_json = config.databases.as_ref().map(|d| serde_json::json!(d));

        self.with_write_retry(|| async {
            sqlx::query(
                "INSERT INTO runs (id, name, mode, question_count, databases, state, notes, created_at) \
                 VALUES ($1, $2, $3, $4, $5, 'pending', $6, NOW())",
            )
            .bind(id)
            .bind(&config.name)
            .bind(mode_to_str(config.mode))
            .bind(config.question_count)
            .bind(&databases_json)
            .bind(&config.notes)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)
        })
        .await?;

        Ok(id)
    }

    async fn mark_running(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.with_write_retry(|| async {
            let result = sqlx::query(
                "UPDATE runs SET state = 'running', started_at = NOW() \
                 WHERE id = $1 AND state IN ('pending', 'running')",
            )
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

            if result.rows_affected() == 0 {
                let exists: Option<String> = sqlx::query_scalar("SELECT state FROM runs WHERE id = $1")
                    .bind(run_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(StoreError::from)?;
                return match exists {
                    None => Err(StoreError::RunNotFound { id: run_id.to_string() }),
                    Some(state) => Err(StoreError::InvalidState {
                        message: format!("cannot mark_running from state={state}"),
                    }),
                };
            }
            Ok(())
        })
        .await
    }

    async fn update_progress(
        &self,
        run_id: Uuid,
        completed: i64,
        failed: i64,
        current_question: Option<&str>,
        cost_deltas: CostDeltas,
    ) -> Result<(), StoreError> {
        self.with_write_retry(|| async {
            sqlx::query(
                "UPDATE runs SET completed_count = $2, failed_count = $3, current_question = $4, \
                 baseline_cost_usd = baseline_cost_usd + $5, enhanced_cost_usd = enhanced_cost_usd + $6, \
                 total_cost_usd = total_cost_usd + $5 + $6 \
                 WHERE id = $1",
            )
            .bind(run_id)
            .bind(completed)
            .bind(failed)
            .bind(current_question)
            .bind(cost_deltas.baseline_usd)
            .bind(cost_deltas.enhanced_usd)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn record_result(&self, result: ResultRow) -> Result<(), StoreError> {
        let baseline_attempted = result.baseline.is_some();
        let enhanced_attempted = result.enhanced.is_some();
        let baseline = result.baseline.unwrap_or_default();
        let enhanced = result.enhanced.unwrap_or_default();

        self.with_write_retry(|| async {
            sqlx::query(
                "INSERT INTO results ( \
                    run_id, question_id, database, question_text, gold_sql, difficulty, \
                    baseline_attempted, baseline_generated_sql, baseline_exact_match, baseline_exec_match, \
                    baseline_error, baseline_execution_time_ms, baseline_tokens_prompt, baseline_tokens_completion, baseline_cost_usd, \
                    enhanced_attempted, enhanced_generated_sql, enhanced_exact_match, enhanced_exec_match, \
                    enhanced_error, enhanced_execution_time_ms, enhanced_tokens_prompt, enhanced_tokens_completion, enhanced_cost_usd, \
                    enhanced_semantic_chunks_used, enhanced_has_semantic_context, created_at \
                 ) VALUES ( \
                    $1, $2, $3, $4, $5, $6, \
                    $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, \
                    $25, $26, NOW() \
                 ) ON CONFLICT (run_id, question_id) DO NOTHING",
            )
            .bind(result.run_id)
            .bind(&result.question_id)
            .bind(&result.database)
            .bind(&result.question_text)
            .bind(&result.gold_sql)
            .bind(result.difficulty.map(difficulty_to_str))
            .bind(baseline_attempted)
            .bind(&baseline.generated_sql)
            .bind(baseline.exact_match)
            .bind(baseline.exec_match)
            .bind(&baseline.error)
            .bind(baseline.execution_time_ms)
            .bind(baseline.tokens_prompt)
            .bind(baseline.tokens_completion)
            .bind(baseline.cost_usd)
            .bind(enhanced_attempted)
            .bind(&enhanced.generated_sql)
            .bind(enhanced.exact_match)
            .bind(enhanced.exec_match)
            .bind(&enhanced.error)
            .bind(enhanced.execution_time_ms)
            .bind(enhanced.tokens_prompt)
            .bind(enhanced.tokens_completion)
            .bind(enhanced.cost_usd)
            .bind(enhanced.semantic_chunks_used)
            .bind(enhanced.has_semantic_context)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        final_state: RunState,
        reason: Option<&str>,
        rollups: Rollups,
    ) -> Result<(), StoreError> {
        let timestamp_col = match final_state {
            RunState::Cancelled => "cancelled_at",
            _ => "completed_at",
        };

        self.with_write_retry(|| async {
            let sql = format!(
                "UPDATE runs SET state = $2, reason = $3, {timestamp_col} = COALESCE({timestamp_col}, NOW()), \
                 wall_clock_ms = COALESCE(wall_clock_ms, EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000), \
                 baseline_exact_match_rate = $4, baseline_exec_match_rate = $5, baseline_correct_count = $6, \
                 enhanced_exact_match_rate = $7, enhanced_exec_match_rate = $8, enhanced_correct_count = $9 \
                 WHERE id = $1 AND state NOT IN ('completed', 'failed', 'cancelled')"
            );
            sqlx::query(&sql)
                .bind(run_id)
                .bind(state_to_str(final_state))
                .bind(reason)
                .bind(rollups.baseline.exact_match_rate)
                .bind(rollups.baseline.exec_match_rate)
                .bind(rollups.baseline.correct_count)
                .bind(rollups.enhanced.exact_match_rate)
                .bind(rollups.enhanced.exec_match_rate)
                .bind(rollups.enhanced.correct_count)
                .execute(&self.pool)
                .await
                .map_err(StoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn cancel_run(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.with_write_retry(|| async {
            sqlx::query(
                "UPDATE runs SET state = 'cancelled', cancelled_at = NOW(), reason = $2 \
                 WHERE id = $1 AND state IN ('pending', 'running')",
            )
            .bind(run_id)
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn list_runs(&self, limit: i64) -> Result<Vec<RunListEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, state, question_count, completed_count, failed_count, created_at \
             FROM runs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        rows.iter()
            .map(|row| {
                Ok(RunListEntry {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    state: state_from_str(row.try_get::<String, _>("state")?.as_str()),
                    question_count: row.try_get("question_count")?,
                    completed_count: row.try_get("completed_count")?,
                    failed_count: row.try_get("failed_count")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn get_status(&self, run_id: Uuid) -> Result<Run, StoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| StoreError::RunNotFound { id: run_id.to_string() })?;
        row_to_run(&row)
    }

    async fn get_summary(&self, run_id: Uuid) -> Result<RunSummary, StoreError> {
        let run = self.get_status(run_id).await?;

        let overall = PerModeRollups {
            question_count: run.completed_count + run.failed_count,
            baseline: run.baseline,
            enhanced: run.enhanced,
        };

        let by_database = self.rollup_by_dimension(run_id, "database").await?;
        let by_difficulty = self.rollup_by_dimension(run_id, "difficulty").await?;

        Ok(RunSummary { run_id, overall, by_database, by_difficulty })
    }

    async fn list_results(
        &self,
        run_id: Uuid,
        filter: ListResultsFilter,
    ) -> Result<ListResultsPage, StoreError> {
        let page_size = filter.page_size.clamp(1, 500) as i64;
        let offset = (filter.page.max(1) as i64 - 1) * page_size;

        let where_clause = if filter.failures_only {
            "WHERE run_id = $1 AND (NOT (baseline_exact_match OR baseline_exec_match) \
             OR NOT (enhanced_exact_match OR enhanced_exec_match))"
        } else {
            "WHERE run_id = $1"
        };

        let sql =
            format!("SELECT * FROM results {where_clause} ORDER BY question_id LIMIT $2 OFFSET $3");
        let rows = sqlx::query(&sql)
            .bind(run_id)
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let count_sql = format!("SELECT COUNT(*) FROM results {where_clause}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(run_id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let results = rows.iter().map(row_to_result).collect::<Result<Vec<_>, _>>()?;

        Ok(ListResultsPage { results, total, page: filter.page.max(1), page_size: page_size as u32 })
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.with_write_retry(|| async {
            // Results cascade via FK ON DELETE CASCADE (§3 invariant).
            sqlx::query("DELETE FROM runs WHERE id = $1")
                .bind(run_id)
                .execute(&self.pool)
                .await
                .map_err(StoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn load_semantic_layer(
        &self,
        connection: &str,
        database: &str,
    ) -> Result<Option<SemanticLayer>, StoreError> {
        let row = sqlx::query(
            "SELECT document FROM semantic_layers WHERE connection = $1 AND database = $2 \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(connection)
        .bind(database)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let document: serde_json::Value = row.try_get("document")?;
                let layer: SemanticLayer = serde_json::from_value(document)
                    .map_err(|e| StoreError::Storage(format!("corrupt semantic layer row: {e}")))?;
                Ok(Some(layer))
            }
        }
    }

    async fn list_semantic_layers(&self) -> Result<Vec<SemanticLayer>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (connection, database) document \
             FROM semantic_layers ORDER BY connection, database, version DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        rows.iter()
            .map(|row| {
                let document: serde_json::Value = row.try_get("document")?;
                serde_json::from_value(document)
                    .map_err(|e| StoreError::Storage(format!("corrupt semantic layer row: {e}")))
            })
            .collect()
    }

    async fn save_semantic_layer(&self, layer: SemanticLayer) -> Result<(), StoreError> {
        let document = serde_json::to_value(&layer)
            .map_err(|e| StoreError::Validation { message: format!("cannot serialize semantic layer: {e}") })?;

        self.with_write_retry(|| async {
            sqlx::query(
                "INSERT INTO semantic_layers (connection, database, version, document, created_at) \
                 VALUES ($1, $2, $3, $4, NOW()) \
                 ON CONFLICT (connection, database, version) DO UPDATE SET document = EXCLUDED.document",
            )
            .bind(&layer.connection)
            .bind(&layer.database)
            .bind(layer.version)
            .bind(&document)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn delete_semantic_layer(&self, connection: &str, database: &str) -> Result<(), StoreError> {
        self.with_write_retry(|| async {
            sqlx::query("DELETE FROM semantic_layers WHERE connection = $1 AND database = $2")
                .bind(connection)
                .bind(database)
                .execute(&self.pool)
                .await
                .map_err(StoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn get_instructions(&self) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT text FROM instructions WHERE id = TRUE")
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)
    }

    async fn set_instructions(&self, text: &str) -> Result<(), StoreError> {
        self.with_write_retry(|| async {
            sqlx::query(
                "INSERT INTO instructions (id, text) VALUES (TRUE, $1) \
                 ON CONFLICT (id) DO UPDATE SET text = EXCLUDED.text",
            )
            .bind(text)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
            Ok(())
        })
        .await
    }
}

impl PostgresMetadataStore {
    async fn rollup_by_dimension(
        &self,
        run_id: Uuid,
        dimension: &str,
    ) -> Result<Vec<(String, PerModeRollups)>, StoreError> {
        let sql = format!(
            "SELECT {dimension} AS key, COUNT(*) AS question_count, \
                AVG(baseline_exact_match::int)::float8 AS baseline_exact, \
                AVG(baseline_exec_match::int)::float8 AS baseline_exec, \
                SUM(baseline_exec_match::int) AS baseline_correct, \
                SUM(baseline_cost_usd) AS baseline_cost, \
                AVG(enhanced_exact_match::int)::float8 AS enhanced_exact, \
                AVG(enhanced_exec_match::int)::float8 AS enhanced_exec, \
                SUM(enhanced_exec_match::int) AS enhanced_correct, \
                SUM(enhanced_cost_usd) AS enhanced_cost \
             FROM results WHERE run_id = $1 AND {dimension} IS NOT NULL GROUP BY {dimension} ORDER BY {dimension}"
        );
        let rows = sqlx::query(&sql)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<String, _>("key")?,
                    PerModeRollups {
                        question_count: row.try_get("question_count")?,
                        baseline: ModeRollup {
                            exact_match_rate: row.try_get("baseline_exact")?,
                            exec_match_rate: row.try_get("baseline_exec")?,
                            correct_count: row.try_get("baseline_correct")?,
                            total_cost_usd: row.try_get("baseline_cost")?,
                        },
                        enhanced: ModeRollup {
                            exact_match_rate: row.try_get("enhanced_exact")?,
                            exec_match_rate: row.try_get("enhanced_exec")?,
                            correct_count: row.try_get("enhanced_correct")?,
                            total_cost_usd: row.try_get("enhanced_cost")?,
                        },
                    },
                ))
            })
            .collect()
    }
}
