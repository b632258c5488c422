//! ControlAPI (§4.12, §6): the HTTP boundary over `BenchmarkRunner`,
//! `MetadataStore`, and `QueryExecutor`.
//!
//! Grounded in the `mqk-daemon` example's thin `State<Arc<AppState>>` handler
//! shape (`build_router`, one `async fn` per route, `impl IntoResponse`
//! returns) — the X-API-Key gate is the one piece that example doesn't show,
//! added here via `axum::middleware::from_fn_with_state` in the same spot
//! that example reserves for its CORS layer.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset;
use crate::errors::CoreError;
use crate::executor::QueryExecutor;
use crate::models::{CreateRun, ListResultsFilter, ListResultsPage, Run, RunMode, RunSummary};
use crate::runner::{BenchmarkRunner, RunnerComponents};
use crate::store::{MetadataStore, RunListEntry};

pub struct AppState {
    pub store: Arc<dyn MetadataStore>,
    pub executor: Arc<QueryExecutor>,
    pub runner_components: RunnerComponents,
    pub budget_ceiling_usd: f64,
    pub api_key: String,
    pub spider_dataset_path: String,
    pub max_page_size: u32,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/benchmark/run", post(start_run))
        .route("/api/benchmark/runs", get(list_runs))
        .route("/api/benchmark/run/:id/status", get(get_status))
        .route("/api/benchmark/run/:id/summary", get(get_summary))
        .route("/api/benchmark/run/:id/results", get(list_results))
        .route("/api/benchmark/run/:id/cancel", post(cancel_run))
        .route("/api/benchmark/run/:id", delete(delete_run))
        .route("/api/benchmark/execute-compare", post(execute_compare))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new().route("/healthz", get(healthz)).merge(protected).with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn require_api_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, CoreError> {
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided != Some(state.api_key.as_str()) || state.api_key.is_empty() {
        return Err(CoreError::Unauthorized);
    }
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct StartRunRequest {
    name: String,
    run_type: RunMode,
    databases: Option<Vec<String>>,
    question_limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct StartRunResponse {
    run_id: Uuid,
    question_count: i64,
}

/// `POST /api/benchmark/run` (§6): load the Spider dev-set, filter by the
/// requested databases, apply the question cap, create the Run, and spawn
/// the Runner as a detached background task.
async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartRunRequest>,
) -> Result<Json<StartRunResponse>, CoreError> {
    if body.name.trim().is_empty() {
        return Err(CoreError::validation("name must not be empty"));
    }

    let path = std::path::Path::new(&state.spider_dataset_path);
    let questions = dataset::load_dataset(path)
        .map_err(|e| CoreError::Internal(format!("failed to load spider dataset: {e}")))?;
    let mut questions = dataset::filter_by_databases(questions, body.databases.as_deref());

    if let Some(limit) = body.question_limit {
        let limit = limit.max(0) as usize;
        questions.truncate(limit);
    }

    let question_count = questions.len() as i64;

    let run_id = state
        .store
        .create_run(CreateRun {
            name: body.name,
            mode: body.run_type,
            question_count,
            databases: body.databases,
            notes: None,
        })
        .await?;

    let components = state.runner_components.clone();
    let budget_ceiling_usd = state.budget_ceiling_usd;
    let mode = body.run_type;

    tokio::spawn(async move {
        let runner = BenchmarkRunner::new(components, budget_ceiling_usd);
        // `runner.run` already makes its own best-effort `finalize_run(Failed,
        // "fatal_error: ...")` attempt before returning an error, so there is
        // nothing left to do here but log it.
        if let Err(e) = runner.run(run_id, questions, mode, None).await {
            tracing::error!(%run_id, error = %e, "benchmark run exited with an error");
        }
    });

    Ok(Json(StartRunResponse { run_id, question_count }))
}

async fn list_runs(State(state): State<Arc<AppState>>) -> Result<Json<Vec<RunListEntry>>, CoreError> {
    let runs = state.store.list_runs(500).await?;
    Ok(Json(runs))
}

#[derive(Debug, Serialize)]
struct RunStatusResponse {
    id: Uuid,
    status: String,
    progress: f64,
    completed_count: i64,
    failed_count: i64,
    question_count: i64,
    current_question: Option<String>,
    total_cost_usd: f64,
    baseline_exec_match_rate: f64,
    baseline_correct_count: i64,
    enhanced_exec_match_rate: f64,
    enhanced_correct_count: i64,
}

impl From<Run> for RunStatusResponse {
    fn from(run: Run) -> Self {
        let processed = run.completed_count + run.failed_count;
        let progress = if run.question_count == 0 { 0.0 } else { processed as f64 / run.question_count as f64 };
        RunStatusResponse {
            id: run.id,
            status: format!("{:?}", run.state).to_lowercase(),
            progress,
            completed_count: run.completed_count,
            failed_count: run.failed_count,
            question_count: run.question_count,
            current_question: run.current_question,
            total_cost_usd: run.total_cost_usd,
            baseline_exec_match_rate: run.baseline.exec_match_rate,
            baseline_correct_count: run.baseline.correct_count,
            enhanced_exec_match_rate: run.enhanced.exec_match_rate,
            enhanced_correct_count: run.enhanced.correct_count,
        }
    }
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunStatusResponse>, CoreError> {
    let run = state.store.get_status(id).await?;
    Ok(Json(run.into()))
}

async fn get_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunSummary>, CoreError> {
    let summary = state.store.get_summary(id).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct ListResultsQuery {
    #[serde(default)]
    failures_only: bool,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

async fn list_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListResultsQuery>,
) -> Result<Json<ListResultsPage>, CoreError> {
    let page_size = query.page_size.min(state.max_page_size).max(1);
    let page = state
        .store
        .list_results(id, ListResultsFilter { failures_only: query.failures_only, page: query.page, page_size })
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize, Default)]
struct CancelRunRequest {
    reason: Option<String>,
}

async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRunRequest>>,
) -> Result<StatusCode, CoreError> {
    let reason = body.and_then(|Json(b)| b.reason).unwrap_or_else(|| "cancelled via API".to_string());
    state.store.cancel_run(id, &reason).await?;
    Ok(StatusCode::OK)
}

async fn delete_run(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<StatusCode, CoreError> {
    state.store.delete_run(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ExecuteCompareRequest {
    database: String,
    gold_sql: String,
    baseline_sql: Option<String>,
    enhanced_sql: Option<String>,
}

#[derive(Debug, Serialize, Default)]
struct SideResult {
    success: bool,
    columns: Option<Vec<String>>,
    rows: Option<Vec<Vec<crate::executor::CellValue>>>,
    row_count: Option<usize>,
    execution_time_ms: Option<u64>,
    error: Option<String>,
}

/// `POST /api/benchmark/execute-compare` (§6): an ad-hoc, non-persisted
/// three-way execution used by the UI to let a reviewer compare gold versus
/// baseline versus enhanced SQL for one question on demand.
async fn execute_compare(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExecuteCompareRequest>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let gold = run_side(&state.executor, &body.database, &body.gold_sql).await;
    let baseline = match &body.baseline_sql {
        Some(sql) => run_side(&state.executor, &body.database, sql).await,
        None => SideResult::default(),
    };
    let enhanced = match &body.enhanced_sql {
        Some(sql) => run_side(&state.executor, &body.database, sql).await,
        None => SideResult::default(),
    };

    Ok(Json(serde_json::json!({
        "gold": gold,
        "baseline": baseline,
        "enhanced": enhanced,
    })))
}

async fn run_side(executor: &QueryExecutor, database: &str, sql: &str) -> SideResult {
    match executor.execute(database, sql).await {
        Ok(outcome) => SideResult {
            success: true,
            row_count: Some(outcome.rows.len()),
            execution_time_ms: Some(outcome.execution_ms),
            columns: Some(outcome.columns),
            rows: Some(outcome.rows),
            error: None,
        },
        Err(e) => SideResult { success: false, error: Some(e.to_string()), ..Default::default() },
    }
}
