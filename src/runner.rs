//! BenchmarkRunner (§4.12): the orchestration loop that drives one Run from
//! `pending` through each Spider question to a terminal state.
//!
//! Grounded in `benchmark/runner.rs`'s per-question loop and progress
//! reporting (poll for interruption, process one question, persist
//! progress, repeat), generalized from a local JSON checkpoint file to
//! `MetadataStore`'s idempotent `record_result`/`update_progress`, which make
//! resuming a replay safe without a separate checkpoint format.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cost::CostTracker;
use crate::dataset::BenchmarkQuestion;
use crate::embedding::index::EmbeddingIndex;
use crate::errors::CoreError;
use crate::executor::QueryExecutor;
use crate::generation::GenerationPipeline;
use crate::judge::EquivalenceJudge;
use crate::llm::LlmClient;
use crate::models::{ModeOutcome, ModeRollup, ResultRow, RunMode, RunState};
use crate::retriever::SemanticRetriever;
use crate::schema::SchemaExtractor;
use crate::store::{CostDeltas, MetadataStore, Rollups};

/// The shared, cheaply-cloneable dependencies the Runner needs to process a
/// question. Held behind `Arc` so a bounded pool of concurrent per-question
/// tasks can each own a clone without borrowing across an `.await` boundary
/// spanning a `tokio::spawn`.
#[derive(Clone)]
pub struct RunnerComponents {
    pub store: Arc<dyn MetadataStore>,
    pub executor: Arc<QueryExecutor>,
    pub llm: Arc<LlmClient>,
    pub schema_extractor: Arc<SchemaExtractor>,
    pub embedding_index: Option<Arc<EmbeddingIndex>>,
    pub retrieval_top_k: usize,
    pub execution_match_tolerance: f64,
    /// Bounded worker-pool size for per-question parallelism within a Run (§5), capped at 8.
    pub concurrency: usize,
}

pub struct BenchmarkRunner {
    components: RunnerComponents,
    cost: CostTracker,
}

impl BenchmarkRunner {
    pub fn new(components: RunnerComponents, budget_ceiling_usd: f64) -> Self {
        BenchmarkRunner { components, cost: CostTracker::new(budget_ceiling_usd) }
    }

    /// Run `questions` under `mode` for `run_id`, from `pending` to a terminal
    /// state. Per-question failures are recorded on the Result row and do not
    /// abort the run; a `MetadataStore`/`QueryExecutor` failure that survives
    /// its own retry policy is catastrophic and aborts the run as `Failed`.
    ///
    /// Wraps `run_inner`: if the inner loop returns early on an error (the
    /// store or semaphore becoming unusable mid-run), this still makes one
    /// best-effort attempt to `finalize_run(Failed, "fatal_error: ...")`
    /// before surfacing the error, per §7's catastrophic-failure handling.
    /// `finalize_run` only ever transitions a non-terminal Run, so this is a
    /// no-op when `run_inner` already reached its own terminal state.
    pub async fn run(
        &self,
        run_id: uuid::Uuid,
        questions: Vec<BenchmarkQuestion>,
        mode: RunMode,
        custom_instructions: Option<String>,
    ) -> Result<(), CoreError> {
        let result = self.run_inner(run_id, questions, mode, custom_instructions).await;

        if let Err(e) = &result {
            warn!(%run_id, error = %e, "benchmark run aborted, attempting best-effort finalize");
            let _ = self
                .components
                .store
                .finalize_run(run_id, RunState::Failed, Some(&format!("fatal_error: {e}")), Rollups::default())
                .await;
        }

        result
    }

    async fn run_inner(
        &self,
        run_id: uuid::Uuid,
        questions: Vec<BenchmarkQuestion>,
        mode: RunMode,
        custom_instructions: Option<String>,
    ) -> Result<(), CoreError> {
        let started = Instant::now();
        self.components.store.mark_running(run_id).await?;

        let concurrency = self.components.concurrency.clamp(1, 8);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut joins = JoinSet::new();

        let mut completed: i64 = 0;
        let mut failed: i64 = 0;
        let mut baseline_rollup = RollupAccumulator::default();
        let mut enhanced_rollup = RollupAccumulator::default();

        for question in questions {
            if self.should_stop(run_id).await? {
                break;
            }

            // §4.10: budget exhaustion is a hard stop, checked before the next
            // question is spawned (and billed) rather than after — otherwise
            // one extra question always slips through per iteration.
            if self.cost.is_over_budget() {
                break;
            }

            self.components
                .store
                .update_progress(run_id, completed, failed, Some(&question.question_id), CostDeltas::default())
                .await?;

            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                CoreError::Internal(format!("runner semaphore closed unexpectedly: {e}"))
            })?;
            let components = self.components.clone();
            let instructions = custom_instructions.clone();

            joins.spawn(async move {
                let _permit = permit;
                process_question(components, run_id, question, mode, instructions.as_deref()).await
            });

            // Drain completed tasks opportunistically so progress/budget state
            // stays close to real time rather than bursting at the end.
            while let Some(outcome) = joins.try_join_next() {
                let processed = outcome.map_err(|e| CoreError::Internal(format!("question task panicked: {e}")))?;
                self.apply_outcome(
                    run_id,
                    processed,
                    &mut completed,
                    &mut failed,
                    &mut baseline_rollup,
                    &mut enhanced_rollup,
                )
                .await?;
            }
        }

        while let Some(outcome) = joins.join_next().await {
            let processed = outcome.map_err(|e| CoreError::Internal(format!("question task panicked: {e}")))?;
            self.apply_outcome(
                run_id,
                processed,
                &mut completed,
                &mut failed,
                &mut baseline_rollup,
                &mut enhanced_rollup,
            )
            .await?;
        }

        let (final_state, reason) = if self.cost.is_over_budget() {
            (RunState::Failed, Some("budget_exceeded".to_string()))
        } else if self.should_stop(run_id).await? {
            (RunState::Cancelled, Some("cancelled_by_user".to_string()))
        } else {
            (RunState::Completed, None)
        };

        info!(
            %run_id,
            ?final_state,
            completed,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "benchmark run finished"
        );

        self.components
            .store
            .finalize_run(
                run_id,
                final_state,
                reason.as_deref(),
                Rollups { baseline: baseline_rollup.finish(), enhanced: enhanced_rollup.finish() },
            )
            .await?;

        Ok(())
    }

    async fn should_stop(&self, run_id: uuid::Uuid) -> Result<bool, CoreError> {
        let run = self.components.store.get_status(run_id).await?;
        Ok(run.state == RunState::Cancelled)
    }

    async fn apply_outcome(
        &self,
        run_id: uuid::Uuid,
        outcome: QuestionOutcome,
        completed: &mut i64,
        failed: &mut i64,
        baseline_rollup: &mut RollupAccumulator,
        enhanced_rollup: &mut RollupAccumulator,
    ) -> Result<(), CoreError> {
        if outcome.result.baseline.as_ref().is_some_and(|o| o.error.is_none())
            || outcome.result.enhanced.as_ref().is_some_and(|o| o.error.is_none())
        {
            *completed += 1;
        } else {
            *failed += 1;
        }

        // Cost is recorded unconditionally, win or lose against the ceiling —
        // the triggering question's own Result row must still be persisted
        // (below) and the Run must still reach `finalize_run`. The budget
        // verdict itself is only acted on by `run_inner`'s own
        // `is_over_budget()` checks, which decide the terminal state.
        if let Some(baseline) = &outcome.result.baseline {
            baseline_rollup.record(baseline);
            self.cost.record_baseline(baseline.cost_usd);
        }
        if let Some(enhanced) = &outcome.result.enhanced {
            enhanced_rollup.record(enhanced);
            self.cost.record_enhanced(enhanced.cost_usd);
        }

        let cost_deltas = CostDeltas {
            baseline_usd: outcome.result.baseline.as_ref().map(|o| o.cost_usd).unwrap_or(0.0),
            enhanced_usd: outcome.result.enhanced.as_ref().map(|o| o.cost_usd).unwrap_or(0.0),
        };

        self.components.store.record_result(outcome.result).await?;
        self.components
            .store
            .update_progress(run_id, *completed, *failed, None, cost_deltas)
            .await?;

        Ok(())
    }
}

struct QuestionOutcome {
    result: ResultRow,
}

#[derive(Default)]
struct RollupAccumulator {
    count: i64,
    exact_match_count: i64,
    exec_match_count: i64,
}

impl RollupAccumulator {
    fn record(&mut self, outcome: &ModeOutcome) {
        self.count += 1;
        if outcome.exact_match {
            self.exact_match_count += 1;
        }
        if outcome.exec_match {
            self.exec_match_count += 1;
        }
    }

    /// Execution match is the authoritative correctness signal — exact match
    /// is a stricter, syntactic subset reported alongside it, not a
    /// substitute for it (§4.9, §4.12).
    fn finish(self) -> ModeRollup {
        if self.count == 0 {
            return ModeRollup::default();
        }
        ModeRollup {
            exact_match_rate: self.exact_match_count as f64 / self.count as f64,
            exec_match_rate: self.exec_match_count as f64 / self.count as f64,
            correct_count: self.exec_match_count,
            total_cost_usd: 0.0,
        }
    }
}

async fn process_question(
    components: RunnerComponents,
    run_id: uuid::Uuid,
    question: BenchmarkQuestion,
    mode: RunMode,
    custom_instructions: Option<&str>,
) -> QuestionOutcome {
    let retriever = components.embedding_index.as_deref().map(SemanticRetriever::new);
    let pipeline = GenerationPipeline::new(
        &components.llm,
        &components.schema_extractor,
        retriever.as_ref(),
        components.retrieval_top_k,
    );
    let judge = EquivalenceJudge::new(&components.executor, components.execution_match_tolerance);

    let baseline = if mode.includes_baseline() {
        Some(run_mode(&pipeline, &judge, &question, false, custom_instructions).await)
    } else {
        None
    };
    let enhanced = if mode.includes_enhanced() {
        Some(run_mode(&pipeline, &judge, &question, true, custom_instructions).await)
    } else {
        None
    };

    QuestionOutcome {
        result: ResultRow {
            run_id,
            question_id: question.question_id,
            database: question.database,
            question_text: question.question,
            gold_sql: question.gold_sql,
            difficulty: question.difficulty,
            baseline,
            enhanced,
            created_at: chrono::Utc::now(),
        },
    }
}

async fn run_mode(
    pipeline: &GenerationPipeline<'_>,
    judge: &EquivalenceJudge<'_>,
    question: &BenchmarkQuestion,
    enhanced: bool,
    custom_instructions: Option<&str>,
) -> ModeOutcome {
    let generation = if enhanced {
        pipeline.generate_enhanced(&question.database, &question.question, custom_instructions).await
    } else {
        pipeline.generate_baseline(&question.database, &question.question, custom_instructions).await
    };

    let generation = match generation {
        Ok(g) => g,
        Err(e) => {
            warn!(question_id = %question.question_id, error = %e, enhanced, "generation failed");
            return ModeOutcome { error: Some(e.to_string()), ..Default::default() };
        }
    };

    let judged = judge.judge(&question.database, &generation.generated_sql, &question.gold_sql).await;

    ModeOutcome {
        generated_sql: Some(generation.generated_sql),
        exact_match: judged.exact_match,
        exec_match: judged.exec_match,
        error: None,
        execution_time_ms: Some(generation.execution_time_ms),
        tokens_prompt: Some(generation.tokens_prompt),
        tokens_completion: Some(generation.tokens_completion),
        cost_usd: generation.cost_usd,
        semantic_chunks_used: generation.semantic_chunks_used,
        has_semantic_context: generation.has_semantic_context,
    }
}
