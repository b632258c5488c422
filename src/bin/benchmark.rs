//! Benchmark CLI binary for the Spider 1.0 text-to-SQL evaluation.
//!
//! Runs the full sweep in-process: load dataset -> create Run -> drive
//! `BenchmarkRunner` -> print a report. Supports `--subset` for a fast CI
//! sample and `--min-exec-match` for a pass/fail exit code, mirroring
//! `benchmark/runner.rs` and `benchmark/report.rs`'s CI-integration shape but
//! driven through the metadata store instead of a local checkpoint file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sqlx::postgres::PgPoolOptions;

use sqlbench_core::config::Config;
use sqlbench_core::dataset::{filter_by_databases, load_dataset};
use sqlbench_core::embedding::index::EmbeddingIndex;
use sqlbench_core::embedding::{local::LocalEmbeddingProvider, openai::OpenAIEmbeddingProvider, EmbeddingProvider};
use sqlbench_core::executor::QueryExecutor;
use sqlbench_core::llm::LlmClient;
use sqlbench_core::models::{CreateRun, PerModeRollups, RunMode, RunState};
use sqlbench_core::runner::{BenchmarkRunner, RunnerComponents};
use sqlbench_core::schema::SchemaExtractor;
use sqlbench_core::store::postgres::PostgresMetadataStore;
use sqlbench_core::store::MetadataStore;

#[derive(Parser)]
#[command(name = "sqlbench", about = "Spider 1.0 benchmark runner: baseline vs semantic-layer-enhanced SQL generation")]
struct Cli {
    /// Path to Spider's dev.json
    #[arg(long, default_value = "data/dev.json")]
    dataset: PathBuf,

    /// "baseline", "enhanced", or "both"
    #[arg(long, value_enum, default_value = "both")]
    mode: RunMode,

    /// Restrict the sweep to these Spider db_ids (comma-separated). Defaults to all.
    #[arg(long, value_delimiter = ',')]
    databases: Option<Vec<String>>,

    /// Run only the first N questions, in dataset order (for CI speed).
    #[arg(long)]
    subset: Option<usize>,

    /// Minimum enhanced-mode execution-match rate to pass (CI threshold, e.g. 0.60).
    #[arg(long)]
    min_exec_match: Option<f64>,

    /// Human-readable name stored on the Run.
    #[arg(long, default_value = "cli-run")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    let config = Config::load()?;
    sqlbench_core::logging::init_logging(&config);

    tracing::info!(path = %cli.dataset.display(), "loading Spider dataset");
    let mut questions = load_dataset(&cli.dataset)?;
    questions = filter_by_databases(questions, cli.databases.as_deref());
    if let Some(n) = cli.subset {
        questions.truncate(n);
    }
    let question_count = questions.len() as i64;

    println!("=== Spider Benchmark ===");
    println!("Dataset:   {}", cli.dataset.display());
    println!("Mode:      {:?}", cli.mode);
    println!("Questions: {question_count}");
    println!();

    tracing::info!("connecting to metadata store");
    let store: Arc<dyn MetadataStore> =
        Arc::new(PostgresMetadataStore::new(&config.metadata_database_url, true).await?);

    let executor = Arc::new(
        QueryExecutor::new(
            &config.benchmark_database_url,
            config.executor_pool_min,
            config.executor_pool_max,
            config.row_cap,
            config.statement_timeout(),
        )
        .await?,
    );

    let benchmark_pool = PgPoolOptions::new()
        .min_connections(config.executor_pool_min)
        .max_connections(config.executor_pool_max)
        .connect(&config.benchmark_database_url)
        .await?;
    let schema_extractor = Arc::new(SchemaExtractor::new(benchmark_pool.clone()));

    let llm = Arc::new(LlmClient::new(&config));

    tracing::info!(provider = %config.embedding_provider, "initializing embedding provider");
    let embedding_provider: Box<dyn EmbeddingProvider> = match config.embedding_provider.as_str() {
        "local" => Box::new(LocalEmbeddingProvider::new(&config.embedding_cache_dir).await?),
        _ => Box::new(OpenAIEmbeddingProvider::new(config.openai_api_key.clone().unwrap_or_default())?),
    };
    let embedding_index = Arc::new(EmbeddingIndex::new(benchmark_pool, embedding_provider));

    let components = RunnerComponents {
        store: store.clone(),
        executor,
        llm,
        schema_extractor,
        embedding_index: Some(embedding_index),
        retrieval_top_k: config.retrieval_top_k,
        execution_match_tolerance: config.execution_match_tolerance,
        concurrency: config.runner_concurrency,
    };

    let run_id = store
        .create_run(CreateRun {
            name: cli.name.clone(),
            mode: cli.mode,
            question_count,
            databases: cli.databases.clone(),
            notes: None,
        })
        .await?;
    tracing::info!(%run_id, "run created");

    let bar = ProgressBar::new(question_count.max(1) as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mode = cli.mode;
    let runner = BenchmarkRunner::new(components, config.budget_ceiling_usd);
    let run_handle = tokio::spawn(async move { runner.run(run_id, questions, mode, None).await });

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = store.get_status(run_id).await?;
        let processed = status.completed_count + status.failed_count;
        bar.set_position(processed as u64);
        if let Some(q) = &status.current_question {
            bar.set_message(q.clone());
        }
        if status.state.is_terminal() {
            break;
        }
    }
    bar.finish_and_clear();

    // `runner.run` already makes its own best-effort `finalize_run(Failed,
    // "fatal_error: ...")` attempt before returning an error, so the Run is
    // never left stuck in `running` here — log and keep going to print
    // whatever final status/summary the store now holds.
    let run_result = run_handle.await.map_err(|e| anyhow::anyhow!("runner task panicked: {e}"))?;
    if let Err(e) = &run_result {
        tracing::error!(%run_id, error = %e, "benchmark run exited with an error");
    }

    let final_status = store.get_status(run_id).await?;
    let summary = store.get_summary(run_id).await?;

    print_report(&final_status.state, &summary.overall, mode);

    if !summary.by_database.is_empty() {
        println!();
        println!("Per-database enhanced execution-match:");
        for (db, rollups) in &summary.by_database {
            println!("  {:<25} {:.1}%", format!("{db}:"), rollups.enhanced.exec_match_rate * 100.0);
        }
    }

    if let Some(threshold) = cli.min_exec_match {
        let observed = summary.overall.enhanced.exec_match_rate;
        if observed < threshold {
            eprintln!(
                "FAIL: enhanced execution-match {:.1}% < threshold {:.1}%",
                observed * 100.0,
                threshold * 100.0
            );
            std::process::exit(1);
        }
        println!(
            "PASS: enhanced execution-match {:.1}% >= threshold {:.1}%",
            observed * 100.0,
            threshold * 100.0
        );
    }

    Ok(())
}

fn print_report(state: &RunState, overall: &PerModeRollups, mode: RunMode) {
    println!("=== Result ({state:?}) ===");
    println!("Questions: {}", overall.question_count);
    if mode.includes_baseline() {
        println!(
            "Baseline  exact={:.1}% exec={:.1}% cost=${:.4}",
            overall.baseline.exact_match_rate * 100.0,
            overall.baseline.exec_match_rate * 100.0,
            overall.baseline.total_cost_usd
        );
    }
    if mode.includes_enhanced() {
        println!(
            "Enhanced  exact={:.1}% exec={:.1}% cost=${:.4}",
            overall.enhanced.exact_match_rate * 100.0,
            overall.enhanced.exec_match_rate * 100.0,
            overall.enhanced.total_cost_usd
        );
    }
}
