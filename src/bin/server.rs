//! HTTP server entry point: wires up the metadata store, query executor, LLM
//! client, and embedding index, then serves the ControlAPI.
//!
//! Grounded in `mqk-daemon/src/main.rs`'s thin-entry-point shape: load config,
//! init tracing, build `Arc<AppState>`, build the router, layer on tracing and
//! serve — generalized here with an extra pooled-connection setup step the
//! daemon example doesn't need.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use sqlbench_core::api::{build_router, AppState};
use sqlbench_core::config::Config;
use sqlbench_core::embedding::index::EmbeddingIndex;
use sqlbench_core::embedding::{local::LocalEmbeddingProvider, openai::OpenAIEmbeddingProvider, EmbeddingProvider};
use sqlbench_core::executor::QueryExecutor;
use sqlbench_core::llm::LlmClient;
use sqlbench_core::logging::init_logging;
use sqlbench_core::runner::RunnerComponents;
use sqlbench_core::schema::SchemaExtractor;
use sqlbench_core::store::postgres::PostgresMetadataStore;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::load()?;
    init_logging(&config);

    tracing::info!(bind = %config.http_bind_addr, "starting sqlbench-core control API");

    let store: Arc<dyn sqlbench_core::store::MetadataStore> =
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

    let embedding_provider: Box<dyn EmbeddingProvider> = match config.embedding_provider.as_str() {
        "local" => Box::new(LocalEmbeddingProvider::new(&config.embedding_cache_dir).await?),
        _ => Box::new(OpenAIEmbeddingProvider::new(config.openai_api_key.clone().unwrap_or_default())?),
    };
    let embedding_index = Arc::new(EmbeddingIndex::new(benchmark_pool, embedding_provider));

    let runner_components = RunnerComponents {
        store: store.clone(),
        executor: executor.clone(),
        llm,
        schema_extractor,
        embedding_index: Some(embedding_index),
        retrieval_top_k: config.retrieval_top_k,
        execution_match_tolerance: config.execution_match_tolerance,
        concurrency: config.runner_concurrency,
    };

    let state = Arc::new(AppState {
        store,
        executor,
        runner_components,
        budget_ceiling_usd: config.budget_ceiling_usd,
        api_key: config.api_key.clone(),
        spider_dataset_path: config.spider_dataset_path.clone(),
        max_page_size: config.max_page_size,
    });

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
