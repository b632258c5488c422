//! Error taxonomy for the benchmark evaluation core.
//!
//! One enum per component boundary (store, executor, LLM/embedding clients),
//! plus a top-level `CoreError` that unifies them for the HTTP layer. Variants
//! carry enough context to log and to map to an HTTP status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run not found: {id}")]
    RunNotFound { id: String },

    #[error("result not found: run={run_id} question={question_id}")]
    ResultNotFound { run_id: String, question_id: String },

    #[error("invalid state transition: {message}")]
    InvalidState { message: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if is_transient_pg_error(&e) {
            StoreError::Transient(e.to_string())
        } else {
            StoreError::Storage(e.to_string())
        }
    }
}

fn is_transient_pg_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("safety_reject: {rule}")]
    SafetyRejected { rule: String },

    #[error("sql execution error: {0}")]
    ExecutionFailed(String),

    #[error("statement timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("transient executor error: {0}")]
    Transient(String),

    #[error("pool error: {0}")]
    Pool(String),
}

impl From<sqlx::Error> for ExecutorError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                ExecutorError::Transient(e.to_string())
            }
            _ => ExecutorError::ExecutionFailed(e.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("context too large: {0}")]
    ContextTooLarge(String),

    #[error("provider returned an invalid response: {0}")]
    ProviderInvalid(String),

    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimit(_) | LlmError::Transient(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            LlmError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            if status.as_u16() == 429 {
                LlmError::RateLimit(e.to_string())
            } else if status.is_server_error() {
                LlmError::Transient(e.to_string())
            } else {
                LlmError::Permanent(e.to_string())
            }
        } else {
            LlmError::Transient(e.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("transient embedding error: {0}")]
    Transient(String),

    #[error("index error: {0}")]
    Index(String),
}

/// Top-level error, unifying every component error for the HTTP boundary and
/// for the CLI binary (which wraps this in `anyhow` at the outermost frame).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            CoreError::Validation { message } => (StatusCode::BAD_REQUEST, message.clone()),
            CoreError::Unauthorized => (StatusCode::UNAUTHORIZED, "missing or invalid API key".to_string()),
            CoreError::Store(StoreError::RunNotFound { .. })
            | CoreError::Store(StoreError::ResultNotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            CoreError::Store(StoreError::InvalidState { .. })
            | CoreError::Store(StoreError::Conflict(_)) => (StatusCode::CONFLICT, self.to_string()),
            CoreError::Store(StoreError::Validation { .. }) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
