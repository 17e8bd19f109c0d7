//! Shared types, errors, context, and outcome for Quarry validation tasks.
//!
//! This crate provides the foundational types used across all other Quarry crates:
//! - `QuarryError`: unified error taxonomy
//! - `Context`: thread-safe key-value store for run state
//! - `Outcome`: result of executing a task
//! - `Table` / `Cell`: materialised query results
//! - `Verdict`: aggregate result of evaluating an expectation suite

use serde::{Deserialize, Serialize};

mod table;
mod verdict;

pub use table::{Cell, Column, Table};
pub use verdict::{ExceptionInfo, ExpectationResult, ResultDetail, Verdict, VerdictStatistics};

/// Unified error type for all Quarry subsystems.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    // === Task Errors ===
    #[error("Task '{task}': sql must be specified")]
    MissingQuery { task: String },

    #[error("Task '{task}': validation config is not there or it's empty")]
    MissingValidationSpec { task: String },

    #[error("Task '{task}': validation failed, {}", .verdict.failure_summary())]
    ValidationFailed { task: String, verdict: Box<Verdict> },

    // === Connection Errors ===
    #[error("No connection configured for id '{conn_id}'")]
    UnknownConnection { conn_id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Column '{column}' has unsupported type '{type_name}'")]
    UnsupportedColumnType { column: String, type_name: String },

    #[error("Query references parameter '{name}' but no value was supplied")]
    MissingParameter { name: String },

    // === Evaluation Errors ===
    #[error("Invalid expectation suite: {0}")]
    InvalidSuite(String),

    #[error("Row {row} has {found} values but the table has {expected} columns")]
    RowShape {
        row: usize,
        expected: usize,
        found: usize,
    },

    // === Orchestration Errors ===
    #[error("No task registered for type '{0}'")]
    UnknownTaskType(String),

    #[error("Task '{task}' is misconfigured: {message}")]
    InvalidTaskConfig { task: String, message: String },

    #[error("Template file '{path}' not found in search path")]
    TemplateNotFound { path: String },

    #[error("Task '{task}' timed out after {timeout_ms}ms")]
    TaskTimeout { task: String, timeout_ms: u64 },

    #[error("Max retries exhausted for task '{task}' after {attempts} attempts")]
    RetriesExhausted { task: String, attempts: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl QuarryError {
    /// Returns `true` if the error is transient and the task may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            QuarryError::TaskTimeout { .. } => true,
            QuarryError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QuarryError::MissingQuery { .. }
                | QuarryError::MissingValidationSpec { .. }
                | QuarryError::ValidationFailed { .. }
                | QuarryError::UnknownConnection { .. }
                | QuarryError::MissingParameter { .. }
                | QuarryError::InvalidSuite(_)
                | QuarryError::UnknownTaskType(_)
                | QuarryError::InvalidTaskConfig { .. }
                | QuarryError::TemplateNotFound { .. }
                | QuarryError::Config(_)
        )
    }

    /// The verdict carried by a validation failure, if any.
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            QuarryError::ValidationFailed { verdict, .. } => Some(&**verdict),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, QuarryError>`.
pub type Result<T> = std::result::Result<T, QuarryError>;

// ---------------------------------------------------------------------------
// Context: thread-safe key-value store for run state
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

/// Thread-safe key-value store shared across the tasks of a run.
///
/// Cloning a `Context` yields another handle to the **same** inner state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<tokio::sync::RwLock<ContextInner>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextInner {
    values: HashMap<String, serde_json::Value>,
    logs: Vec<String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(ContextInner {
                values: HashMap::new(),
                logs: Vec::new(),
            })),
        }
    }

    /// Insert or overwrite a key.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.write().await.values.insert(key.into(), value);
    }

    /// Read a value by key (cloned).
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.values.get(key).cloned()
    }

    /// Convenience accessor that returns a `String`. Falls back to `default`
    /// when the key is absent or not a JSON string.
    pub async fn get_string(&self, key: &str, default: &str) -> String {
        self.inner
            .read()
            .await
            .values
            .get(key)
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| default.to_owned())
    }

    /// Append a free-form log entry.
    pub async fn append_log(&self, entry: impl Into<String>) {
        self.inner.write().await.logs.push(entry.into());
    }

    /// All log entries recorded so far.
    pub async fn logs(&self) -> Vec<String> {
        self.inner.read().await.logs.clone()
    }

    /// Shallow copy of the current values map.
    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().await.values.clone()
    }

    /// Merge `updates` into the context. Existing keys not present in
    /// `updates` are preserved.
    pub async fn apply_updates(&self, updates: HashMap<String, serde_json::Value>) {
        let mut guard = self.inner.write().await;
        guard.values.extend(updates);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StageStatus: outcome status of a task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Fail,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Fail => "fail",
            StageStatus::Skipped => "skipped",
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome: result of executing a task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    pub context_updates: HashMap<String, serde_json::Value>,
    pub notes: String,
    pub failure_reason: Option<String>,
}

impl Outcome {
    /// Create a successful outcome with the given notes.
    pub fn success(notes: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Success,
            context_updates: HashMap::new(),
            notes: notes.into(),
            failure_reason: None,
        }
    }

    /// Create a failed outcome with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: Some(reason.into()),
        }
    }

    /// Create a skipped outcome, e.g. for tasks downstream of a failure.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            context_updates: HashMap::new(),
            notes: reason.into(),
            failure_reason: None,
        }
    }

    /// Attach a context update to this outcome.
    pub fn with_update(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_verdict() -> Verdict {
        Verdict::from_results(vec![
            ExpectationResult {
                expectation_type: "expect_column_values_to_not_be_null".into(),
                kwargs: serde_json::json!({"column": "id"}),
                success: false,
                result: ResultDetail::default(),
                exception_info: None,
            },
            ExpectationResult {
                expectation_type: "expect_table_row_count_to_be_between".into(),
                kwargs: serde_json::json!({"min_value": 1}),
                success: true,
                result: ResultDetail::default(),
                exception_info: None,
            },
        ])
    }

    #[test]
    fn error_display_missing_query() {
        let err = QuarryError::MissingQuery {
            task: "orders_check".into(),
        };
        assert_eq!(err.to_string(), "Task 'orders_check': sql must be specified");
    }

    #[test]
    fn error_display_missing_validation_spec() {
        let err = QuarryError::MissingValidationSpec {
            task: "orders_check".into(),
        };
        assert_eq!(
            err.to_string(),
            "Task 'orders_check': validation config is not there or it's empty"
        );
    }

    #[test]
    fn error_display_validation_failed_names_failures() {
        let err = QuarryError::ValidationFailed {
            task: "orders_check".into(),
            verdict: Box::new(failing_verdict()),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Task 'orders_check': validation failed"));
        assert!(msg.contains("1 of 2 expectations failed"), "got: {msg}");
        assert!(msg.contains("expect_column_values_to_not_be_null(column=id)"));
        assert!(!msg.contains("expect_table_row_count_to_be_between"));
    }

    #[test]
    fn error_display_unknown_connection() {
        let err = QuarryError::UnknownConnection {
            conn_id: "warehouse".into(),
        };
        assert_eq!(err.to_string(), "No connection configured for id 'warehouse'");
    }

    #[test]
    fn error_display_retries_exhausted() {
        let err = QuarryError::RetriesExhausted {
            task: "load".into(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Max retries exhausted for task 'load' after 3 attempts"
        );
    }

    #[test]
    fn error_display_other() {
        let err = QuarryError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }

    // --- is_retryable / is_terminal ---

    #[test]
    fn retryable_timeout() {
        let err = QuarryError::TaskTimeout {
            task: "t".into(),
            timeout_ms: 1000,
        };
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn retryable_database_io() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = QuarryError::Database(sqlx::Error::Io(io));
        assert!(err.is_retryable());
    }

    #[test]
    fn not_retryable_database_row_not_found() {
        let err = QuarryError::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_retryable());
    }

    #[test]
    fn task_errors_are_terminal() {
        let errs = [
            QuarryError::MissingQuery { task: "t".into() },
            QuarryError::MissingValidationSpec { task: "t".into() },
            QuarryError::ValidationFailed {
                task: "t".into(),
                verdict: Box::new(failing_verdict()),
            },
        ];
        for err in errs {
            assert!(err.is_terminal(), "{err} should be terminal");
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }

    #[test]
    fn verdict_accessor_only_on_validation_failure() {
        let err = QuarryError::ValidationFailed {
            task: "t".into(),
            verdict: Box::new(failing_verdict()),
        };
        assert!(!err.verdict().unwrap().success);
        assert!(QuarryError::MissingQuery { task: "t".into() }.verdict().is_none());
    }

    // --- From impls ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: QuarryError = io_err.into();
        assert!(matches!(err, QuarryError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: QuarryError = json_err.into();
        assert!(matches!(err, QuarryError::Json(_)));
    }

    // --- Context ---

    #[tokio::test]
    async fn context_set_and_get_round_trip() {
        let ctx = Context::new();
        ctx.set("key", serde_json::json!("hello")).await;
        assert_eq!(ctx.get("key").await, Some(serde_json::json!("hello")));
    }

    #[tokio::test]
    async fn context_get_string_returns_default_when_missing() {
        let ctx = Context::new();
        assert_eq!(ctx.get_string("missing", "fallback").await, "fallback");
    }

    #[tokio::test]
    async fn context_apply_updates_merges() {
        let ctx = Context::new();
        ctx.set("keep", serde_json::json!("old")).await;
        ctx.set("overwrite", serde_json::json!("old")).await;

        let mut updates = HashMap::new();
        updates.insert("overwrite".into(), serde_json::json!("new"));
        updates.insert("added".into(), serde_json::json!("fresh"));
        ctx.apply_updates(updates).await;

        assert_eq!(ctx.get("keep").await, Some(serde_json::json!("old")));
        assert_eq!(ctx.get("overwrite").await, Some(serde_json::json!("new")));
        assert_eq!(ctx.get("added").await, Some(serde_json::json!("fresh")));
    }

    #[tokio::test]
    async fn context_logs_accumulate() {
        let ctx = Context::new();
        ctx.append_log("first").await;
        ctx.append_log("second").await;
        assert_eq!(ctx.logs().await, vec!["first", "second"]);
    }

    // --- StageStatus / Outcome ---

    #[test]
    fn stage_status_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&StageStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&StageStatus::Skipped).unwrap(),
            "\"skipped\""
        );
        assert_eq!(StageStatus::Fail.as_str(), "fail");
    }

    #[test]
    fn outcome_constructors() {
        let ok = Outcome::success("all good").with_update("rows", serde_json::json!(3));
        assert_eq!(ok.status, StageStatus::Success);
        assert_eq!(ok.notes, "all good");
        assert_eq!(ok.context_updates.get("rows"), Some(&serde_json::json!(3)));

        let failed = Outcome::fail("something broke");
        assert_eq!(failed.status, StageStatus::Fail);
        assert_eq!(failed.failure_reason.as_deref(), Some("something broke"));

        let skipped = Outcome::skipped("upstream failed");
        assert_eq!(skipped.status, StageStatus::Skipped);
        assert!(skipped.failure_reason.is_none());
    }
}
