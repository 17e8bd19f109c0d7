//! Task-level plumbing around expectation validation.
//!
//! A [`TaskRunner`] looks a [`TaskSpec`] up in the [`TaskRegistry`], renders its
//! template fields with the [`TemplateResolver`], and executes it with retry
//! and an optional timeout. The built-in [`ValidationTask`] loads a query
//! result through a [`ConnectionProvider`] and fails unless the attached
//! expectation suite passes.

pub mod config;
pub mod connection;
pub mod retry;
pub mod runner;
pub mod task;
pub mod tasks;
pub mod templates;

pub use config::{QuarryConfig, RetryConfig};
pub use connection::{
    BoundQuery, ConnectionConfig, ConnectionProvider, QueryParameters, SqliteConnectionProvider,
};
pub use retry::{execute_with_retry, BackoffPolicy};
pub use runner::{init_run_context, Job, JobResult, TaskRun, TaskRunner};
pub use task::{default_registry, DynTask, Task, TaskRegistry, TaskSpec};
pub use tasks::{ValidationReport, ValidationTask, ValidationTaskConfig};
pub use templates::{expand_variables, TemplateResolver};
