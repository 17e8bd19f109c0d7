//! Task runner: template resolution, retry, timeout, and sequential jobs.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quarry_types::{Context, Outcome, QuarryError, Result, StageStatus};

use crate::config::QuarryConfig;
use crate::retry::{execute_with_retry, BackoffPolicy};
use crate::task::{DynTask, TaskRegistry, TaskSpec};
use crate::templates::{vars_from_context, TemplateResolver};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A job file: shared variables plus tasks run in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl Job {
    pub fn from_toml(input: &str) -> Result<Self> {
        let job: Job = toml::from_str(input).map_err(|e| QuarryError::Config(e.to_string()))?;
        job.check()?;
        Ok(job)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| QuarryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Reject jobs whose task ids collide; context keys are derived from them.
    pub fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(QuarryError::Config(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }
        Ok(())
    }
}

/// The result of one task invocation.
#[derive(Debug)]
pub struct TaskRun {
    pub task_id: String,
    pub outcome: Outcome,
    pub error: Option<QuarryError>,
}

impl TaskRun {
    pub fn status(&self) -> StageStatus {
        self.outcome.status
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.status == StageStatus::Success
    }
}

#[derive(Debug)]
pub struct JobResult {
    pub runs: Vec<TaskRun>,
    pub success: bool,
}

impl JobResult {
    pub fn run(&self, task_id: &str) -> Option<&TaskRun> {
        self.runs.iter().find(|r| r.task_id == task_id)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskRun> {
        self.runs
            .iter()
            .filter(|r| r.outcome.status == StageStatus::Fail)
    }
}

/// Seed `run_id`, `ds` (run date) and `ts` (RFC3339 timestamp).
pub async fn init_run_context(context: &Context, now: DateTime<Utc>) {
    context
        .set("run_id", serde_json::json!(uuid::Uuid::new_v4().to_string()))
        .await;
    context
        .set("ds", serde_json::json!(now.format("%Y-%m-%d").to_string()))
        .await;
    context.set("ts", serde_json::json!(now.to_rfc3339())).await;
}

// ---------------------------------------------------------------------------
// TaskRunner
// ---------------------------------------------------------------------------

pub struct TaskRunner {
    registry: TaskRegistry,
    resolver: TemplateResolver,
    backoff: BackoffPolicy,
    default_retries: usize,
}

impl TaskRunner {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry,
            resolver: TemplateResolver::default(),
            backoff: BackoffPolicy::default(),
            default_retries: 0,
        }
    }

    /// Runner using the search path and retry settings of `config`.
    pub fn from_config(registry: TaskRegistry, config: &QuarryConfig) -> Self {
        Self::new(registry)
            .with_resolver(TemplateResolver::new(config.template_search_path.clone()))
            .with_backoff(config.retry.backoff())
            .with_default_retries(config.retry.max_retries)
    }

    pub fn with_resolver(mut self, resolver: TemplateResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_default_retries(mut self, retries: usize) -> Self {
        self.default_retries = retries;
        self
    }

    /// Run one task and record its status under `<task_id>.status` in `context`.
    ///
    /// A failed validation also records `<task_id>.success = false` and the
    /// verdict under `<task_id>.verdict`.
    pub async fn run_task(&self, spec: &TaskSpec, context: &Context) -> TaskRun {
        tracing::info!(task = %spec.id, task_type = %spec.task_type, "Running task");
        let run = match self.try_run_task(spec, context).await {
            Ok(outcome) => {
                context.apply_updates(outcome.context_updates.clone()).await;
                TaskRun {
                    task_id: spec.id.clone(),
                    outcome,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(task = %spec.id, error = %e, "Task failed");
                context
                    .set(format!("{}.success", spec.id), serde_json::Value::Bool(false))
                    .await;
                if let Some(verdict) = e.verdict() {
                    if let Ok(value) = serde_json::to_value(verdict) {
                        context.set(format!("{}.verdict", spec.id), value).await;
                    }
                }
                TaskRun {
                    task_id: spec.id.clone(),
                    outcome: Outcome::fail(e.to_string()),
                    error: Some(e),
                }
            }
        };

        let status = run.status().as_str();
        context
            .set(format!("{}.status", spec.id), serde_json::json!(status))
            .await;
        context
            .append_log(format!("{}: {}", spec.id, status))
            .await;
        run
    }

    async fn try_run_task(&self, spec: &TaskSpec, context: &Context) -> Result<Outcome> {
        let task = self
            .registry
            .get(&spec.task_type)
            .ok_or_else(|| QuarryError::UnknownTaskType(spec.task_type.clone()))?;

        let vars = vars_from_context(&context.snapshot().await);
        let mut resolved = spec.clone();
        self.resolver
            .resolve_params(
                &mut resolved,
                task.template_fields(),
                task.template_extensions(),
                &vars,
            )
            .await?;

        let retries = spec.retries.unwrap_or(self.default_retries);
        let timeout = spec.timeout_secs.map(Duration::from_secs);
        execute_with_retry(
            || execute_once(task, &resolved, context, timeout),
            retries,
            &self.backoff,
            &spec.id,
        )
        .await
    }

    /// Run every task of `job` in order. After the first failure the remaining
    /// tasks are skipped. Job variables are added to `context` without
    /// overriding keys already present.
    pub async fn run_job(&self, job: &Job, context: &Context) -> JobResult {
        for (key, value) in &job.vars {
            if context.get(key).await.is_none() {
                context.set(key.clone(), value.clone()).await;
            }
        }

        let mut runs = Vec::with_capacity(job.tasks.len());
        let mut failed_task: Option<String> = None;
        for spec in &job.tasks {
            if let Some(upstream) = &failed_task {
                tracing::info!(task = %spec.id, upstream = %upstream, "Skipping task");
                context
                    .set(format!("{}.status", spec.id), serde_json::json!("skipped"))
                    .await;
                runs.push(TaskRun {
                    task_id: spec.id.clone(),
                    outcome: Outcome::skipped(format!("upstream task '{upstream}' failed")),
                    error: None,
                });
                continue;
            }
            let run = self.run_task(spec, context).await;
            if run.status() == StageStatus::Fail {
                failed_task = Some(spec.id.clone());
            }
            runs.push(run);
        }

        let success = failed_task.is_none();
        tracing::info!(
            job = job.name.as_deref().unwrap_or("<unnamed>"),
            tasks = runs.len(),
            success,
            "Job finished"
        );
        JobResult { runs, success }
    }
}

async fn execute_once(
    task: &DynTask,
    spec: &TaskSpec,
    context: &Context,
    timeout: Option<Duration>,
) -> Result<Outcome> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, task.execute(spec, context))
            .await
            .map_err(|_| QuarryError::TaskTimeout {
                task: spec.id.clone(),
                timeout_ms: limit.as_millis() as u64,
            })?,
        None => task.execute(spec, context).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::task::Task;

    /// Echoes its `sql` parameter into the context.
    struct EchoTask;

    #[async_trait]
    impl Task for EchoTask {
        fn task_type(&self) -> &str {
            "echo"
        }

        fn template_fields(&self) -> &[&str] {
            &["sql"]
        }

        async fn execute(&self, spec: &TaskSpec, _ctx: &Context) -> Result<Outcome> {
            let sql = spec
                .param("sql")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            Ok(Outcome::success("echoed").with_update(format!("{}.sql", spec.id), sql))
        }
    }

    struct FailTask;

    #[async_trait]
    impl Task for FailTask {
        fn task_type(&self) -> &str {
            "fail"
        }

        async fn execute(&self, spec: &TaskSpec, _ctx: &Context) -> Result<Outcome> {
            Err(QuarryError::MissingQuery {
                task: spec.id.clone(),
            })
        }
    }

    /// Times out on the first `failures` calls, then succeeds.
    struct SlowThenFast {
        calls: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait]
    impl Task for SlowThenFast {
        fn task_type(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _spec: &TaskSpec, _ctx: &Context) -> Result<Outcome> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(Outcome::success("fast"))
        }
    }

    fn make_runner() -> TaskRunner {
        let mut reg = TaskRegistry::new();
        reg.register(EchoTask);
        reg.register(FailTask);
        TaskRunner::new(reg).with_backoff(BackoffPolicy::None)
    }

    #[tokio::test]
    async fn run_task_expands_context_vars() {
        let runner = make_runner();
        let ctx = Context::new();
        ctx.set("ds", serde_json::json!("2026-01-31")).await;
        let spec = TaskSpec::new("e", "echo")
            .with_param("sql", serde_json::json!("SELECT '${ds}'"));
        let run = runner.run_task(&spec, &ctx).await;
        assert!(run.succeeded());
        assert_eq!(
            ctx.get("e.sql").await,
            Some(serde_json::json!("SELECT '2026-01-31'"))
        );
        assert_eq!(ctx.get("e.status").await, Some(serde_json::json!("success")));
    }

    #[tokio::test]
    async fn unknown_task_type_fails_run() {
        let runner = make_runner();
        let ctx = Context::new();
        let run = runner.run_task(&TaskSpec::new("x", "nope"), &ctx).await;
        assert_eq!(run.status(), StageStatus::Fail);
        assert!(matches!(run.error, Some(QuarryError::UnknownTaskType(_))));
        assert_eq!(ctx.get("x.success").await, Some(serde_json::json!(false)));
    }

    #[tokio::test]
    async fn job_skips_tasks_after_failure() {
        let runner = make_runner();
        let job = Job {
            name: Some("nightly".into()),
            vars: BTreeMap::new(),
            tasks: vec![
                TaskSpec::new("a", "echo"),
                TaskSpec::new("b", "fail"),
                TaskSpec::new("c", "echo"),
            ],
        };
        let ctx = Context::new();
        let result = runner.run_job(&job, &ctx).await;
        assert!(!result.success);
        let statuses: Vec<StageStatus> = result.runs.iter().map(TaskRun::status).collect();
        assert_eq!(
            statuses,
            vec![StageStatus::Success, StageStatus::Fail, StageStatus::Skipped]
        );
        assert_eq!(result.failed().count(), 1);
        assert_eq!(ctx.get("c.status").await, Some(serde_json::json!("skipped")));
        assert_eq!(ctx.logs().await, vec!["a: success", "b: fail"]);
    }

    #[tokio::test]
    async fn job_vars_do_not_override_context() {
        let runner = make_runner();
        let job = Job::from_toml(
            r#"
            [vars]
            region = "eu"
            table = "orders"

            [[tasks]]
            id = "e"
            type = "echo"
            sql = "SELECT * FROM ${table} WHERE region = '${region}'"
            "#,
        )
        .unwrap();
        let ctx = Context::new();
        ctx.set("region", serde_json::json!("us")).await;
        let result = runner.run_job(&job, &ctx).await;
        assert!(result.success);
        assert_eq!(
            ctx.get("e.sql").await,
            Some(serde_json::json!("SELECT * FROM orders WHERE region = 'us'"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut reg = TaskRegistry::new();
        reg.register(SlowThenFast {
            calls: calls.clone(),
            failures: 1,
        });
        let runner = TaskRunner::new(reg).with_backoff(BackoffPolicy::None);
        let spec = TaskSpec {
            retries: Some(1),
            timeout_secs: Some(5),
            ..TaskSpec::new("f", "flaky")
        };
        let run = runner.run_task(&spec, &Context::new()).await;
        assert!(run.succeeded(), "error: {:?}", run.error);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_retries_fails() {
        let mut reg = TaskRegistry::new();
        reg.register(SlowThenFast {
            calls: Arc::new(AtomicUsize::new(0)),
            failures: 1,
        });
        let runner = TaskRunner::new(reg);
        let spec = TaskSpec {
            timeout_secs: Some(1),
            ..TaskSpec::new("f", "flaky")
        };
        let run = runner.run_task(&spec, &Context::new()).await;
        assert!(matches!(
            run.error,
            Some(QuarryError::TaskTimeout { timeout_ms: 1000, .. })
        ));
    }

    #[test]
    fn duplicate_task_ids_are_rejected() {
        let err = Job::from_toml(
            r#"
            [[tasks]]
            id = "a"
            type = "echo"

            [[tasks]]
            id = "a"
            type = "echo"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate task id 'a'"));
    }

    #[tokio::test]
    async fn run_context_has_date_vars() {
        let ctx = Context::new();
        let now = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        init_run_context(&ctx, now).await;
        assert_eq!(ctx.get_string("ds", "").await, "2026-03-04");
        assert_eq!(ctx.get_string("ts", "").await, "2026-03-04T05:06:07+00:00");
        assert_eq!(ctx.get_string("run_id", "").await.len(), 36);
    }
}
