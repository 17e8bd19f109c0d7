//! Task trait, dynamic dispatch wrapper, and task registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quarry_types::{Context, Outcome, Result};

use crate::connection::ConnectionProvider;

// ---------------------------------------------------------------------------
// TaskSpec
// ---------------------------------------------------------------------------

/// One configured task instance: its id, type, and type-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    /// Extra attempts the runner may make after a retryable error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            retries: None,
            timeout_secs: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }
}

// ---------------------------------------------------------------------------
// Task trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Task: Send + Sync {
    /// The task type identifier (e.g. "database_validation").
    fn task_type(&self) -> &str;

    /// Parameters the runner resolves as templates before `execute`.
    fn template_fields(&self) -> &[&str] {
        &[]
    }

    /// File extensions that mark a templated value as a file reference.
    fn template_extensions(&self) -> &[&str] {
        &[]
    }

    /// Execute this task with already-resolved parameters.
    async fn execute(&self, spec: &TaskSpec, context: &Context) -> Result<Outcome>;
}

// ---------------------------------------------------------------------------
// DynTask: object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynTask(Box<dyn Task>);

impl DynTask {
    pub fn new(task: impl Task + 'static) -> Self {
        Self(Box::new(task))
    }

    pub fn task_type(&self) -> &str {
        self.0.task_type()
    }

    pub fn template_fields(&self) -> &[&str] {
        self.0.template_fields()
    }

    pub fn template_extensions(&self) -> &[&str] {
        self.0.template_extensions()
    }

    pub async fn execute(&self, spec: &TaskSpec, context: &Context) -> Result<Outcome> {
        self.0.execute(spec, context).await
    }
}

// ---------------------------------------------------------------------------
// TaskRegistry
// ---------------------------------------------------------------------------

/// Static mapping from task type names to implementations, built at startup.
pub struct TaskRegistry {
    tasks: HashMap<String, DynTask>,
    aliases: HashMap<String, String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn register(&mut self, task: impl Task + 'static) {
        let t = task.task_type().to_string();
        tracing::debug!(task_type = %t, "Registered task type");
        self.tasks.insert(t, DynTask::new(task));
    }

    /// Make `alias` resolve to the already-registered `task_type`.
    pub fn register_alias(&mut self, alias: impl Into<String>, task_type: impl Into<String>) {
        self.aliases.insert(alias.into(), task_type.into());
    }

    /// Resolve aliases to the canonical type name.
    pub fn resolve_type<'a>(&'a self, task_type: &'a str) -> &'a str {
        self.aliases
            .get(task_type)
            .map(String::as_str)
            .unwrap_or(task_type)
    }

    pub fn get(&self, task_type: &str) -> Option<&DynTask> {
        self.tasks.get(self.resolve_type(task_type))
    }

    pub fn has(&self, task_type: &str) -> bool {
        self.tasks.contains_key(self.resolve_type(task_type))
    }

    /// Registered canonical type names, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

/// Type name of the legacy operator class, kept as an alias so existing job
/// definitions keep resolving.
pub const LEGACY_VALIDATION_OPERATOR: &str = "DatabaseToPandasGreatExpectationsValidationOperator";

/// Create the registry with every built-in task registered against `provider`.
pub fn default_registry(provider: Arc<dyn ConnectionProvider>) -> TaskRegistry {
    let mut reg = TaskRegistry::new();
    reg.register(crate::tasks::ValidationTask::new(provider));
    reg.register_alias(
        LEGACY_VALIDATION_OPERATOR,
        crate::tasks::ValidationTask::TASK_TYPE,
    );
    reg
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
