use std::sync::Arc;

use async_trait::async_trait;

use quarry_expect::{Dataset, ExpectationSuite};
use quarry_types::{Context, Outcome, QuarryError, Result, Verdict};

use crate::connection::{ConnectionProvider, QueryParameters};
use crate::task::{Task, TaskSpec};

// ---------------------------------------------------------------------------
// ValidationTaskConfig
// ---------------------------------------------------------------------------

/// Inputs of one validation run. Field values are already template-resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationTaskConfig {
    pub conn_id: Option<String>,
    pub sql: Option<String>,
    pub parameters: Option<QueryParameters>,
    /// Serialised expectation suite (JSON).
    pub validation_config: Option<String>,
}

impl ValidationTaskConfig {
    /// Read the configuration out of a task's parameters.
    pub fn from_spec(spec: &TaskSpec) -> Result<Self> {
        let invalid = |message: String| QuarryError::InvalidTaskConfig {
            task: spec.id.clone(),
            message,
        };

        let string_param = |key: &str| -> Result<Option<String>> {
            match spec.param(key) {
                None | Some(serde_json::Value::Null) => Ok(None),
                Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(invalid(format!("{key} must be a string, got {other}"))),
            }
        };

        // An inline object/array suite is accepted and re-serialised; an empty
        // one counts as absent.
        let validation_config = match spec.param("validation_config") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Object(m)) if m.is_empty() => None,
            Some(serde_json::Value::Array(a)) if a.is_empty() => None,
            Some(v @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
                Some(serde_json::to_string(v)?)
            }
            Some(other) => {
                return Err(invalid(format!(
                    "validation_config must be a string or object, got {other}"
                )))
            }
        };

        let parameters = match spec.param("parameters") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(QueryParameters::from_json(v).ok_or_else(|| {
                invalid("parameters must be an array or object of scalar values".into())
            })?),
        };

        Ok(Self {
            conn_id: string_param("conn_id")?,
            sql: string_param("sql")?,
            parameters,
            validation_config,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// A passing validation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub row_count: usize,
    pub verdict: Verdict,
}

// ---------------------------------------------------------------------------
// ValidationTask: load a query result and validate it against a suite
// ---------------------------------------------------------------------------

/// Copies the result of a SQL query into an in-memory table, runs an
/// expectation suite against it, and fails when the suite does not pass.
pub struct ValidationTask {
    provider: Arc<dyn ConnectionProvider>,
}

impl ValidationTask {
    pub const TASK_TYPE: &'static str = "database_validation";

    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Run one validation and return the passing verdict with the row count.
    ///
    /// Fails with `MissingQuery` / `MissingValidationSpec` before any I/O when
    /// inputs are absent, and with `ValidationFailed` when any expectation
    /// fails. Provider and suite errors propagate unchanged.
    pub async fn validate(
        &self,
        task_id: &str,
        config: &ValidationTaskConfig,
    ) -> Result<ValidationReport> {
        let sql = non_empty(&config.sql).ok_or_else(|| QuarryError::MissingQuery {
            task: task_id.to_string(),
        })?;
        let validation_config = non_empty(&config.validation_config).ok_or_else(|| {
            QuarryError::MissingValidationSpec {
                task: task_id.to_string(),
            }
        })?;
        let conn_id = non_empty(&config.conn_id).ok_or_else(|| QuarryError::InvalidTaskConfig {
            task: task_id.to_string(),
            message: "conn_id must be specified".into(),
        })?;

        let table = self
            .provider
            .fetch_table(conn_id, sql, config.parameters.as_ref())
            .await?;
        let suite = ExpectationSuite::from_json(validation_config)?;
        if suite.is_empty() {
            tracing::warn!(task = %task_id, "Expectation suite has no expectations");
        }
        let dataset = Dataset::new(table).with_suite(suite);

        tracing::info!(
            task = %task_id,
            rows = dataset.table().row_count(),
            "Validating table contents"
        );
        let verdict = dataset.validate()?;

        tracing::info!(
            task = %task_id,
            verdict = %serde_json::to_string(&verdict)?,
            "Validation result"
        );
        if !verdict.success {
            return Err(QuarryError::ValidationFailed {
                task: task_id.to_string(),
                verdict: Box::new(verdict),
            });
        }

        tracing::info!(task = %task_id, "Validation successful");
        Ok(ValidationReport {
            row_count: dataset.table().row_count(),
            verdict,
        })
    }
}

#[async_trait]
impl Task for ValidationTask {
    fn task_type(&self) -> &str {
        Self::TASK_TYPE
    }

    fn template_fields(&self) -> &[&str] {
        &["validation_config", "sql"]
    }

    fn template_extensions(&self) -> &[&str] {
        &[".json", ".sql"]
    }

    async fn execute(&self, spec: &TaskSpec, _context: &Context) -> Result<Outcome> {
        let config = ValidationTaskConfig::from_spec(spec)?;
        let ValidationReport { row_count, verdict } = self.validate(&spec.id, &config).await?;

        let stats = &verdict.statistics;
        let notes = format!(
            "{} of {} expectations passed",
            stats.successful_expectations, stats.evaluated_expectations
        );
        Ok(Outcome::success(notes)
            .with_update(format!("{}.success", spec.id), serde_json::Value::Bool(true))
            .with_update(format!("{}.row_count", spec.id), serde_json::json!(row_count))
            .with_update(format!("{}.verdict", spec.id), serde_json::to_value(&verdict)?))
    }
}
