//! Aggregate validation verdicts.

use serde::{Deserialize, Serialize};

use crate::Cell;

/// Outcome of evaluating one expectation suite against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub success: bool,
    pub statistics: VerdictStatistics,
    pub results: Vec<ExpectationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictStatistics {
    pub evaluated_expectations: usize,
    pub successful_expectations: usize,
    pub unsuccessful_expectations: usize,
    pub success_percent: f64,
}

/// Per-expectation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationResult {
    pub expectation_type: String,
    pub kwargs: serde_json::Value,
    pub success: bool,
    pub result: ResultDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_info: Option<ExceptionInfo>,
}

/// Supporting detail for an [`ExpectationResult`]. Which fields are set
/// depends on the expectation kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unexpected_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unexpected_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_unexpected_list: Option<Vec<Cell>>,
}

/// Set when an expectation could not be evaluated (e.g. missing column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub raised_exception: bool,
    pub exception_message: String,
}

impl Verdict {
    /// Aggregate per-expectation results. An empty result list is a success.
    pub fn from_results(results: Vec<ExpectationResult>) -> Self {
        let evaluated = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let success_percent = if evaluated == 0 {
            100.0
        } else {
            successful as f64 / evaluated as f64 * 100.0
        };
        Self {
            success: successful == evaluated,
            statistics: VerdictStatistics {
                evaluated_expectations: evaluated,
                successful_expectations: successful,
                unsuccessful_expectations: evaluated - successful,
                success_percent,
            },
            results,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExpectationResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// One-line description of the failing expectations.
    pub fn failure_summary(&self) -> String {
        let failed: Vec<String> = self.failed().map(|r| r.describe()).collect();
        if failed.is_empty() {
            return "all expectations passed".to_string();
        }
        format!(
            "{} of {} expectations failed: {}",
            failed.len(),
            self.statistics.evaluated_expectations,
            failed.join(", ")
        )
    }
}

impl ExpectationResult {
    /// `expectation_type(column=...)`, or just the type for table-level rules.
    pub fn describe(&self) -> String {
        match self.kwargs.get("column").and_then(|c| c.as_str()) {
            Some(column) => format!("{}(column={})", self.expectation_type, column),
            None => self.expectation_type.clone(),
        }
    }
}
