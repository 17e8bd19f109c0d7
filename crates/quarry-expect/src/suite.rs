//! Expectation suite model and JSON parsing.
//!
//! Suites use the legacy expectations-config layout:
//!
//! ```json
//! {
//!   "dataset_name": "orders",
//!   "expectations": [
//!     { "expectation_type": "expect_column_values_to_not_be_null",
//!       "kwargs": { "column": "id" } }
//!   ]
//! }
//! ```
//!
//! A bare JSON array of expectations is accepted as well.

use serde::{Deserialize, Serialize};

use quarry_types::{Cell, QuarryError, Result};

/// An ordered collection of expectations evaluated against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationSuite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default)]
    pub expectations: Vec<Expectation>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A single declarative data-quality rule.
///
/// Serialised adjacently tagged so that each entry reads as
/// `{"expectation_type": ..., "kwargs": {...}}`. Extra keys such as
/// `result_format` or `meta` inside an entry are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expectation_type", content = "kwargs", rename_all = "snake_case")]
pub enum Expectation {
    // === Table level ===
    ExpectTableRowCountToEqual {
        value: usize,
    },
    ExpectTableRowCountToBeBetween {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<usize>,
    },
    ExpectTableColumnCountToEqual {
        value: usize,
    },
    ExpectTableColumnsToMatchOrderedList {
        column_list: Vec<String>,
    },
    ExpectColumnToExist {
        column: String,
    },

    // === Column map ===
    ExpectColumnValuesToNotBeNull {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mostly: Option<f64>,
    },
    ExpectColumnValuesToBeNull {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mostly: Option<f64>,
    },
    ExpectColumnValuesToBeUnique {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mostly: Option<f64>,
    },
    ExpectColumnValuesToBeInSet {
        column: String,
        value_set: Vec<Cell>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mostly: Option<f64>,
    },
    ExpectColumnValuesToNotBeInSet {
        column: String,
        value_set: Vec<Cell>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mostly: Option<f64>,
    },
    ExpectColumnValuesToBeBetween {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<f64>,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_min: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_max: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mostly: Option<f64>,
    },
    ExpectColumnValuesToMatchRegex {
        column: String,
        regex: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mostly: Option<f64>,
    },
    ExpectColumnValueLengthsToBeBetween {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mostly: Option<f64>,
    },
    ExpectColumnValuesToBeOfType {
        column: String,
        type_: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mostly: Option<f64>,
    },

    // === Column aggregate ===
    ExpectColumnMeanToBeBetween {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<f64>,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_min: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_max: bool,
    },
    ExpectColumnMinToBeBetween {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<f64>,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_min: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_max: bool,
    },
    ExpectColumnMaxToBeBetween {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<f64>,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_min: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_max: bool,
    },
    ExpectColumnSumToBeBetween {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<f64>,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_min: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        strict_max: bool,
    },
}

pub(crate) fn in_range(
    value: f64,
    min: Option<f64>,
    max: Option<f64>,
    strict_min: bool,
    strict_max: bool,
) -> bool {
    let above = match min {
        Some(m) if strict_min => value > m,
        Some(m) => value >= m,
        None => true,
    };
    let below = match max {
        Some(m) if strict_max => value < m,
        Some(m) => value <= m,
        None => true,
    };
    above && below
}

/// Canonical storage class for a `type_` name, accepting common aliases.
pub(crate) fn canonical_type(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "int" | "integer" | "int64" | "int32" | "bigint" => Some("integer"),
        "float" | "real" | "double" | "float64" | "numeric" => Some("real"),
        "str" | "string" | "text" | "varchar" => Some("text"),
        "bool" | "boolean" => Some("bool"),
        "bytes" | "blob" => Some("blob"),
        "null" | "none" | "nonetype" => Some("null"),
        _ => None,
    }
}

impl Expectation {
    /// The `expectation_type` name, e.g. `expect_column_to_exist`.
    pub fn expectation_type(&self) -> String {
        self.parts().0
    }

    /// The `kwargs` object as JSON.
    pub fn kwargs(&self) -> serde_json::Value {
        self.parts().1
    }

    fn parts(&self) -> (String, serde_json::Value) {
        let value = serde_json::to_value(self).unwrap_or_default();
        let kind = value
            .get("expectation_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let kwargs = value
            .get("kwargs")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        (kind, kwargs)
    }

    /// Target column for column-level expectations.
    pub fn column(&self) -> Option<&str> {
        use Expectation::*;
        match self {
            ExpectTableRowCountToEqual { .. }
            | ExpectTableRowCountToBeBetween { .. }
            | ExpectTableColumnCountToEqual { .. }
            | ExpectTableColumnsToMatchOrderedList { .. } => None,
            ExpectColumnToExist { column }
            | ExpectColumnValuesToNotBeNull { column, .. }
            | ExpectColumnValuesToBeNull { column, .. }
            | ExpectColumnValuesToBeUnique { column, .. }
            | ExpectColumnValuesToBeInSet { column, .. }
            | ExpectColumnValuesToNotBeInSet { column, .. }
            | ExpectColumnValuesToBeBetween { column, .. }
            | ExpectColumnValuesToMatchRegex { column, .. }
            | ExpectColumnValueLengthsToBeBetween { column, .. }
            | ExpectColumnValuesToBeOfType { column, .. }
            | ExpectColumnMeanToBeBetween { column, .. }
            | ExpectColumnMinToBeBetween { column, .. }
            | ExpectColumnMaxToBeBetween { column, .. }
            | ExpectColumnSumToBeBetween { column, .. } => Some(column),
        }
    }

    fn mostly(&self) -> Option<f64> {
        use Expectation::*;
        match self {
            ExpectColumnValuesToNotBeNull { mostly, .. }
            | ExpectColumnValuesToBeNull { mostly, .. }
            | ExpectColumnValuesToBeUnique { mostly, .. }
            | ExpectColumnValuesToBeInSet { mostly, .. }
            | ExpectColumnValuesToNotBeInSet { mostly, .. }
            | ExpectColumnValuesToBeBetween { mostly, .. }
            | ExpectColumnValuesToMatchRegex { mostly, .. }
            | ExpectColumnValueLengthsToBeBetween { mostly, .. }
            | ExpectColumnValuesToBeOfType { mostly, .. } => *mostly,
            _ => None,
        }
    }

    /// Static checks on kwargs that serde cannot express.
    fn check(&self) -> std::result::Result<(), String> {
        use Expectation::*;
        if let Some(m) = self.mostly() {
            if !(0.0..=1.0).contains(&m) {
                return Err(format!("mostly must be between 0 and 1, got {m}"));
            }
        }
        let both_none = "min_value and max_value cannot both be None";
        match self {
            ExpectTableRowCountToBeBetween { min_value, max_value }
            | ExpectColumnValueLengthsToBeBetween {
                min_value,
                max_value,
                ..
            } => match (min_value, max_value) {
                (None, None) => Err(both_none.into()),
                (Some(lo), Some(hi)) if lo > hi => {
                    Err(format!("min_value {lo} is greater than max_value {hi}"))
                }
                _ => Ok(()),
            },
            ExpectColumnValuesToBeBetween {
                min_value,
                max_value,
                ..
            }
            | ExpectColumnMeanToBeBetween {
                min_value,
                max_value,
                ..
            }
            | ExpectColumnMinToBeBetween {
                min_value,
                max_value,
                ..
            }
            | ExpectColumnMaxToBeBetween {
                min_value,
                max_value,
                ..
            }
            | ExpectColumnSumToBeBetween {
                min_value,
                max_value,
                ..
            } => check_float_bounds(*min_value, *max_value, both_none),
            ExpectColumnValuesToMatchRegex { regex, .. } => regex::Regex::new(regex)
                .map(|_| ())
                .map_err(|e| format!("invalid regex '{regex}': {e}")),
            ExpectColumnValuesToBeOfType { type_, .. } => canonical_type(type_)
                .map(|_| ())
                .ok_or_else(|| format!("unknown type_ '{type_}'")),
            _ => Ok(()),
        }
    }
}

fn check_float_bounds(
    min: Option<f64>,
    max: Option<f64>,
    both_none: &str,
) -> std::result::Result<(), String> {
    match (min, max) {
        (None, None) => Err(both_none.to_string()),
        (Some(lo), Some(hi)) if lo > hi => {
            Err(format!("min_value {lo} is greater than max_value {hi}"))
        }
        _ => Ok(()),
    }
}

impl ExpectationSuite {
    /// A suite containing the given expectations.
    pub fn new(expectations: Vec<Expectation>) -> Self {
        Self {
            dataset_name: None,
            meta: None,
            expectations,
        }
    }

    /// Parse a suite from its serialised JSON form.
    pub fn from_json(source: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(source)
            .map_err(|e| QuarryError::InvalidSuite(format!("not valid JSON: {e}")))?;
        let suite = if value.is_array() {
            let expectations: Vec<Expectation> = serde_json::from_value(value)
                .map_err(|e| QuarryError::InvalidSuite(e.to_string()))?;
            Self::new(expectations)
        } else {
            serde_json::from_value(value).map_err(|e| QuarryError::InvalidSuite(e.to_string()))?
        };
        suite.check()?;
        Ok(suite)
    }

    /// Validate kwargs of every expectation, reporting the first problem.
    pub fn check(&self) -> Result<()> {
        for (index, expectation) in self.expectations.iter().enumerate() {
            expectation.check().map_err(|message| {
                QuarryError::InvalidSuite(format!(
                    "expectation #{index} ({}): {message}",
                    expectation.expectation_type()
                ))
            })?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.expectations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expectations.is_empty()
    }
}
