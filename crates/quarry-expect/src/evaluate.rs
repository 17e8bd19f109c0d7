//! Evaluation of individual expectations against a [`Table`].

use std::collections::HashMap;

use quarry_types::{Cell, Column, ExceptionInfo, ExpectationResult, ResultDetail, Table};

use crate::suite::{canonical_type, in_range, Expectation};

/// Maximum number of offending values echoed back per expectation.
pub const PARTIAL_UNEXPECTED_LIMIT: usize = 20;

/// Evaluate one expectation. Never fails: problems such as a missing column
/// are reported through `exception_info` on an unsuccessful result.
pub fn evaluate(expectation: &Expectation, table: &Table) -> ExpectationResult {
    let mut result = ExpectationResult {
        expectation_type: expectation.expectation_type(),
        kwargs: expectation.kwargs(),
        success: false,
        result: ResultDetail::default(),
        exception_info: None,
    };

    match expectation.column() {
        Some(name) => match table.column(name) {
            Some(column) => evaluate_column(expectation, column, &mut result),
            None => {
                result.exception_info = Some(ExceptionInfo {
                    raised_exception: true,
                    exception_message: format!("column '{name}' not found in table"),
                });
            }
        },
        None => evaluate_table(expectation, table, &mut result),
    }

    result
}

fn evaluate_table(expectation: &Expectation, table: &Table, out: &mut ExpectationResult) {
    use Expectation::*;
    let rows = table.row_count();
    match expectation {
        ExpectTableRowCountToEqual { value } => {
            out.result.observed_value = Some(serde_json::json!(rows));
            out.success = rows == *value;
        }
        ExpectTableRowCountToBeBetween {
            min_value,
            max_value,
        } => {
            out.result.observed_value = Some(serde_json::json!(rows));
            out.success =
                min_value.map_or(true, |m| rows >= m) && max_value.map_or(true, |m| rows <= m);
        }
        ExpectTableColumnCountToEqual { value } => {
            out.result.observed_value = Some(serde_json::json!(table.column_count()));
            out.success = table.column_count() == *value;
        }
        ExpectTableColumnsToMatchOrderedList { column_list } => {
            let names = table.column_names();
            out.result.observed_value = Some(serde_json::json!(names));
            out.success = names.len() == column_list.len()
                && names.iter().zip(column_list).all(|(a, b)| *a == b.as_str());
        }
        _ => unreachable!("column expectations are dispatched to evaluate_column"),
    }
}

fn evaluate_column(expectation: &Expectation, column: &Column, out: &mut ExpectationResult) {
    use Expectation::*;
    match expectation {
        ExpectColumnToExist { .. } => {
            out.success = true;
        }
        ExpectColumnValuesToNotBeNull { mostly, .. } => {
            column_map(column, *mostly, NullPolicy::Counted, out, |c| c.is_null());
        }
        ExpectColumnValuesToBeNull { mostly, .. } => {
            column_map(column, *mostly, NullPolicy::Counted, out, |c| !c.is_null());
        }
        ExpectColumnValuesToBeUnique { mostly, .. } => {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for cell in column.values.iter().filter(|c| !c.is_null()) {
                *counts.entry(cell.group_key()).or_default() += 1;
            }
            column_map(column, *mostly, NullPolicy::Ignored, out, |c| {
                counts.get(&c.group_key()).copied().unwrap_or(0) > 1
            });
        }
        ExpectColumnValuesToBeInSet {
            value_set, mostly, ..
        } => {
            column_map(column, *mostly, NullPolicy::Ignored, out, |c| {
                !value_set.iter().any(|v| v.loosely_eq(c))
            });
        }
        ExpectColumnValuesToNotBeInSet {
            value_set, mostly, ..
        } => {
            column_map(column, *mostly, NullPolicy::Ignored, out, |c| {
                value_set.iter().any(|v| v.loosely_eq(c))
            });
        }
        ExpectColumnValuesToBeBetween {
            min_value,
            max_value,
            strict_min,
            strict_max,
            mostly,
            ..
        } => {
            column_map(column, *mostly, NullPolicy::Ignored, out, |c| match c.as_f64() {
                Some(v) => !in_range(v, *min_value, *max_value, *strict_min, *strict_max),
                None => true,
            });
        }
        ExpectColumnValuesToMatchRegex { regex, mostly, .. } => {
            let re = match regex::Regex::new(regex) {
                Ok(re) => re,
                Err(e) => {
                    out.exception_info = Some(ExceptionInfo {
                        raised_exception: true,
                        exception_message: format!("invalid regex '{regex}': {e}"),
                    });
                    return;
                }
            };
            column_map(column, *mostly, NullPolicy::Ignored, out, |c| match c.as_str() {
                Some(s) => !re.is_match(s),
                None => true,
            });
        }
        ExpectColumnValueLengthsToBeBetween {
            min_value,
            max_value,
            mostly,
            ..
        } => {
            column_map(column, *mostly, NullPolicy::Ignored, out, |c| match c.as_str() {
                Some(s) => {
                    let len = s.chars().count();
                    !(min_value.map_or(true, |m| len >= m) && max_value.map_or(true, |m| len <= m))
                }
                None => true,
            });
        }
        ExpectColumnValuesToBeOfType { type_, mostly, .. } => {
            let wanted = canonical_type(type_).unwrap_or("unknown");
            column_map(column, *mostly, NullPolicy::Ignored, out, |c| {
                c.type_name() != wanted
            });
        }
        ExpectColumnMeanToBeBetween {
            min_value,
            max_value,
            strict_min,
            strict_max,
            ..
        } => aggregate(column, out, Aggregate::Mean, |v| {
            in_range(v, *min_value, *max_value, *strict_min, *strict_max)
        }),
        ExpectColumnMinToBeBetween {
            min_value,
            max_value,
            strict_min,
            strict_max,
            ..
        } => aggregate(column, out, Aggregate::Min, |v| {
            in_range(v, *min_value, *max_value, *strict_min, *strict_max)
        }),
        ExpectColumnMaxToBeBetween {
            min_value,
            max_value,
            strict_min,
            strict_max,
            ..
        } => aggregate(column, out, Aggregate::Max, |v| {
            in_range(v, *min_value, *max_value, *strict_min, *strict_max)
        }),
        ExpectColumnSumToBeBetween {
            min_value,
            max_value,
            strict_min,
            strict_max,
            ..
        } => aggregate(column, out, Aggregate::Sum, |v| {
            in_range(v, *min_value, *max_value, *strict_min, *strict_max)
        }),
        _ => unreachable!("table expectations are dispatched to evaluate_table"),
    }
}

// ---------------------------------------------------------------------------
// Column map expectations
// ---------------------------------------------------------------------------

/// Whether null cells take part in a column map expectation.
#[derive(Clone, Copy, PartialEq, Eq)]
enum NullPolicy {
    /// Nulls are evaluated and the denominator is the element count.
    Counted,
    /// Nulls are skipped and the denominator is the non-null count.
    Ignored,
}

fn percent(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64 * 100.0)
}

fn column_map<F>(
    column: &Column,
    mostly: Option<f64>,
    nulls: NullPolicy,
    out: &mut ExpectationResult,
    mut is_unexpected: F,
) where
    F: FnMut(&Cell) -> bool,
{
    let element_count = column.values.len();
    let missing_count = column.values.iter().filter(|c| c.is_null()).count();

    let mut unexpected_count = 0;
    let mut partial = Vec::new();
    for cell in &column.values {
        if nulls == NullPolicy::Ignored && cell.is_null() {
            continue;
        }
        if is_unexpected(cell) {
            unexpected_count += 1;
            if partial.len() < PARTIAL_UNEXPECTED_LIMIT {
                partial.push(cell.clone());
            }
        }
    }

    let denominator = match nulls {
        NullPolicy::Counted => element_count,
        NullPolicy::Ignored => element_count - missing_count,
    };
    let threshold = mostly.unwrap_or(1.0);
    out.success = denominator == 0
        || (denominator - unexpected_count) as f64 / denominator as f64 >= threshold;

    out.result = ResultDetail {
        element_count: Some(element_count),
        missing_count: Some(missing_count),
        missing_percent: percent(missing_count, element_count),
        unexpected_count: Some(unexpected_count),
        unexpected_percent: percent(unexpected_count, denominator),
        partial_unexpected_list: Some(partial),
        ..Default::default()
    };
}

// ---------------------------------------------------------------------------
// Column aggregate expectations
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Aggregate {
    Mean,
    Min,
    Max,
    Sum,
}

fn aggregate<F>(column: &Column, out: &mut ExpectationResult, kind: Aggregate, accept: F)
where
    F: Fn(f64) -> bool,
{
    let mut values = Vec::with_capacity(column.values.len());
    for cell in column.values.iter().filter(|c| !c.is_null()) {
        match cell.as_f64() {
            Some(v) => values.push(v),
            None => {
                out.exception_info = Some(ExceptionInfo {
                    raised_exception: true,
                    exception_message: format!(
                        "column '{}' contains non-numeric value {}",
                        column.name, cell
                    ),
                });
                return;
            }
        }
    }

    let observed = if values.is_empty() {
        None
    } else {
        Some(match kind {
            Aggregate::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Aggregate::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregate::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregate::Sum => values.iter().sum(),
        })
    };

    out.result.element_count = Some(column.values.len());
    out.result.observed_value = Some(match observed {
        Some(v) => serde_json::json!(v),
        None => serde_json::Value::Null,
    });
    out.success = observed.map_or(false, accept);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::from_rows(
            ["id", "email", "qty", "status"],
            vec![
                vec![
                    Cell::Integer(1),
                    Cell::Text("a@example.com".into()),
                    Cell::Integer(5),
                    Cell::Text("open".into()),
                ],
                vec![
                    Cell::Integer(2),
                    Cell::Text("broken".into()),
                    Cell::Real(2.5),
                    Cell::Text("closed".into()),
                ],
                vec![Cell::Integer(2), Cell::Null, Cell::Null, Cell::Text("lost".into())],
                vec![
                    Cell::Integer(4),
                    Cell::Text("d@example.com".into()),
                    Cell::Integer(12),
                    Cell::Text("open".into()),
                ],
            ],
        )
        .unwrap()
    }

    fn parse(json: &str) -> Expectation {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn row_count_between() {
        let r = evaluate(
            &parse(r#"{"expectation_type": "expect_table_row_count_to_be_between", "kwargs": {"min_value": 1, "max_value": 4}}"#),
            &table(),
        );
        assert!(r.success);
        assert_eq!(r.result.observed_value, Some(serde_json::json!(4)));

        let r = evaluate(
            &parse(r#"{"expectation_type": "expect_table_row_count_to_equal", "kwargs": {"value": 3}}"#),
            &table(),
        );
        assert!(!r.success);
    }

    #[test]
    fn ordered_column_list() {
        let ok = parse(
            r#"{"expectation_type": "expect_table_columns_to_match_ordered_list",
                "kwargs": {"column_list": ["id", "email", "qty", "status"]}}"#,
        );
        assert!(evaluate(&ok, &table()).success);
        let swapped = parse(
            r#"{"expectation_type": "expect_table_columns_to_match_ordered_list",
                "kwargs": {"column_list": ["email", "id", "qty", "status"]}}"#,
        );
        assert!(!evaluate(&swapped, &table()).success);
    }

    #[test]
    fn not_null_counts_nulls_against_all_rows() {
        let r = evaluate(
            &Expectation::ExpectColumnValuesToNotBeNull {
                column: "email".into(),
                mostly: None,
            },
            &table(),
        );
        assert!(!r.success);
        assert_eq!(r.result.element_count, Some(4));
        assert_eq!(r.result.missing_count, Some(1));
        assert_eq!(r.result.unexpected_count, Some(1));
        assert_eq!(r.result.unexpected_percent, Some(25.0));
        assert_eq!(r.result.partial_unexpected_list, Some(vec![Cell::Null]));
    }

    #[test]
    fn mostly_relaxes_threshold() {
        let r = evaluate(
            &Expectation::ExpectColumnValuesToNotBeNull {
                column: "email".into(),
                mostly: Some(0.75),
            },
            &table(),
        );
        assert!(r.success);
        assert_eq!(r.kwargs, serde_json::json!({"column": "email", "mostly": 0.75}));
    }

    #[test]
    fn unique_reports_every_duplicate() {
        let r = evaluate(
            &Expectation::ExpectColumnValuesToBeUnique {
                column: "id".into(),
                mostly: None,
            },
            &table(),
        );
        assert!(!r.success);
        assert_eq!(r.result.unexpected_count, Some(2));
        assert_eq!(
            r.result.partial_unexpected_list,
            Some(vec![Cell::Integer(2), Cell::Integer(2)])
        );
    }

    #[test]
    fn in_set_ignores_nulls() {
        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_values_to_be_in_set",
                    "kwargs": {"column": "status", "value_set": ["open", "closed"]}}"#,
            ),
            &table(),
        );
        assert!(!r.success);
        assert_eq!(
            r.result.partial_unexpected_list,
            Some(vec![Cell::Text("lost".into())])
        );

        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_values_to_not_be_in_set",
                    "kwargs": {"column": "qty", "value_set": [99]}}"#,
            ),
            &table(),
        );
        assert!(r.success);
        assert_eq!(r.result.element_count, Some(4));
        assert_eq!(r.result.missing_count, Some(1));
    }

    #[test]
    fn set_membership_compares_large_integers_exactly() {
        let ids = Table::from_rows(["id"], vec![vec![Cell::Integer(9_007_199_254_740_993)]]).unwrap();
        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_values_to_not_be_in_set",
                    "kwargs": {"column": "id", "value_set": [9007199254740992]}}"#,
            ),
            &ids,
        );
        assert!(r.success);
        assert_eq!(r.result.unexpected_count, Some(0));

        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_values_to_be_in_set",
                    "kwargs": {"column": "id", "value_set": [9007199254740992]}}"#,
            ),
            &ids,
        );
        assert!(!r.success);
    }

    #[test]
    fn between_uses_nonnull_denominator() {
        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_values_to_be_between",
                    "kwargs": {"column": "qty", "min_value": 0, "max_value": 10}}"#,
            ),
            &table(),
        );
        assert!(!r.success);
        assert_eq!(r.result.unexpected_count, Some(1));
        let pct = r.result.unexpected_percent.unwrap();
        assert!((pct - 100.0 / 3.0).abs() < 1e-9, "got {pct}");
    }

    #[test]
    fn between_treats_text_as_unexpected() {
        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_values_to_be_between",
                    "kwargs": {"column": "status", "min_value": 0}}"#,
            ),
            &table(),
        );
        assert!(!r.success);
        assert_eq!(r.result.unexpected_count, Some(4));
    }

    #[test]
    fn regex_and_lengths() {
        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_values_to_match_regex",
                    "kwargs": {"column": "email", "regex": "^[^@]+@[^@]+$"}}"#,
            ),
            &table(),
        );
        assert!(!r.success);
        assert_eq!(
            r.result.partial_unexpected_list,
            Some(vec![Cell::Text("broken".into())])
        );

        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_value_lengths_to_be_between",
                    "kwargs": {"column": "status", "min_value": 4, "max_value": 6}}"#,
            ),
            &table(),
        );
        assert!(r.success);
    }

    #[test]
    fn of_type_checks_storage_class() {
        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_values_to_be_of_type",
                    "kwargs": {"column": "qty", "type_": "int"}}"#,
            ),
            &table(),
        );
        assert!(!r.success);
        assert_eq!(r.result.partial_unexpected_list, Some(vec![Cell::Real(2.5)]));
    }

    #[test]
    fn aggregates_observe_values() {
        let mean = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_mean_to_be_between",
                    "kwargs": {"column": "qty", "min_value": 6, "max_value": 7}}"#,
            ),
            &table(),
        );
        assert!(mean.success);
        assert_eq!(mean.result.observed_value, Some(serde_json::json!(6.5)));

        let max = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_max_to_be_between",
                    "kwargs": {"column": "qty", "max_value": 12, "strict_max": true}}"#,
            ),
            &table(),
        );
        assert!(!max.success);

        let sum = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_sum_to_be_between",
                    "kwargs": {"column": "qty", "min_value": 19.5, "max_value": 19.5}}"#,
            ),
            &table(),
        );
        assert!(sum.success);

        let min = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_min_to_be_between",
                    "kwargs": {"column": "qty", "min_value": 3}}"#,
            ),
            &table(),
        );
        assert!(!min.success);
        assert_eq!(min.result.observed_value, Some(serde_json::json!(2.5)));
    }

    #[test]
    fn aggregate_over_text_reports_exception() {
        let r = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_mean_to_be_between",
                    "kwargs": {"column": "status", "min_value": 0}}"#,
            ),
            &table(),
        );
        assert!(!r.success);
        assert!(r.exception_info.unwrap().exception_message.contains("non-numeric"));
    }

    #[test]
    fn missing_column_is_reported_not_raised() {
        let r = evaluate(
            &Expectation::ExpectColumnToExist {
                column: "nope".into(),
            },
            &table(),
        );
        assert!(!r.success);
        let info = r.exception_info.unwrap();
        assert!(info.raised_exception);
        assert!(info.exception_message.contains("nope"));
    }

    #[test]
    fn empty_table_is_deterministic() {
        let empty = Table::new(["id"]);
        let not_null = evaluate(
            &Expectation::ExpectColumnValuesToNotBeNull {
                column: "id".into(),
                mostly: None,
            },
            &empty,
        );
        assert!(not_null.success);
        assert_eq!(not_null.result.element_count, Some(0));
        assert_eq!(not_null.result.unexpected_percent, None);

        let rows = evaluate(
            &Expectation::ExpectTableRowCountToBeBetween {
                min_value: Some(1),
                max_value: None,
            },
            &empty,
        );
        assert!(!rows.success);

        let mean = evaluate(
            &parse(
                r#"{"expectation_type": "expect_column_mean_to_be_between",
                    "kwargs": {"column": "id", "min_value": 0}}"#,
            ),
            &empty,
        );
        assert!(!mean.success);
        assert_eq!(mean.result.observed_value, Some(serde_json::Value::Null));
    }
}
