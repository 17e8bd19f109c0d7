//! In-memory tabular data loaded from a query result.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{QuarryError, Result};

/// A single value in a [`Table`].
///
/// Serialises untagged so verdict payloads read as plain JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric view of the cell. Booleans and text are not coerced.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Integer(i) => Some(*i as f64),
            Cell::Real(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Storage class name used by `expect_column_values_to_be_of_type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::Integer(_) => "integer",
            Cell::Real(_) => "real",
            Cell::Text(_) => "text",
            Cell::Blob(_) => "blob",
        }
    }

    /// Equality that treats `Integer(1)` and `Real(1.0)` as the same value.
    /// Two integers compare exactly.
    pub fn loosely_eq(&self, other: &Cell) -> bool {
        if let (Cell::Integer(a), Cell::Integer(b)) = (self, other) {
            return a == b;
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Stable key for grouping values, with integral reals folded into integers.
    pub fn group_key(&self) -> String {
        match self {
            Cell::Real(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                format!("i:{}", *f as i64)
            }
            Cell::Integer(i) => format!("i:{i}"),
            Cell::Real(f) => format!("r:{f}"),
            Cell::Text(s) => format!("t:{s}"),
            Cell::Bool(b) => format!("b:{b}"),
            Cell::Blob(b) => format!("x:{b:?}"),
            Cell::Null => "n".to_string(),
        }
    }

    /// Convert a JSON scalar to a cell. Arrays and objects are rejected.
    pub fn from_json(value: &serde_json::Value) -> Option<Cell> {
        match value {
            serde_json::Value::Null => Some(Cell::Null),
            serde_json::Value::Bool(b) => Some(Cell::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Cell::Integer)
                .or_else(|| n.as_f64().map(Cell::Real)),
            serde_json::Value::String(s) => Some(Cell::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "NULL"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Integer(i) => write!(f, "{i}"),
            Cell::Real(r) => write!(f, "{r}"),
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// A named column of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

/// A fully materialised, column-oriented result set.
///
/// Column order follows the query's select list. Every column holds exactly
/// [`row_count`](Table::row_count) values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    /// An empty table with the given column names.
    pub fn new<I, S>(column_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: column_names
                .into_iter()
                .map(|name| Column {
                    name: name.into(),
                    values: Vec::new(),
                })
                .collect(),
            row_count: 0,
        }
    }

    /// Build a table from row-oriented data.
    pub fn from_rows<I, S>(column_names: I, rows: Vec<Vec<Cell>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new(column_names);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Append one row. The row must have one value per column.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(QuarryError::RowShape {
                row: self.row_count,
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        for (column, cell) in self.columns.iter_mut().zip(row) {
            column.values.push(cell);
        }
        self.row_count += 1;
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }


    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a column by exact name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}
