//! Connection resolution and query execution.
//!
//! A [`ConnectionProvider`] turns a connection id plus query text into a fully
//! materialised [`Table`]. [`SqliteConnectionProvider`] opens one connection per
//! query and closes it afterwards; pooling is left to callers that need it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Column as _, Connection, Executor, Row, Statement, TypeInfo, ValueRef};

use quarry_types::{Cell, QuarryError, Result, Table};

/// Prefix of environment variables that define connections, e.g.
/// `QUARRY_CONN_WAREHOUSE=sqlite:///data/warehouse.db`.
pub const CONN_ENV_PREFIX: &str = "QUARRY_CONN_";

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// Values bound to a query's placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParameters {
    /// Bound in order to `?` placeholders.
    Positional(Vec<Cell>),
    /// Bound by name to `:name`, `@name` or `$name` placeholders.
    Named(BTreeMap<String, Cell>),
}

impl QueryParameters {
    /// Build parameters from a JSON array (positional) or object (named).
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Array(items) => items
                .iter()
                .map(Cell::from_json)
                .collect::<Option<Vec<_>>>()
                .map(QueryParameters::Positional),
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| Cell::from_json(v).map(|c| (k.clone(), c)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(QueryParameters::Named),
            _ => None,
        }
    }

    /// Produce the statement text and values to bind for `sql`.
    ///
    /// Positional parameters leave the query untouched. Named parameters
    /// rewrite every `:name`, `@name` or `$name` placeholder to `?N`, N being
    /// the 1-based first-appearance index of that exact placeholder, so
    /// `:a` and `$a` stay distinct. A map key matches a placeholder either
    /// with its prefix (`":a"`) or bare (`"a"`); the prefixed key wins.
    pub fn bind(&self, sql: &str) -> Result<BoundQuery> {
        match self {
            QueryParameters::Positional(values) => Ok(BoundQuery {
                sql: sql.to_string(),
                values: values.clone(),
            }),
            QueryParameters::Named(map) => {
                let (rewritten, names) = number_placeholders(sql);
                for key in map.keys() {
                    let referenced = names
                        .iter()
                        .any(|n| n == key || &n[1..] == key.as_str());
                    if !referenced {
                        tracing::debug!(parameter = %key, "Parameter not referenced by query");
                    }
                }
                let values = names
                    .into_iter()
                    .map(|name| {
                        map.get(&name)
                            .or_else(|| map.get(&name[1..]))
                            .cloned()
                            .ok_or(QuarryError::MissingParameter { name })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(BoundQuery {
                    sql: rewritten,
                    values,
                })
            }
        }
    }
}

/// Statement text ready for SQLite plus its values in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub values: Vec<Cell>,
}

/// Rewrite named placeholders to numbered `?N` ones, skipping string
/// literals, quoted identifiers and comments. Returns the new text and the
/// placeholder names, prefix included, indexed by `N - 1`.
fn number_placeholders(sql: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let start = i;
        match chars[i] {
            quote @ ('\'' | '"' | '`') => {
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
            }
            ':' | '@' | '$'
                if chars
                    .get(i + 1)
                    .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') =>
            {
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                let index = match names.iter().position(|n| *n == name) {
                    Some(pos) => pos + 1,
                    None => {
                        names.push(name);
                        names.len()
                    }
                };
                out.push_str(&format!("?{index}"));
                continue;
            }
            _ => i += 1,
        }
        out.extend(&chars[start..i.min(chars.len())]);
    }
    (out, names)
}

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// Maps connection ids to database URLs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    urls: BTreeMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(urls: BTreeMap<String, String>) -> Self {
        Self { urls }
    }

    pub fn insert(&mut self, conn_id: impl Into<String>, url: impl Into<String>) {
        self.urls.insert(conn_id.into(), url.into());
    }

    /// Name of the environment variable that overrides `conn_id`.
    pub fn env_var(conn_id: &str) -> String {
        let suffix: String = conn_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{CONN_ENV_PREFIX}{suffix}")
    }

    /// Resolve `conn_id` to a URL. The environment takes precedence over
    /// configured entries.
    pub fn resolve(&self, conn_id: &str) -> Result<String> {
        if let Ok(url) = std::env::var(Self::env_var(conn_id)) {
            if !url.is_empty() {
                return Ok(url);
            }
        }
        self.urls
            .get(conn_id)
            .cloned()
            .ok_or_else(|| QuarryError::UnknownConnection {
                conn_id: conn_id.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// ConnectionProvider
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Run `sql` against the connection named `conn_id` and load every row.
    async fn fetch_table(
        &self,
        conn_id: &str,
        sql: &str,
        parameters: Option<&QueryParameters>,
    ) -> Result<Table>;
}

/// SQLite-backed provider using `sqlx`.
pub struct SqliteConnectionProvider {
    connections: ConnectionConfig,
}

impl SqliteConnectionProvider {
    pub fn new(connections: ConnectionConfig) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl ConnectionProvider for SqliteConnectionProvider {
    async fn fetch_table(
        &self,
        conn_id: &str,
        sql: &str,
        parameters: Option<&QueryParameters>,
    ) -> Result<Table> {
        let url = self.connections.resolve(conn_id)?;
        let query = match parameters {
            Some(p) => p.bind(sql)?,
            None => BoundQuery {
                sql: sql.to_string(),
                values: Vec::new(),
            },
        };

        tracing::debug!(conn_id = %conn_id, params = query.values.len(), "Opening connection");
        let mut conn = SqliteConnection::connect(&url).await?;
        let loaded = read_table(&mut conn, query).await;
        let closed = conn.close().await;
        let table = loaded?;
        closed?;

        tracing::info!(
            conn_id = %conn_id,
            rows = table.row_count(),
            columns = table.column_count(),
            "Loaded query result"
        );
        Ok(table)
    }
}

async fn read_table(conn: &mut SqliteConnection, bound: BoundQuery) -> Result<Table> {
    let statement = (&mut *conn).prepare(&bound.sql).await?;
    let mut table = Table::new(statement.columns().iter().map(|c| c.name().to_string()));

    let mut query = statement.query();
    for value in bound.values {
        query = match value {
            Cell::Null => query.bind(None::<i64>),
            Cell::Bool(b) => query.bind(b),
            Cell::Integer(i) => query.bind(i),
            Cell::Real(f) => query.bind(f),
            Cell::Text(s) => query.bind(s),
            Cell::Blob(b) => query.bind(b),
        };
    }
    let rows = query.fetch_all(&mut *conn).await?;

    for row in &rows {
        let cells = (0..row.len())
            .map(|index| decode_cell(row, index))
            .collect::<Result<Vec<_>>>()?;
        table.push_row(cells)?;
    }
    Ok(table)
}

/// Decode one value by its runtime SQLite storage class.
fn decode_cell(row: &SqliteRow, index: usize) -> Result<Cell> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Cell::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let cell = match type_name.as_str() {
        "INTEGER" => Cell::Integer(row.try_get::<i64, _>(index)?),
        "REAL" => Cell::Real(row.try_get::<f64, _>(index)?),
        "TEXT" => Cell::Text(row.try_get::<String, _>(index)?),
        "BLOB" => Cell::Blob(row.try_get::<Vec<u8>, _>(index)?),
        "BOOLEAN" => Cell::Bool(row.try_get::<bool, _>(index)?),
        _ => {
            return Err(QuarryError::UnsupportedColumnType {
                column: row.column(index).name().to_string(),
                type_name,
            })
        }
    };
    Ok(cell)
}
