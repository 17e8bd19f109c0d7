//! `quarry.toml` configuration.
//!
//! ```toml
//! template_search_path = ["sql", "suites"]
//!
//! [connections]
//! warehouse = "sqlite://warehouse.db"
//!
//! [retry]
//! max_retries = 2
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quarry_types::{QuarryError, Result};

use crate::connection::ConnectionConfig;
use crate::retry::BackoffPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "quarry.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    /// Connection id -> database URL.
    pub connections: BTreeMap<String, String>,
    /// Directories searched for `.sql` / `.json` template files. Relative
    /// entries are resolved against the config file's directory.
    pub template_search_path: Vec<PathBuf>,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Default extra attempts for tasks that don't set `retries`.
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        if self.base_delay_ms == 0 {
            return BackoffPolicy::None;
        }
        BackoffPolicy::Exponential {
            base: Duration::from_millis(self.base_delay_ms),
            max: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
        }
    }
}

impl QuarryConfig {
    pub fn from_toml(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| QuarryError::Config(e.to_string()))
    }

    /// Load a config file. Relative search path entries are anchored at the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| QuarryError::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::from_toml(&text)?;
        if let Some(base) = path.parent() {
            config.template_search_path = config
                .template_search_path
                .into_iter()
                .map(|p| if p.is_relative() { base.join(p) } else { p })
                .collect();
        }
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load `path` if given (it must exist), else `quarry.toml` in the working
    /// directory if present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.connections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = QuarryConfig::from_toml(
            r#"
            template_search_path = ["sql"]

            [connections]
            warehouse = "sqlite://warehouse.db"

            [retry]
            max_retries = 2
            base_delay_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(
            config.connections.get("warehouse").map(String::as_str),
            Some("sqlite://warehouse.db")
        );
        assert_eq!(config.template_search_path, vec![PathBuf::from("sql")]);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(
            config.retry.backoff(),
            BackoffPolicy::Exponential {
                base: Duration::from_millis(100),
                max: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = QuarryConfig::from_toml("").unwrap();
        assert_eq!(config, QuarryConfig::default());
        assert!(config.connections.is_empty());
    }

    #[test]
    fn zero_base_delay_disables_backoff() {
        let retry = RetryConfig {
            base_delay_ms: 0,
            ..RetryConfig::default()
        };
        assert_eq!(retry.backoff(), BackoffPolicy::None);
    }

    #[test]
    fn malformed_config_is_config_error() {
        let err = QuarryConfig::from_toml("connections = 3").unwrap_err();
        assert!(matches!(err, QuarryError::Config(_)));
    }

    #[test]
    fn load_anchors_search_path_at_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarry.toml");
        std::fs::write(&path, "template_search_path = [\"sql\", \"/abs\"]\n").unwrap();
        let config = QuarryConfig::load(&path).unwrap();
        assert_eq!(
            config.template_search_path,
            vec![dir.path().join("sql"), PathBuf::from("/abs")]
        );
    }

    #[test]
    fn load_missing_explicit_file_errors() {
        let err = QuarryConfig::load_or_default(Some(Path::new("/no/such/quarry.toml")))
            .unwrap_err();
        assert!(matches!(err, QuarryError::Config(_)));
    }
}
