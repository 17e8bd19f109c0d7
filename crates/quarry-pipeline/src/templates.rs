//! Template-field resolution.
//!
//! Before a task executes, every parameter it lists in
//! [`Task::template_fields`](crate::task::Task::template_fields) is rendered:
//! a value ending in one of the task's template extensions is replaced by the
//! contents of that file (looked up along the search path), and `${var}`
//! references are then expanded from the run variables.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use quarry_types::{QuarryError, Result};

use crate::task::TaskSpec;

/// Expand `${variable}` patterns in a string.
///
/// Unknown variables are left as-is. Substituted values are not re-scanned.
pub fn expand_variables(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match vars.get(key) {
                    Some(value) => result.push_str(value),
                    None => result.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

/// Flatten context values into template variables. Strings are used verbatim,
/// everything else is rendered as JSON.
pub fn vars_from_context(values: &HashMap<String, serde_json::Value>) -> HashMap<String, String> {
    values
        .iter()
        .map(|(k, v)| {
            let rendered = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), rendered)
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct TemplateResolver {
    search_path: Vec<PathBuf>,
}

impl TemplateResolver {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    /// Locate a template file. Absolute paths are used as given; relative ones
    /// are tried against each search path entry, then the working directory.
    pub fn locate(&self, reference: &str) -> Result<PathBuf> {
        let path = Path::new(reference);
        if path.is_absolute() {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
        } else {
            for dir in &self.search_path {
                let candidate = dir.join(path);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
        }
        Err(QuarryError::TemplateNotFound {
            path: reference.to_string(),
        })
    }

    /// Render a single templated value.
    pub async fn resolve_field(
        &self,
        value: &str,
        extensions: &[&str],
        vars: &HashMap<String, String>,
    ) -> Result<String> {
        let trimmed = value.trim();
        let source = if extensions.iter().any(|ext| trimmed.ends_with(ext)) {
            let path = self.locate(trimmed)?;
            tracing::debug!(path = %path.display(), "Loading template file");
            tokio::fs::read_to_string(&path).await?
        } else {
            value.to_string()
        };
        Ok(expand_variables(&source, vars))
    }

    /// Render every listed field of `spec` in place. Fields that are absent or
    /// not strings are left untouched.
    pub async fn resolve_params(
        &self,
        spec: &mut TaskSpec,
        fields: &[&str],
        extensions: &[&str],
        vars: &HashMap<String, String>,
    ) -> Result<()> {
        let mut rendered = BTreeMap::new();
        for field in fields {
            if let Some(serde_json::Value::String(raw)) = spec.params.get(*field) {
                let value = self.resolve_field(raw, extensions, vars).await?;
                rendered.insert(field.to_string(), serde_json::Value::String(value));
            }
        }
        spec.params.extend(rendered);
        Ok(())
    }
}
