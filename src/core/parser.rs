//! Recipe YAML parsing and validation.
//!
//! Parsing never rejects a recipe because of one bad task. Validation then
//! reports:
//! - Empty recipe name (error)
//! - Malformed known actions (error: they abort a run)
//! - Unknown actions (warning: they are skipped at run time)

use super::error::LoadError;
use super::types::*;
use indexmap::IndexMap;
use std::path::Path;

/// Action names understood by the interpreter.
pub const KNOWN_ACTIONS: &[&str] = &[
    "download_github",
    "move_path",
    "copy_path",
    "download_file",
    "unzip",
    "remove_path",
    "connect_database",
    "query_database",
    "ensure_dir",
    "write_file",
    "remove_git",
];

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Validation finding.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub severity: Severity,
    /// Task index, when the finding concerns a single task
    pub task: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.task {
            Some(i) => write!(f, "task #{}: {}", i + 1, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Decode one raw task mapping into a [`Task`].
pub fn classify_task(params: IndexMap<String, serde_yaml_ng::Value>) -> Task {
    let action = match params.get("action") {
        Some(serde_yaml_ng::Value::String(s)) => s.clone(),
        Some(other) => {
            return Task::Malformed {
                action: yaml_value_to_string(other),
                detail: "`action` must be a string".to_string(),
                params,
            }
        }
        None => {
            return Task::Malformed {
                action: String::new(),
                detail: "missing field `action`".to_string(),
                params,
            }
        }
    };

    if !KNOWN_ACTIONS.contains(&action.as_str()) {
        return Task::Unsupported { action, params };
    }

    let mapping: serde_yaml_ng::Mapping = params
        .iter()
        .map(|(k, v)| (serde_yaml_ng::Value::String(k.clone()), v.clone()))
        .collect();
    match serde_yaml_ng::from_value::<Action>(serde_yaml_ng::Value::Mapping(mapping)) {
        Ok(known) => Task::Known(known),
        Err(e) => Task::Malformed {
            action,
            detail: e.to_string(),
            params,
        },
    }
}

/// Parse a recipe file from disk.
pub fn parse_recipe_file(path: &Path) -> Result<Recipe, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_recipe(&content)
}

/// Parse a recipe from a YAML string.
pub fn parse_recipe(yaml: &str) -> Result<Recipe, LoadError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| LoadError::Parse(e.to_string()))
}

/// Validate a parsed recipe. Returns all findings (empty = clean).
pub fn validate_recipe(recipe: &Recipe) -> Vec<ValidationError> {
    let mut findings = Vec::new();

    if recipe.name.trim().is_empty() {
        findings.push(ValidationError {
            severity: Severity::Error,
            task: None,
            message: "name must not be empty".to_string(),
        });
    }

    if recipe.tasks.is_empty() {
        findings.push(ValidationError {
            severity: Severity::Warning,
            task: None,
            message: "recipe has no tasks".to_string(),
        });
    }

    for (i, task) in recipe.tasks.iter().enumerate() {
        match task {
            Task::Known(Action::QueryDatabase { file: None, query: None }) => {
                findings.push(ValidationError {
                    severity: Severity::Warning,
                    task: Some(i),
                    message: "query_database has neither `file` nor `query` and will be skipped"
                        .to_string(),
                });
            }
            Task::Known(_) => {}
            Task::Unsupported { action, .. } => findings.push(ValidationError {
                severity: Severity::Warning,
                task: Some(i),
                message: format!("unsupported action '{}' will be skipped", action),
            }),
            Task::Malformed { action, detail, .. } => findings.push(ValidationError {
                severity: Severity::Error,
                task: Some(i),
                message: format!("{}: {}", action, detail),
            }),
        }
    }

    findings
}

/// True when no finding is an error.
pub fn is_runnable(findings: &[ValidationError]) -> bool {
    findings.iter().all(|f| f.severity != Severity::Error)
}
