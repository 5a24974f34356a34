//! Recipe, task, context and outcome types.
//!
//! Recipes are YAML documents. Tasks decode leniently: a known action with a
//! missing or mistyped key becomes [`Task::Malformed`] and an unknown action
//! becomes [`Task::Unsupported`], so a single bad entry never prevents the
//! rest of the recipe from loading.

use super::error::TaskError;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Recipe
// ============================================================================

/// A declarative, ordered list of provisioning tasks plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Human-readable recipe name
    pub name: String,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Tasks, executed strictly in declaration order
    #[serde(default)]
    pub tasks: Vec<Task>,
}

// ============================================================================
// Tasks
// ============================================================================

/// One provisioning instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// A recognized action with all of its required keys.
    Known(Action),

    /// An action name this build does not know. Skipped at run time.
    Unsupported {
        action: String,
        params: IndexMap<String, serde_yaml_ng::Value>,
    },

    /// A recognized action whose keys failed to decode. Fatal at run time.
    Malformed {
        action: String,
        detail: String,
        params: IndexMap<String, serde_yaml_ng::Value>,
    },
}

impl Task {
    /// The `action` discriminator as written in the recipe.
    pub fn action_name(&self) -> &str {
        match self {
            Self::Known(a) => a.name(),
            Self::Unsupported { action, .. } | Self::Malformed { action, .. } => action,
        }
    }

    /// Key parameters for progress display, in recipe order.
    pub fn summary(&self) -> Vec<(String, String)> {
        match self {
            Self::Known(a) => a.summary(),
            Self::Unsupported { params, .. } | Self::Malformed { params, .. } => params
                .iter()
                .filter(|(k, _)| k.as_str() != "action")
                .map(|(k, v)| (k.clone(), yaml_value_to_string(v)))
                .collect(),
        }
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let params = IndexMap::<String, serde_yaml_ng::Value>::deserialize(deserializer)?;
        Ok(super::parser::classify_task(params))
    }
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(action) => action.serialize(serializer),
            Self::Unsupported { action, params } | Self::Malformed { action, params, .. } => {
                let extra = params.iter().filter(|(k, _)| k.as_str() != "action");
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("action", action)?;
                for (k, v) in extra {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// Every action the interpreter knows how to execute.
///
/// Unknown keys on a task are ignored so that newer recipes still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Clone a git repository, optionally at a ref, optionally promoting a subpath.
    DownloadGithub {
        src: String,
        #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
        git_ref: Option<String>,
        dest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subpath: Option<String>,
    },
    MovePath {
        src: String,
        dest: String,
    },
    CopyPath {
        src: String,
        dest: String,
        #[serde(default)]
        overwrite: bool,
    },
    DownloadFile {
        url: String,
        path: String,
    },
    Unzip {
        src: String,
        dest: String,
    },
    RemovePath {
        path: String,
    },
    ConnectDatabase {},
    QueryDatabase {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
    },
    EnsureDir {
        path: String,
    },
    WriteFile {
        file: String,
        data: String,
        #[serde(default)]
        append: bool,
    },
    /// Remove every `.git` directory under the deployment root.
    RemoveGit {},
}

impl Action {
    /// Action discriminator, as used in recipes.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DownloadGithub { .. } => "download_github",
            Self::MovePath { .. } => "move_path",
            Self::CopyPath { .. } => "copy_path",
            Self::DownloadFile { .. } => "download_file",
            Self::Unzip { .. } => "unzip",
            Self::RemovePath { .. } => "remove_path",
            Self::ConnectDatabase {} => "connect_database",
            Self::QueryDatabase { .. } => "query_database",
            Self::EnsureDir { .. } => "ensure_dir",
            Self::WriteFile { .. } => "write_file",
            Self::RemoveGit {} => "remove_git",
        }
    }

    /// Key parameters for progress display.
    pub fn summary(&self) -> Vec<(String, String)> {
        let kv = |k: &str, v: &str| (k.to_string(), v.to_string());
        match self {
            Self::DownloadGithub {
                src,
                git_ref,
                dest,
                subpath,
            } => {
                let mut out = vec![kv("src", src)];
                if let Some(r) = git_ref {
                    out.push(kv("ref", r));
                }
                out.push(kv("dest", dest));
                if let Some(s) = subpath {
                    out.push(kv("subpath", s));
                }
                out
            }
            Self::MovePath { src, dest } | Self::Unzip { src, dest } => {
                vec![kv("src", src), kv("dest", dest)]
            }
            Self::CopyPath {
                src,
                dest,
                overwrite,
            } => vec![
                kv("src", src),
                kv("dest", dest),
                kv("overwrite", &overwrite.to_string()),
            ],
            Self::DownloadFile { url, path } => vec![kv("url", url), kv("path", path)],
            Self::RemovePath { path } | Self::EnsureDir { path } => vec![kv("path", path)],
            Self::ConnectDatabase {} | Self::RemoveGit {} => vec![],
            Self::QueryDatabase { file, query } => {
                let mut out = Vec::new();
                if let Some(f) = file {
                    out.push(kv("file", f));
                }
                if let Some(q) = query {
                    out.push(kv("query", &truncate(q, 60)));
                }
                out
            }
            Self::WriteFile { file, data, append } => vec![
                kv("file", file),
                kv("data", &truncate(data, 60)),
                kv("append", &append.to_string()),
            ],
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or_default();
    if first_line.chars().count() > max || first_line.len() < s.trim_end().len() {
        let cut: String = first_line.chars().take(max).collect();
        format!("{}…", cut)
    } else {
        first_line.to_string()
    }
}

// ============================================================================
// Deployment context
// ============================================================================

/// Database backend selected for `connect_database` / `query_database`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SqlDriver {
    #[default]
    Mysql,
    /// `database` names a SQLite file; host/port/user/password are ignored.
    Sqlite,
}

impl fmt::Display for SqlDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mysql => write!(f, "mysql"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Fully resolved database connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct SqlConnectionInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub driver: SqlDriver,
}

impl Default for SqlConnectionInfo {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: String::new(),
            driver: SqlDriver::Mysql,
        }
    }
}

impl fmt::Debug for SqlConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlConnectionInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("driver", &self.driver)
            .finish()
    }
}

/// Where a run writes: the deployment root and the target database.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    /// Absolute deployment root; every task path resolves under it
    pub root: PathBuf,
    pub sql: SqlConnectionInfo,
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of executing one task.
#[derive(Debug)]
pub enum TaskOutcome {
    Success,
    /// Recoverable condition; the run continued.
    SkippedUnsupported(TaskError),
    /// Fatal condition; the run stopped after this task.
    Failed(TaskError),
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "OK",
            Self::SkippedUnsupported(_) => "SKIPPED",
            Self::Failed(_) => "FAILED",
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Self::Success => None,
            Self::SkippedUnsupported(e) | Self::Failed(e) => Some(e),
        }
    }
}

/// One entry of the outcome stream.
#[derive(Debug)]
pub struct TaskReport {
    /// Zero-based position in the recipe
    pub index: usize,
    pub action: String,
    pub params: Vec<(String, String)>,
    pub outcome: TaskOutcome,
    pub duration: Duration,
}

/// Ordered outcomes of a run. Stops at the first fatal failure.
#[derive(Debug)]
pub struct RunReport {
    pub recipe: String,
    pub tasks: Vec<TaskReport>,
    pub total_duration: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Success))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::SkippedUnsupported(_)))
    }

    /// The task that aborted the run, if any.
    pub fn failure(&self) -> Option<&TaskReport> {
        self.tasks
            .iter()
            .find(|t| matches!(t.outcome, TaskOutcome::Failed(_)))
    }

    pub fn is_complete(&self) -> bool {
        self.failure().is_none()
    }

    fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.tasks.iter().filter(|t| pred(&t.outcome)).count()
    }
}

// ============================================================================
// Journal events
// ============================================================================

/// Run journal event, one JSON line each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        recipe: String,
        recipe_hash: String,
        root: String,
        fxdeploy_version: String,
    },
    TaskStarted {
        run_id: String,
        index: usize,
        action: String,
    },
    TaskSucceeded {
        run_id: String,
        index: usize,
        action: String,
        duration_seconds: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
    },
    TaskSkipped {
        run_id: String,
        index: usize,
        action: String,
        kind: String,
        reason: String,
    },
    TaskFailed {
        run_id: String,
        index: usize,
        action: String,
        kind: String,
        error: String,
    },
    RunCompleted {
        run_id: String,
        succeeded: u32,
        skipped: u32,
        #[serde(default)]
        aborted_at: Option<usize>,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Render a YAML scalar for display.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
