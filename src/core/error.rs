//! Task error taxonomy and the recoverable/fatal classification.
//!
//! Every handler reports failure as a [`TaskError`]. The interpreter never
//! inspects handler internals: [`TaskError::is_recoverable`] alone decides
//! whether the run skips the task or stops.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A task path normalizes to a location outside the deployment root.
    #[error("path '{path}' escapes the deployment root")]
    PathEscape { path: String },

    /// The recipe names an action this build does not know.
    /// A destructive task names the deployment root itself.
    #[error("path '{path}' is the deployment root itself")]
    RootTarget { path: String },

    #[error("unsupported action '{action}'")]
    UnsupportedAction { action: String },

    #[error("unsupported archive format: {}", path.display())]
    UnsupportedArchiveFormat { path: PathBuf },

    /// A known action is missing a key it needs, or a key has the wrong type.
    #[error("{action}: {detail}")]
    MissingRequiredField { action: String, detail: String },

    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    #[error("git clone of {src} failed: {detail}")]
    VcsFailure { src: String, detail: String },

    #[error("download of {url} failed: {detail}")]
    TransportFailure { url: String, detail: String },

    #[error("database connection failed: {0}")]
    DatabaseConnectionFailure(String),

    #[error("database statement failed: {0}")]
    DatabaseStatementFailure(String),

    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `query_database` without either a `file` or a `query`.
    #[error("query_database has neither `file` nor `query`")]
    EmptyQuery,

    #[error("cannot extract {}: {detail}", path.display())]
    ArchiveFailure { path: PathBuf, detail: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TaskError {
    /// Whether the interpreter logs and continues instead of aborting.
    ///
    /// `VcsFailure` is recoverable while `TransportFailure` is fatal. The
    /// asymmetry is kept for compatibility with existing recipes.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedAction { .. }
                | Self::UnsupportedArchiveFormat { .. }
                | Self::DestinationExists { .. }
                | Self::VcsFailure { .. }
                | Self::EmptyQuery
        )
    }

    /// Stable snake_case name of the error kind, used in the run journal.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathEscape { .. } => "path_escape",
            Self::RootTarget { .. } => "root_target",
            Self::UnsupportedAction { .. } => "unsupported_action",
            Self::UnsupportedArchiveFormat { .. } => "unsupported_archive_format",
            Self::MissingRequiredField { .. } => "missing_required_field",
            Self::SourceNotFound { .. } => "source_not_found",
            Self::DestinationExists { .. } => "destination_exists",
            Self::VcsFailure { .. } => "vcs_failure",
            Self::TransportFailure { .. } => "transport_failure",
            Self::DatabaseConnectionFailure(_) => "database_connection_failure",
            Self::DatabaseStatementFailure(_) => "database_statement_failure",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::EmptyQuery => "empty_query",
            Self::ArchiveFailure { .. } => "archive_failure",
            Self::Io { .. } => "io",
        }
    }

    /// Wrap an I/O error, promoting `PermissionDenied` to its own kind.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path, source },
            std::io::ErrorKind::NotFound => Self::SourceNotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Failure to load a recipe or deployment configuration before a run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("recipe parse error: {0}")]
    Parse(String),

    #[error("cannot fetch recipe: {0}")]
    Fetch(#[from] TaskError),

    #[error("invalid deploy file: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recoverable_table() {
        let recoverable = [
            TaskError::UnsupportedAction {
                action: "frobnicate".into(),
            },
            TaskError::UnsupportedArchiveFormat {
                path: "a.rar".into(),
            },
            TaskError::DestinationExists { path: "c".into() },
            TaskError::EmptyQuery,
        ];
        for e in &recoverable {
            assert!(e.is_recoverable(), "{} should be recoverable", e.kind());
        }

        let fatal = [
            TaskError::PathEscape { path: "..".into() },
            TaskError::RootTarget { path: ".".into() },
            TaskError::SourceNotFound { path: "x".into() },
            TaskError::MissingRequiredField {
                action: "move_path".into(),
                detail: "missing field `src`".into(),
            },
            TaskError::DatabaseConnectionFailure("refused".into()),
            TaskError::DatabaseStatementFailure("syntax".into()),
            TaskError::ArchiveFailure {
                path: "a.zip".into(),
                detail: "bad magic".into(),
            },
        ];
        for e in &fatal {
            assert!(!e.is_recoverable(), "{} should be fatal", e.kind());
        }
    }

    /// Clone failures skip the task, download failures abort the run. This
    /// mirrors the deployer's historical behavior and is intentional.
    #[test]
    fn test_error_vcs_recoverable_but_transport_fatal() {
        let vcs = TaskError::VcsFailure {
            src: "https://example.invalid/repo.git".into(),
            detail: "exit status 128".into(),
        };
        let transport = TaskError::TransportFailure {
            url: "https://example.invalid/file".into(),
            detail: "HTTP 404".into(),
        };
        assert!(vcs.is_recoverable());
        assert!(!transport.is_recoverable());
    }

    #[test]
    fn test_error_io_promotes_kinds() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(TaskError::io("/x", denied).kind(), "permission_denied");

        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(TaskError::io("/x", missing).kind(), "source_not_found");

        let other = std::io::Error::other("disk on fire");
        let e = TaskError::io("/x", other);
        assert_eq!(e.kind(), "io");
        assert!(e.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_error_display_mentions_path() {
        let e = TaskError::PathEscape {
            path: "../../etc/passwd".into(),
        };
        assert!(e.to_string().contains("../../etc/passwd"));
        assert!(e.to_string().contains("escapes"));
    }
}
