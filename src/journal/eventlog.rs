//! Append-only JSONL run journal.

use crate::core::types::{RunEvent, TimestampedEvent};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Journal file name inside the journal directory.
pub const EVENT_LOG: &str = "events.jsonl";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("journal encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Generate an ISO 8601 UTC timestamp.
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_iso8601(secs)
}

fn format_iso8601(secs: u64) -> String {
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    let mut y = 1970i64;
    let mut remaining = days as i64;
    loop {
        let year_days = if is_leap(y) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        y += 1;
    }
    let feb = if is_leap(y) { 29 } else { 28 };
    let month_days = [31, feb, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut m = 12;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md {
            m = i + 1;
            break;
        }
        remaining -= md;
    }
    let d = remaining + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y, m, d, hours, minutes, seconds
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

pub fn event_log_path(journal_dir: &Path) -> PathBuf {
    journal_dir.join(EVENT_LOG)
}

/// Append one event as a JSON line.
pub fn append_event(journal_dir: &Path, event: RunEvent) -> Result<(), JournalError> {
    std::fs::create_dir_all(journal_dir).map_err(|source| JournalError::Io {
        path: journal_dir.to_path_buf(),
        source,
    })?;
    let path = event_log_path(journal_dir);

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te)?;

    let io = |source| JournalError::Io {
        path: path.clone(),
        source,
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io)?;
    writeln!(file, "{}", json).map_err(io)
}

/// Read every event in the journal, oldest first. A missing journal is empty.
pub fn read_events(journal_dir: &Path) -> Result<Vec<TimestampedEvent>, JournalError> {
    let path = event_log_path(journal_dir);
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(JournalError::Io { path, source }),
    };

    let mut events = Vec::new();
    for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| JournalError::Io {
            path: path.clone(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| JournalError::Decode {
            line: i + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Per-run journal writer. Write failures are logged and never abort a run.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: Option<PathBuf>,
    run_id: String,
}

impl Journal {
    /// A journal writing to `dir`, or a no-op journal when `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            run_id: generate_run_id(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&self, event: RunEvent) {
        if let Some(dir) = &self.dir {
            if let Err(e) = append_event(dir, event) {
                warn!(error = %e, "cannot write run journal");
            }
        }
    }
}

/// Summary of the most recent run in a journal.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub recipe: String,
    pub started: String,
    /// `None` while the run has no `run_completed` event (still running or killed)
    pub finished: Option<String>,
    pub succeeded: u32,
    pub skipped: u32,
    /// Index, action and error of the task that aborted the run
    pub failure: Option<(usize, String, String)>,
}

/// Summarize the last run found in `events`.
pub fn last_run(events: &[TimestampedEvent]) -> Option<RunSummary> {
    let start = events
        .iter()
        .rposition(|e| matches!(e.event, RunEvent::RunStarted { .. }))?;

    let mut summary = match &events[start].event {
        RunEvent::RunStarted { run_id, recipe, .. } => RunSummary {
            run_id: run_id.clone(),
            recipe: recipe.clone(),
            started: events[start].ts.clone(),
            finished: None,
            succeeded: 0,
            skipped: 0,
            failure: None,
        },
        _ => return None,
    };

    for te in &events[start + 1..] {
        match &te.event {
            RunEvent::TaskSucceeded { run_id, .. } if *run_id == summary.run_id => {
                summary.succeeded += 1;
            }
            RunEvent::TaskSkipped { run_id, .. } if *run_id == summary.run_id => {
                summary.skipped += 1;
            }
            RunEvent::TaskFailed {
                run_id,
                index,
                action,
                error,
                ..
            } if *run_id == summary.run_id => {
                summary.failure = Some((*index, action.clone(), error.clone()));
            }
            RunEvent::RunCompleted { run_id, .. } if *run_id == summary.run_id => {
                summary.finished = Some(te.ts.clone());
            }
            _ => {}
        }
    }
    Some(summary)
}
