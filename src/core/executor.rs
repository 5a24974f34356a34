//! Recipe interpreter: runs tasks strictly in order against one deployment
//! root.
//!
//! Each task resolves every path it touches before mutating anything. A
//! handler error is either recoverable (the task is reported as skipped and
//! the run continues) or fatal (the run stops; earlier side effects stay).

use super::error::TaskError;
use super::paths::PathResolver;
use super::types::*;
use crate::journal::eventlog::Journal;
use crate::journal::hasher;
use crate::resources::database::{self, DatabaseGateway};
use crate::resources::{archive, fs, vcs};
use crate::resources::vcs::Vcs;
use crate::transport::Transport;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// External capabilities the handlers call out to.
pub struct Toolbox<'a> {
    pub vcs: &'a dyn Vcs,
    pub transport: &'a dyn Transport,
    pub database: &'a dyn DatabaseGateway,
}

/// Configuration for one run.
pub struct RunConfig<'a> {
    pub context: &'a DeploymentContext,
    pub tools: Toolbox<'a>,
    /// Directory for `events.jsonl`; `None` disables the journal
    pub journal_dir: Option<PathBuf>,
}

/// Receives the per-task outcome stream as the run progresses.
pub trait RunObserver {
    fn task_started(&mut self, _index: usize, _total: usize, _task: &Task) {}
    fn task_finished(&mut self, _report: &TaskReport) {}
}

/// Observer that ignores everything.
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Execute `recipe`. Only an unusable deployment root is an `Err`; task
/// failures are reported inside the [`RunReport`].
pub fn run_recipe(
    recipe: &Recipe,
    cfg: &RunConfig,
    observer: &mut dyn RunObserver,
) -> Result<RunReport, TaskError> {
    let resolver = PathResolver::new(&cfg.context.root)?;
    let journal = Journal::new(cfg.journal_dir.clone());
    let run_id = journal.run_id().to_string();
    let run_start = Instant::now();

    let recipe_yaml = serde_yaml_ng::to_string(recipe).unwrap_or_default();
    journal.record(RunEvent::RunStarted {
        run_id: run_id.clone(),
        recipe: recipe.name.clone(),
        recipe_hash: hasher::hash_string(&recipe_yaml),
        root: resolver.root().display().to_string(),
        fxdeploy_version: env!("CARGO_PKG_VERSION").to_string(),
    });
    info!(recipe = %recipe.name, root = %resolver.root().display(), tasks = recipe.tasks.len(), "run started");

    let total = recipe.tasks.len();
    let mut reports = Vec::with_capacity(total);

    for (index, task) in recipe.tasks.iter().enumerate() {
        observer.task_started(index, total, task);
        journal.record(RunEvent::TaskStarted {
            run_id: run_id.clone(),
            index,
            action: task.action_name().to_string(),
        });

        let task_start = Instant::now();
        let result = execute_task(task, &resolver, cfg);
        let duration = task_start.elapsed();

        let (outcome, digest) = match result {
            Ok(digest) => (TaskOutcome::Success, digest),
            Err(e) if e.is_recoverable() => (TaskOutcome::SkippedUnsupported(e), None),
            Err(e) => (TaskOutcome::Failed(e), None),
        };

        journal.record(task_event(&run_id, index, task, &outcome, duration.as_secs_f64(), digest));
        match &outcome {
            TaskOutcome::Success => info!(index, action = task.action_name(), "task ok"),
            TaskOutcome::SkippedUnsupported(e) => {
                warn!(index, action = task.action_name(), error = %e, "task skipped")
            }
            TaskOutcome::Failed(e) => {
                error!(index, action = task.action_name(), error = %e, "task failed, stopping run")
            }
        }

        let stop = matches!(outcome, TaskOutcome::Failed(_));
        let report = TaskReport {
            index,
            action: task.action_name().to_string(),
            params: task.summary(),
            outcome,
            duration,
        };
        observer.task_finished(&report);
        reports.push(report);
        if stop {
            break;
        }
    }

    let report = RunReport {
        recipe: recipe.name.clone(),
        tasks: reports,
        total_duration: run_start.elapsed(),
    };
    journal.record(RunEvent::RunCompleted {
        run_id,
        succeeded: count_u32(report.succeeded()),
        skipped: count_u32(report.skipped()),
        aborted_at: report.failure().map(|t| t.index),
        total_seconds: report.total_duration.as_secs_f64(),
    });
    info!(
        succeeded = report.succeeded(),
        skipped = report.skipped(),
        complete = report.is_complete(),
        "run finished"
    );
    Ok(report)
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn task_event(
    run_id: &str,
    index: usize,
    task: &Task,
    outcome: &TaskOutcome,
    duration_seconds: f64,
    digest: Option<String>,
) -> RunEvent {
    let run_id = run_id.to_string();
    let action = task.action_name().to_string();
    match outcome {
        TaskOutcome::Success => RunEvent::TaskSucceeded {
            run_id,
            index,
            action,
            duration_seconds,
            digest,
        },
        TaskOutcome::SkippedUnsupported(e) => RunEvent::TaskSkipped {
            run_id,
            index,
            action,
            kind: e.kind().to_string(),
            reason: e.to_string(),
        },
        TaskOutcome::Failed(e) => RunEvent::TaskFailed {
            run_id,
            index,
            action,
            kind: e.kind().to_string(),
            error: e.to_string(),
        },
    }
}

/// Run one task. `Ok` carries an optional content digest for the journal.
fn execute_task(
    task: &Task,
    resolver: &PathResolver,
    cfg: &RunConfig,
) -> Result<Option<String>, TaskError> {
    match task {
        Task::Known(action) => execute_action(action, resolver, cfg),
        Task::Unsupported { action, .. } => Err(TaskError::UnsupportedAction {
            action: action.clone(),
        }),
        Task::Malformed { action, detail, .. } => Err(TaskError::MissingRequiredField {
            action: action.clone(),
            detail: detail.clone(),
        }),
    }
}

fn execute_action(
    action: &Action,
    resolver: &PathResolver,
    cfg: &RunConfig,
) -> Result<Option<String>, TaskError> {
    let tools = &cfg.tools;
    let sql = &cfg.context.sql;

    match action {
        Action::DownloadGithub {
            src,
            git_ref,
            dest,
            subpath,
        } => {
            let dest_abs = resolver.resolve(dest)?;
            let sub_abs = match subpath {
                Some(sp) => Some(resolver.resolve(Path::new(dest).join(sp))?),
                None => None,
            };
            tools.vcs.clone_repo(src, git_ref.as_deref(), &dest_abs)?;
            if let Some(sub) = sub_abs {
                vcs::promote_subpath(&dest_abs, &sub)?;
            }
        }
        Action::MovePath { src, dest } => {
            let (src, dest) = (resolver.resolve_entry(src)?, resolver.resolve(dest)?);
            fs::move_path(&src, &dest)?;
        }
        Action::CopyPath {
            src,
            dest,
            overwrite,
        } => {
            let (src, dest) = (resolver.resolve(src)?, resolver.resolve_entry(dest)?);
            fs::copy_path(&src, &dest, *overwrite)?;
        }
        Action::DownloadFile { url, path } => {
            let path = resolver.resolve(path)?;
            tools.transport.download(url, &path)?;
            return Ok(hasher::hash_file(&path).ok());
        }
        Action::Unzip { src, dest } => {
            let (src, dest) = (resolver.resolve(src)?, resolver.resolve(dest)?);
            archive::extract(&src, &dest)?;
        }
        Action::RemovePath { path } => {
            fs::remove_path(&resolver.resolve_entry(path)?)?;
        }
        Action::ConnectDatabase {} => {
            database::check_connection(tools.database, sql)?;
        }
        Action::QueryDatabase { file, query } => {
            let file = match file {
                Some(f) => Some(resolver.resolve(f)?),
                None => None,
            };
            database::run_query(tools.database, sql, file.as_deref(), query.as_deref())?;
        }
        Action::EnsureDir { path } => {
            fs::ensure_dir(&resolver.resolve(path)?)?;
        }
        Action::WriteFile { file, data, append } => {
            fs::write_file(&resolver.resolve(file)?, data, *append)?;
        }
        Action::RemoveGit {} => {
            let removed = fs::remove_git(resolver.root())?;
            info!(removed, "removed .git directories");
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_recipe;
    use crate::resources::database::SqliteGateway;

    struct FakeVcs {
        fail: bool,
        files: Vec<(&'static str, &'static str)>,
    }

    impl Vcs for FakeVcs {
        fn clone_repo(&self, src: &str, _git_ref: Option<&str>, dest: &Path) -> Result<(), TaskError> {
            if self.fail {
                return Err(TaskError::VcsFailure {
                    src: src.to_string(),
                    detail: "exit status: 128".to_string(),
                });
            }
            for (rel, body) in &self.files {
                let p = dest.join(rel);
                std::fs::create_dir_all(p.parent().unwrap()).unwrap();
                std::fs::write(p, body).unwrap();
            }
            Ok(())
        }
    }

    /// Serves a fixed body for every URL unless the URL contains "404".
    struct FakeTransport {
        body: &'static str,
    }

    impl Transport for FakeTransport {
        fn download(&self, url: &str, dest: &Path) -> Result<u64, TaskError> {
            if url.contains("404") {
                return Err(TaskError::TransportFailure {
                    url: url.to_string(),
                    detail: "HTTP 404 Not Found".to_string(),
                });
            }
            std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
            std::fs::write(dest, self.body).unwrap();
            Ok(self.body.len() as u64)
        }
    }

    #[derive(Default)]
    struct Recorder {
        started: Vec<(usize, usize)>,
        finished: Vec<(usize, &'static str)>,
    }

    impl RunObserver for Recorder {
        fn task_started(&mut self, index: usize, total: usize, _task: &Task) {
            self.started.push((index, total));
        }
        fn task_finished(&mut self, report: &TaskReport) {
            self.finished.push((report.index, report.outcome.label()));
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        vcs: FakeVcs,
        transport: FakeTransport,
        database: SqliteGateway,
        context: DeploymentContext,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_vcs(FakeVcs {
                fail: false,
                files: vec![],
            })
        }

        fn with_vcs(vcs: FakeVcs) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("deploy");
            std::fs::create_dir_all(&root).unwrap();
            let context = DeploymentContext {
                root: root.clone(),
                sql: SqlConnectionInfo {
                    database: "server.db".into(),
                    driver: SqlDriver::Sqlite,
                    ..SqlConnectionInfo::default()
                },
            };
            Self {
                database: SqliteGateway::new(&root),
                dir,
                vcs,
                transport: FakeTransport { body: "artifact" },
                context,
            }
        }

        fn root(&self) -> &Path {
            &self.context.root
        }

        fn journal(&self) -> PathBuf {
            self.dir.path().join("journal")
        }

        fn run(&self, yaml: &str) -> RunReport {
            let recipe = parse_recipe(yaml).unwrap();
            let cfg = RunConfig {
                context: &self.context,
                tools: Toolbox {
                    vcs: &self.vcs,
                    transport: &self.transport,
                    database: &self.database,
                },
                journal_dir: Some(self.journal()),
            };
            run_recipe(&recipe, &cfg, &mut SilentObserver).unwrap()
        }
    }

    fn labels(report: &RunReport) -> Vec<&'static str> {
        report.tasks.iter().map(|t| t.outcome.label()).collect()
    }

    const WRITE_AND_COPY: &str = r#"
name: scenario
tasks:
  - action: ensure_dir
    path: a
  - action: write_file
    file: a/b.txt
    data: hi
  - action: copy_path
    src: a/b.txt
    dest: c/b.txt
    overwrite: false
"#;

    #[test]
    fn test_executor_write_and_copy_scenario() {
        let h = Harness::new();
        let report = h.run(WRITE_AND_COPY);
        assert_eq!(labels(&report), vec!["OK", "OK", "OK"]);
        assert_eq!(std::fs::read_to_string(h.root().join("a/b.txt")).unwrap(), "hi");
        assert_eq!(std::fs::read_to_string(h.root().join("c/b.txt")).unwrap(), "hi");
    }

    #[test]
    fn test_executor_second_run_skips_existing_copy() {
        let h = Harness::new();
        h.run(WRITE_AND_COPY);
        let report = h.run(WRITE_AND_COPY);
        assert!(report.is_complete());
        assert_eq!(labels(&report), vec!["OK", "OK", "SKIPPED"]);
        let err = report.tasks[2].outcome.error().unwrap();
        assert!(matches!(err, TaskError::DestinationExists { .. }));
    }

    #[test]
    fn test_executor_unknown_action_skipped() {
        let h = Harness::new();
        let report = h.run(
            r#"
name: t
tasks:
  - action: frobnicate
    with: whatever
  - action: ensure_dir
    path: after
"#,
        );
        assert_eq!(labels(&report), vec!["SKIPPED", "OK"]);
        assert!(h.root().join("after").is_dir());
        assert_eq!(report.skipped(), 1);
    }

    #[test]
    fn test_executor_empty_query_skipped() {
        let h = Harness::new();
        let report = h.run(
            r#"
name: t
tasks:
  - action: query_database
  - action: ensure_dir
    path: next
"#,
        );
        assert_eq!(labels(&report), vec!["SKIPPED", "OK"]);
    }

    #[test]
    fn test_executor_fatal_stops_and_keeps_prior_effects() {
        let h = Harness::new();
        let report = h.run(
            r#"
name: t
tasks:
  - action: write_file
    file: kept.txt
    data: kept
  - action: move_path
    src: ghost
    dest: elsewhere
  - action: ensure_dir
    path: never
"#,
        );
        assert_eq!(labels(&report), vec!["OK", "FAILED"]);
        let failure = report.failure().unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.action, "move_path");
        assert!(matches!(
            failure.outcome.error(),
            Some(TaskError::SourceNotFound { .. })
        ));
        assert!(h.root().join("kept.txt").exists());
        assert!(!h.root().join("never").exists());
    }

    #[test]
    fn test_executor_malformed_task_is_fatal() {
        let h = Harness::new();
        let report = h.run(
            r#"
name: t
tasks:
  - action: unzip
    src: a.zip
  - action: ensure_dir
    path: never
"#,
        );
        assert_eq!(labels(&report), vec!["FAILED"]);
        assert_eq!(
            report.failure().unwrap().outcome.error().unwrap().kind(),
            "missing_required_field"
        );
    }

    #[test]
    fn test_executor_path_escape_rejected_before_mutation() {
        let h = Harness::new();
        let outside = h.dir.path().join("outside.txt");
        let report = h.run(
            r#"
name: t
tasks:
  - action: write_file
    file: ../outside.txt
    data: pwned
"#,
        );
        assert_eq!(labels(&report), vec!["FAILED"]);
        assert!(matches!(
            report.tasks[0].outcome.error(),
            Some(TaskError::PathEscape { .. })
        ));
        assert!(!outside.exists());
    }

    #[test]
    fn test_executor_remove_root_refused() {
        let h = Harness::new();
        std::fs::write(h.root().join("server.cfg"), "cfg").unwrap();
        let report = h.run(
            r#"
name: t
tasks:
  - action: remove_path
    path: .
  - action: ensure_dir
    path: never
"#,
        );
        assert_eq!(labels(&report), vec!["FAILED"]);
        assert_eq!(report.tasks[0].outcome.error().unwrap().kind(), "root_target");
        assert!(h.root().join("server.cfg").exists());
    }

    #[test]
    fn test_executor_move_into_existing_directory() {
        let h = Harness::new();
        let report = h.run(
            r#"
name: t
tasks:
  - action: write_file
    file: tmp/oxmysql.lua
    data: lua
  - action: ensure_dir
    path: resources
  - action: move_path
    src: tmp/oxmysql.lua
    dest: resources
"#,
        );
        assert!(report.is_complete());
        assert!(h.root().join("resources/oxmysql.lua").is_file());
    }

    #[test]
    fn test_executor_copy_escape_leaves_source_untouched() {
        let h = Harness::new();
        std::fs::write(h.root().join("src.txt"), "s").unwrap();
        let report = h.run(
            r#"
name: t
tasks:
  - action: move_path
    src: src.txt
    dest: ../../stolen.txt
"#,
        );
        assert!(!report.is_complete());
        assert!(h.root().join("src.txt").exists());
    }

    /// Clone failures are skipped while download failures abort the run.
    /// Deliberate: existing recipes rely on optional repositories.
    #[test]
    fn test_executor_vcs_failure_skips_but_download_failure_aborts() {
        let h = Harness::with_vcs(FakeVcs {
            fail: true,
            files: vec![],
        });
        let report = h.run(
            r#"
name: t
tasks:
  - action: download_github
    src: https://github.com/example/missing
    dest: resources/missing
  - action: download_file
    url: https://example.invalid/404/file.zip
    path: tmp/file.zip
  - action: ensure_dir
    path: never
"#,
        );
        assert_eq!(labels(&report), vec!["SKIPPED", "FAILED"]);
        assert_eq!(report.failure().unwrap().index, 1);
    }

    #[test]
    fn test_executor_download_github_with_subpath() {
        let h = Harness::with_vcs(FakeVcs {
            fail: false,
            files: vec![
                ("LICENSE", "mit"),
                ("txData/QBCoreFramework/server.cfg", "cfg"),
                ("txData/QBCoreFramework/resources/.keep", ""),
            ],
        });
        let report = h.run(
            r#"
name: t
tasks:
  - action: download_github
    src: https://github.com/qbcore-framework/txAdminRecipe
    ref: main
    dest: ./tmp/recipe
    subpath: txData/QBCoreFramework
"#,
        );
        assert!(report.is_complete());
        let dest = h.root().join("tmp/recipe");
        assert_eq!(std::fs::read_to_string(dest.join("server.cfg")).unwrap(), "cfg");
        assert!(dest.join("resources/.keep").exists());
        assert!(!dest.join("txData/QBCoreFramework").exists());
    }

    #[test]
    fn test_executor_download_github_without_subpath_keeps_tree() {
        let h = Harness::with_vcs(FakeVcs {
            fail: false,
            files: vec![("a/b/c.txt", "c")],
        });
        let report = h.run(
            r#"
name: t
tasks:
  - action: download_github
    src: https://github.com/x/y
    dest: resources/y
"#,
        );
        assert!(report.is_complete());
        assert!(h.root().join("resources/y/a/b/c.txt").exists());
    }

    #[test]
    fn test_executor_subpath_escape_is_fatal() {
        let h = Harness::new();
        let report = h.run(
            r#"
name: t
tasks:
  - action: download_github
    src: https://github.com/x/y
    dest: r
    subpath: ../../..
"#,
        );
        assert!(matches!(
            report.tasks[0].outcome,
            TaskOutcome::Failed(TaskError::PathEscape { .. })
        ));
    }

    #[test]
    fn test_executor_download_file_records_digest() {
        let h = Harness::new();
        let report = h.run(
            r#"
name: t
tasks:
  - action: download_file
    url: https://example.invalid/artifact.bin
    path: tmp/artifact.bin
"#,
        );
        assert!(report.is_complete());
        assert_eq!(
            std::fs::read_to_string(h.root().join("tmp/artifact.bin")).unwrap(),
            "artifact"
        );
        let events = crate::journal::eventlog::read_events(&h.journal()).unwrap();
        let digest = events.iter().find_map(|e| match &e.event {
            RunEvent::TaskSucceeded { digest, .. } => digest.clone(),
            _ => None,
        });
        assert_eq!(digest, Some(hasher::hash_string("artifact")));
    }

    #[test]
    fn test_executor_sqlite_query_from_file() {
        let h = Harness::new();
        let report = h.run(
            r#"
name: t
tasks:
  - action: write_file
    file: sql/schema.sql
    data: "CREATE TABLE users (id INTEGER); INSERT INTO users VALUES (1);"
  - action: connect_database
  - action: query_database
    file: sql/schema.sql
  - action: query_database
    query: "INSERT INTO users VALUES (2);"
"#,
        );
        assert_eq!(labels(&report), vec!["OK", "OK", "OK", "OK"]);
        let conn = rusqlite::Connection::open(h.root().join("server.db")).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_executor_unzip_and_remove_git() {
        let h = Harness::new();
        let zip_path = h.root().join("bundle.zip");
        {
            use std::io::Write;
            let mut w = zip::ZipWriter::new(std::fs::File::create(&zip_path).unwrap());
            let opts = zip::write::SimpleFileOptions::default();
            w.start_file("pkg/.git/HEAD", opts).unwrap();
            w.write_all(b"ref: main").unwrap();
            w.start_file("pkg/init.lua", opts).unwrap();
            w.write_all(b"-- init").unwrap();
            w.finish().unwrap();
        }
        let report = h.run(
            r#"
name: t
tasks:
  - action: unzip
    src: bundle.zip
    dest: resources
  - action: remove_path
    path: bundle.zip
  - action: remove_git
  - action: unzip
    src: weird.rar
    dest: resources
"#,
        );
        assert_eq!(labels(&report), vec!["OK", "OK", "OK", "SKIPPED"]);
        assert!(h.root().join("resources/pkg/init.lua").exists());
        assert!(!h.root().join("resources/pkg/.git").exists());
        assert!(!zip_path.exists());
    }

    #[test]
    fn test_executor_journal_events() {
        let h = Harness::new();
        h.run(
            r#"
name: journaled
tasks:
  - action: ensure_dir
    path: a
  - action: frobnicate
  - action: remove_path
    path: ghost
"#,
        );
        let events = crate::journal::eventlog::read_events(&h.journal()).unwrap();
        let names: Vec<&str> = events
            .iter()
            .map(|e| match &e.event {
                RunEvent::RunStarted { .. } => "run_started",
                RunEvent::TaskStarted { .. } => "task_started",
                RunEvent::TaskSucceeded { .. } => "task_succeeded",
                RunEvent::TaskSkipped { .. } => "task_skipped",
                RunEvent::TaskFailed { .. } => "task_failed",
                RunEvent::RunCompleted { .. } => "run_completed",
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "run_started",
                "task_started",
                "task_succeeded",
                "task_started",
                "task_skipped",
                "task_started",
                "task_failed",
                "run_completed",
            ]
        );
        match &events.last().unwrap().event {
            RunEvent::RunCompleted {
                succeeded,
                skipped,
                aborted_at,
                ..
            } => {
                assert_eq!((*succeeded, *skipped, *aborted_at), (1, 1, Some(2)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_executor_observer_stream() {
        let h = Harness::new();
        let recipe = parse_recipe(WRITE_AND_COPY).unwrap();
        let cfg = RunConfig {
            context: &h.context,
            tools: Toolbox {
                vcs: &h.vcs,
                transport: &h.transport,
                database: &h.database,
            },
            journal_dir: None,
        };
        let mut rec = Recorder::default();
        run_recipe(&recipe, &cfg, &mut rec).unwrap();
        assert_eq!(rec.started, vec![(0, 3), (1, 3), (2, 3)]);
        assert_eq!(rec.finished, vec![(0, "OK"), (1, "OK"), (2, "OK")]);
        assert!(!h.journal().exists());
    }

    #[test]
    fn test_executor_relative_root_rejected() {
        let h = Harness::new();
        let context = DeploymentContext {
            root: PathBuf::from("relative"),
            sql: SqlConnectionInfo::default(),
        };
        let cfg = RunConfig {
            context: &context,
            tools: Toolbox {
                vcs: &h.vcs,
                transport: &h.transport,
                database: &h.database,
            },
            journal_dir: None,
        };
        let recipe = parse_recipe("name: t\ntasks: []\n").unwrap();
        assert!(run_recipe(&recipe, &cfg, &mut SilentObserver).is_err());
    }
}
