//! Repository checkout for the `download_github` action.
//!
//! Cloning goes through the [`Vcs`] capability so the interpreter never
//! depends on how a particular tool is invoked. [`GitCli`] shells out to
//! `git`; tests substitute a fake.

use super::fs::remove_tree;
use crate::core::error::TaskError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Version-control capability.
pub trait Vcs {
    /// Clone `src` into `dest`, checking out `git_ref` when given.
    fn clone_repo(&self, src: &str, git_ref: Option<&str>, dest: &Path) -> Result<(), TaskError>;
}

/// [`Vcs`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    /// Use a specific git executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, src: &str, args: &[&OsStr], cwd: Option<&Path>) -> Result<(), TaskError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(command = ?cmd, "running git");

        let output = cmd.output().map_err(|e| TaskError::VcsFailure {
            src: src.to_string(),
            detail: format!("cannot run {}: {}", self.program.display(), e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TaskError::VcsFailure {
                src: src.to_string(),
                detail: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        Ok(())
    }

    fn shallow_clone(&self, src: &str, branch: Option<&str>, dest: &Path) -> Result<(), TaskError> {
        let mut args = vec![
            OsStr::new("clone"),
            OsStr::new("--quiet"),
            OsStr::new("--depth"),
            OsStr::new("1"),
        ];
        if let Some(b) = branch {
            args.extend([OsStr::new("--branch"), OsStr::new(b)]);
        }
        args.extend([OsStr::new(src), dest.as_os_str()]);
        self.run(src, &args, None)
    }

    fn fetch(
        &self,
        src: &str,
        git_ref: Option<&str>,
        dest: &Path,
        prior: Prior,
    ) -> Result<(), TaskError> {
        let Some(r) = git_ref else {
            return self.shallow_clone(src, None, dest);
        };
        match self.shallow_clone(src, Some(r), dest) {
            Ok(()) => Ok(()),
            // `--branch` takes branches and tags only; commit ids need full history.
            Err(e) if looks_like_commit(r) => {
                debug!(git_ref = r, error = %e, "not a branch or tag, retrying as a commit");
                discard_checkout(dest, prior);
                self.run(
                    src,
                    &[
                        OsStr::new("clone"),
                        OsStr::new("--quiet"),
                        OsStr::new(src),
                        dest.as_os_str(),
                    ],
                    None,
                )?;
                self.run(
                    src,
                    &[OsStr::new("checkout"), OsStr::new("--quiet"), OsStr::new(r)],
                    Some(dest),
                )
            }
            Err(e) => Err(e),
        }
    }
}

impl Vcs for GitCli {
    /// Shallow clone at `git_ref`. A failed clone leaves `dest` as it was.
    fn clone_repo(&self, src: &str, git_ref: Option<&str>, dest: &Path) -> Result<(), TaskError> {
        info!(repo = %src, git_ref = ?git_ref, dest = %dest.display(), "cloning repository");
        let prior = Prior::of(dest);
        let result = self.fetch(src, git_ref, dest, prior);
        if result.is_err() {
            discard_checkout(dest, prior);
        }
        result
    }
}

fn looks_like_commit(r: &str) -> bool {
    (7..=40).contains(&r.len()) && r.bytes().all(|b| b.is_ascii_hexdigit())
}

/// State of a clone destination before cloning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prior {
    Missing,
    EmptyDir,
    /// git refuses these; nothing to undo
    Occupied,
}

impl Prior {
    fn of(dest: &Path) -> Self {
        match std::fs::read_dir(dest) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    Self::EmptyDir
                } else {
                    Self::Occupied
                }
            }
            Err(_) if dest.symlink_metadata().is_err() => Self::Missing,
            Err(_) => Self::Occupied,
        }
    }
}

/// Put `dest` back the way [`Prior`] recorded it.
fn discard_checkout(dest: &Path, prior: Prior) {
    let outcome = match prior {
        Prior::Occupied => Ok(()),
        Prior::Missing if dest.symlink_metadata().is_err() => Ok(()),
        Prior::Missing => remove_tree(dest),
        Prior::EmptyDir => std::fs::read_dir(dest)
            .map_err(|e| TaskError::io(dest, e))
            .and_then(|entries| {
                entries
                    .flatten()
                    .try_for_each(|entry| remove_tree(&entry.path()))
            }),
    };
    if let Err(e) = outcome {
        warn!(dest = %dest.display(), error = %e, "cannot discard partial checkout");
    }
}

/// Move every direct child of `subdir` up into `dest`, then remove `subdir`.
///
/// Entries already at `dest` with a colliding name are replaced. A missing
/// `subdir` is not an error; the checkout is left as-is.
pub fn promote_subpath(dest: &Path, subdir: &Path) -> Result<(), TaskError> {
    if subdir == dest || !subdir.starts_with(dest) {
        return Err(TaskError::PathEscape {
            path: subdir.display().to_string(),
        });
    }
    if !subdir.is_dir() {
        debug!(subpath = %subdir.display(), "subpath not present, skipping promotion");
        return Ok(());
    }

    // Park the subtree first: a child of it may share a name with one of
    // its own ancestors under `dest`.
    let staging = staging_dir(dest);
    std::fs::rename(subdir, &staging).map_err(|e| TaskError::io(subdir, e))?;

    let entries = std::fs::read_dir(&staging).map_err(|e| TaskError::io(&staging, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| TaskError::io(&staging, e))?;
        let target = dest.join(entry.file_name());
        if target.symlink_metadata().is_ok() {
            remove_tree(&target)?;
        }
        std::fs::rename(entry.path(), &target).map_err(|e| TaskError::io(&target, e))?;
    }

    remove_tree(&staging)?;
    // The subpath's former parents may now be empty husks, e.g. `a/` of `a/b`.
    prune_empty_parents(dest, subdir);
    Ok(())
}

fn staging_dir(dest: &Path) -> PathBuf {
    let mut n = 0u32;
    loop {
        let candidate = dest.join(format!(".fxdeploy-promote-{}", n));
        if candidate.symlink_metadata().is_err() {
            return candidate;
        }
        n += 1;
    }
}

fn prune_empty_parents(dest: &Path, subdir: &Path) {
    let mut current = subdir.parent();
    while let Some(dir) = current {
        if dir == dest || !dir.starts_with(dest) {
            break;
        }
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
