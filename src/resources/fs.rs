//! Filesystem actions: move_path, copy_path, remove_path, ensure_dir,
//! write_file, remove_git.
//!
//! All paths arrive already resolved under the deployment root.

use crate::core::error::TaskError;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Relocate `src` to `dest`, creating the parent of `dest`.
///
/// An existing directory at `dest` receives `src` as a child, the way `mv`
/// does. An existing entry at that final location is not replaced.
pub fn move_path(src: &Path, dest: &Path) -> Result<(), TaskError> {
    if src.symlink_metadata().is_err() {
        return Err(TaskError::SourceNotFound {
            path: src.to_path_buf(),
        });
    }
    let target = match src.file_name() {
        Some(name) if dest.is_dir() => dest.join(name),
        _ => dest.to_path_buf(),
    };
    if target != src && target.is_dir() {
        return Err(TaskError::io(
            &target,
            std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        ));
    }
    ensure_parent(&target)?;

    match std::fs::rename(src, &target) {
        Ok(()) => Ok(()),
        // Cross-device rename: copy then delete.
        Err(e) if e.raw_os_error() == Some(EXDEV) => {
            copy_any(src, &target)?;
            remove_tree(src)
        }
        Err(e) => Err(TaskError::io(&target, e)),
    }
}

#[cfg(unix)]
const EXDEV: i32 = 18;
#[cfg(not(unix))]
const EXDEV: i32 = 17;

/// Copy a file or directory tree.
///
/// With `overwrite`, an existing `dest` of any type is removed first.
/// Without it, an existing `dest` is left untouched and reported as
/// [`TaskError::DestinationExists`].
pub fn copy_path(src: &Path, dest: &Path, overwrite: bool) -> Result<(), TaskError> {
    if src.symlink_metadata().is_err() {
        return Err(TaskError::SourceNotFound {
            path: src.to_path_buf(),
        });
    }
    if dest.symlink_metadata().is_ok() {
        if !overwrite {
            return Err(TaskError::DestinationExists {
                path: dest.to_path_buf(),
            });
        }
        remove_tree(dest)?;
    }
    ensure_parent(dest)?;
    copy_any(src, dest)
}

/// Symlinks are recreated as links, never followed.
fn copy_any(src: &Path, dest: &Path) -> Result<(), TaskError> {
    let meta = src.symlink_metadata().map_err(|e| TaskError::io(src, e))?;
    if meta.file_type().is_symlink() {
        copy_symlink(src, dest)
    } else if meta.is_dir() {
        copy_dir_recursive(src, dest)
    } else {
        std::fs::copy(src, dest)
            .map(|_| ())
            .map_err(|e| TaskError::io(dest, e))
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<(), TaskError> {
    let link = std::fs::read_link(src).map_err(|e| TaskError::io(src, e))?;
    std::os::unix::fs::symlink(&link, dest).map_err(|e| TaskError::io(dest, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dest: &Path) -> Result<(), TaskError> {
    warn!(path = %src.display(), "skipping symlink");
    Ok(())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), TaskError> {
    std::fs::create_dir_all(dest).map_err(|e| TaskError::io(dest, e))?;
    let entries = std::fs::read_dir(src).map_err(|e| TaskError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| TaskError::io(src, e))?;
        let (from, to) = (entry.path(), dest.join(entry.file_name()));
        copy_any(&from, &to)?;
    }
    Ok(())
}

/// Recursively delete a file or directory.
///
/// On permission-denied the tree is made writable and deletion is retried
/// once. A second refusal is returned as [`TaskError::PermissionDenied`].
pub fn remove_path(path: &Path) -> Result<(), TaskError> {
    if path.symlink_metadata().is_err() {
        return Err(TaskError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }
    remove_tree(path)
}

/// Delete `path` (file, symlink or directory) with the read-only retry.
pub(crate) fn remove_tree(path: &Path) -> Result<(), TaskError> {
    match delete(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!(path = %path.display(), "permission denied, clearing read-only and retrying");
            make_tree_writable(path);
            delete(path).map_err(|source| TaskError::PermissionDenied {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(e) => Err(TaskError::io(path, e)),
    }
}

fn delete(path: &Path) -> std::io::Result<()> {
    let meta = path.symlink_metadata()?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Clear the read-only flag on `path`, its parent and all descendants.
/// Best effort: failures surface on the retried delete.
fn make_tree_writable(path: &Path) {
    if let Some(parent) = path.parent() {
        make_writable(parent);
    }
    make_subtree_writable(path);
}

fn make_subtree_writable(path: &Path) {
    make_writable(path);
    if path.is_dir() && !path.is_symlink() {
        if let Ok(entries) = std::fs::read_dir(path) {
            for entry in entries.flatten() {
                make_subtree_writable(&entry.path());
            }
        }
    }
}

#[cfg(unix)]
fn make_writable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = path.symlink_metadata() {
        if meta.file_type().is_symlink() {
            return;
        }
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o700);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Path) {
    if let Ok(meta) = path.symlink_metadata() {
        let mut perms = meta.permissions();
        perms.set_readonly(false);
        let _ = std::fs::set_permissions(path, perms);
    }
}

/// Create a directory and all missing parents. Idempotent.
pub fn ensure_dir(path: &Path) -> Result<(), TaskError> {
    std::fs::create_dir_all(path).map_err(|e| TaskError::io(path, e))
}

/// Write `data` to `path`, truncating unless `append` is set.
pub fn write_file(path: &Path, data: &str, append: bool) -> Result<(), TaskError> {
    ensure_parent(path)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|e| TaskError::io(path, e))?;
    file.write_all(data.as_bytes())
        .map_err(|e| TaskError::io(path, e))
}

/// Remove every directory named `.git` under `root`. Returns how many.
pub fn remove_git(root: &Path) -> Result<usize, TaskError> {
    let mut found = Vec::new();
    collect_git_dirs(root, &mut found)?;
    for dir in &found {
        debug!(path = %dir.display(), "removing .git");
        remove_tree(dir)?;
    }
    Ok(found.len())
}

fn collect_git_dirs(dir: &Path, found: &mut Vec<std::path::PathBuf>) -> Result<(), TaskError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(TaskError::io(dir, e)),
    };
    let mut children: Vec<std::fs::DirEntry> = entries.filter_map(|e| e.ok()).collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        let ft = entry.file_type().map_err(|e| TaskError::io(entry.path(), e))?;
        if !ft.is_dir() {
            continue;
        }
        let path = entry.path();
        if entry.file_name() == ".git" {
            found.push(path);
        } else {
            collect_git_dirs(&path, found)?;
        }
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), TaskError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| TaskError::io(parent, e))
        }
        _ => Ok(()),
    }
}
