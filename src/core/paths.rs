//! Deployment-root path resolution.
//!
//! Task paths are relative to the deployment root. Resolution is lexical
//! (`.` dropped, `..` popped) and rejects absolute paths and any `..` that
//! climbs above the root. The deepest existing ancestor of the result is
//! also canonicalized so a symlink inside the tree cannot point outside it.

use super::error::TaskError;
use std::path::{Component, Path, PathBuf};

/// Resolves task-relative paths against a fixed deployment root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver. `root` must be absolute.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TaskError> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(TaskError::PathEscape {
                path: root.display().to_string(),
            });
        }
        let root = root.canonicalize().unwrap_or(root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` to an absolute path inside the root.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf, TaskError> {
        let relative = relative.as_ref();
        let escape = || TaskError::PathEscape {
            path: relative.display().to_string(),
        };

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => return Err(escape()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(escape());
                    }
                }
                Component::Normal(part) => parts.push(part),
            }
        }

        let mut resolved = self.root.clone();
        resolved.extend(parts);

        if !self.contains_physically(&resolved) {
            return Err(escape());
        }
        Ok(resolved)
    }

    /// Resolve a path that a task will delete or replace. The root itself is
    /// refused.
    pub fn resolve_entry(&self, relative: impl AsRef<Path>) -> Result<PathBuf, TaskError> {
        let relative = relative.as_ref();
        let resolved = self.resolve(relative)?;
        if resolved == self.root {
            return Err(TaskError::RootTarget {
                path: relative.display().to_string(),
            });
        }
        Ok(resolved)
    }

    /// Check that the deepest existing ancestor of `path` still lives under
    /// the canonical root once symlinks are followed.
    fn contains_physically(&self, path: &Path) -> bool {
        let canonical_root = match self.root.canonicalize() {
            Ok(r) => r,
            // Nothing exists yet, so nothing can be a symlink.
            Err(_) => return true,
        };
        let mut cursor = Some(path);
        while let Some(p) = cursor {
            if let Ok(real) = p.canonicalize() {
                return real.starts_with(&canonical_root);
            }
            cursor = p.parent();
        }
        true
    }
}
