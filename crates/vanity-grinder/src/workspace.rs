use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const LOG_FILE_NAME: &str = "grind.log";
const WORKSPACE_PREFIX: &str = "vanity-grind";
const ARTIFACT_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace root {path}: {source}")]
    CreateRoot { path: PathBuf, source: io::Error },
    #[error("failed to create workspace {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to list workspace {path}: {source}")]
    List { path: PathBuf, source: io::Error },
}

/// What to do with a workspace once its iteration is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Discard,
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    Removed,
    /// Left on disk, either on purpose or because removal failed.
    Retained(PathBuf),
}

/// One iteration's private directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Wraps an existing directory, e.g. a retained workspace handed back
    /// for recovery.
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE_NAME)
    }

    /// Artifact files the worker left behind, in a stable (sorted) order.
    pub fn artifacts(&self) -> Result<Vec<PathBuf>, WorkspaceError> {
        let list_err = |source: io::Error| WorkspaceError::List {
            path: self.path.clone(),
            source,
        };
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(list_err)? {
            let path = entry.map_err(list_err)?.path();
            let is_artifact = path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION))
                    .unwrap_or(false);
            if is_artifact {
                artifacts.push(path);
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }
}

pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, empty, uniquely named directory directly under the
    /// root. Never reuses an existing directory.
    pub fn acquire(&self) -> Result<Workspace, WorkspaceError> {
        fs::create_dir_all(&self.root).map_err(|source| WorkspaceError::CreateRoot {
            path: self.root.clone(),
            source,
        })?;

        let name = format!(
            "{WORKSPACE_PREFIX}-{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            Uuid::new_v4().simple()
        );
        let path = self.root.join(name);
        fs::create_dir(&path).map_err(|source| WorkspaceError::Create {
            path: path.clone(),
            source,
        })?;
        debug!(event = "workspace_acquired", path = %path.display());
        Ok(Workspace { path })
    }

    pub fn release(&self, workspace: Workspace, disposition: Disposition) -> Released {
        match disposition {
            Disposition::Discard => match fs::remove_dir_all(&workspace.path) {
                Ok(()) => {
                    debug!(event = "workspace_removed", path = %workspace.path.display());
                    Released::Removed
                }
                Err(err) => {
                    warn!(
                        event = "workspace_remove_failed",
                        path = %workspace.path.display(),
                        error = %err
                    );
                    Released::Retained(workspace.path)
                }
            },
            Disposition::Retain => {
                warn!(
                    event = "workspace_retained",
                    path = %workspace.path.display(),
                    "workspace kept on disk for manual recovery"
                );
                Released::Retained(workspace.path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_distinct_empty_siblings() {
        let root = TempDir::new().expect("temp root");
        let manager = WorkspaceManager::new(root.path().join("nested/root"));

        let first = manager.acquire().expect("first workspace");
        let second = manager.acquire().expect("second workspace");

        assert_ne!(first.path(), second.path());
        assert_eq!(first.path().parent(), Some(manager.root()));
        assert_eq!(second.path().parent(), Some(manager.root()));
        assert!(first.artifacts().expect("list").is_empty());
        assert_eq!(fs::read_dir(second.path()).expect("read").count(), 0);
    }

    #[test]
    fn artifacts_are_sorted_and_exclude_log() {
        let root = TempDir::new().expect("temp root");
        let workspace = WorkspaceManager::new(root.path())
            .acquire()
            .expect("workspace");
        fs::write(workspace.log_path(), "searching...").expect("log");
        fs::write(workspace.path().join("Zzzab.json"), "[]").expect("artifact");
        fs::write(workspace.path().join("Aaaab.json"), "[]").expect("artifact");
        fs::write(workspace.path().join("notes.txt"), "x").expect("other");

        let names: Vec<_> = workspace
            .artifacts()
            .expect("list")
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Aaaab.json", "Zzzab.json"]);
    }

    #[test]
    fn release_discards_or_retains() {
        let root = TempDir::new().expect("temp root");
        let manager = WorkspaceManager::new(root.path());

        let discarded = manager.acquire().expect("workspace");
        let discarded_path = discarded.path().to_path_buf();
        fs::write(discarded.log_path(), "ok").expect("log");
        assert_eq!(
            manager.release(discarded, Disposition::Discard),
            Released::Removed
        );
        assert!(!discarded_path.exists());

        let kept = manager.acquire().expect("workspace");
        let kept_path = kept.path().to_path_buf();
        assert_eq!(
            manager.release(kept, Disposition::Retain),
            Released::Retained(kept_path.clone())
        );
        assert!(kept_path.is_dir());
    }

    #[test]
    fn acquire_fails_when_root_is_a_file() {
        let root = TempDir::new().expect("temp root");
        let blocker = root.path().join("blocker");
        fs::write(&blocker, "not a dir").expect("file");

        let err = WorkspaceManager::new(&blocker)
            .acquire()
            .expect_err("root is a file");
        assert!(matches!(err, WorkspaceError::CreateRoot { .. }));
    }
}
