//! Workspaces own indexing jobs.
//!
//! A job's files belong to exactly one workspace. Once the workspace is
//! disposed, its jobs stop: in-flight files are requeued and the submitter
//! sees a cancellation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait Workspace: Send + Sync {
    fn id(&self) -> &WorkspaceId;

    fn is_disposed(&self) -> bool {
        false
    }
}

/// A workspace rooted at a directory on disk.
#[derive(Debug)]
pub struct LocalWorkspace {
    id: WorkspaceId,
    root: PathBuf,
    disposed: AtomicBool,
}

impl LocalWorkspace {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: WorkspaceId::new(id),
            root: root.into(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Workspace named after the last component of `root`.
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let id = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.to_string_lossy().into_owned());
        Self::new(id, root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

impl Workspace for LocalWorkspace {
    fn id(&self) -> &WorkspaceId {
        &self.id
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_workspace_dispose() {
        let ws = LocalWorkspace::from_root("/tmp/project-a");
        assert_eq!(ws.id().as_str(), "project-a");
        assert!(!ws.is_disposed());

        ws.dispose();
        assert!(ws.is_disposed());
    }
}
