//! Core types shared by the scheduler, its workers and its collaborators.
//!
//! The scheduler never interprets file content itself. It only moves paths
//! between queues, loads content through a [`ContentLoader`](crate::indexing::ContentLoader)
//! and hands the result to an [`IndexingStep`]. Everything that can go wrong
//! along the way is classified by the error enums below.

use crate::indexing::content::ContentHandle;
use crate::indexing::workspace::Workspace;
use std::fmt;
use std::io;
use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════
// Indexing step contract
// ═══════════════════════════════════════════════════════════════════════════

/// What the indexing step did with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOutcome {
    /// Content was (re)indexed.
    Indexed,
    /// Content matched what was already indexed.
    UpToDate,
    /// The step chose not to index this file (unsupported type, filtered, ...).
    Skipped,
}

impl FileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::UpToDate => "up-to-date",
            Self::Skipped => "skipped",
        }
    }
}

/// Failure reported by an [`IndexingStep`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// The step observed cancellation. The file goes back to its queue.
    #[error("Indexing cancelled")]
    Cancelled,

    /// Unrecoverable problem with this one file. Logged, counted as processed, never retried.
    #[error("Failed to index file: {0}")]
    Failed(String),

    /// Problem not tied to the file (broken storage, poisoned state). Aborts the whole job.
    #[error("Indexing job aborted: {0}")]
    Fatal(String),
}

/// The opaque per-file indexing logic the scheduler drives.
///
/// Implementations are shared by every worker thread and must be safe to
/// call concurrently for different files.
pub trait IndexingStep: Send + Sync {
    fn index(
        &self,
        workspace: &dyn Workspace,
        content: &ContentHandle,
    ) -> Result<FileOutcome, StepError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Content loading errors
// ═══════════════════════════════════════════════════════════════════════════

/// How loudly a load failure should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Expected while the file system changes under us.
    Low,
    /// Suspicious but explainable (truncated archives, stale handles).
    Medium,
    /// A real defect worth surfacing.
    High,
}

/// Underlying cause of a [`LoadError::FailedToLoad`].
#[derive(Debug, thiserror::Error)]
pub enum LoadFailure {
    #[error("file no longer exists")]
    Missing,

    #[error("read of {requested} bytes at offset {offset} is out of range")]
    OutOfRange { offset: u64, requested: u64 },

    #[error("invalid file handle")]
    InvalidHandle,

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl LoadFailure {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Missing => Severity::Low,
            Self::OutOfRange { .. } | Self::InvalidHandle => Severity::Medium,
            Self::Io(e) if e.kind() == io::ErrorKind::NotFound => Severity::Low,
            Self::Io(_) => Severity::High,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("File {path} is too large for indexing ({length} bytes, limit {limit})")]
    TooLarge {
        path: PathBuf,
        length: u64,
        limit: u64,
    },

    #[error("Failed to load {path}: {cause}")]
    FailedToLoad {
        path: PathBuf,
        #[source]
        cause: LoadFailure,
    },
}

impl LoadError {
    pub fn failed(path: impl Into<PathBuf>, cause: impl Into<LoadFailure>) -> Self {
        Self::FailedToLoad {
            path: path.into(),
            cause: cause.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Scheduler errors
// ═══════════════════════════════════════════════════════════════════════════

/// Identifier of one submitted job, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl JobId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// The caller's progress handle was cancelled or its workspace disposed.
    /// Files that were in flight are back in the caller's queue.
    #[error("Indexing cancelled")]
    Cancelled,

    #[error("Indexing {job} failed: {message}")]
    Fatal { job: JobId, message: String },

    #[error("Failed to start indexing worker: {message}")]
    WorkerSpawn { message: String },

    #[error("Scheduler is shut down")]
    ShutDown,
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Outcome of processing a single file that breaks the normal flow.
///
/// Everything else (too large, failed to load, per-file step errors) is
/// recovered inside the per-file routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    Cancelled,
    Fatal,
    /// The model is being written. The file went back to its queue and the
    /// job carries on.
    Deferred,
}
