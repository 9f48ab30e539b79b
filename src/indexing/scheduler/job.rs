//! Indexing jobs and the caller-owned file queue they drain.
//!
//! ```text
//! Created ─► Registered ─► Draining ─┬─► Completed
//!    │        (pool only)            ├─► Cancelled   (in-flight file requeued)
//!    └──────── caller thread ────────┴─► Failed      (first fatal error wins)
//! ```

use super::metrics::JobStatistics;
use super::types::{JobId, SchedulerError};
use crate::indexing::progress::{self, ProgressIndicator};
use crate::indexing::workspace::Workspace;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Bounded FIFO of file paths owned by the caller.
///
/// Jobs pop from it without blocking. A cancelled file is pushed back into
/// the same queue, so resubmitting the queue resumes where the cancelled
/// call stopped.
#[derive(Debug)]
pub struct FileQueue {
    sender: Sender<PathBuf>,
    receiver: Receiver<PathBuf>,
}

impl FileQueue {
    /// Build a queue from `files`, dropping duplicates while keeping order.
    pub fn new(files: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut seen = HashSet::new();
        let files: Vec<PathBuf> = files
            .into_iter()
            .filter(|path| seen.insert(path.clone()))
            .collect();

        // Capacity never grows: a requeue always follows a pop
        let (sender, receiver) = bounded(files.len().max(1));
        for file in files {
            // Cannot fail: capacity covers every file and we hold the receiver
            let _ = sender.try_send(file);
        }
        Self { sender, receiver }
    }

    /// Non-blocking pop. `None` means nothing is queued right now.
    pub fn pop(&self) -> Option<PathBuf> {
        self.receiver.try_recv().ok()
    }

    pub(crate) fn push_back(&self, path: PathBuf) {
        if let Err(e) = self.sender.try_send(path) {
            tracing::error!(
                target: "scheduler",
                "failed to requeue {}: queue is full",
                e.into_inner().display()
            );
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Remove and return everything still queued.
    pub fn drain(&self) -> Vec<PathBuf> {
        self.receiver.try_iter().collect()
    }
}

/// Observable lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Registered,
    Draining,
    Completed,
    Cancelled,
    Failed,
}

/// One caller's request: a workspace, its file queue and the running counters.
pub(crate) struct IndexingJob {
    id: JobId,
    workspace: Arc<dyn Workspace>,
    queue: Arc<FileQueue>,
    progress: Arc<dyn ProgressIndicator>,
    total: usize,
    remaining: AtomicUsize,
    in_flight: AtomicUsize,
    registered: AtomicBool,
    // Set once the job must not hand out more files
    no_more_work: AtomicBool,
    error: OnceLock<SchedulerError>,
    statistics: Mutex<JobStatistics>,
    reported_fraction: Mutex<f64>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// A file popped from a job and not yet finished.
///
/// Counts towards the job's in-flight total until dropped.
pub(crate) struct InFlightFile<'a> {
    job: &'a IndexingJob,
    path: PathBuf,
}

impl InFlightFile<'_> {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InFlightFile<'_> {
    fn drop(&mut self) {
        self.job.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl IndexingJob {
    pub(crate) fn new(
        id: JobId,
        workspace: Arc<dyn Workspace>,
        queue: Arc<FileQueue>,
        progress: Arc<dyn ProgressIndicator>,
    ) -> Self {
        let total = queue.len();
        let (wake_tx, wake_rx) = bounded(1);
        let statistics = JobStatistics::new(workspace.id().as_str(), total);

        Self {
            id,
            workspace,
            queue,
            progress,
            total,
            remaining: AtomicUsize::new(total),
            in_flight: AtomicUsize::new(0),
            registered: AtomicBool::new(false),
            no_more_work: AtomicBool::new(false),
            error: OnceLock::new(),
            statistics: Mutex::new(statistics),
            reported_fraction: Mutex::new(0.0),
            wake_tx,
            wake_rx,
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn workspace(&self) -> &dyn Workspace {
        self.workspace.as_ref()
    }

    pub(crate) fn progress(&self) -> &dyn ProgressIndicator {
        self.progress.as_ref()
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }

    /// Take the next queued file, or `None` if the queue is empty right now.
    ///
    /// The in-flight count is raised before the stop flag is read. Once
    /// [`stop`](Self::stop) returned and the submitter saw no file in flight,
    /// every later call sees the flag and hands out nothing.
    pub(crate) fn pop_next_file(&self) -> Option<InFlightFile<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let path = if self.no_more_work.load(Ordering::SeqCst) {
            None
        } else {
            self.queue.pop()
        };
        match path {
            Some(path) => Some(InFlightFile { job: self, path }),
            None => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                None
            }
        }
    }

    /// Put a file back after cancellation. It is not counted as processed.
    pub(crate) fn requeue(&self, file: &InFlightFile<'_>) {
        tracing::debug!(target: "scheduler", "{}: requeue {}", self.id, file.path.display());
        self.queue.push_back(file.path.clone());
    }

    /// Account for one file leaving the job for a terminal reason.
    pub(crate) fn file_processed(&self) {
        let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "{} processed more files than queued", self.id);
        let remaining = previous.saturating_sub(1);

        let fraction = (self.total - remaining) as f64 / self.total as f64;
        self.report_fraction(fraction);

        if remaining == 0 {
            self.wake();
        }
    }

    /// Report progress, never going backwards when workers race.
    pub(crate) fn report_fraction(&self, fraction: f64) {
        let mut reported = self.reported_fraction.lock();
        if fraction > *reported {
            *reported = fraction;
            progress::report_fraction(self.progress.as_ref(), fraction);
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        progress::is_canceled(self.progress.as_ref()) || self.workspace.is_disposed()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.no_more_work.load(Ordering::SeqCst)
    }

    /// Whether workers should drop this job from the registry.
    pub(crate) fn should_stop(&self) -> bool {
        self.is_done() || self.is_stopped() || self.error().is_some() || self.is_cancelled()
    }

    /// Stop handing out files for this call.
    pub(crate) fn stop(&self) {
        self.no_more_work.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Record a job-fatal error. Only the first one is kept.
    pub(crate) fn fail(&self, error: SchedulerError) {
        match self.error.set(error) {
            Ok(()) => {
                if let Some(error) = self.error.get() {
                    tracing::error!(target: "scheduler", "{}: {error}", self.id);
                }
            }
            Err(later) => {
                tracing::debug!(target: "scheduler", "{}: ignoring later error: {later}", self.id);
            }
        }
        self.stop();
    }

    pub(crate) fn error(&self) -> Option<&SchedulerError> {
        self.error.get()
    }

    pub(crate) fn state(&self) -> JobState {
        if self.error().is_some() {
            JobState::Failed
        } else if self.is_done() {
            JobState::Completed
        } else if self.is_stopped() || self.is_cancelled() {
            JobState::Cancelled
        } else if self.in_flight() > 0 || self.remaining() < self.total {
            JobState::Draining
        } else if self.registered.load(Ordering::Acquire) {
            JobState::Registered
        } else {
            JobState::Created
        }
    }

    pub(crate) fn with_statistics<R>(&self, f: impl FnOnce(&mut JobStatistics) -> R) -> R {
        f(&mut self.statistics.lock())
    }

    pub(crate) fn statistics(&self) -> JobStatistics {
        self.statistics.lock().clone()
    }

    fn wake(&self) {
        // A pending wake-up is enough, extra ones are dropped
        let _ = self.wake_tx.try_send(());
    }

    /// Block the submitter until something changed or `timeout` elapsed.
    pub(crate) fn wait(&self, timeout: Duration) {
        let _ = self.wake_rx.recv_timeout(timeout);
    }
}
