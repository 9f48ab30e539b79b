//! Content indexing scheduler
//!
//! Feeds file content to an [`IndexingStep`] from a bounded pool of worker
//! threads shared by every concurrent caller.
//!
//! ## Architecture
//!
//! ```text
//! index_files ──► JobRegistry ◄── worker 1 ─┐
//!      │              ▲         ◄── worker 2 ─┼─► pop one file per job per pass
//!      │ (writer)     │         ◄── worker N ─┘        │
//!      ▼              │                               ▼
//! caller thread   submitter waits          load ─► MemoryBudget ─► IndexingStep
//! ```
//!
//! - A caller that holds the [`ModelLock`] for writing runs its job on its own
//!   thread. Pool workers would need read access it cannot give up.
//! - Otherwise the job is registered and up to `parallelism` workers are
//!   started. Each worker visits every registered job once per pass and
//!   processes at most one file per job per pass, so no job starves another.
//! - Content bytes held by workers are capped by a soft [`MemoryBudget`].
//!   Workers never wait for the model while holding budget: if a writer has
//!   the lock the file goes back to its queue and the worker moves on.
//! - Per-file failures are recorded and skipped. Cancellation requeues the
//!   in-flight file. A job-fatal error stops the job and is returned to the
//!   submitter.
//!
//! ## Usage
//!
//! ```ignore
//! use content_indexer::indexing::{Scheduler, SchedulerConfig, FileQueue, CancellableProgress};
//!
//! let scheduler = Scheduler::with_fs_loader(SchedulerConfig::default(), step);
//! let stats = scheduler.index_paths(workspace, files, Arc::new(CancellableProgress::new()))?;
//! ```

pub mod budget;
pub mod config;
pub mod job;
pub mod metrics;
mod registry;
pub mod types;

pub use budget::{BudgetCancelled, BudgetLease, MemoryBudget};
pub use config::SchedulerConfig;
pub use job::{FileQueue, JobState};
pub use metrics::{ExtensionStats, JobStatistics, TooLargeFile};
pub use types::{
    FileOutcome, IndexingStep, JobId, LoadError, LoadFailure, SchedulerError, SchedulerResult,
    Severity, StepError,
};

use crate::indexing::content::{ContentLoader, FsContentLoader};
use crate::indexing::lock::ModelLock;
use crate::indexing::progress::{self, ProgressIndicator};
use crate::indexing::workspace::Workspace;
use crate::{debug_event, log_event};
use job::{InFlightFile, IndexingJob};
use parking_lot::Mutex;
use registry::JobRegistry;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use types::Interrupt;

/// The indexing scheduler.
///
/// Owns the job registry, the memory budget and the worker pool. Dropping
/// the scheduler shuts it down.
pub struct Scheduler {
    shared: Arc<Shared>,
}

/// State shared between the scheduler handle and its workers.
struct Shared {
    config: SchedulerConfig,
    loader: Arc<dyn ContentLoader>,
    step: Arc<dyn IndexingStep>,
    lock: Arc<ModelLock>,
    budget: MemoryBudget,
    registry: JobRegistry,
    running_workers: AtomicUsize,
    spawned_workers: AtomicUsize,
    next_job_id: AtomicU64,
    shut_down: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        loader: Arc<dyn ContentLoader>,
        step: Arc<dyn IndexingStep>,
        lock: Arc<ModelLock>,
    ) -> Self {
        let budget = MemoryBudget::new(config.memory_budget_bytes, config.poll_interval);

        debug_event!(
            "scheduler",
            "created",
            "{} workers, {} memory budget",
            config.parallelism,
            metrics::format_bytes(config.memory_budget_bytes)
        );

        Self {
            shared: Arc::new(Shared {
                config,
                loader,
                step,
                lock,
                budget,
                registry: JobRegistry::new(),
                running_workers: AtomicUsize::new(0),
                spawned_workers: AtomicUsize::new(0),
                next_job_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Scheduler reading from the local file system with a private model lock.
    pub fn with_fs_loader(config: SchedulerConfig, step: Arc<dyn IndexingStep>) -> Self {
        let loader = Arc::new(FsContentLoader::new(config.max_file_size_bytes));
        Self::new(config, loader, step, Arc::new(ModelLock::new()))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn model_lock(&self) -> &Arc<ModelLock> {
        &self.shared.lock
    }

    pub fn memory_budget(&self) -> &MemoryBudget {
        &self.shared.budget
    }

    /// Workers currently alive.
    pub fn running_workers(&self) -> usize {
        self.shared.running_workers.load(Ordering::Acquire)
    }

    /// Workers started over the scheduler's lifetime.
    pub fn spawned_workers(&self) -> usize {
        self.shared.spawned_workers.load(Ordering::Acquire)
    }

    /// Jobs currently registered with the pool.
    pub fn active_jobs(&self) -> usize {
        self.shared.registry.len()
    }

    /// Index every file in `queue` for `workspace`.
    ///
    /// Returns once all files are accounted for, or with
    /// [`SchedulerError::Cancelled`] / [`SchedulerError::Fatal`]. Files that
    /// were interrupted by cancellation are back in `queue`; resubmit it to
    /// continue.
    pub fn index_files(
        &self,
        workspace: Arc<dyn Workspace>,
        queue: Arc<FileQueue>,
        progress: Arc<dyn ProgressIndicator>,
    ) -> SchedulerResult<JobStatistics> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(SchedulerError::ShutDown);
        }

        let start = Instant::now();
        let id = JobId(self.shared.next_job_id.fetch_add(1, Ordering::Relaxed));
        let job = Arc::new(IndexingJob::new(id, workspace, queue, progress));

        log_event!(
            "scheduler",
            "job submitted",
            "{id} for {} ({} files)",
            job.workspace().id(),
            job.total()
        );

        let result = if job.total() == 0 {
            job.report_fraction(1.0);
            Ok(())
        } else if self.shared.lock.is_write_locked_by_current_thread() {
            self.shared.run_on_caller_thread(&job)
        } else {
            self.shared.run_pooled(&job)
        };

        let mut stats = job.statistics();
        stats.wall_time = start.elapsed();

        match &result {
            Ok(()) => log_event!(
                "scheduler",
                "job finished",
                "{id}: {} processed, {} too large in {:?}",
                stats.files_processed,
                stats.too_large.len(),
                stats.wall_time
            ),
            Err(e) => log_event!("scheduler", "job stopped", "{id} ({:?}): {e}", job.state()),
        }

        result.map(|()| stats)
    }

    /// Convenience wrapper building a fresh [`FileQueue`] from `files`.
    pub fn index_paths(
        &self,
        workspace: Arc<dyn Workspace>,
        files: Vec<PathBuf>,
        progress: Arc<dyn ProgressIndicator>,
    ) -> SchedulerResult<JobStatistics> {
        self.index_files(workspace, Arc::new(FileQueue::new(files)), progress)
    }

    /// Reject new submissions and wait for the workers to exit.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let handles: Vec<_> = self.shared.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!(target: "scheduler", "indexing worker panicked");
            }
        }
        debug_event!("scheduler", "shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements the running-worker count when a worker exits, panicking or not.
struct WorkerSlot<'a>(&'a AtomicUsize);

impl Drop for WorkerSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Shared {
    /// Drain the whole job on the calling thread.
    fn run_on_caller_thread(&self, job: &IndexingJob) -> SchedulerResult<()> {
        debug_event!("scheduler", "caller thread", "{} runs under the write lock", job.id());

        loop {
            if job.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            let Some(file) = job.pop_next_file() else {
                break;
            };
            match self.process_guarded(job, file) {
                Ok(()) | Err(Interrupt::Deferred) => {}
                Err(Interrupt::Cancelled) => return Err(SchedulerError::Cancelled),
                Err(Interrupt::Fatal) => break,
            }
        }

        match job.error() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Register the job, keep the pool topped up and wait for the outcome.
    fn run_pooled(self: &Arc<Self>, job: &Arc<IndexingJob>) -> SchedulerResult<()> {
        self.registry.register(Arc::clone(job));

        let outcome = loop {
            if job.is_done() {
                break Ok(());
            }
            if let Some(error) = job.error() {
                break Err(error.clone());
            }
            if job.is_stopped() || job.is_cancelled() {
                job.stop();
                break Err(SchedulerError::Cancelled);
            }
            if let Err(e) = self.ensure_workers() {
                job.stop();
                break Err(e);
            }
            job.wait(self.config.poll_interval);
        };

        self.registry.remove(job.id());

        if outcome.is_err() {
            // Let workers finish or requeue what they hold before returning
            while job.in_flight() > 0 {
                thread::sleep(self.config.idle_backoff.max(Duration::from_millis(1)));
            }
        }

        outcome
    }

    /// Start workers until `parallelism` are alive.
    ///
    /// Fails only when no worker is alive and none can be started.
    fn ensure_workers(self: &Arc<Self>) -> SchedulerResult<()> {
        let target = self.config.parallelism;
        loop {
            let running = self.running_workers.load(Ordering::Acquire);
            if running >= target {
                return Ok(());
            }
            if self
                .running_workers
                .compare_exchange(running, running + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let n = self.spawned_workers.fetch_add(1, Ordering::AcqRel) + 1;
            let shared = Arc::clone(self);
            let spawned = thread::Builder::new()
                .name(format!("index-worker-{n}"))
                .spawn(move || shared.worker_loop());

            match spawned {
                Ok(handle) => {
                    let mut handles = self.handles.lock();
                    handles.retain(|h| !h.is_finished());
                    handles.push(handle);
                }
                Err(e) => {
                    let alive = self.running_workers.fetch_sub(1, Ordering::AcqRel) - 1;
                    tracing::error!(target: "scheduler", "failed to spawn indexing worker: {e}");
                    if alive == 0 {
                        return Err(SchedulerError::WorkerSpawn {
                            message: e.to_string(),
                        });
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Fairness loop: one file per job per pass until the registry is empty.
    fn worker_loop(&self) {
        let _slot = WorkerSlot(&self.running_workers);
        let name = thread::current().name().unwrap_or("index-worker").to_string();
        debug_event!("scheduler", "worker started", "{name}");

        while !self.registry.is_empty() {
            let mut found_work = false;

            for job in self.registry.snapshot() {
                if job.should_stop() {
                    if self.registry.remove(job.id()) {
                        debug_event!("scheduler", "job deregistered", "{} by {name}", job.id());
                    }
                    continue;
                }
                let Some(file) = job.pop_next_file() else {
                    continue;
                };

                let result = self.process_guarded(&job, file);
                found_work |= result != Err(Interrupt::Deferred);
                match result {
                    Ok(()) | Err(Interrupt::Deferred) => {}
                    Err(Interrupt::Cancelled) => {
                        job.stop();
                        self.registry.remove(job.id());
                    }
                    Err(Interrupt::Fatal) => {
                        self.registry.remove(job.id());
                    }
                }
            }

            if !found_work {
                thread::sleep(self.config.idle_backoff);
            }
        }

        debug_event!("scheduler", "worker exit", "{name}");
    }

    /// [`process_file`](Self::process_file) with loader panics counted as
    /// per-file errors, so the job's remaining count still reaches zero.
    fn process_guarded(&self, job: &IndexingJob, file: InFlightFile<'_>) -> Result<(), Interrupt> {
        let path = file.path().to_path_buf();
        panic::catch_unwind(AssertUnwindSafe(|| self.process_file(job, file))).unwrap_or_else(
            |panic| {
                tracing::error!(
                    target: "scheduler",
                    "processing {} panicked: {}",
                    path.display(),
                    panic_message(panic.as_ref())
                );
                job.with_statistics(|s| s.record_index_error(&path, Duration::ZERO));
                job.file_processed();
                Ok(())
            },
        )
    }

    /// Load, budget and index one file.
    ///
    /// Calls [`IndexingJob::file_processed`] exactly once unless the file is
    /// requeued by cancellation or the job hits a fatal error.
    fn process_file(&self, job: &IndexingJob, file: InFlightFile<'_>) -> Result<(), Interrupt> {
        let path = file.path();

        if job.is_cancelled() {
            job.requeue(&file);
            return Err(Interrupt::Cancelled);
        }
        if self.write_pending() {
            return Err(self.defer(job, &file));
        }
        progress::report_text(job.progress(), &path.display().to_string());

        let load_start = Instant::now();

        if let Some(length) = self.loader.too_large_length(path) {
            tracing::debug!(target: "loader", "{} too large ({length} bytes)", path.display());
            job.with_statistics(|s| s.record_too_large(path, length));
            job.file_processed();
            return Ok(());
        }

        let content = match self.loader.load(path, Some(job.workspace().id())) {
            Ok(content) => content,
            Err(LoadError::TooLarge { length, .. }) => {
                tracing::debug!(target: "loader", "{} too large ({length} bytes)", path.display());
                job.with_statistics(|s| s.record_too_large(path, length));
                job.file_processed();
                return Ok(());
            }
            Err(LoadError::FailedToLoad { cause, .. }) => {
                log_load_failure(path, &cause);
                let loading_time = load_start.elapsed();
                job.with_statistics(|s| s.record_failed_to_load(path, loading_time));
                job.file_processed();
                return Ok(());
            }
        };
        let loading_time = load_start.elapsed();

        let length = if content.is_directory() { 0 } else { content.len() };
        let Ok(lease) = self.budget.lease(length, || job.is_cancelled()) else {
            job.requeue(&file);
            return Err(Interrupt::Cancelled);
        };

        // Expire instead of indexing into a disposed workspace
        if job.workspace().is_disposed() {
            drop(lease);
            job.requeue(&file);
            return Err(Interrupt::Cancelled);
        }

        let index_start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.lock.try_read_for(self.config.poll_interval, || {
                self.step.index(job.workspace(), &content)
            })
        }));
        let processing_time = index_start.elapsed();

        drop(content);
        drop(lease);

        let result = match result {
            Ok(Some(result)) => Ok(result),
            Ok(None) => return Err(self.defer(job, &file)),
            Err(panic) => Err(panic),
        };

        match result {
            Ok(Ok(outcome)) => {
                tracing::trace!(
                    target: "scheduler",
                    "{} {} in {processing_time:?}",
                    path.display(),
                    outcome.as_str()
                );
                job.with_statistics(|s| {
                    s.record_file(path, length, outcome, loading_time, processing_time)
                });
                job.file_processed();
                Ok(())
            }
            Ok(Err(StepError::Cancelled)) => {
                job.requeue(&file);
                Err(Interrupt::Cancelled)
            }
            Ok(Err(StepError::Failed(reason))) => {
                tracing::warn!(target: "scheduler", "failed to index {}: {reason}", path.display());
                job.with_statistics(|s| s.record_index_error(path, loading_time));
                job.file_processed();
                Ok(())
            }
            Ok(Err(StepError::Fatal(message))) => {
                job.fail(SchedulerError::Fatal {
                    job: job.id(),
                    message,
                });
                Err(Interrupt::Fatal)
            }
            Err(panic) => {
                tracing::error!(
                    target: "scheduler",
                    "indexing {} panicked: {}",
                    path.display(),
                    panic_message(panic.as_ref())
                );
                job.with_statistics(|s| s.record_index_error(path, loading_time));
                job.file_processed();
                Ok(())
            }
        }
    }

    /// Another thread holds the model write lock.
    fn write_pending(&self) -> bool {
        self.lock.is_write_locked() && !self.lock.is_write_locked_by_current_thread()
    }

    fn defer(&self, job: &IndexingJob, file: &InFlightFile<'_>) -> Interrupt {
        debug_event!("scheduler", "write pending", "{} defers {}", job.id(), file.path().display());
        job.requeue(file);
        Interrupt::Deferred
    }
}

fn log_load_failure(path: &Path, cause: &LoadFailure) {
    match cause.severity() {
        Severity::Low => {
            tracing::debug!(target: "loader", "failed to load {}: {cause}", path.display())
        }
        Severity::Medium => {
            tracing::warn!(target: "loader", "failed to load {}: {cause}", path.display())
        }
        Severity::High => {
            tracing::error!(target: "loader", "failed to load {}: {cause}", path.display())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::content::ContentHandle;
    use crate::indexing::progress::CancellableProgress;
    use crate::indexing::workspace::{LocalWorkspace, WorkspaceId};
    use std::collections::HashMap;

    /// In-memory loader: known paths have content, everything else is missing.
    struct MapLoader {
        files: HashMap<PathBuf, Vec<u8>>,
        limit: u64,
    }

    impl ContentLoader for MapLoader {
        fn too_large_length(&self, path: &Path) -> Option<u64> {
            self.files
                .get(path)
                .map(|b| b.len() as u64)
                .filter(|len| *len > self.limit)
        }

        fn load(
            &self,
            path: &Path,
            _preferred: Option<&WorkspaceId>,
        ) -> Result<ContentHandle, LoadError> {
            self.files
                .get(path)
                .map(|bytes| ContentHandle::from_bytes(path, bytes.clone()))
                .ok_or_else(|| LoadError::failed(path, LoadFailure::Missing))
        }
    }

    struct Scripted;

    impl IndexingStep for Scripted {
        fn index(
            &self,
            _workspace: &dyn Workspace,
            content: &ContentHandle,
        ) -> Result<FileOutcome, StepError> {
            match content.text().as_ref() {
                "fail" => Err(StepError::Failed("bad file".into())),
                "fatal" => Err(StepError::Fatal("storage gone".into())),
                "panic" => panic!("step exploded"),
                _ => Ok(FileOutcome::Indexed),
            }
        }
    }

    fn scheduler(files: &[(&str, &str)], workers: usize) -> Scheduler {
        let loader = MapLoader {
            files: files
                .iter()
                .map(|(p, c)| (PathBuf::from(p), c.as_bytes().to_vec()))
                .collect(),
            limit: 16,
        };
        let config = SchedulerConfig::default()
            .with_parallelism(workers)
            .with_memory_budget(1000)
            .with_poll_interval(Duration::from_millis(5))
            .with_idle_backoff(Duration::from_millis(1));
        Scheduler::new(
            config,
            Arc::new(loader),
            Arc::new(Scripted),
            Arc::new(ModelLock::new()),
        )
    }

    fn workspace() -> Arc<dyn Workspace> {
        Arc::new(LocalWorkspace::new("ws", "/tmp/ws"))
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_per_file_failures_do_not_abort() {
        let scheduler = scheduler(
            &[
                ("ok.rs", "fn a() {}"),
                ("bad.rs", "fail"),
                ("boom.rs", "panic"),
                ("big.bin", "0123456789abcdefXYZ"),
            ],
            2,
        );

        let stats = scheduler
            .index_paths(
                workspace(),
                paths(&["ok.rs", "bad.rs", "boom.rs", "big.bin", "missing.rs"]),
                Arc::new(CancellableProgress::new()),
            )
            .unwrap();

        assert_eq!(stats.files_total, 5);
        assert_eq!(stats.files_processed, 4);
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(stats.index_errors.len(), 2);
        assert_eq!(stats.failed_to_load, paths(&["missing.rs"]));
        assert_eq!(stats.too_large.len(), 1);
        assert_eq!(stats.too_large[0].length, 19);
        assert_eq!(scheduler.memory_budget().outstanding(), 0);
    }

    #[test]
    fn test_fatal_error_is_returned() {
        let scheduler = scheduler(&[("a.rs", "fatal"), ("b.rs", "ok")], 1);

        let result = scheduler.index_paths(
            workspace(),
            paths(&["a.rs", "b.rs"]),
            Arc::new(CancellableProgress::new()),
        );

        assert!(matches!(
            result,
            Err(SchedulerError::Fatal { ref message, .. }) if message == "storage gone"
        ));
        assert_eq!(scheduler.active_jobs(), 0);
    }

    #[test]
    fn test_fatal_error_on_caller_thread() {
        let scheduler = scheduler(&[("a.rs", "fatal"), ("b.rs", "ok")], 2);
        let lock = Arc::clone(scheduler.model_lock());
        let _write = lock.write();

        let result = scheduler.index_paths(
            workspace(),
            paths(&["a.rs", "b.rs"]),
            Arc::new(CancellableProgress::new()),
        );

        assert!(matches!(result, Err(SchedulerError::Fatal { .. })));
        assert_eq!(scheduler.spawned_workers(), 0);
    }

    #[test]
    fn test_empty_job_returns_immediately() {
        let scheduler = scheduler(&[], 2);
        let stats = scheduler
            .index_paths(workspace(), Vec::new(), Arc::new(CancellableProgress::new()))
            .unwrap();

        assert_eq!(stats.files_total, 0);
        assert_eq!(scheduler.spawned_workers(), 0);
    }

    #[test]
    fn test_shutdown_rejects_new_jobs() {
        let scheduler = scheduler(&[("a.rs", "ok")], 1);
        scheduler
            .index_paths(workspace(), paths(&["a.rs"]), Arc::new(CancellableProgress::new()))
            .unwrap();

        scheduler.shutdown();
        assert_eq!(scheduler.running_workers(), 0);

        let result =
            scheduler.index_paths(workspace(), paths(&["a.rs"]), Arc::new(CancellableProgress::new()));
        assert!(matches!(result, Err(SchedulerError::ShutDown)));
    }

    #[test]
    fn test_loader_panic_counts_as_error() {
        struct PanickyLoader;

        impl ContentLoader for PanickyLoader {
            fn too_large_length(&self, _path: &Path) -> Option<u64> {
                None
            }

            fn load(
                &self,
                path: &Path,
                _preferred: Option<&WorkspaceId>,
            ) -> Result<ContentHandle, LoadError> {
                if path == Path::new("boom.rs") {
                    panic!("loader exploded");
                }
                Ok(ContentHandle::from_bytes(path, b"ok".to_vec()))
            }
        }

        let scheduler = Scheduler::new(
            SchedulerConfig::default()
                .with_parallelism(1)
                .with_poll_interval(Duration::from_millis(5)),
            Arc::new(PanickyLoader),
            Arc::new(Scripted),
            Arc::new(ModelLock::new()),
        );

        let stats = scheduler
            .index_paths(
                workspace(),
                paths(&["a.rs", "boom.rs", "c.rs"]),
                Arc::new(CancellableProgress::new()),
            )
            .unwrap();

        assert_eq!(stats.files_processed, 3);
        assert_eq!(stats.files_indexed, 2);
        assert_eq!(stats.index_errors, paths(&["boom.rs"]));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
    }
}
