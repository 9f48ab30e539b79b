//! Shared registry of jobs currently served by the worker pool.

use super::job::IndexingJob;
use super::types::JobId;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct JobRegistry {
    jobs: Mutex<Vec<Arc<IndexingJob>>>,
}

impl JobRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, job: Arc<IndexingJob>) {
        job.mark_registered();
        self.jobs.lock().push(job);
    }

    /// Remove a job. Safe to call from several workers; only the first call returns true.
    pub(crate) fn remove(&self, id: JobId) -> bool {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|job| job.id() != id);
        jobs.len() != before
    }

    /// Registration-ordered copy for a fairness pass.
    pub(crate) fn snapshot(&self) -> Vec<Arc<IndexingJob>> {
        self.jobs.lock().clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::progress::CancellableProgress;
    use crate::indexing::scheduler::job::FileQueue;
    use crate::indexing::workspace::LocalWorkspace;
    use std::path::PathBuf;

    fn job(id: u64) -> Arc<IndexingJob> {
        Arc::new(IndexingJob::new(
            JobId(id),
            Arc::new(LocalWorkspace::new("ws", "/tmp")),
            Arc::new(FileQueue::new(vec![PathBuf::from("f")])),
            Arc::new(CancellableProgress::new()),
        ))
    }

    #[test]
    fn test_register_and_snapshot_order() {
        let registry = JobRegistry::new();
        registry.register(job(1));
        registry.register(job(2));

        let ids: Vec<_> = registry.snapshot().iter().map(|j| j.id()).collect();
        assert_eq!(ids, vec![JobId(1), JobId(2)]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = JobRegistry::new();
        registry.register(job(1));

        assert!(registry.remove(JobId(1)));
        assert!(!registry.remove(JobId(1)));
        assert!(registry.is_empty());
    }
}
