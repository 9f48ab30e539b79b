//! Scheduler configuration
//!
//! Controls pool size, memory budget and polling cadence.
//! Reads from Settings (.cindex/settings.toml).

use crate::Settings;
use std::time::Duration;

/// Configuration for the indexing scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads shared by all jobs (default: CPU count)
    pub parallelism: usize,

    /// Soft ceiling on file content bytes held by workers
    pub memory_budget_bytes: u64,

    /// Indexability limit handed to the bundled file system loader
    pub max_file_size_bytes: u64,

    /// Cancellation check period for blocked submitters and budget waiters
    pub poll_interval: Duration,

    /// Worker sleep between fairness passes that found no file
    pub idle_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl SchedulerConfig {
    /// Create config from Settings.
    ///
    /// Reads from .cindex/settings.toml:
    /// - `indexing.parallel_threads` -> parallelism
    /// - `indexing.memory_budget_bytes` -> memory_budget_bytes
    /// - `indexing.max_file_size_bytes` -> max_file_size_bytes
    /// - `indexing.poll_interval_ms` -> poll_interval
    /// - `indexing.idle_backoff_ms` -> idle_backoff
    pub fn from_settings(settings: &Settings) -> Self {
        let indexing = &settings.indexing;

        Self {
            parallelism: indexing.parallel_threads.max(1),
            memory_budget_bytes: indexing.memory_budget_bytes.max(1),
            max_file_size_bytes: indexing.max_file_size_bytes,
            poll_interval: Duration::from_millis(indexing.poll_interval_ms.max(1)),
            idle_backoff: Duration::from_millis(indexing.idle_backoff_ms),
        }
    }

    /// Set worker count
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = threads.max(1);
        self
    }

    /// Set the soft memory ceiling. A zero ceiling would admit nothing.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = bytes.max(1);
        self
    }

    /// Set the indexability limit
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    /// Set the cancellation polling period
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the idle worker delay
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }
}
