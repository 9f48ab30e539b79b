pub mod config;
pub mod indexing;
pub mod logging;

pub use config::{ConfigError, Settings};
pub use indexing::{
    CancellableProgress, ContentHandle, ContentLoader, DigestIndexer, FileOutcome, FileQueue,
    FsContentLoader, IndexingStep, JobStatistics, LoadError, LocalWorkspace, ModelLock,
    ProgressIndicator, Scheduler, SchedulerConfig, SchedulerError, SchedulerResult, StepError,
    Workspace, WorkspaceId,
};
