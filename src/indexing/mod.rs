pub mod content;
pub mod digest;
pub mod lock;
pub mod progress;
pub mod scheduler;
pub mod walker;
pub mod workspace;

pub use content::{ContentHandle, ContentLoader, FsContentLoader};
pub use digest::{ContentDigest, DigestIndexer, content_digest, digest_hex};
pub use lock::{ModelLock, ModelWriteGuard};
pub use progress::{CancellableProgress, ProgressIndicator};
pub use scheduler::{
    FileOutcome, FileQueue, IndexingStep, JobId, JobStatistics, LoadError, LoadFailure,
    MemoryBudget, Scheduler, SchedulerConfig, SchedulerError, SchedulerResult, Severity,
    StepError,
};
pub use walker::FileWalker;
pub use workspace::{LocalWorkspace, Workspace, WorkspaceId};
