//! Content digest indexing step.
//!
//! Stores a SHA-256 digest per file and reports files whose digest did not
//! change as up to date. The CLI uses it to index a tree; callers embedding
//! the scheduler provide their own [`IndexingStep`].

use crate::indexing::content::ContentHandle;
use crate::indexing::scheduler::{FileOutcome, IndexingStep, StepError};
use crate::indexing::workspace::Workspace;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub type ContentDigest = [u8; 32];

/// Compute the SHA-256 digest of `bytes`.
pub fn content_digest(bytes: &[u8]) -> ContentDigest {
    Sha256::digest(bytes).into()
}

/// Lowercase hex rendering of a digest.
pub fn digest_hex(digest: &ContentDigest) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Concurrent `path -> digest` index.
#[derive(Debug, Default)]
pub struct DigestIndexer {
    digests: DashMap<PathBuf, ContentDigest>,
}

impl DigestIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn digest(&self, path: &Path) -> Option<ContentDigest> {
        self.digests.get(path).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Forget a file so the next run indexes it again.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.digests.remove(path).is_some()
    }
}

impl IndexingStep for DigestIndexer {
    fn index(
        &self,
        _workspace: &dyn Workspace,
        content: &ContentHandle,
    ) -> Result<FileOutcome, StepError> {
        if content.is_directory() {
            return Ok(FileOutcome::Skipped);
        }

        let digest = content_digest(content.bytes());
        let previous = self.digests.insert(content.path().to_path_buf(), digest);

        if previous == Some(digest) {
            Ok(FileOutcome::UpToDate)
        } else {
            tracing::trace!(
                target: "scheduler",
                "{} -> {}",
                content.path().display(),
                digest_hex(&digest)
            );
            Ok(FileOutcome::Indexed)
        }
    }
}
