//! File content handles and the loader contract.
//!
//! A [`ContentHandle`] is created with an authoritative length and reads its
//! bytes lazily, at most once. If the file vanished or became unreadable
//! between creation and the first read, the handle resolves to an empty
//! buffer instead of failing: the indexing step sees an empty file.

use crate::indexing::scheduler::types::{LoadError, LoadFailure};
use crate::indexing::workspace::WorkspaceId;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

#[derive(Debug)]
enum Source {
    Disk,
    Memory,
    Empty,
}

/// Lazily loaded, cached view over one file's bytes and metadata.
#[derive(Debug)]
pub struct ContentHandle {
    path: PathBuf,
    length: u64,
    directory: bool,
    source: Source,
    bytes: OnceLock<Vec<u8>>,
    modified: OnceLock<Option<SystemTime>>,
    writable: OnceLock<bool>,
}

impl ContentHandle {
    /// Handle over a file on disk. `length` is taken as authoritative.
    pub fn from_disk(path: impl Into<PathBuf>, length: u64) -> Self {
        Self::with_source(path.into(), length, Source::Disk)
    }

    /// Handle over bytes already in memory (archive entries, tests).
    ///
    /// The buffer is owned by the handle as its loaded content.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        let mut handle = Self::with_source(path.into(), bytes.len() as u64, Source::Memory);
        handle.bytes = OnceLock::from(bytes);
        handle
    }

    /// Explicitly empty handle for directories, special files and broken links.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self::with_source(path.into(), 0, Source::Empty)
    }

    /// Empty handle that represents a directory.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        let mut handle = Self::empty(path);
        handle.directory = true;
        handle
    }

    fn with_source(path: PathBuf, length: u64, source: Source) -> Self {
        Self {
            path,
            length,
            directory: false,
            source,
            bytes: OnceLock::new(),
            modified: OnceLock::new(),
            writable: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length captured at creation time, used for memory budgeting.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    /// File content, read on first access.
    pub fn bytes(&self) -> &[u8] {
        self.bytes.get_or_init(|| match &self.source {
            Source::Disk => fs::read(&self.path).unwrap_or_else(|e| {
                tracing::debug!(
                    target: "loader",
                    "{} became unreadable before indexing ({e}), using empty content",
                    self.path.display()
                );
                Vec::new()
            }),
            Source::Memory | Source::Empty => Vec::new(),
        })
    }

    /// Whether the content has already been materialized.
    pub fn is_loaded(&self) -> bool {
        self.bytes.get().is_some()
    }

    /// Content as UTF-8 text, lossily converted.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.bytes())
    }

    /// Last modification time, cached after the first call.
    pub fn modified(&self) -> Option<SystemTime> {
        *self.modified.get_or_init(|| match self.source {
            Source::Disk => fs::metadata(&self.path).and_then(|m| m.modified()).ok(),
            _ => None,
        })
    }

    /// Writability flag, cached after the first call.
    pub fn is_writable(&self) -> bool {
        *self.writable.get_or_init(|| match self.source {
            Source::Disk => fs::metadata(&self.path)
                .map(|m| !m.permissions().readonly())
                .unwrap_or(false),
            _ => false,
        })
    }
}

/// Produces content handles for the scheduler.
pub trait ContentLoader: Send + Sync {
    /// Cheap size check made before loading. Returns the file length when it
    /// exceeds the indexability limit; such files never reach [`load`](Self::load).
    fn too_large_length(&self, path: &Path) -> Option<u64>;

    fn is_too_large(&self, path: &Path) -> bool {
        self.too_large_length(path).is_some()
    }

    /// Build a handle for `path`. `preferred` names the workspace asking,
    /// for loaders that resolve files shared between workspaces.
    fn load(
        &self,
        path: &Path,
        preferred: Option<&WorkspaceId>,
    ) -> Result<ContentHandle, LoadError>;
}

/// Loads content straight from the local file system.
#[derive(Debug, Clone)]
pub struct FsContentLoader {
    max_file_size: u64,
}

impl FsContentLoader {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn classify(&self, path: &Path, meta: &Metadata) -> Result<ContentHandle, LoadError> {
        let file_type = meta.file_type();
        if file_type.is_dir() {
            return Ok(ContentHandle::directory(path));
        }
        if !file_type.is_file() {
            // Sockets, fifos, devices
            return Ok(ContentHandle::empty(path));
        }
        if meta.len() > self.max_file_size {
            return Err(LoadError::TooLarge {
                path: path.to_path_buf(),
                length: meta.len(),
                limit: self.max_file_size,
            });
        }
        Ok(ContentHandle::from_disk(path, meta.len()))
    }
}

impl ContentLoader for FsContentLoader {
    fn too_large_length(&self, path: &Path) -> Option<u64> {
        fs::metadata(path)
            .ok()
            .filter(|m| m.is_file() && m.len() > self.max_file_size)
            .map(|m| m.len())
    }

    fn load(
        &self,
        path: &Path,
        _preferred: Option<&WorkspaceId>,
    ) -> Result<ContentHandle, LoadError> {
        match fs::metadata(path) {
            Ok(meta) => self.classify(path, &meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // A dangling symlink still has link metadata
                if fs::symlink_metadata(path).is_ok() {
                    Ok(ContentHandle::empty(path))
                } else {
                    Err(LoadError::failed(path, LoadFailure::Missing))
                }
            }
            Err(e) => Err(LoadError::failed(path, e)),
        }
    }
}
