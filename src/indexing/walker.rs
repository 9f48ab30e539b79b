//! File discovery for the `index` command.
//!
//! Respects `.gitignore`, `.git/info/exclude`, a `.cindexignore` file and
//! the configured `indexing.ignore_patterns`.

use crate::Settings;
use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const IGNORE_FILE: &str = ".cindexignore";

/// Walks directories to find files to hand to the scheduler
pub struct FileWalker {
    settings: Arc<Settings>,
}

impl FileWalker {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Walk `root` and yield every indexable file path.
    ///
    /// A `root` that is itself a file is yielded as is.
    pub fn walk(&self, root: &Path) -> impl Iterator<Item = PathBuf> + use<> {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false)
            .add_custom_ignore_filename(IGNORE_FILE);

        // Overrides are whitelists, so exclusions need the `!` prefix
        let mut overrides = OverrideBuilder::new(root);
        for pattern in &self.settings.indexing.ignore_patterns {
            if let Err(e) = overrides.add(&format!("!{pattern}")) {
                tracing::warn!(target: "cli", "invalid ignore pattern '{pattern}': {e}");
            }
        }
        match overrides.build() {
            Ok(overrides) => {
                builder.overrides(overrides);
            }
            Err(e) => tracing::warn!(target: "cli", "ignoring ignore_patterns: {e}"),
        }

        builder
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!(target: "cli", "skipping unreadable entry: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|entry| {
                !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with('.'))
            })
            .map(|entry| entry.into_path())
    }

    /// Walk several roots, keeping first-seen order.
    pub fn walk_all(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        roots.iter().flat_map(|root| self.walk(root)).collect()
    }
}
