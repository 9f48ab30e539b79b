//! Per-job statistics collection and reporting.
//!
//! Workers feed one record per file into [`JobStatistics`]; the submitter
//! gets the final value back from [`Scheduler::index_files`](super::Scheduler::index_files).

use super::types::FileOutcome;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A file that exceeded the indexability limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TooLargeFile {
    pub path: PathBuf,
    pub length: u64,
}

/// Totals for one file extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionStats {
    pub files: usize,
    pub bytes: u64,
    #[serde(with = "duration_ms")]
    pub processing_time: Duration,
}

/// Accumulated outcome of one indexing job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatistics {
    pub workspace: String,
    /// Files handed to the job
    pub files_total: usize,
    /// Files that went through the loader: indexed, up to date, skipped,
    /// failed to load or failed to index
    pub files_processed: usize,
    pub files_indexed: usize,
    pub files_up_to_date: usize,
    pub files_skipped: usize,
    pub too_large: Vec<TooLargeFile>,
    pub failed_to_load: Vec<PathBuf>,
    pub index_errors: Vec<PathBuf>,
    pub bytes_indexed: u64,
    #[serde(with = "duration_ms")]
    pub loading_time: Duration,
    #[serde(with = "duration_ms")]
    pub processing_time: Duration,
    #[serde(with = "duration_ms")]
    pub wall_time: Duration,
    pub by_extension: BTreeMap<String, ExtensionStats>,
}

impl JobStatistics {
    pub fn new(workspace: impl Into<String>, files_total: usize) -> Self {
        Self {
            workspace: workspace.into(),
            files_total,
            ..Self::default()
        }
    }

    pub fn record_too_large(&mut self, path: &Path, length: u64) {
        self.too_large.push(TooLargeFile {
            path: path.to_path_buf(),
            length,
        });
    }

    pub fn record_failed_to_load(&mut self, path: &Path, loading_time: Duration) {
        self.files_processed += 1;
        self.loading_time += loading_time;
        self.failed_to_load.push(path.to_path_buf());
    }

    pub fn record_index_error(&mut self, path: &Path, loading_time: Duration) {
        self.files_processed += 1;
        self.loading_time += loading_time;
        self.index_errors.push(path.to_path_buf());
    }

    pub fn record_file(
        &mut self,
        path: &Path,
        length: u64,
        outcome: FileOutcome,
        loading_time: Duration,
        processing_time: Duration,
    ) {
        self.files_processed += 1;
        self.loading_time += loading_time;
        self.processing_time += processing_time;

        match outcome {
            FileOutcome::Indexed => {
                self.files_indexed += 1;
                self.bytes_indexed += length;
            }
            FileOutcome::UpToDate => self.files_up_to_date += 1,
            FileOutcome::Skipped => self.files_skipped += 1,
        }

        let entry = self.by_extension.entry(extension_key(path)).or_default();
        entry.files += 1;
        entry.bytes += length;
        entry.processing_time += processing_time;
    }

    /// Files accounted for in any way.
    pub fn files_accounted(&self) -> usize {
        self.files_processed + self.too_large.len()
    }

    /// Indexing throughput (files per second of wall time).
    pub fn throughput(&self) -> f64 {
        let secs = self.wall_time.as_secs_f64();
        if secs > 0.0 {
            self.files_processed as f64 / secs
        } else {
            0.0
        }
    }

    /// Log the summary using tracing.
    pub fn log(&self) {
        tracing::info!(target: "scheduler", "========================================");
        tracing::info!(target: "scheduler", "INDEXING SUMMARY: {}", self.workspace);
        tracing::info!(target: "scheduler", "========================================");
        tracing::info!(target: "scheduler",
            "Files: {} total | {} processed | {} indexed | {} up to date | {} skipped",
            self.files_total,
            self.files_processed,
            self.files_indexed,
            self.files_up_to_date,
            self.files_skipped
        );
        tracing::info!(target: "scheduler",
            "Load: {:.2}s | Index: {:.2}s | Wall: {:.2}s ({:.0} files/s) | {} indexed",
            self.loading_time.as_secs_f64(),
            self.processing_time.as_secs_f64(),
            self.wall_time.as_secs_f64(),
            self.throughput(),
            format_bytes(self.bytes_indexed)
        );

        if !self.by_extension.is_empty() {
            tracing::info!(target: "scheduler", "{:<10} {:>8} {:>10} {:>10}", "Ext", "Files", "Bytes", "Time");
            tracing::info!(target: "scheduler", "{}", "-".repeat(41));
            for (ext, stats) in &self.by_extension {
                tracing::info!(target: "scheduler",
                    "{:<10} {:>8} {:>10} {:>10}",
                    ext,
                    stats.files,
                    format_bytes(stats.bytes),
                    format!("{:.2}s", stats.processing_time.as_secs_f64())
                );
            }
        }

        for file in &self.too_large {
            tracing::info!(target: "scheduler",
                "too large: {} ({})",
                file.path.display(),
                format_bytes(file.length)
            );
        }
        if !self.failed_to_load.is_empty() {
            tracing::warn!(target: "scheduler", "{} files failed to load", self.failed_to_load.len());
        }
        if !self.index_errors.is_empty() {
            tracing::warn!(target: "scheduler", "{} files failed to index", self.index_errors.len());
        }
    }
}

fn extension_key(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "(none)".to_string())
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let mut stats = JobStatistics::new("ws", 5);
        let ms = Duration::from_millis;

        stats.record_file(Path::new("a.rs"), 10, FileOutcome::Indexed, ms(1), ms(2));
        stats.record_file(Path::new("b.RS"), 20, FileOutcome::UpToDate, ms(1), ms(2));
        stats.record_file(Path::new("Makefile"), 5, FileOutcome::Skipped, ms(1), ms(2));
        stats.record_failed_to_load(Path::new("c.rs"), ms(1));
        stats.record_too_large(Path::new("d.bin"), 1 << 30);

        assert_eq!(stats.files_processed, 4);
        assert_eq!(stats.files_accounted(), 5);
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(stats.files_up_to_date, 1);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.bytes_indexed, 10);
        assert_eq!(stats.loading_time, ms(4));
        assert_eq!(stats.processing_time, ms(6));

        assert_eq!(stats.by_extension["rs"].files, 2);
        assert_eq!(stats.by_extension["rs"].bytes, 30);
        assert_eq!(stats.by_extension["(none)"].files, 1);
    }

    #[test]
    fn test_serializes_durations_as_millis() {
        let mut stats = JobStatistics::new("ws", 1);
        stats.wall_time = Duration::from_millis(1500);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["wall_time"], 1500);
        assert_eq!(json["workspace"], "ws");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500B");
        assert_eq!(format_bytes(1500), "1.5KB");
        assert_eq!(format_bytes(1_500_000), "1.4MB");
        assert_eq!(format_bytes(1_500_000_000), "1.4GB");
    }
}
