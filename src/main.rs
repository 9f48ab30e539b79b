use anyhow::Context;
use clap::{Parser, Subcommand};
use content_indexer::indexing::scheduler::metrics::format_bytes;
use content_indexer::indexing::{
    CancellableProgress, DigestIndexer, FileWalker, JobStatistics, LocalWorkspace,
    ProgressIndicator, Scheduler, SchedulerConfig,
};
use content_indexer::{Settings, logging};
use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cindex")]
#[command(about = "Index file content with a memory-bounded worker pool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Index files and directories
    Index {
        /// Files or directories to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Number of worker threads (overrides config)
        #[arg(short, long, env = "CINDEX_THREADS")]
        threads: Option<usize>,

        /// Soft ceiling on file bytes held in memory (overrides config)
        #[arg(long)]
        memory_budget: Option<u64>,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show current configuration
    Config,
}

/// Terminal progress bar driven by the scheduler.
struct BarProgress {
    bar: ProgressBar,
    cancel: CancellableProgress,
}

const BAR_SCALE: u64 = 1000;

impl BarProgress {
    fn new() -> anyhow::Result<Self> {
        let bar = ProgressBar::new(BAR_SCALE);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] {bar:40} {percent:>3}% {wide_msg}",
            )
            .context("invalid progress template")?,
        );
        Ok(Self {
            bar,
            cancel: CancellableProgress::new(),
        })
    }
}

impl ProgressIndicator for BarProgress {
    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    fn set_fraction(&self, fraction: f64) {
        self.bar.set_position((fraction * BAR_SCALE as f64) as u64);
    }

    fn set_text(&self, text: &str) {
        self.bar.set_message(text.to_string());
    }
}

fn main() {
    let cli = Cli::parse();

    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        eprintln!("Using default configuration for now.");
        Settings::default()
    });

    logging::init_with_config(&settings.logging);

    if let Err(e) = run(cli.command, settings) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(command: Commands, mut settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Init { force } => {
            let root = std::env::current_dir().context("cannot read current directory")?;
            let path = Settings::init_config_file(&root, force)?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
        }

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Index {
            paths,
            threads,
            memory_budget,
            json,
        } => {
            if let Some(threads) = threads {
                settings.indexing.parallel_threads = threads;
            }
            if let Some(bytes) = memory_budget {
                settings.indexing.memory_budget_bytes = bytes;
            }
            let stats = index(paths, Arc::new(settings), json)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_summary(&stats);
            }
        }
    }
    Ok(())
}

fn index(
    paths: Vec<PathBuf>,
    settings: Arc<Settings>,
    json: bool,
) -> anyhow::Result<JobStatistics> {
    let root = match &settings.workspace_root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("cannot read current directory")?,
    };
    let workspace = Arc::new(LocalWorkspace::from_root(root));

    let files = FileWalker::new(Arc::clone(&settings)).walk_all(&paths);
    tracing::info!(target: "cli", "discovered {} files under {} paths", files.len(), paths.len());

    let scheduler = Scheduler::with_fs_loader(
        SchedulerConfig::from_settings(&settings),
        Arc::new(DigestIndexer::new()),
    );

    let bar = if !json && std::io::stderr().is_terminal() {
        Some(Arc::new(BarProgress::new()?))
    } else {
        None
    };
    let progress: Arc<dyn ProgressIndicator> = match &bar {
        Some(bar) => Arc::clone(bar) as Arc<dyn ProgressIndicator>,
        None => Arc::new(CancellableProgress::new()),
    };

    let result = scheduler.index_paths(workspace, files, progress);
    if let Some(bar) = &bar {
        bar.bar.finish_and_clear();
    }

    let stats = result.context("indexing failed")?;
    stats.log();
    Ok(stats)
}

fn print_summary(stats: &JobStatistics) {
    println!(
        "Indexed {} files in {:.2}s ({:.0} files/s)",
        stats.files_processed,
        stats.wall_time.as_secs_f64(),
        stats.throughput()
    );
    println!(
        "  {} indexed, {} up to date, {} skipped, {}",
        stats.files_indexed,
        stats.files_up_to_date,
        stats.files_skipped,
        format_bytes(stats.bytes_indexed)
    );
    if !stats.too_large.is_empty() {
        println!("  {} too large:", stats.too_large.len());
        for file in &stats.too_large {
            println!("    {} ({})", file.path.display(), format_bytes(file.length));
        }
    }
    if !stats.failed_to_load.is_empty() {
        println!("  {} failed to load", stats.failed_to_load.len());
    }
    if !stats.index_errors.is_empty() {
        println!("  {} failed to index", stats.index_errors.len());
    }
}
