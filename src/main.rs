// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Stowage: hot-folder intake and auto-sorting
//!
//! Stage files from a hot folder, classify them, and commit them into a
//! dated folder tree.

use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

use stowage::classifier::AiClassifier;
use stowage::config::AppConfig;
use stowage::db::{Database, ItemFilter, ItemStore};
use stowage::history::History;
use stowage::item::{Item, ItemStatus};
use stowage::ollama::OllamaClassifier;
use stowage::pipeline::{CancelToken, CommitReport, Pipeline};
use stowage::watcher::{should_process, wait_for_stable, HotFolderWatcher, IgnoreList, WatchEvent};
use stowage::{Result, StowageError};

/// Stowage CLI - hot-folder intake and auto-sorting
#[derive(Parser, Debug)]
#[command(name = "stowage")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Stage, classify and file documents dropped into a hot folder", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record files (or the files in directories) as inbox items
    Stage {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Classify files and move them to staging
    Classify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Transfer every staged item to its planned destination
    Commit,

    /// Stage, classify and commit everything in the hot folder once
    Run {
        /// Folder to sweep (overrides config)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Classify only, leave items staged
        #[arg(long)]
        no_commit: bool,
    },

    /// Watch the hot folder and stage new files as they arrive
    Watch {
        /// Folder to watch (overrides config)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Classify and commit each file once staged (overrides config)
        #[arg(long)]
        auto_commit: bool,

        /// Skip the AI engine health check on startup
        #[arg(long)]
        skip_health_check: bool,

        /// Process existing files in the folder on startup
        #[arg(long)]
        process_existing: bool,
    },

    /// Item store operations
    Items {
        #[command(subcommand)]
        action: ItemsCommands,
    },

    /// Commit journal and undo
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show AI engine and store status
    Status,

    /// Initialize a hot folder, sorted root and config file
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ItemsCommands {
    /// List items, newest first
    List {
        /// Only these statuses (repeatable)
        #[arg(short, long)]
        status: Vec<String>,

        /// Only items carrying this tag
        #[arg(long, conflicts_with = "status")]
        tag: Option<String>,

        /// Only items created on or after this date (YYYY-MM-DD)
        #[arg(long, conflicts_with_all = ["status", "tag"])]
        since: Option<String>,

        /// Maximum number to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// List distinct projects, most recent first
    Projects {
        /// Case-insensitive substring filter
        filter: Option<String>,
    },

    /// Forget items whose file no longer exists
    Purge,

    /// Set the status of a tracked file
    Reset {
        path: PathBuf,

        /// New status (inbox, autosort-staging, auto-sorted, committed, blacklist, error)
        #[arg(default_value = "inbox")]
        status: String,
    },

    /// Exclude a file from sorting
    Blacklist { path: PathBuf },

    /// Show item counts per status
    Stats,

    /// Vacuum database (reclaim space)
    Vacuum,
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent commits
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// Undo recent commits
    Undo {
        /// Number of commits to undo
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Dry run (show what would be undone)
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear all history
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    let format = cli.format.as_str();

    match cli.command {
        Some(Commands::Stage { paths }) => run_stage(config, paths, format).await,
        Some(Commands::Classify { paths }) => run_classify(config, paths, format).await,
        Some(Commands::Commit) => run_commit(config, format).await,
        Some(Commands::Run { dir, no_commit }) => run_sweep(config, dir, no_commit, format).await,
        Some(Commands::Watch { dir, auto_commit, skip_health_check, process_existing }) => {
            run_watch(config, dir, auto_commit, skip_health_check, process_existing).await
        }
        Some(Commands::Items { action }) => run_items_command(config, action, format),
        Some(Commands::History { action }) => run_history_command(config, action, format).await,
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        Some(Commands::Status) => run_status(config).await,
        Some(Commands::Init { dir, force }) => run_init(dir, force),
        None => run_watch(config, None, false, false, false).await,
    }
}

/// `config validate` reports parse errors; every other command falls back
/// to defaults with a warning
fn load_config(cli: &Cli) -> Result<AppConfig> {
    match &cli.command {
        Some(Commands::Config { action: ConfigCommands::Validate }) => AppConfig::load(&cli.config),
        _ => Ok(AppConfig::load_or_default(&cli.config)),
    }
}

/// Open the store and wire up the pipeline, with the AI step when enabled
fn open_pipeline(config: &AppConfig) -> Result<Pipeline> {
    let db = Database::open(&config.database.path)?;
    debug!("Database opened: {}", config.database.path);

    let ai: Option<Arc<dyn AiClassifier>> = if config.classification.ai.enabled {
        Some(Arc::new(OllamaClassifier::new(&config.classification.ai)?))
    } else {
        None
    };

    Ok(Pipeline::new(config, db, ai).with_history(History::new(PathBuf::from(&config.history.path))))
}

/// Cancellation token flipped by Ctrl+C or SIGTERM
fn shutdown_token() -> CancelToken {
    let (tx, token) = CancelToken::channel();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = terminate => info!("Received SIGTERM, shutting down..."),
        }

        let _ = tx.send(true);
    });

    token
}

/// Files named on the command line; directories contribute their direct
/// children that pass the ignore rules
fn collect_files(paths: &[PathBuf], ignore: &IgnoreList) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            match std::fs::read_dir(path) {
                Ok(entries) => {
                    let mut found: Vec<PathBuf> = entries
                        .flatten()
                        .map(|e| e.path())
                        .filter(|p| p.is_file() && should_process(p, ignore))
                        .collect();
                    found.sort();
                    files.extend(found);
                }
                Err(e) => warn!("Cannot read {:?}: {}", path, e),
            }
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn print_items(items: &[Item], format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(items)?),
        "jsonl" => {
            for item in items {
                println!("{}", serde_json::to_string(item)?);
            }
        }
        _ => {
            for item in items {
                println!(
                    "{:<17} {:>4.0}%  {:<14} {:<10} {}",
                    item.status.as_str(),
                    item.confidence * 100.0,
                    if item.category.is_empty() { "-" } else { &item.category },
                    if item.project.is_empty() { "-" } else { &item.project },
                    item.path.display()
                );
            }
        }
    }
    Ok(())
}

fn print_commit_report(report: &CommitReport, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(report)?),
        "jsonl" => println!("{}", serde_json::to_string(report)?),
        _ => {
            println!(
                "Committed {}, missing {}, skipped {}, deferred {}, failed {}{}",
                report.committed,
                report.missing,
                report.skipped,
                report.deferred,
                report.failed,
                if report.cancelled { " (cancelled)" } else { "" }
            );
        }
    }
    Ok(())
}

async fn run_stage(config: AppConfig, paths: Vec<PathBuf>, format: &str) -> Result<()> {
    let pipeline = open_pipeline(&config)?;
    let ignore = IgnoreList::new(&config.watcher.ignore_patterns);
    let cancel = shutdown_token();

    let mut staged = Vec::new();
    for file in collect_files(&paths, &ignore) {
        match pipeline.stage_only(&file, &cancel).await {
            Ok(Some(item)) => staged.push(item),
            Ok(None) => debug!("Not staged: {:?}", file),
            Err(e) => error!("Failed to stage {:?}: {}", file, e),
        }
    }
    print_items(&staged, format)
}

async fn run_classify(config: AppConfig, paths: Vec<PathBuf>, format: &str) -> Result<()> {
    let pipeline = open_pipeline(&config)?;
    let ignore = IgnoreList::new(&config.watcher.ignore_patterns);
    let cancel = shutdown_token();

    let mut classified = Vec::new();
    for file in collect_files(&paths, &ignore) {
        match pipeline.classify_only(&file, &cancel).await {
            Ok(Some(item)) => classified.push(item),
            Ok(None) => debug!("Not classified: {:?}", file),
            Err(e) => error!("Failed to classify {:?}: {}", file, e),
        }
    }
    print_items(&classified, format)
}

async fn run_commit(config: AppConfig, format: &str) -> Result<()> {
    let pipeline = open_pipeline(&config)?;
    let report = pipeline.commit_pending(&shutdown_token()).await?;
    print_commit_report(&report, format)
}

/// One pass over the hot folder
async fn run_sweep(config: AppConfig, dir: Option<PathBuf>, no_commit: bool, format: &str) -> Result<()> {
    let folder = match dir.or_else(|| config.resolved_hot_folder()) {
        Some(folder) => folder,
        None => return Err(StowageError::Config("no hot folder configured".to_string())),
    };
    let pipeline = open_pipeline(&config)?;
    let ignore = IgnoreList::new(&config.watcher.ignore_patterns);
    let cancel = shutdown_token();

    info!("Sweeping {:?}", folder);
    for file in collect_files(&[folder], &ignore) {
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = pipeline.process(&file, &cancel).await {
            error!("Failed to process {:?}: {}", file, e);
        }
    }

    if no_commit {
        let staged = pipeline.store().query_by_status(ItemStatus::Staging).try_collect()?;
        return print_items(&staged, format);
    }

    let report = pipeline.commit_pending(&cancel).await?;
    print_commit_report(&report, format)
}

/// Run the watch mode (hot-folder loop)
async fn run_watch(
    config: AppConfig,
    dir: Option<PathBuf>,
    auto_commit: bool,
    skip_health_check: bool,
    process_existing: bool,
) -> Result<()> {
    let folder = match dir.or_else(|| config.resolved_hot_folder()) {
        Some(folder) => folder,
        None => return Err(StowageError::Config("no hot folder configured".to_string())),
    };
    let auto_commit = auto_commit || config.watcher.auto_commit;
    info!("Hot folder: {:?}", folder);
    if auto_commit {
        info!("Auto-commit enabled");
    }

    if config.classification.ai.enabled && !skip_health_check {
        info!("Checking AI engine availability...");
        let client = OllamaClassifier::new(&config.classification.ai)?;
        match client.health_check().await {
            Ok(()) => info!("AI engine is running"),
            Err(e) => warn!("{}; falling back to offline rules", e),
        }
    }

    let pipeline = Arc::new(open_pipeline(&config)?);
    let ignore = Arc::new(IgnoreList::new(&config.watcher.ignore_patterns));
    let stable_wait = Duration::from_secs(config.watcher.stable_wait_secs);
    let cancel = shutdown_token();

    let watcher = HotFolderWatcher::start(&folder)?;

    if process_existing {
        info!("Processing existing files...");
        for file in collect_files(&[watcher.folder().to_path_buf()], &ignore) {
            if let Err(e) = intake(&pipeline, &file, auto_commit, &cancel).await {
                error!("Failed to process {:?}: {}", file, e);
            }
        }
    }

    info!("Watching. Press Ctrl+C to stop.");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if let Some(event) = watcher.next_event(Duration::from_millis(100)) {
            match event {
                WatchEvent::Arrived(path) => {
                    if !should_process(&path, &ignore) {
                        debug!("Ignoring {:?}", path);
                        continue;
                    }
                    let pipeline = Arc::clone(&pipeline);
                    let cancel = cancel.clone();

                    tokio::spawn(async move {
                        if !wait_for_stable(&path, stable_wait).await {
                            debug!("File disappeared during stability check: {:?}", path);
                            return;
                        }
                        if let Err(e) = intake(&pipeline, &path, auto_commit, &cancel).await {
                            error!("Failed to process {:?}: {}", path, e);
                        }
                    });
                }
                WatchEvent::Removed(path) => debug!("Left hot folder: {:?}", path),
                WatchEvent::Error(e) => warn!("Watch error: {}", e),
            }
        }
    }

    info!("Stowage stopped.");
    Ok(())
}

/// Stage a new hot-folder file; with auto-commit, classify and commit it too
async fn intake(pipeline: &Pipeline, path: &Path, auto_commit: bool, cancel: &CancelToken) -> Result<()> {
    if !auto_commit {
        pipeline.stage_only(path, cancel).await?;
        return Ok(());
    }
    if pipeline.process(path, cancel).await?.is_some() {
        pipeline.commit_pending(cancel).await?;
    }
    Ok(())
}

fn parse_since(raw: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| StowageError::Config(format!("invalid date {:?}: {}", raw, e)))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| StowageError::Config(format!("invalid date {:?}", raw)))?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp())
}

/// Run item store commands
fn run_items_command(config: AppConfig, action: ItemsCommands, format: &str) -> Result<()> {
    let pipeline = open_pipeline(&config)?;
    let store = pipeline.store();

    match action {
        ItemsCommands::List { status, tag, since, limit } => {
            let filter = if let Some(tag) = tag {
                ItemFilter::Tag(tag)
            } else if let Some(since) = since {
                ItemFilter::Since(parse_since(&since)?)
            } else if !status.is_empty() {
                let statuses = status
                    .iter()
                    .map(|s| s.parse())
                    .collect::<Result<Vec<ItemStatus>>>()?;
                ItemFilter::Statuses(statuses)
            } else {
                ItemFilter::All
            };
            let items = store
                .query(filter)
                .with_page_size(limit.clamp(1, 500))
                .take(limit)
                .collect::<Result<Vec<_>>>()?;
            print_items(&items, format)?;
        }
        ItemsCommands::Projects { filter } => {
            let projects = store.query_distinct_projects(filter.as_deref())?;
            match format {
                "json" | "jsonl" => println!("{}", serde_json::to_string(&projects)?),
                _ => {
                    for project in projects {
                        println!("{}", project);
                    }
                }
            }
        }
        ItemsCommands::Purge => {
            let removed = store.purge_missing()?;
            println!("Purged {} missing items", removed);
        }
        ItemsCommands::Reset { path, status } => {
            let item = pipeline.reset(&path, status.parse()?)?;
            print_items(&[item], format)?;
        }
        ItemsCommands::Blacklist { path } => {
            let item = pipeline.blacklist(&path)?;
            print_items(&[item], format)?;
        }
        ItemsCommands::Stats => {
            let counts = store.status_counts()?;
            match format {
                "json" | "jsonl" => {
                    let map: serde_json::Map<String, serde_json::Value> = counts
                        .iter()
                        .map(|(status, n)| (status.to_string(), serde_json::Value::from(*n)))
                        .collect();
                    println!("{}", serde_json::Value::Object(map));
                }
                _ => {
                    println!("Items ({} total):", store.count()?);
                    for (status, n) in counts {
                        println!("  {:<17} {}", status.as_str(), n);
                    }
                }
            }
        }
        ItemsCommands::Vacuum => {
            store.vacuum()?;
            println!("Database vacuumed successfully");
        }
    }

    Ok(())
}

/// Run history commands
async fn run_history_command(config: AppConfig, action: HistoryCommands, format: &str) -> Result<()> {
    let history = History::new(PathBuf::from(&config.history.path));

    match action {
        HistoryCommands::List { count } => {
            let entries = history.get_recent(count)?;
            if format != "text" {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            println!("Recent history ({} entries):", entries.len());
            for entry in entries {
                let status = if entry.undone { "[UNDONE]" } else { "" };
                println!(
                    "  {} {} -> {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.original_path.display(),
                    entry.new_path.display(),
                    status
                );
            }
        }
        HistoryCommands::Undo { count, dry_run } => {
            let pipeline = open_pipeline(&config)?;
            let report = pipeline.undo_recent(count, dry_run).await?;
            match format {
                "json" | "jsonl" => println!("{}", serde_json::to_string(&report)?),
                _ => println!(
                    "{} {}, skipped {}, failed {}",
                    if dry_run { "Would undo" } else { "Undone" },
                    report.undone,
                    report.skipped,
                    report.failed
                ),
            }
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            println!("History cleared");
        }
    }

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            for pattern in &config.watcher.ignore_patterns {
                glob::Pattern::new(pattern)?;
            }
            let root = config
                .resolved_root()
                .ok_or_else(|| StowageError::Config("no root directory configured".to_string()))?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Hot folder: {:?}", config.resolved_hot_folder());
            println!("  Root: {:?}", root);
            println!("  Transfer: {:?}, conflicts: {:?}", config.transfer, config.conflict);
            println!("  Segments: {:?}", config.routing.ordered_segments());
            println!("  Database: {}", config.database.path);
        }
    }

    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    println!("Stowage v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    let ai = &config.classification.ai;
    if ai.enabled {
        let client = OllamaClassifier::new(ai)?;
        match client.health_check().await {
            Ok(()) => {
                println!("Ollama: Running");
                match client.model_available().await {
                    Ok(true) => println!("  Model {}: available", client.model()),
                    Ok(false) => println!("  Model {}: not installed", client.model()),
                    Err(e) => println!("  Error listing models: {}", e),
                }
            }
            Err(e) => println!("Ollama: Error - {}", e),
        }
    } else {
        println!("AI classification: disabled (offline rules only)");
    }

    match Database::open(&config.database.path) {
        Ok(db) => {
            println!("\nDatabase ({}):", config.database.path);
            for (status, n) in db.status_counts()? {
                println!("  {:<17} {}", status.as_str(), n);
            }
        }
        Err(e) => println!("\nDatabase: Error - {}", e),
    }

    println!("\nConfiguration:");
    println!("  Hot folder: {}", config.hot_folder);
    println!("  Root: {}", config.root_dir);
    println!("  Locked project: {}", config.locked_project.as_deref().unwrap_or("-"));

    Ok(())
}

/// Initialize a new Stowage setup
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(StowageError::Config(
            "config.json already exists. Use --force to overwrite".to_string(),
        ));
    }

    let inbox = target.join("inbox");
    let sorted = target.join("sorted");
    std::fs::create_dir_all(&inbox)?;
    std::fs::create_dir_all(&sorted)?;

    let config = AppConfig {
        hot_folder: inbox.to_string_lossy().to_string(),
        root_dir: sorted.to_string_lossy().to_string(),
        ..AppConfig::default()
    };
    config.save(&config_path)?;

    println!("Stowage initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - inbox/");
    println!("  - sorted/");
    println!("\nNext steps:");
    println!("  1. Drop files into inbox/");
    println!("  2. Start the watcher: stowage watch --auto-commit");

    Ok(())
}
