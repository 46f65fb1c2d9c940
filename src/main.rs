//! hivecache CLI
//!
//! Entry point for the `hivecache` command-line tool.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use hivecache::archive::CacheArchive;
use hivecache::config::Options;
use hivecache::pool::Orchestrator;
use hivecache::signal::ShutdownFlag;
use hivecache::store::DirStore;
use hivecache::sync::Synchronizer;
use hivecache::worker::IdlePipelineFactory;

#[derive(Parser)]
#[command(name = "hivecache")]
#[command(about = "Worker pool with a store-synchronized shared cache", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool and its cache synchronization rounds
    Run(RunArgs),

    /// List the entries of a cache archive
    InspectArchive {
        /// Path to the archive file
        archive: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to a TOML config file
    #[arg(long, short = 'c', env = "HIVECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum number of workers (0 = all CPUs)
    #[arg(long, env = "HIVECACHE_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Seconds between cache synchronizations
    #[arg(long, env = "HIVECACHE_SYNC_INTERVAL")]
    sync_interval: Option<u64>,

    /// Store bucket holding the cache archive
    #[arg(long, env = "HIVECACHE_BUCKET")]
    bucket: Option<String>,

    /// Object key of the cache archive
    #[arg(long, env = "HIVECACHE_ARCHIVE_KEY")]
    key: Option<String>,

    /// Store endpoint (directory root in local mode)
    #[arg(long, env = "HIVECACHE_ENDPOINT")]
    endpoint: Option<String>,

    /// Store region
    #[arg(long, env = "HIVECACHE_REGION")]
    region: Option<String>,

    /// Pre-seeded backup archive used when the store is empty
    #[arg(long, env = "HIVECACHE_BACKUP_ARCHIVE")]
    backup_archive: Option<PathBuf>,

    /// Root directory for replicas and the local archive
    #[arg(long, env = "HIVECACHE_WORK_ROOT")]
    work_root: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_pool(args),
        Commands::InspectArchive { archive } => inspect_archive(archive),
    }
}

fn run_pool(args: RunArgs) -> ExitCode {
    let mut options = match Options::load(args.config.as_deref()) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("config error: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(value) = args.max_workers {
        options.max_workers = value;
    }
    if let Some(value) = args.sync_interval {
        options.sync_interval_seconds = value;
    }
    if let Some(value) = args.bucket {
        options.store.bucket = value;
    }
    if let Some(value) = args.key {
        options.store.key = value;
    }
    if let Some(value) = args.endpoint {
        options.store.endpoint = value;
    }
    if let Some(value) = args.region {
        options.store.region = value;
    }
    if let Some(value) = args.backup_archive {
        options.backup_archive = Some(value);
    }
    if let Some(value) = args.work_root {
        options.work_root = Some(value);
    }
    if let Err(err) = options.validate() {
        eprintln!("config error: {err}");
        return ExitCode::FAILURE;
    }

    let store_root = PathBuf::from(&options.store.endpoint).join(&options.store.bucket);
    let store = match DirStore::new(store_root) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("failed to open archive store: {err}");
            return ExitCode::FAILURE;
        }
    };

    let work_root = options.resolve_work_root();
    if let Err(err) = std::fs::create_dir_all(&work_root) {
        eprintln!("failed to create work root {}: {err}", work_root.display());
        return ExitCode::FAILURE;
    }
    let archive_path = work_root.join(&options.store.key);

    let mut synchronizer = Synchronizer::new(store, options.store.key.clone(), archive_path);
    if let Some(backup) = &options.backup_archive {
        synchronizer = synchronizer.with_backup(backup.clone());
    }

    let shutdown = ShutdownFlag::new();
    if let Err(err) = shutdown.install() {
        eprintln!("failed to install signal handler: {err}");
        return ExitCode::FAILURE;
    }

    let factory = IdlePipelineFactory::new(Duration::from_millis(500));
    let mut orchestrator = Orchestrator::new(options, synchronizer, factory, shutdown);
    match orchestrator.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pool error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn inspect_archive(path: PathBuf) -> ExitCode {
    match CacheArchive::open(&path).and_then(|archive| archive.entry_names()) {
        Ok(names) => {
            for name in names {
                println!("{name}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("failed to read archive: {err}");
            ExitCode::FAILURE
        }
    }
}
