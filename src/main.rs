//! circular-watch — notifies you when new circulars are published.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────┐  Task::run  ┌──────────┐  fetch   ┌────────────┐
//! │ poll.rs  │ ──────────► │ sync.rs  │ ───────► │  source/   │
//! │(schedule)│ ◄────────── │ (engine) │          └────────────┘
//! └──────────┘ TaskResult  └──────────┘
//!                           │   │   │  diff()   ┌────────────┐
//!                           │   │   └─────────► │  diff.rs   │
//!                           │   │   build()     ┌────────────┐
//!                           │   └─────────────► │ notify.rs  │
//!                           │  read/commit      ┌────────────┐
//!                           └─────────────────► │  store.rs  │
//!                                               └────────────┘
//! ```
//!
//! * **`source/`** — the `CircularSource` trait and the RSS implementation.
//! * **`diff`** — pure novelty detection between snapshot and fetch.
//! * **`notify`** — alert content and delivery channels.
//! * **`store`** — snapshot persistence (in-memory and JSON file).
//! * **`sync`** — one fetch → diff → notify → commit cycle.
//! * **`poll`** — unique, periodic execution with retry backoff.
//! * **`config`** — user settings.
//! * **`main`** — wires everything together: parse args, load settings,
//!   and run one cycle or the periodic loop.

mod config;
mod diff;
mod notify;
mod poll;
mod source;
mod store;
mod sync;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{NotifierKind, Settings, SNAPSHOT_FILE};
use notify::{ConsoleNotifier, DesktopNotifier, Notifier};
use poll::{AlwaysOnline, Connectivity, Registration, Schedule, Scheduler, TcpReachability};
use source::RssSource;
use store::{JsonFileStore, MemoryStore, SnapshotStore};
use sync::{CycleOutcome, SyncEngine};

/// Name under which the periodic sync is registered.
const TASK_NAME: &str = "circular-sync";

/// Exit status of `once` when the source was unreachable (EX_TEMPFAIL).
const EXIT_RETRY: u8 = 75;

/// Watch a circulars feed and notify about new entries.
#[derive(Parser, Debug)]
#[command(name = "circular-watch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding settings.json and snapshot.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Feed URL (overrides settings)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll periodically until interrupted
    Run {
        /// Poll interval in minutes (overrides settings, minimum 15)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Run a single sync cycle
    Once {
        /// Do not persist the updated snapshot
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the stored snapshot
    Snapshot,

    /// Write a default settings file
    InitConfig,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config::default_data_dir()?,
    };

    let mut settings = Settings::load(&data_dir).await?;
    if let Some(url) = cli.url {
        settings.source_url = url;
    }

    match cli.command {
        Commands::Run { interval } => {
            if let Some(minutes) = interval {
                settings.poll_interval_minutes = minutes;
            }
            run(&data_dir, &settings).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Once { dry_run } => once(&data_dir, &settings, dry_run).await,
        Commands::Snapshot => {
            print_snapshot(&data_dir).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::InitConfig => {
            let path = settings.save(&data_dir).await?;
            println!("Wrote {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr; stdout belongs to the console notifier.
fn init_logging(verbose: bool) {
    let default = if verbose {
        "circular_watch=debug"
    } else {
        "circular_watch=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run(data_dir: &std::path::Path, settings: &Settings) -> Result<()> {
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(data_dir.join(SNAPSHOT_FILE)));
    let engine = build_engine(settings, store, settings.notifier)?;

    let connectivity: Arc<dyn Connectivity> = match &settings.reachability_addr {
        Some(addr) => Arc::new(TcpReachability::new(addr.clone())),
        None => Arc::new(AlwaysOnline),
    };
    let schedule = Schedule::from_minutes(settings.poll_interval_minutes);

    let scheduler = Scheduler::new();
    if scheduler.enqueue_unique_periodic(TASK_NAME, schedule, Arc::new(engine), connectivity)
        == Registration::KeptExisting
    {
        info!("sync already scheduled");
    }
    info!(url = %settings.source_url, every = ?schedule.interval, "watching");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");
    if scheduler.is_active(TASK_NAME) {
        scheduler.cancel(TASK_NAME);
    }
    Ok(())
}

async fn once(data_dir: &std::path::Path, settings: &Settings, dry_run: bool) -> Result<ExitCode> {
    let file_store = JsonFileStore::new(data_dir.join(SNAPSHOT_FILE));
    let store: Arc<dyn SnapshotStore> = if dry_run {
        Arc::new(MemoryStore::with_items(file_store.read_all().await?))
    } else {
        Arc::new(file_store)
    };
    let engine = build_engine(settings, store, notifier_kind(settings, dry_run))?;

    match engine.run_cycle().await? {
        CycleOutcome::Success(report) => {
            info!(notified = report.notified, commit = ?report.commit, "cycle finished");
            Ok(ExitCode::SUCCESS)
        }
        CycleOutcome::Retry => {
            info!("source unreachable, try again later");
            Ok(ExitCode::from(EXIT_RETRY))
        }
    }
}

async fn print_snapshot(data_dir: &std::path::Path) -> Result<()> {
    let store = JsonFileStore::new(data_dir.join(SNAPSHOT_FILE));
    let doc = store
        .load()
        .await
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    match doc.updated_at {
        Some(at) => println!(
            "{} circulars, updated {}",
            doc.circulars.len(),
            at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("No snapshot yet"),
    }
    for circular in &doc.circulars {
        println!("{circular}  {}", circular.url);
    }
    Ok(())
}

/// A dry run keeps nothing, so its alerts stay on the console instead of
/// reaching the desktop again on every invocation.
fn notifier_kind(settings: &Settings, dry_run: bool) -> NotifierKind {
    if dry_run {
        NotifierKind::Console
    } else {
        settings.notifier
    }
}

fn build_engine(
    settings: &Settings,
    store: Arc<dyn SnapshotStore>,
    notifier: NotifierKind,
) -> Result<SyncEngine> {
    if settings.source_url.is_empty() {
        bail!("No feed URL configured; pass --url or set source_url in settings.json");
    }
    let source = RssSource::new(&settings.source_url, "circulars")
        .context("Failed to create HTTP client")?;
    let notifier: Arc<dyn Notifier> = match notifier {
        NotifierKind::Console => Arc::new(ConsoleNotifier),
        NotifierKind::Desktop => Arc::new(DesktopNotifier::default()),
    };
    Ok(SyncEngine::new(
        Arc::new(source),
        store,
        notifier,
        settings.engine_options(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_keeps_alerts_on_the_console() {
        let settings = Settings {
            notifier: NotifierKind::Desktop,
            ..Default::default()
        };

        assert_eq!(notifier_kind(&settings, true), NotifierKind::Console);
        assert_eq!(notifier_kind(&settings, false), NotifierKind::Desktop);
    }

    #[test]
    fn once_accepts_dry_run_flag() {
        let cli = Cli::try_parse_from(["circular-watch", "once", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Once { dry_run: true }));
    }

    #[test]
    fn engine_requires_a_feed_url() {
        let settings = Settings::default();
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());

        assert!(build_engine(&settings, store, NotifierKind::Console).is_err());
    }
}
