use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use autosync::config::Config;
use autosync::state::{RunState, STATE_FILE};
use autosync::storage::{open_ledger, LogStore};
use autosync::target::WordPressPostStore;
use autosync::util::{build_client, format_file_size};
use autosync::Pipeline;

/// Get the config directory path (~/.config/autosync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("autosync"))
}

#[derive(Parser, Debug)]
#[command(
    name = "autosync",
    about = "Import posts from remote WordPress REST sources into your site"
)]
struct Args {
    /// Config file (default: ~/.config/autosync/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one import pass now
    Run,
    /// Run import passes every `interval_seconds` until interrupted
    Daemon,
    /// Inspect or clear the import ledger
    Log {
        #[command(subcommand)]
        action: LogAction,
    },
    /// Show last run time and next scheduled run
    Status,
}

#[derive(Subcommand, Debug)]
enum LogAction {
    /// List imports, newest first
    List {
        #[arg(long, default_value_t = 500)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Number of ledger entries and ledger size
    Count,
    /// Delete the whole ledger
    Clear,
}

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Installs the subscriber. `RUST_LOG` wins; otherwise `info`, raised to
/// debug later if the config asks for it.
fn init_tracing() -> FilterHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autosync=info"));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    handle
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter_handle = init_tracing();
    let args = Args::parse();

    let (config_path, base_dir) = match &args.config {
        Some(path) => {
            let base = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (path.clone(), base)
        }
        None => {
            let dir = get_config_dir()?;
            (dir.join("config.toml"), dir)
        }
    };

    if !base_dir.exists() {
        std::fs::create_dir_all(&base_dir).context("Failed to create config directory")?;
    }
    #[cfg(unix)]
    if args.config.is_none() {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(&base_dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(path = %base_dir.display(), error = %e, "Failed to set config directory permissions to 0700");
        }
    }

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if config.debug && std::env::var_os("RUST_LOG").is_none() {
        if let Err(e) = filter_handle.reload(EnvFilter::new("autosync=debug")) {
            tracing::warn!(error = %e, "Failed to enable debug logging");
        }
    }

    let ledger = open_ledger(&config.ledger, &base_dir)
        .await
        .context("Failed to open import ledger")?;

    match args.command {
        Command::Run => {
            let pipeline = build_pipeline(&config, ledger, &base_dir)?;
            let outcome = pipeline.run_now(&config).await;
            println!("{}", outcome.message);
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Command::Daemon => {
            let pipeline = build_pipeline(&config, ledger, &base_dir)?;
            run_daemon(&pipeline, config, &config_path).await?;
        }
        Command::Log { action } => handle_log(ledger.as_ref(), action).await?,
        Command::Status => {
            let state = RunState::load(&base_dir.join(STATE_FILE));
            let count = ledger.count().await.context("Failed to read ledger")?;
            match state.last_run {
                Some(last) => {
                    println!("Last run: {}", last.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
                    if let Some(next) = state.next_due(config.interval()) {
                        println!("Next due: {}", next.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
                    }
                }
                None => println!("Last run: never"),
            }
            println!("Interval: {}s", config.interval().as_secs());
            println!("Sources: {}", config.active_sources().len());
            println!("Imported posts: {}", count);
        }
    }

    Ok(())
}

fn build_pipeline(config: &Config, ledger: Arc<dyn LogStore>, base_dir: &Path) -> Result<Pipeline> {
    let http = build_client().context("Failed to build HTTP client")?;
    let store = WordPressPostStore::from_config(http.clone(), &config.target)
        .context("Incomplete [target] configuration")?;
    Ok(Pipeline::new(http, ledger, Arc::new(store), base_dir))
}

async fn handle_log(ledger: &dyn LogStore, action: LogAction) -> Result<()> {
    match action {
        LogAction::List { limit, offset } => {
            let records = ledger
                .list(limit, offset)
                .await
                .context("Failed to read ledger")?;
            if records.is_empty() {
                println!("No imports recorded.");
            }
            for r in records {
                println!(
                    "{}  remote {:>6}  post {:>6}  {}  {}  ({})",
                    r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    r.remote_id,
                    r.local_post_id,
                    r.slug,
                    r.title,
                    r.source_url
                );
            }
        }
        LogAction::Count => {
            let count = ledger.count().await.context("Failed to read ledger")?;
            let size = ledger.size_bytes().await.context("Failed to read ledger")?;
            println!("{} imports ({})", count, format_file_size(size));
        }
        LogAction::Clear => {
            if ledger.clear().await.context("Failed to clear ledger")? {
                println!("Import log cleared.");
            } else {
                println!("Import log was already empty.");
            }
        }
    }
    Ok(())
}

/// Runs passes on a fixed interval until SIGINT/SIGTERM. The config file is
/// re-read before each pass; a broken edit keeps the previous config.
async fn run_daemon(pipeline: &Pipeline, mut config: Config, config_path: &Path) -> Result<()> {
    #[cfg(unix)]
    use tokio::signal::unix::{signal, SignalKind};

    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;

    tracing::info!(interval_secs = config.interval().as_secs(), "Daemon started");

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigint_fut = sigint.recv();
        #[cfg(not(unix))]
        let sigint_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                break;
            }

            _ = sigint_fut => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }

            _ = ticker.tick() => {
                match Config::load(config_path) {
                    Ok(fresh) => config = fresh,
                    Err(e) => tracing::warn!(error = %e, "Config reload failed, keeping previous config"),
                }
                let report = pipeline.run(&config).await;
                tracing::debug!(%report, "Scheduled run done");
            }
        }
    }

    Ok(())
}
