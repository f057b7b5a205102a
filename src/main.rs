use anyhow::{Context, Result};
use clap::Parser;
use pezzottify_librarian::background_jobs::jobs::{lifecycle_channel, LifecycleRequest};
use pezzottify_librarian::background_jobs::StatusController;
use pezzottify_librarian::config::{
    AppConfig, CliConfig, CronMarkerBackend, FileConfig, QueueBackend, SearchEngine,
};
use pezzottify_librarian::librarian::Librarian;
use pezzottify_librarian::metrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code asking the supervisor to start the process again.
const RESTART_EXIT_CODE: i32 = 75;

const METRICS_WRITE_INTERVAL: Duration = Duration::from_secs(60);

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in it override the CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding library.db and the other databases.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory for the cron marker and the metrics snapshot. Defaults to <db_dir>/cache.
    #[clap(long, value_parser = parse_path)]
    pub cache_dir: Option<PathBuf>,

    /// Directory of cover images named by record id. Defaults to <cache_dir>/covers.
    #[clap(long, value_parser = parse_path)]
    pub covers_dir: Option<PathBuf>,

    /// Where database backups are written. Defaults to <db_dir>/backups.
    #[clap(long, value_parser = parse_path)]
    pub backup_dir: Option<PathBuf>,

    #[clap(long, value_enum, default_value_t = SearchEngine::Fts5)]
    pub search_engine: SearchEngine,

    #[clap(long, value_enum, default_value_t = QueueBackend::Memory)]
    pub queue_backend: QueueBackend,

    #[clap(long, value_enum, default_value_t = CronMarkerBackend::File)]
    pub cron_marker: CronMarkerBackend,

    /// Do not enqueue the incremental index update at startup.
    #[clap(long)]
    pub skip_startup_tasks: bool,

    /// Shell command run by the update task. Self-update is disabled without it.
    #[clap(long)]
    pub update_command: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            covers_dir: self.covers_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            search_engine: self.search_engine,
            queue_backend: self.queue_backend,
            cron_marker: self.cron_marker,
            skip_startup_tasks: self.skip_startup_tasks,
            update_command: self.update_command.clone(),
        }
    }
}

/// Log the in-flight operations every time the status registry changes.
async fn relay_statuses(statuses: Arc<StatusController>) {
    let mut revisions = statuses.subscribe();
    while revisions.changed().await.is_ok() {
        for status in statuses.active() {
            match status.total {
                Some(total) => debug!("{}: {}/{}", status.kind, status.complete, total),
                None => debug!("{}: {}", status.kind, status.complete),
            }
        }
    }
}

fn write_metrics(path: &Path) -> Result<()> {
    let text = metrics::gather_metrics()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, text).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move metrics to {:?}", path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let (lifecycle_tx, mut lifecycle_rx) = lifecycle_channel();
    let librarian = Arc::new(Librarian::from_config(&config, lifecycle_tx)?);

    let relay = tokio::spawn(relay_statuses(librarian.statuses().clone()));

    let metrics_path = config.metrics_path();
    let metrics_writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_WRITE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = write_metrics(&metrics_path) {
                warn!("Failed to write metrics snapshot: {:#}", err);
            }
        }
    });

    let restart = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!("Failed to listen for ctrl-c: {}", err);
            }
            info!("Received ctrl-c");
            false
        }
        result = lifecycle_rx.wait_for(|request| *request == LifecycleRequest::Restart) => {
            match result {
                Ok(_) => {
                    info!("Restart requested");
                    true
                }
                Err(_) => false,
            }
        }
    };

    metrics_writer.abort();
    let shutdown_librarian = librarian.clone();
    tokio::task::spawn_blocking(move || shutdown_librarian.shutdown()).await?;
    relay.abort();

    if restart {
        info!("Exiting with code {} for restart", RESTART_EXIT_CODE);
        std::process::exit(RESTART_EXIT_CODE);
    }
    Ok(())
}
