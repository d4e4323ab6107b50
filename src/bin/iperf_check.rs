use clap::Parser;
use sea_orm::{ConnectOptions, Database};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use nodenexus_checks::check::{CheckRegistry, IperfCheck};
use nodenexus_checks::connection::inventory::StaticRegistry;
use nodenexus_checks::db::{create_schema, services::DbMetricStore};
use nodenexus_checks::monitoring::{MetricStore, memory::InMemoryMetricStore};
use nodenexus_checks::scheduler::{CheckScheduler, ScheduledCheck, auto_create_checks};
use nodenexus_checks::settings::CheckSettings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML file holding check settings and `[[devices]]`
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the iperf check for this device only, even if AUTO_IPERF is off
    #[arg(long)]
    device: Option<Uuid>,

    /// Run checks without writing results
    #[arg(long)]
    dry_run: bool,

    /// Repeat every N seconds until Ctrl-C
    #[arg(long)]
    interval: Option<u64>,

    /// Maximum number of checks running at once
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn init_logging(log_dir: &Path) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "iperf-check.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info,sea_orm=warn` level if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn open_metric_store() -> Result<Arc<dyn MetricStore>, sea_orm::DbErr> {
    match env::var("DATABASE_URL") {
        Ok(database_url) => {
            let mut opt = ConnectOptions::new(database_url);
            opt.max_connections(10);
            let db = Database::connect(opt).await?;
            create_schema(&db).await?;
            info!("Using database metric store.");
            Ok(Arc::new(DbMetricStore::new(db)))
        }
        Err(_) => {
            info!("DATABASE_URL not set, results are kept in memory only.");
            Ok(Arc::new(InMemoryMetricStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    init_logging(&args.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting iperf-check.");

    // Also loads `.env`, so DATABASE_URL below may come from it.
    let settings = match CheckSettings::load(args.config.as_deref()) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            error!("Failed to load check settings: {}", e);
            return Err(e.into());
        }
    };

    let inventory = match args.config.as_deref() {
        Some(path) if path.exists() => StaticRegistry::load(path)?,
        _ => StaticRegistry::from_entries(Vec::new()),
    };
    let inventory = Arc::new(inventory);

    let checks = match args.device {
        Some(device_id) => match inventory.target(device_id) {
            Some(target) => vec![ScheduledCheck::iperf(target)],
            None => {
                error!(device_id = %device_id, "Device is not in the inventory.");
                return Err(format!("unknown device {device_id}").into());
            }
        },
        None => auto_create_checks(&settings, &inventory.targets()),
    };
    if checks.is_empty() {
        warn!("No checks to run. Enable AUTO_IPERF or pass --device.");
        return Ok(());
    }

    let metrics = open_metric_store().await?;
    let iperf = Arc::new(IperfCheck::new(settings.clone(), inventory.clone(), metrics));
    let mut registry = CheckRegistry::new();
    registry.register(&settings, iperf)?;

    let scheduler = CheckScheduler::new(registry, args.concurrency);
    let store = !args.dry_run;

    match args.interval {
        Some(seconds) => {
            let (shutdown_tx, shutdown_rx) = watch::channel(());
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Ctrl-C received, shutting down."),
                    Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                }
                let _ = shutdown_tx.send(());
            });
            scheduler
                .run_loop(checks, Duration::from_secs(seconds.max(1)), store, shutdown_rx)
                .await;
        }
        None => {
            let summary = scheduler.run_once(&checks, store).await;
            info!(
                recorded = summary.recorded,
                no_result = summary.no_result,
                failed = summary.failed,
                "Checks finished."
            );
            if summary.failed > 0 {
                return Err(format!("{} check(s) failed", summary.failed).into());
            }
        }
    }

    Ok(())
}
