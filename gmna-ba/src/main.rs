//! gmna-ba - GMN batch audit service
//!
//! Runs the HTTP service (default), or a single batch from the command line,
//! or the backup maintenance tasks.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gmna_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use gmna_common::events::{BatchProgress, EventBus};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gmna_ba::db::{init_database_pool, SqliteAuditStore};
use gmna_ba::services::{export, input_parser, Auditor, BatchController, OpenAiAuditor, PersistenceService};
use gmna_ba::AppState;

const MODULE_NAME: &str = "gmna-ba";

/// Command-line arguments for gmna-ba
#[derive(Parser, Debug)]
#[command(name = "gmna-ba")]
#[command(about = "Batch audit of Google Business Profile presence")]
#[command(version)]
struct Cli {
    /// Root folder holding the database and emergency backups
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value = "5730", env = "GMNA_BA_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "GMNA_BA_BIND")]
    bind: std::net::IpAddr,

    /// TOML configuration file (default: <config dir>/gmna/gmna-ba.toml)
    #[arg(short, long, env = "GMNA_BA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Audit every business in a CSV/TSV or workbook file
    Audit {
        /// Input list
        #[arg(short, long)]
        input: PathBuf,
        /// Export results to this .xlsx or .csv file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Tenant tag stored with the audit
        #[arg(long)]
        tenant_id: Option<String>,
    },
    /// Push local emergency backups into the database
    Replay,
    /// Print recent store failures and recoveries
    Errors {
        /// Number of entries
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Delete non-emergency backups older than the retention period
    Cleanup {
        /// Retention in days (default from configuration)
        #[arg(long)]
        days: Option<u32>,
    },
}

/// Everything the subcommands share
struct Runtime {
    config: TomlConfig,
    db: sqlx::SqlitePool,
    event_bus: EventBus,
    persistence: Arc<PersistenceService>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| gmna_common::config::config_file_path(MODULE_NAME));
    let config = gmna_common::config::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    init_tracing(&config)?;

    info!("Starting {} version {}", MODULE_NAME, env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    let runtime = init_runtime(&cli, config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(runtime, SocketAddr::new(cli.bind, cli.port)).await,
        Command::Audit {
            input,
            output,
            tenant_id,
        } => audit_file(runtime, input, output, tenant_id).await,
        Command::Replay => {
            let report = runtime.persistence.replay_emergency_backups().await?;
            println!(
                "Replayed {} emergency backup(s), {} remaining",
                report.replayed, report.remaining
            );
            Ok(())
        }
        Command::Errors { limit } => {
            for entry in runtime.persistence.recent_errors(limit).await? {
                println!(
                    "{} [{}] {} (recovered: {}, attempts: {})",
                    entry.timestamp.to_rfc3339(),
                    entry.kind,
                    entry.message,
                    entry.recovered,
                    entry.recovery_attempts
                );
            }
            Ok(())
        }
        Command::Cleanup { days } => {
            let days = days.unwrap_or(runtime.config.persistence.retention_days);
            let deleted = runtime.persistence.cleanup_old_backups(days).await?;
            println!("Deleted {} backup(s) older than {} days", deleted, days);
            Ok(())
        }
    }
}

/// Log level from TOML unless RUST_LOG is set; optional log file
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match &config.logging.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

async fn init_runtime(cli: &Cli, config: TomlConfig) -> Result<Runtime> {
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(cli.root_folder.clone())
        .with_toml(&config)
        .resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db = init_database_pool(&db_path).await?;

    let event_bus = EventBus::new(100);
    let store = Arc::new(SqliteAuditStore::new(db.clone()));
    let persistence = Arc::new(
        PersistenceService::from_settings(
            store,
            initializer.emergency_backup_dir(),
            &config.persistence,
        )
        .with_event_bus(event_bus.clone()),
    );

    Ok(Runtime {
        config,
        db,
        event_bus,
        persistence,
    })
}

fn build_auditor(config: &TomlConfig) -> Result<Arc<dyn Auditor>> {
    let api_key = gmna_ba::config::resolve_openai_api_key(config);
    let auditor = OpenAiAuditor::new(api_key, config.openai.clone())
        .context("Failed to build analysis client")?;
    Ok(Arc::new(auditor))
}

async fn serve(runtime: Runtime, addr: SocketAddr) -> Result<()> {
    match runtime
        .persistence
        .cleanup_old_backups(runtime.config.persistence.retention_days)
        .await
    {
        Ok(deleted) if deleted > 0 => info!(deleted, "Startup backup cleanup"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Startup backup cleanup failed"),
    }

    let pending = runtime.persistence.pending_emergency_backups().await?;
    if !pending.is_empty() {
        warn!(
            pending = pending.len(),
            "Emergency backups waiting; POST /backups/replay or run `gmna-ba replay`"
        );
    }

    let auditor = build_auditor(&runtime.config)?;
    let state = AppState::new(
        runtime.db,
        runtime.event_bus,
        auditor,
        runtime.persistence,
        &runtime.config,
    );
    let app = gmna_ba::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn audit_file(
    runtime: Runtime,
    input: PathBuf,
    output: Option<PathBuf>,
    tenant_id: Option<String>,
) -> Result<()> {
    let auditor = build_auditor(&runtime.config)?;
    if !auditor.is_configured() {
        bail!("Analysis provider API key not configured");
    }

    // Reject a bad output extension before spending any API calls
    if let Some(path) = &output {
        export::ExportFormat::from_path(path)?;
    }

    let bytes = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let parsed = input_parser::parse_file(&file_name, &bytes)?;
    info!(
        records = parsed.records.len(),
        skipped_rows = parsed.skipped_rows,
        "Input parsed"
    );

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, stopping after the current business");
            stop.cancel();
        }
    });

    let controller = BatchController::new(
        auditor,
        runtime.persistence.clone(),
        std::time::Duration::from_millis(runtime.config.batch.inter_item_delay_ms),
    );
    let observer = |progress: &BatchProgress| {
        info!(
            "[{}/{}] {}% {}",
            progress.current, progress.total, progress.percentage, progress.current_item
        );
    };

    let report = controller
        .run(&parsed.records, tenant_id, &observer, &cancel)
        .await;

    if let Some(path) = &output {
        export::export_to_path(&report.results, path).await?;
    }

    println!(
        "{} of {} businesses audited ({:?}), persistence: {}",
        report.results.len(),
        parsed.records.len(),
        report.outcome,
        serde_json::to_string(&report.persistence)?
    );
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
