//! gym-sync: inspect and drive the sync queue of a local gym database
//!
//! Usage:
//!   gym-sync status                       # queue counts, last sync, per-table stats
//!   gym-sync sync                         # push queued changes, then pull
//!   gym-sync watch                        # auto sync on reconnect and on a timer
//!   gym-sync failed                       # list parked entries
//!   gym-sync retry-failed --id 12         # requeue a parked entry
//!   gym-sync enqueue products update p1 '{"stock": 4}'

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::Value;
use sqlx::SqlitePool;

use gym_sync::database::local::{default_db_path, init_app_db, sync_queue};
use gym_sync::database::remote::RemoteGateway;
use gym_sync::models::sync_queue::SyncOperation;
use gym_sync::models::tables::TableName;
use gym_sync::services::cloud_sync::{cancel_pair, CancelToken, SyncEngine};
use gym_sync::services::connectivity::{
    probe_once, spawn_auto_sync, spawn_probe, ConnectivityMonitor,
};
use gym_sync::services::{records, status};
use gym_sync::settings::{self, RemoteConfig, SyncSettings, KEY_ENV, TOKEN_ENV, URL_ENV};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "gym-sync")]
#[command(about = "Offline-first sync between the local gym database and Supabase", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Local database file (defaults to the platform data dir)
    #[arg(long, env = "GYM_SYNC_DB")]
    db: Option<PathBuf>,

    /// Supabase project URL
    #[arg(long, env = URL_ENV)]
    url: Option<String>,

    /// Supabase anon key
    #[arg(long, env = KEY_ENV, hide_env_values = true)]
    key: Option<String>,

    /// User access token (the anon key is used when absent)
    #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// Start with the connectivity monitor offline
    #[arg(long)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue counts, last sync and per-table stats
    Status,
    /// Push queued changes to the remote
    Push,
    /// Refresh the local mirror from the remote
    Pull,
    /// Push, then pull
    Sync,
    /// Keep syncing on reconnect and on a timer until Ctrl+C
    Watch,
    /// List parked entries
    Failed,
    /// Move parked entries back to the queue
    RetryFailed {
        /// Only this entry (all parked entries when omitted)
        #[arg(long)]
        id: Option<i64>,
    },
    /// Record a local change and queue it
    Enqueue {
        table: TableName,
        operation: SyncOperation,
        record_id: String,
        /// JSON object with the record fields
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    let db = init_app_db(&db_path).await?;
    let pool = db.0.clone();

    let recovered = sync_queue::reset_processing(&pool).await?;
    if recovered > 0 {
        info!("[startup] returned {} interrupted entries to the queue", recovered);
    }
    let sync_settings = settings::load_sync_settings(&pool).await?;

    match &cli.command {
        Commands::Status => show_status(&cli, &pool, sync_settings).await?,
        Commands::Push => {
            let engine = connect(&cli, &pool, sync_settings).await?;
            let token = cancel_on_ctrl_c();
            print_json(&engine.process_sync_queue(&token).await?)?;
        }
        Commands::Pull => {
            let engine = connect(&cli, &pool, sync_settings).await?;
            let token = cancel_on_ctrl_c();
            print_json(&engine.pull_from_remote(&token).await?)?;
        }
        Commands::Sync => {
            let engine = connect(&cli, &pool, sync_settings).await?;
            let token = cancel_on_ctrl_c();
            print_json(&engine.sync_all(&token).await?)?;
        }
        Commands::Watch => watch(&cli, &pool, sync_settings).await?,
        Commands::Failed => {
            for entry in sync_queue::list_failed(&pool).await? {
                println!(
                    "#{} {} {} {} (retries: {}) {}: {}",
                    entry.id,
                    entry.operation,
                    entry.table_name,
                    entry.record_id,
                    entry.retries,
                    entry
                        .error_kind
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    entry.last_error.unwrap_or_default()
                );
            }
        }
        Commands::RetryFailed { id } => {
            let requeued = sync_queue::retry_failed(&pool, *id).await?;
            println!("Requeued {} entries", requeued);
        }
        Commands::Enqueue {
            table,
            operation,
            record_id,
            data,
        } => {
            let data: Value = match data {
                Some(raw) => serde_json::from_str(raw)
                    .map_err(|e| format!("Invalid JSON payload: {}", e))?,
                None => Value::Null,
            };
            let outcome = records::apply_mutation(&pool, *table, record_id, *operation, data).await?;
            println!("{:?}", outcome);
        }
    }

    Ok(())
}

fn remote_config(cli: &Cli) -> Option<RemoteConfig> {
    Some(RemoteConfig {
        url: cli.url.clone()?,
        anon_key: cli.key.clone()?,
        access_token: cli.token.clone(),
    })
}

/// Build the engine and seed the monitor with a first probe.
async fn connect(cli: &Cli, pool: &SqlitePool, sync_settings: SyncSettings) -> CliResult<Arc<SyncEngine>> {
    let config = remote_config(cli)
        .ok_or_else(|| format!("Remote not configured: set --url/--key or {} and {}", URL_ENV, KEY_ENV))?;
    let gateway: Arc<dyn RemoteGateway> = Arc::new(config.gateway(sync_settings.request_timeout)?);

    let online = !cli.offline && probe_once(gateway.as_ref(), sync_settings.request_timeout).await;
    if !online {
        warn!("[startup] remote unreachable, working offline");
    }
    let monitor = Arc::new(ConnectivityMonitor::new(online));

    let engine = SyncEngine::new(pool.clone(), gateway, monitor, sync_settings);
    engine.restore_last_run().await?;
    Ok(Arc::new(engine))
}

async fn show_status(cli: &Cli, pool: &SqlitePool, sync_settings: SyncSettings) -> CliResult<()> {
    let current = if remote_config(cli).is_some() {
        let engine = connect(cli, pool, sync_settings).await?;
        status::sync_status(&engine).await?
    } else {
        status::local_status(pool).await?
    };

    print_json(&current)?;
    for stats in status::table_stats(pool).await? {
        println!(
            "{:<14} records: {:>6}  pending: {:>4}  failed: {:>4}",
            stats.table, stats.records, stats.pending, stats.failed
        );
    }
    if let Some(warning) = status::summary_warning(&current) {
        warn!("{}", warning);
    }
    Ok(())
}

async fn watch(cli: &Cli, pool: &SqlitePool, sync_settings: SyncSettings) -> CliResult<()> {
    let engine = connect(cli, pool, sync_settings.clone()).await?;

    let (probe_cancel, probe_token) = cancel_pair();
    let probe = spawn_probe(
        engine.monitor().clone(),
        engine.gateway().clone(),
        sync_settings.probe_interval,
        sync_settings.request_timeout,
        probe_token,
    );
    let auto_sync = spawn_auto_sync(engine.clone(), sync_settings.auto_sync_interval);

    info!("Watching for changes. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    probe_cancel.cancel();
    auto_sync.shutdown().await;
    probe.await?;
    Ok(())
}

/// Token cancelled by the first Ctrl+C
fn cancel_on_ctrl_c() -> CancelToken {
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancelling, the current entry will be returned to the queue");
            handle.cancel();
        }
    });
    token
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
