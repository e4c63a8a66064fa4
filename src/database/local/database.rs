use std::path::{Path, PathBuf};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

pub struct Db(pub SqlitePool);

/*
 * Default location of the local mirror: the platform data directory,
 * e.g. ~/.local/share/gym-sync/gym.db on Linux.
 */
pub fn default_db_path() -> Result<PathBuf, String> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| "Failed to resolve the platform data dir".to_string())?;
    Ok(data_dir.join("gym-sync").join("gym.db"))
}

/*
 * Opens (or creates) the local mirror database, which holds the mirrored
 * gym tables, the sync queue and settings.
 */
pub async fn init_app_db(db_path: &Path) -> Result<Db, String> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            format!(
                "Failed to create database dir {}: {}",
                parent.display(),
                e
            )
        })?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .journal_mode(SqliteJournalMode::Wal)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(3)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            format!(
                "Failed to connect to database at {}: {}",
                db_path.display(),
                e
            )
        })?;

    run_migrations(&pool).await?;
    Ok(Db(pool))
}

/*
 * In-memory database for tests and dry runs. Each SQLite connection owns a
 * separate in-memory database, so the pool is pinned to one connection that
 * never expires.
 */
pub async fn init_memory_db() -> Result<Db, String> {
    let connect_options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_options)
        .await
        .map_err(|e| format!("Failed to open in-memory database: {}", e))?;

    run_migrations(&pool).await?;
    Ok(Db(pool))
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), String> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| format!("Failed to run app migrations: {}", e))
}
