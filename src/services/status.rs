//! Read-only status views over the mirror and the sync queue.

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::database::local::{mirror, sync_queue};
use crate::models::sync::{SyncStatus, TableStats};
use crate::models::sync_queue::QueueStatus;
use crate::models::tables::TableName;
use crate::services::cloud_sync::{CloudSyncError, SyncEngine};
use crate::settings;

pub async fn sync_status(engine: &SyncEngine) -> Result<SyncStatus, CloudSyncError> {
    let (pending, failed) = queue_counts(engine.pool())
        .await
        .map_err(CloudSyncError::LocalDb)?;

    Ok(SyncStatus {
        pending,
        failed,
        is_syncing: engine.is_syncing(),
        is_online: engine.monitor().is_online(),
        last_sync_at: engine.last_sync_at().await,
        last_error: engine.last_error().await,
    })
}

/// Status from the local store alone, for when no remote is configured.
pub async fn local_status(pool: &SqlitePool) -> Result<SyncStatus, String> {
    let (pending, failed) = queue_counts(pool).await?;
    let (last_sync_at, last_error) = settings::load_sync_outcome(pool).await?;

    Ok(SyncStatus {
        pending,
        failed,
        is_syncing: false,
        is_online: false,
        last_sync_at,
        last_error,
    })
}

/// (waiting or in flight, parked)
async fn queue_counts(pool: &SqlitePool) -> Result<(i64, i64), String> {
    let waiting = sync_queue::count_by_status(pool, QueueStatus::Pending).await?;
    let in_flight = sync_queue::count_by_status(pool, QueueStatus::Processing).await?;
    let failed = sync_queue::count_by_status(pool, QueueStatus::Failed).await?;
    Ok((waiting + in_flight, failed))
}

/// Per-table record and queue counts, in table order
pub async fn table_stats(pool: &SqlitePool) -> Result<Vec<TableStats>, String> {
    let mut queued: HashMap<(TableName, QueueStatus), i64> = HashMap::new();
    for (table, status, n) in sync_queue::status_counts(pool).await? {
        queued.insert((table, status), n);
    }
    let queued_count = |table: TableName, status: QueueStatus| {
        queued.get(&(table, status)).copied().unwrap_or(0)
    };

    let mut stats = Vec::with_capacity(TableName::ALL.len());
    for table in TableName::ALL {
        stats.push(TableStats {
            table,
            records: mirror::count_records(pool, table).await?,
            pending: queued_count(table, QueueStatus::Pending)
                + queued_count(table, QueueStatus::Processing),
            failed: queued_count(table, QueueStatus::Failed),
        });
    }
    Ok(stats)
}

/// Warning to surface when changes are stuck and need attention.
pub fn summary_warning(status: &SyncStatus) -> Option<String> {
    if status.failed == 0 {
        return None;
    }
    let mut warning = format!(
        "{} change(s) could not be synced and need attention",
        status.failed
    );
    if let Some(error) = &status.last_error {
        warning.push_str(&format!(" (last error: {})", error));
    }
    Some(warning)
}
