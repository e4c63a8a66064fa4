//! Sync queue persistence: mutations recorded locally and not yet
//! confirmed by the remote store.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};

use crate::database::remote::common::ErrorKind;
use crate::models::sync_queue::{
    coalesce, Coalesced, EnqueueOutcome, QueueStatus, SyncOperation, SyncQueueEntry, SyncState,
};
use crate::models::tables::TableName;
use crate::models::{format_timestamp, parse_timestamp};

const PAGE_SIZE: i64 = 64;

macro_rules! select_entries {
    ($rest:literal) => {
        concat!(
            "SELECT id, table_name, record_id, operation, data, status, retries, error_kind, last_error, created_at, updated_at FROM sync_queue ",
            $rest
        )
    };
}

#[derive(sqlx::FromRow)]
struct SyncQueueRow {
    id: i64,
    table_name: String,
    record_id: String,
    operation: String,
    data: String,
    status: String,
    retries: i64,
    error_kind: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SyncQueueRow> for SyncQueueEntry {
    type Error = String;

    fn try_from(row: SyncQueueRow) -> Result<Self, Self::Error> {
        Ok(SyncQueueEntry {
            id: row.id,
            table_name: row.table_name.parse()?,
            operation: row.operation.parse()?,
            data: serde_json::from_str(&row.data)
                .map_err(|e| format!("Corrupt payload in sync entry {}: {}", row.id, e))?,
            status: row.status.parse()?,
            retries: u32::try_from(row.retries).unwrap_or(0),
            error_kind: row.error_kind.as_deref().map(str::parse).transpose()?,
            last_error: row.last_error,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            record_id: row.record_id,
        })
    }
}

fn to_entries(rows: Vec<SyncQueueRow>) -> Result<Vec<SyncQueueEntry>, String> {
    rows.into_iter().map(SyncQueueEntry::try_from).collect()
}

// -----------------------------------------------------------------------------
// Writes
// -----------------------------------------------------------------------------

/// Record a mutation for later replay.
///
/// Folds into the newest `pending` entry for the same record when there is
/// one; entries being replayed or parked are never touched.
pub async fn enqueue(
    conn: &mut SqliteConnection,
    table: TableName,
    record_id: &str,
    operation: SyncOperation,
    data: &Value,
) -> Result<EnqueueOutcome, String> {
    let now = format_timestamp(Utc::now());
    let payload = serde_json::to_string(data)
        .map_err(|e| format!("Failed to serialize sync payload: {}", e))?;

    let existing = sqlx::query_as::<_, (i64, String, i64, Option<String>)>(
        "SELECT id, operation, retries, error_kind FROM sync_queue
         WHERE table_name = ? AND record_id = ? AND status = 'pending'
         ORDER BY id DESC LIMIT 1",
    )
    .bind(table.as_str())
    .bind(record_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| format!("Failed to look up queued {} {}: {}", table, record_id, e))?;

    if let Some((entry_id, existing_op, retries, error_kind)) = existing {
        let existing_op: SyncOperation = existing_op.parse()?;
        let attempted = retries > 0 || error_kind.is_some();
        let folded = match coalesce(existing_op, operation, attempted) {
            Coalesced::Replace(op) => sqlx::query(
                "UPDATE sync_queue SET operation = ?, data = ?, updated_at = ?
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(op.as_str())
            .bind(&payload)
            .bind(&now)
            .bind(entry_id)
            .execute(&mut *conn)
            .await
            .map(|r| (r.rows_affected() == 1).then_some(EnqueueOutcome::Coalesced(entry_id))),
            Coalesced::Drop => {
                sqlx::query("DELETE FROM sync_queue WHERE id = ? AND status = 'pending'")
                    .bind(entry_id)
                    .execute(&mut *conn)
                    .await
                    .map(|r| (r.rows_affected() == 1).then_some(EnqueueOutcome::Dropped(entry_id)))
            }
        }
        .map_err(|e| format!("Failed to coalesce sync entry {}: {}", entry_id, e))?;

        // The entry may have been claimed by a push in the meantime
        if let Some(outcome) = folded {
            return Ok(outcome);
        }
    }

    let id = sqlx::query(
        "INSERT INTO sync_queue (table_name, record_id, operation, data, status, retries, created_at, updated_at)
         VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)",
    )
    .bind(table.as_str())
    .bind(record_id)
    .bind(operation.as_str())
    .bind(&payload)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to enqueue {} {}: {}", table, record_id, e))?
    .last_insert_rowid();

    Ok(EnqueueOutcome::Queued(id))
}

/// Remove an entry after a confirmed replay. Removing a missing entry is a
/// no-op; returns whether a row was deleted.
pub async fn dequeue(conn: &mut SqliteConnection, entry_id: i64) -> Result<bool, String> {
    let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(entry_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to dequeue sync entry {}: {}", entry_id, e))?;

    Ok(result.rows_affected() > 0)
}

/// Claim a pending entry for replay. False if it is no longer pending.
pub async fn mark_processing(conn: &mut SqliteConnection, entry_id: i64) -> Result<bool, String> {
    let result = sqlx::query(
        "UPDATE sync_queue SET status = 'processing', updated_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(format_timestamp(Utc::now()))
    .bind(entry_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to claim sync entry {}: {}", entry_id, e))?;

    Ok(result.rows_affected() == 1)
}

/// Hand a claimed entry back without counting an attempt.
pub async fn release(conn: &mut SqliteConnection, entry_id: i64) -> Result<(), String> {
    sqlx::query(
        "UPDATE sync_queue SET status = 'pending', updated_at = ?
         WHERE id = ? AND status = 'processing'",
    )
    .bind(format_timestamp(Utc::now()))
    .bind(entry_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to release sync entry {}: {}", entry_id, e))?;

    Ok(())
}

/// Count a failed replay and return the entry to `pending`.
/// Returns the new retry count, or None if the entry is gone.
pub async fn increment_retry(
    conn: &mut SqliteConnection,
    entry_id: i64,
    kind: ErrorKind,
    message: &str,
) -> Result<Option<u32>, String> {
    let retries: Option<i64> = sqlx::query_scalar(
        "UPDATE sync_queue
         SET retries = retries + 1, status = 'pending', error_kind = ?, last_error = ?, updated_at = ?
         WHERE id = ?
         RETURNING retries",
    )
    .bind(kind.as_str())
    .bind(message)
    .bind(format_timestamp(Utc::now()))
    .bind(entry_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| format!("Failed to record retry for sync entry {}: {}", entry_id, e))?;

    Ok(retries.map(|r| u32::try_from(r).unwrap_or(u32::MAX)))
}

/// Park an entry. It stays in the queue but is no longer replayed
/// automatically.
pub async fn mark_failed(
    conn: &mut SqliteConnection,
    entry_id: i64,
    kind: ErrorKind,
    message: &str,
) -> Result<(), String> {
    sqlx::query(
        "UPDATE sync_queue SET status = 'failed', error_kind = ?, last_error = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(kind.as_str())
    .bind(message)
    .bind(format_timestamp(Utc::now()))
    .bind(entry_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to park sync entry {}: {}", entry_id, e))?;

    Ok(())
}

/// Requeue parked entries (one, or all when `entry_id` is None) with a fresh
/// retry budget. Returns how many were requeued.
pub async fn retry_failed(pool: &SqlitePool, entry_id: Option<i64>) -> Result<u64, String> {
    let now = format_timestamp(Utc::now());
    let result = match entry_id {
        Some(id) => sqlx::query(
            "UPDATE sync_queue SET status = 'pending', retries = 0, updated_at = ?
             WHERE id = ? AND status = 'failed'",
        )
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await,
        None => sqlx::query(
            "UPDATE sync_queue SET status = 'pending', retries = 0, updated_at = ?
             WHERE status = 'failed'",
        )
        .bind(&now)
        .execute(pool)
        .await,
    }
    .map_err(|e| format!("Failed to requeue parked entries: {}", e))?;

    Ok(result.rows_affected())
}

/// Return entries left `processing` by an interrupted run to `pending`.
pub async fn reset_processing(pool: &SqlitePool) -> Result<u64, String> {
    let result = sqlx::query(
        "UPDATE sync_queue SET status = 'pending', updated_at = ? WHERE status = 'processing'",
    )
    .bind(format_timestamp(Utc::now()))
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to recover in-flight entries: {}", e))?;

    Ok(result.rows_affected())
}

// -----------------------------------------------------------------------------
// Reads
// -----------------------------------------------------------------------------

/// Number of outstanding entries, parked ones included
pub async fn count(pool: &SqlitePool) -> Result<i64, String> {
    sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
        .fetch_one(pool)
        .await
        .map_err(|e| format!("Failed to count sync queue: {}", e))
}

pub async fn count_by_status(pool: &SqlitePool, status: QueueStatus) -> Result<i64, String> {
    sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await
        .map_err(|e| format!("Failed to count {} entries: {}", status.as_str(), e))
}

/// Entry counts grouped by table and status
pub async fn status_counts(pool: &SqlitePool) -> Result<Vec<(TableName, QueueStatus, i64)>, String> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT table_name, status, COUNT(*) FROM sync_queue GROUP BY table_name, status",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to count sync queue by table: {}", e))?;

    rows.into_iter()
        .map(|(table, status, n)| {
            Ok((
                table.parse::<TableName>()?,
                status.parse::<QueueStatus>()?,
                n,
            ))
        })
        .collect()
}

pub async fn get_entry(pool: &SqlitePool, entry_id: i64) -> Result<Option<SyncQueueEntry>, String> {
    sqlx::query_as::<_, SyncQueueRow>(select_entries!("WHERE id = ?"))
        .bind(entry_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| format!("Failed to fetch sync entry {}: {}", entry_id, e))?
        .map(SyncQueueEntry::try_from)
        .transpose()
}

/// Every entry, oldest first
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<SyncQueueEntry>, String> {
    let rows = sqlx::query_as::<_, SyncQueueRow>(select_entries!("ORDER BY id"))
        .fetch_all(pool)
        .await
        .map_err(|e| format!("Failed to list sync queue: {}", e))?;

    to_entries(rows)
}

/// Parked entries, oldest first
pub async fn list_failed(pool: &SqlitePool) -> Result<Vec<SyncQueueEntry>, String> {
    let rows = sqlx::query_as::<_, SyncQueueRow>(select_entries!(
        "WHERE status = 'failed' ORDER BY id"
    ))
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to list parked entries: {}", e))?;

    to_entries(rows)
}

pub async fn entries_for_record(
    pool: &SqlitePool,
    table: TableName,
    record_id: &str,
) -> Result<Vec<SyncQueueEntry>, String> {
    let rows = sqlx::query_as::<_, SyncQueueRow>(select_entries!(
        "WHERE table_name = ? AND record_id = ? ORDER BY id"
    ))
    .bind(table.as_str())
    .bind(record_id)
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to list entries for {} {}: {}", table, record_id, e))?;

    to_entries(rows)
}

pub async fn sync_state(
    pool: &SqlitePool,
    table: TableName,
    record_id: &str,
) -> Result<SyncState, String> {
    let entries = entries_for_record(pool, table, record_id).await?;
    Ok(SyncState::from_entries(&entries))
}

/// Ids of records in `table` with any outstanding entry
pub async fn queued_record_ids(pool: &SqlitePool, table: TableName) -> Result<HashSet<String>, String> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT record_id FROM sync_queue WHERE table_name = ?")
            .bind(table.as_str())
            .fetch_all(pool)
            .await
            .map_err(|e| format!("Failed to list queued {} ids: {}", table, e))?;

    Ok(ids.into_iter().collect())
}

/// (table, record id) pairs that have a parked entry
pub async fn parked_records(pool: &SqlitePool) -> Result<HashSet<(TableName, String)>, String> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT DISTINCT table_name, record_id FROM sync_queue WHERE status = 'failed'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to list parked records: {}", e))?;

    rows.into_iter()
        .map(|(table, id)| Ok((table.parse::<TableName>()?, id)))
        .collect()
}

/// Pending entries in replay order, which is enqueue order (`id`).
///
/// The sequence is lazy (read a page at a time), finite (bounded by the
/// newest entry that existed when it was created) and restartable.
pub fn list_pending(pool: &SqlitePool) -> PendingEntries<'_> {
    PendingEntries {
        pool,
        upper_id: None,
        cursor: None,
        buffer: VecDeque::new(),
        exhausted: false,
    }
}

pub struct PendingEntries<'a> {
    pool: &'a SqlitePool,
    upper_id: Option<i64>,
    cursor: Option<i64>,
    buffer: VecDeque<SyncQueueEntry>,
    exhausted: bool,
}

impl PendingEntries<'_> {
    /// Next pending entry, or None once the sequence is exhausted.
    pub async fn next(&mut self) -> Result<Option<SyncQueueEntry>, String> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Start over from the oldest pending entry.
    pub fn restart(&mut self) {
        self.upper_id = None;
        self.cursor = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    pub async fn collect_all(mut self) -> Result<Vec<SyncQueueEntry>, String> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn fill(&mut self) -> Result<(), String> {
        let upper_id = match self.upper_id {
            Some(id) => id,
            None => {
                let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM sync_queue")
                    .fetch_one(self.pool)
                    .await
                    .map_err(|e| format!("Failed to read sync queue bounds: {}", e))?;
                let max = max.unwrap_or(0);
                self.upper_id = Some(max);
                max
            }
        };

        let rows = sqlx::query_as::<_, SyncQueueRow>(select_entries!(
            "WHERE status = 'pending' AND id <= ? AND id > ?
             ORDER BY id LIMIT ?"
        ))
        .bind(upper_id)
        .bind(self.cursor.unwrap_or(0))
        .bind(PAGE_SIZE)
        .fetch_all(self.pool)
        .await
        .map_err(|e| format!("Failed to read pending entries: {}", e))?;

        if (rows.len() as i64) < PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.cursor = Some(last.id);
        }
        self.buffer.extend(to_entries(rows)?);
        Ok(())
    }
}
