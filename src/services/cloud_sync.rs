//! Cloud sync orchestration service
//!
//! Coordinates syncing between the local SQLite mirror and Supabase:
//! 1. Push: replays the sync queue oldest-first through the remote gateway
//! 2. Pull: refreshes the mirror from the remote tables, leaving records with
//!    unpushed local changes alone
//!
//! At most one run is active at a time; overlapping calls are rejected.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Sqlite, SqlitePool};
use tokio::sync::{watch, RwLock};

use crate::database::local::{mirror, sync_queue};
use crate::database::remote::common::SyncError;
use crate::database::remote::gateway::RemoteGateway;
use crate::models::mirror::record_id_of;
use crate::models::sync::{PullSummary, PushSummary, SyncReport};
use crate::models::sync_queue::{QueueStatus, SyncOperation, SyncQueueEntry};
use crate::models::tables::TableName;
use crate::services::connectivity::ConnectivityMonitor;
use crate::settings::{self, SyncSettings};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudSyncError {
    /// Error from local database operation
    LocalDb(String),
    /// Another push or pull is already running
    SyncInProgress,
    /// Mutation rejected before it reached the local store
    InvalidRecord(String),
}

impl From<sqlx::Error> for CloudSyncError {
    fn from(e: sqlx::Error) -> Self {
        CloudSyncError::LocalDb(e.to_string())
    }
}

impl std::fmt::Display for CloudSyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudSyncError::LocalDb(msg) => write!(f, "Local DB error: {}", msg),
            CloudSyncError::SyncInProgress => write!(f, "A sync is already in progress"),
            CloudSyncError::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
        }
    }
}

impl std::error::Error for CloudSyncError {}

// ============================================================================
// Cancellation
// ============================================================================

/// Cancels the runs holding the paired tokens
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token nobody can cancel
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever for an orphaned token.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

// ============================================================================
// Sync Engine
// ============================================================================

#[derive(Debug, Default, Clone)]
struct LastRun {
    at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Clears the in-progress flag when the run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Replay {
    Done(Result<(), SyncError>),
    Cancelled,
}

pub struct SyncEngine {
    pool: SqlitePool,
    gateway: Arc<dyn RemoteGateway>,
    monitor: Arc<ConnectivityMonitor>,
    settings: SyncSettings,
    in_progress: AtomicBool,
    last_run: RwLock<LastRun>,
}

impl SyncEngine {
    pub fn new(
        pool: SqlitePool,
        gateway: Arc<dyn RemoteGateway>,
        monitor: Arc<ConnectivityMonitor>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            pool,
            gateway,
            monitor,
            settings,
            in_progress: AtomicBool::new(false),
            last_run: RwLock::new(LastRun::default()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn gateway(&self) -> &Arc<dyn RemoteGateway> {
        &self.gateway
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub async fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_run.read().await.at
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_run.read().await.error.clone()
    }

    /// Load the outcome of the previous session's last run.
    pub async fn restore_last_run(&self) -> Result<(), CloudSyncError> {
        let (at, error) = settings::load_sync_outcome(&self.pool)
            .await
            .map_err(CloudSyncError::LocalDb)?;
        *self.last_run.write().await = LastRun { at, error };
        Ok(())
    }

    /// Push the sync queue to the remote store.
    pub async fn process_sync_queue(
        &self,
        cancel: &CancelToken,
    ) -> Result<PushSummary, CloudSyncError> {
        let _guard = self.begin_run()?;
        let summary = self.push(cancel).await?;
        if !summary.skipped_offline && !summary.cancelled {
            self.finish_run(summary.errors.first()).await?;
        }
        Ok(summary)
    }

    /// Refresh the local mirror from the remote store.
    pub async fn pull_from_remote(
        &self,
        cancel: &CancelToken,
    ) -> Result<PullSummary, CloudSyncError> {
        let _guard = self.begin_run()?;
        let summary = self.pull(cancel).await?;
        if !summary.skipped_offline && !summary.cancelled {
            self.finish_run(summary.errors.first()).await?;
        }
        Ok(summary)
    }

    /// Push, then pull. A cancelled push skips the pull. Cancelled runs leave
    /// the last recorded outcome as it was.
    pub async fn sync_all(&self, cancel: &CancelToken) -> Result<SyncReport, CloudSyncError> {
        let _guard = self.begin_run()?;
        let push = self.push(cancel).await?;
        let pull = if push.cancelled {
            PullSummary {
                cancelled: true,
                ..Default::default()
            }
        } else {
            self.pull(cancel).await?
        };

        let report = SyncReport { push, pull };
        let cancelled = report.push.cancelled || report.pull.cancelled;
        if !cancelled && !(report.push.skipped_offline && report.pull.skipped_offline) {
            self.finish_run(report.errors().next()).await?;
        }
        Ok(report)
    }

    fn begin_run(&self) -> Result<RunGuard<'_>, CloudSyncError> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CloudSyncError::SyncInProgress)?;
        Ok(RunGuard(&self.in_progress))
    }

    async fn finish_run(&self, error: Option<&String>) -> Result<(), CloudSyncError> {
        let at = Utc::now();
        let error = error.cloned();
        settings::record_sync_outcome(&self.pool, at, error.as_deref())
            .await
            .map_err(CloudSyncError::LocalDb)?;
        *self.last_run.write().await = LastRun { at: Some(at), error };
        Ok(())
    }

    async fn conn(&self) -> Result<PoolConnection<Sqlite>, CloudSyncError> {
        Ok(self.pool.acquire().await?)
    }

    async fn pending_count(&self) -> Result<usize, CloudSyncError> {
        let pending = sync_queue::count_by_status(&self.pool, QueueStatus::Pending)
            .await
            .map_err(CloudSyncError::LocalDb)?;
        Ok(usize::try_from(pending).unwrap_or(0))
    }

    // ========================================================================
    // Push
    // ========================================================================

    async fn push(&self, cancel: &CancelToken) -> Result<PushSummary, CloudSyncError> {
        let mut summary = PushSummary::default();

        if !self.monitor.is_online() {
            summary.skipped_offline = true;
            summary.still_pending = self.pending_count().await?;
            info!(
                "[sync] offline, {} queued change(s) left for later",
                summary.still_pending
            );
            return Ok(summary);
        }

        // Records whose earlier mutation has not gone through; later entries
        // for them must wait so per-record order holds.
        let mut held = sync_queue::parked_records(&self.pool)
            .await
            .map_err(CloudSyncError::LocalDb)?;

        let mut pending = sync_queue::list_pending(&self.pool);
        loop {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if !self.monitor.is_online() {
                summary.went_offline = true;
                info!("[sync] connectivity lost, stopping push");
                break;
            }
            let Some(listed) = pending.next().await.map_err(CloudSyncError::LocalDb)? else {
                break;
            };

            let key = (listed.table_name, listed.record_id.clone());
            if held.contains(&key) {
                debug!(
                    "[sync] holding entry {} ({} {}) behind an earlier failure",
                    listed.id, listed.table_name, listed.record_id
                );
                summary.held += 1;
                continue;
            }

            let Some(entry) = self.claim(listed.id).await? else {
                continue;
            };

            let replay = tokio::select! {
                result = tokio::time::timeout(self.settings.request_timeout, self.replay(&entry)) => {
                    Replay::Done(result.unwrap_or_else(|_| {
                        Err(SyncError::connectivity(format!(
                            "timed out after {} ms",
                            self.settings.request_timeout.as_millis()
                        )))
                    }))
                }
                _ = cancel.cancelled() => Replay::Cancelled,
            };

            let mut conn = self.conn().await?;
            match replay {
                Replay::Cancelled => {
                    sync_queue::release(&mut conn, entry.id)
                        .await
                        .map_err(CloudSyncError::LocalDb)?;
                    summary.cancelled = true;
                    info!("[sync] push cancelled, entry {} returned to queue", entry.id);
                    break;
                }
                Replay::Done(Ok(())) => {
                    let mut tx = conn.begin().await?;
                    sync_queue::dequeue(&mut tx, entry.id)
                        .await
                        .map_err(CloudSyncError::LocalDb)?;
                    let based = match entry.operation {
                        SyncOperation::Delete => {
                            mirror::delete_base(&mut tx, entry.table_name, &entry.record_id).await
                        }
                        SyncOperation::Create | SyncOperation::Update => {
                            mirror::put_base(&mut tx, entry.table_name, &entry.record_id, &entry.data)
                                .await
                        }
                    };
                    based.map_err(CloudSyncError::LocalDb)?;
                    tx.commit().await?;
                    summary.processed += 1;
                    summary.succeeded += 1;
                    debug!(
                        "[sync] pushed {} {} {}",
                        entry.operation, entry.table_name, entry.record_id
                    );
                }
                Replay::Done(Err(error)) => {
                    summary.processed += 1;
                    summary.failed += 1;
                    held.insert(key);

                    let message = format!(
                        "{} {} {}: {}",
                        entry.operation, entry.table_name, entry.record_id, error
                    );
                    let retries =
                        sync_queue::increment_retry(&mut conn, entry.id, error.kind, &error.message)
                            .await
                            .map_err(CloudSyncError::LocalDb)?
                            .unwrap_or(entry.retries + 1);

                    if error.kind.is_permanent() || retries >= self.settings.max_retries {
                        sync_queue::mark_failed(&mut conn, entry.id, error.kind, &error.message)
                            .await
                            .map_err(CloudSyncError::LocalDb)?;
                        summary.parked += 1;
                        warn!(
                            "[sync] parked entry {} after {} attempt(s): {}",
                            entry.id, retries, message
                        );
                    } else {
                        debug!(
                            "[sync] entry {} failed (attempt {}/{}): {}",
                            entry.id, retries, self.settings.max_retries, message
                        );
                    }
                    summary.errors.push(message);
                }
            }
        }

        summary.still_pending = self.pending_count().await?;
        info!(
            "[sync] push done: {} processed, {} succeeded, {} failed ({} parked), {} held, {} pending",
            summary.processed,
            summary.succeeded,
            summary.failed,
            summary.parked,
            summary.held,
            summary.still_pending
        );
        Ok(summary)
    }

    /// Mark an entry in flight and return its current contents. None if it
    /// was replayed, dropped or parked since it was listed.
    async fn claim(&self, entry_id: i64) -> Result<Option<SyncQueueEntry>, CloudSyncError> {
        let claimed = {
            let mut conn = self.conn().await?;
            sync_queue::mark_processing(&mut conn, entry_id)
                .await
                .map_err(CloudSyncError::LocalDb)?
        };
        if !claimed {
            return Ok(None);
        }
        // Re-read: a coalesce may have changed the payload after listing
        sync_queue::get_entry(&self.pool, entry_id)
            .await
            .map_err(CloudSyncError::LocalDb)
    }

    async fn replay(&self, entry: &SyncQueueEntry) -> Result<(), SyncError> {
        self.gateway
            .replay(
                entry.table_name,
                entry.operation,
                &entry.record_id,
                &entry.data,
            )
            .await
    }

    // ========================================================================
    // Pull
    // ========================================================================

    async fn pull(&self, cancel: &CancelToken) -> Result<PullSummary, CloudSyncError> {
        let mut summary = PullSummary::default();

        if !self.monitor.is_online() {
            summary.skipped_offline = true;
            info!("[sync] offline, pull skipped");
            return Ok(summary);
        }

        for table in TableName::ALL {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if !self.monitor.is_online() {
                summary.went_offline = true;
                info!("[sync] connectivity lost, stopping pull");
                break;
            }

            let fetched = tokio::select! {
                result = tokio::time::timeout(self.settings.request_timeout, self.gateway.select_all(table)) => Some(result),
                _ = cancel.cancelled() => None,
            };
            let rows = match fetched {
                None => {
                    summary.cancelled = true;
                    break;
                }
                Some(Ok(Ok(rows))) => rows,
                Some(Ok(Err(error))) => {
                    warn!("[sync] failed to fetch {}: {}", table, error);
                    summary.errors.push(format!("{}: {}", table, error));
                    continue;
                }
                Some(Err(_)) => {
                    let message = format!(
                        "{}: timed out after {} ms",
                        table,
                        self.settings.request_timeout.as_millis()
                    );
                    warn!("[sync] failed to fetch {}", message);
                    summary.errors.push(message);
                    continue;
                }
            };

            self.apply_remote_rows(table, rows, &mut summary).await?;
            summary.tables += 1;
        }

        info!(
            "[sync] pull done: {} table(s), {} written, {} removed, {} conflict(s)",
            summary.tables, summary.records_written, summary.records_removed, summary.conflicts
        );
        Ok(summary)
    }

    /// Make the mirror of `table` match `rows`, except for records with
    /// queued local changes. Those count as a conflict only when the remote
    /// row moved away from the last copy known to match it.
    async fn apply_remote_rows(
        &self,
        table: TableName,
        rows: Vec<Value>,
        summary: &mut PullSummary,
    ) -> Result<(), CloudSyncError> {
        let queued = sync_queue::queued_record_ids(&self.pool, table)
            .await
            .map_err(CloudSyncError::LocalDb)?;
        let local: HashMap<String, Value> = mirror::list_records(&self.pool, table)
            .await
            .map_err(CloudSyncError::LocalDb)?
            .into_iter()
            .map(|record| (record.record_id, record.data))
            .collect();
        let bases = mirror::list_bases(&self.pool, table)
            .await
            .map_err(CloudSyncError::LocalDb)?;

        let mut remote_ids = HashSet::with_capacity(rows.len());
        let mut tx = self.pool.begin().await?;

        for row in rows {
            let Some(record_id) = record_id_of(&row) else {
                warn!("[sync] skipping {} row without an id", table);
                continue;
            };
            remote_ids.insert(record_id.clone());

            if queued.contains(&record_id) {
                let changed_remotely =
                    bases.get(&record_id) != Some(&row) && local.get(&record_id) != Some(&row);
                if changed_remotely {
                    summary.conflicts += 1;
                    warn!(
                        "[sync] {} {} changed remotely while local changes are queued; keeping the local copy",
                        table, record_id
                    );
                }
                continue;
            }
            if local.get(&record_id) != Some(&row) {
                mirror::put_record(&mut tx, table, &record_id, &row)
                    .await
                    .map_err(CloudSyncError::LocalDb)?;
                summary.records_written += 1;
            }
            if bases.get(&record_id) != Some(&row) {
                mirror::put_base(&mut tx, table, &record_id, &row)
                    .await
                    .map_err(CloudSyncError::LocalDb)?;
            }
        }

        for record_id in local.keys() {
            if remote_ids.contains(record_id) || queued.contains(record_id) {
                continue;
            }
            if mirror::delete_record(&mut tx, table, record_id)
                .await
                .map_err(CloudSyncError::LocalDb)?
            {
                summary.records_removed += 1;
            }
        }
        for record_id in bases.keys() {
            if !remote_ids.contains(record_id) && !queued.contains(record_id) {
                mirror::delete_base(&mut tx, table, record_id)
                    .await
                    .map_err(CloudSyncError::LocalDb)?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
