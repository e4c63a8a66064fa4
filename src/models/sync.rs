use chrono::{DateTime, Utc};
use serde::Serialize;

use super::tables::TableName;

/// Outcome of one push over the sync queue.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSummary {
    /// Entries replayed against the remote store.
    pub processed: usize,
    pub succeeded: usize,
    /// Replays that failed, whether or not the entry was parked.
    pub failed: usize,
    /// Entries moved to the terminal failed state during this run.
    pub parked: usize,
    /// Entries skipped because an earlier entry for the same record failed
    /// or is parked.
    pub held: usize,
    /// Pending entries left after the run.
    pub still_pending: usize,
    pub skipped_offline: bool,
    /// Stopped early because connectivity dropped during the run.
    pub went_offline: bool,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

/// Outcome of refreshing the local mirror from the remote store.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSummary {
    pub tables: usize,
    pub records_written: usize,
    pub records_removed: usize,
    /// Records with unpushed local changes that were also changed remotely.
    /// The local copy is kept.
    pub conflicts: usize,
    pub skipped_offline: bool,
    pub went_offline: bool,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub push: PushSummary,
    pub pull: PullSummary,
}

impl SyncReport {
    pub fn errors(&self) -> impl Iterator<Item = &String> {
        self.push.errors.iter().chain(self.pull.errors.iter())
    }
}

/// Aggregate status shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Entries waiting to be pushed (pending or in flight).
    pub pending: i64,
    /// Parked entries needing triage.
    pub failed: i64,
    pub is_syncing: bool,
    pub is_online: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub table: TableName,
    pub records: i64,
    pub pending: i64,
    pub failed: i64,
}
