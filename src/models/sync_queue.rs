use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::tables::TableName;
use crate::database::remote::common::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(SyncOperation::Create),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            other => Err(format!("Unknown sync operation: {}", other)),
        }
    }
}

/// Stored disposition of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for the next push.
    Pending,
    /// Claimed by a running push.
    Processing,
    /// Parked: excluded from automatic retries until an operator requeues it.
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Failed => "failed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("Unknown queue status: {}", other)),
        }
    }
}

/// Sync state of a single mirror record, derived from its queue entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Synced,
    Failed(String),
}

impl SyncState {
    pub fn from_entries(entries: &[SyncQueueEntry]) -> Self {
        if let Some(parked) = entries.iter().find(|e| e.status == QueueStatus::Failed) {
            return SyncState::Failed(
                parked
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            );
        }
        if entries.is_empty() {
            SyncState::Synced
        } else {
            SyncState::Pending
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    pub id: i64,
    pub table_name: TableName,
    pub record_id: String,
    pub operation: SyncOperation,
    pub data: Value,
    pub status: QueueStatus,
    pub retries: u32,
    pub error_kind: Option<ErrorKind>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What `enqueue` did with a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new entry was appended.
    Queued(i64),
    /// Folded into an existing pending entry for the same record.
    Coalesced(i64),
    /// A never-attempted create was cancelled out by a delete; nothing is
    /// left to push.
    Dropped(i64),
}

impl EnqueueOutcome {
    pub fn entry_id(&self) -> i64 {
        match self {
            EnqueueOutcome::Queued(id)
            | EnqueueOutcome::Coalesced(id)
            | EnqueueOutcome::Dropped(id) => *id,
        }
    }
}

/// Result of folding a new mutation into a pending one for the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalesced {
    Replace(SyncOperation),
    Drop,
}

/// The newer operation wins, except that a record never pushed stays a
/// create. A create followed by a delete is dropped only if the create was
/// never `attempted`: an attempt whose response was lost may still have
/// reached the remote, so the delete has to go out.
pub fn coalesce(existing: SyncOperation, incoming: SyncOperation, attempted: bool) -> Coalesced {
    match (existing, incoming) {
        (SyncOperation::Create, SyncOperation::Delete) if !attempted => Coalesced::Drop,
        (SyncOperation::Create, SyncOperation::Delete) => Coalesced::Replace(SyncOperation::Delete),
        (SyncOperation::Create, _) => Coalesced::Replace(SyncOperation::Create),
        (_, incoming) => Coalesced::Replace(incoming),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SyncOperation::*;

    #[test]
    fn coalesce_table() {
        assert_eq!(coalesce(Create, Update, false), Coalesced::Replace(Create));
        assert_eq!(coalesce(Create, Create, false), Coalesced::Replace(Create));
        assert_eq!(coalesce(Create, Delete, false), Coalesced::Drop);
        assert_eq!(coalesce(Update, Update, false), Coalesced::Replace(Update));
        assert_eq!(coalesce(Update, Delete, false), Coalesced::Replace(Delete));
        assert_eq!(coalesce(Update, Create, false), Coalesced::Replace(Create));
        assert_eq!(coalesce(Delete, Create, false), Coalesced::Replace(Create));
        assert_eq!(coalesce(Delete, Update, false), Coalesced::Replace(Update));
    }

    #[test]
    fn attempted_create_is_not_dropped_by_a_delete() {
        assert_eq!(coalesce(Create, Delete, true), Coalesced::Replace(Delete));
        assert_eq!(coalesce(Create, Update, true), Coalesced::Replace(Create));
        assert_eq!(coalesce(Update, Delete, true), Coalesced::Replace(Delete));
    }

    #[test]
    fn parked_entry_dominates_state() {
        let now = Utc::now();
        let entry = |status, last_error: Option<&str>| SyncQueueEntry {
            id: 1,
            table_name: TableName::Sales,
            record_id: "s1".to_string(),
            operation: Create,
            data: serde_json::json!({"id": "s1"}),
            status,
            retries: 0,
            error_kind: None,
            last_error: last_error.map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        assert_eq!(SyncState::from_entries(&[]), SyncState::Synced);
        assert_eq!(
            SyncState::from_entries(&[entry(QueueStatus::Pending, None)]),
            SyncState::Pending
        );
        assert_eq!(
            SyncState::from_entries(&[
                entry(QueueStatus::Pending, None),
                entry(QueueStatus::Failed, Some("denied")),
            ]),
            SyncState::Failed("denied".to_string())
        );
    }
}
