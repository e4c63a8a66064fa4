//! Domain-level create/update/delete helpers.
//!
//! Every mutation lands in the local mirror and the sync queue in one local
//! transaction and never waits on the network; the sync engine pushes it
//! later.

use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::database::local::{mirror, sync_queue};
use crate::models::gym::GymRecord;
use crate::models::mirror::with_record_id;
use crate::models::sync_queue::{EnqueueOutcome, SyncOperation};
use crate::models::tables::TableName;
use crate::services::cloud_sync::CloudSyncError;

/// Apply a mutation to the mirror and queue it for push.
pub async fn apply_mutation(
    pool: &SqlitePool,
    table: TableName,
    record_id: &str,
    operation: SyncOperation,
    data: Value,
) -> Result<EnqueueOutcome, CloudSyncError> {
    if record_id.trim().is_empty() {
        return Err(CloudSyncError::InvalidRecord(format!(
            "{} record without an id",
            table
        )));
    }

    let payload = match operation {
        SyncOperation::Create | SyncOperation::Update => {
            with_record_id(data, record_id).map_err(CloudSyncError::InvalidRecord)?
        }
        SyncOperation::Delete => json!({ "id": record_id }),
    };

    let mut tx = pool.begin().await?;
    match operation {
        SyncOperation::Create | SyncOperation::Update => {
            mirror::put_record(&mut tx, table, record_id, &payload)
                .await
                .map_err(CloudSyncError::LocalDb)?;
        }
        SyncOperation::Delete => {
            mirror::delete_record(&mut tx, table, record_id)
                .await
                .map_err(CloudSyncError::LocalDb)?;
        }
    }
    let outcome = sync_queue::enqueue(&mut tx, table, record_id, operation, &payload)
        .await
        .map_err(CloudSyncError::LocalDb)?;
    tx.commit().await?;

    log::debug!(
        "[records] {} {} {} -> {:?}",
        operation,
        table,
        record_id,
        outcome
    );
    Ok(outcome)
}

/// Create a record, assigning a fresh id when it has none.
pub async fn create_record<T: GymRecord>(
    pool: &SqlitePool,
    mut record: T,
) -> Result<T, CloudSyncError> {
    if record.record_id().is_empty() {
        record.set_record_id(uuid::Uuid::new_v4().to_string());
    }
    let data = to_payload(&record)?;
    apply_mutation(pool, T::TABLE, record.record_id(), SyncOperation::Create, data).await?;
    Ok(record)
}

/// Update an existing record. Fails if the mirror does not have it.
pub async fn update_record<T: GymRecord>(
    pool: &SqlitePool,
    record: &T,
) -> Result<EnqueueOutcome, CloudSyncError> {
    let record_id = record.record_id();
    let existing = mirror::get_record(pool, T::TABLE, record_id)
        .await
        .map_err(CloudSyncError::LocalDb)?;
    if existing.is_none() {
        return Err(CloudSyncError::InvalidRecord(format!(
            "{} with id {} not found",
            T::TABLE,
            record_id
        )));
    }

    let data = to_payload(record)?;
    apply_mutation(pool, T::TABLE, record_id, SyncOperation::Update, data).await
}

pub async fn delete_record<T: GymRecord>(
    pool: &SqlitePool,
    record_id: &str,
) -> Result<EnqueueOutcome, CloudSyncError> {
    apply_mutation(pool, T::TABLE, record_id, SyncOperation::Delete, Value::Null).await
}

pub async fn get_record<T: GymRecord>(
    pool: &SqlitePool,
    record_id: &str,
) -> Result<Option<T>, CloudSyncError> {
    mirror::get_record(pool, T::TABLE, record_id)
        .await
        .map_err(CloudSyncError::LocalDb)?
        .map(|record| from_payload(record.data))
        .transpose()
}

pub async fn list_records<T: GymRecord>(pool: &SqlitePool) -> Result<Vec<T>, CloudSyncError> {
    mirror::list_records(pool, T::TABLE)
        .await
        .map_err(CloudSyncError::LocalDb)?
        .into_iter()
        .map(|record| from_payload(record.data))
        .collect()
}

fn to_payload<T: GymRecord>(record: &T) -> Result<Value, CloudSyncError> {
    serde_json::to_value(record)
        .map_err(|e| CloudSyncError::InvalidRecord(format!("{}: {}", T::TABLE, e)))
}

fn from_payload<T: GymRecord>(data: Value) -> Result<T, CloudSyncError> {
    serde_json::from_value(data)
        .map_err(|e| CloudSyncError::InvalidRecord(format!("{}: {}", T::TABLE, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::local::init_memory_db;
    use crate::models::gym::{Product, Sale, Subscriber};
    use crate::models::sync_queue::{QueueStatus, SyncState};
    use crate::services::cloud_sync::CancelToken;
    use crate::services::test_support::harness;
    use crate::settings::SyncSettings;

    #[tokio::test]
    async fn create_assigns_an_id_and_queues_the_record() {
        let db = init_memory_db().await.unwrap();
        let subscriber = create_record(
            &db.0,
            Subscriber {
                first_name: "Nadia".to_string(),
                last_name: "Haddad".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(uuid::Uuid::parse_str(&subscriber.id).is_ok());
        let stored: Subscriber = get_record(&db.0, &subscriber.id).await.unwrap().unwrap();
        assert_eq!(stored, subscriber);

        let entries = sync_queue::entries_for_record(&db.0, TableName::Subscribers, &subscriber.id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, SyncOperation::Create);
        assert_eq!(entries[0].data["id"], subscriber.id.as_str());
        assert_eq!(entries[0].status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn edits_before_a_push_fold_into_one_entry() {
        let db = init_memory_db().await.unwrap();
        let mut product = create_record(
            &db.0,
            Product {
                id: "p1".to_string(),
                name: "Whey".to_string(),
                price: 39.5,
                stock: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        product.stock = 9;
        let outcome = update_record(&db.0, &product).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Coalesced(_)));

        let entries = sync_queue::list_all(&db.0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, SyncOperation::Create);
        assert_eq!(entries[0].data["stock"], 9);

        let outcome = delete_record::<Product>(&db.0, "p1").await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Dropped(_)));
        assert_eq!(sync_queue::count(&db.0).await.unwrap(), 0);
        assert!(get_record::<Product>(&db.0, "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_of_an_unknown_record_is_rejected() {
        let db = init_memory_db().await.unwrap();
        let sale = Sale {
            id: "missing".to_string(),
            ..Default::default()
        };

        let err = update_record(&db.0, &sale).await.unwrap_err();
        assert!(matches!(err, CloudSyncError::InvalidRecord(_)));
        assert_eq!(sync_queue::count(&db.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_payloads_never_reach_the_queue() {
        let db = init_memory_db().await.unwrap();

        let err = apply_mutation(
            &db.0,
            TableName::Products,
            "p1",
            SyncOperation::Create,
            json!(["not", "an", "object"]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CloudSyncError::InvalidRecord(_)));

        let err = apply_mutation(&db.0, TableName::Products, " ", SyncOperation::Delete, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudSyncError::InvalidRecord(_)));
        assert_eq!(sync_queue::count(&db.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mutations_while_offline_are_kept_until_reconnect() {
        let h = harness(false, SyncSettings::default()).await;

        let product = create_record(
            &h.db.0,
            Product {
                name: "Shaker".to_string(),
                price: 8.0,
                stock: 30,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        create_record(
            &h.db.0,
            Sale {
                id: "s1".to_string(),
                total: 8.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(sync_queue::count(&h.db.0).await.unwrap(), 2);
        h.engine.sync_all(&CancelToken::never()).await.unwrap();
        assert!(h.gateway.calls().is_empty());
        assert_eq!(
            sync_queue::sync_state(&h.db.0, TableName::Products, &product.id)
                .await
                .unwrap(),
            SyncState::Pending
        );
        assert_eq!(list_records::<Product>(&h.db.0).await.unwrap(), vec![product.clone()]);

        h.monitor.set_online(true);
        let report = h.engine.sync_all(&CancelToken::never()).await.unwrap();
        assert_eq!(report.push.succeeded, 2);
        assert!(h.gateway.row(TableName::Products, &product.id).is_some());
        assert_eq!(
            sync_queue::sync_state(&h.db.0, TableName::Products, &product.id)
                .await
                .unwrap(),
            SyncState::Synced
        );
        // the pull brings the same rows back unchanged
        assert_eq!(list_records::<Product>(&h.db.0).await.unwrap(), vec![product]);
    }
}
