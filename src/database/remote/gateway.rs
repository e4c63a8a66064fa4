// Remote gateway: one authenticated call per queued mutation

use async_trait::async_trait;
use serde_json::Value;

use super::common::{ErrorKind, SupabaseClient, SyncError};
use crate::models::mirror::with_record_id;
use crate::models::sync_queue::SyncOperation;
use crate::models::tables::TableName;

/// Minimal per-table CRUD contract the sync engine needs from the remote store.
///
/// Implementations translate calls one-to-one and normalize failures into
/// [`SyncError`]; they never cascade or validate.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Insert (or merge into) the row with the payload's `id`.
    async fn insert(&self, table: TableName, data: &Value) -> Result<Value, SyncError>;

    async fn update(&self, table: TableName, record_id: &str, data: &Value)
        -> Result<(), SyncError>;

    async fn delete(&self, table: TableName, record_id: &str) -> Result<(), SyncError>;

    async fn select_all(&self, table: TableName) -> Result<Vec<Value>, SyncError>;

    async fn health_check(&self) -> Result<(), SyncError> {
        Ok(())
    }

    /// Replay one queued mutation.
    async fn replay(
        &self,
        table: TableName,
        operation: SyncOperation,
        record_id: &str,
        data: &Value,
    ) -> Result<(), SyncError> {
        match operation {
            SyncOperation::Create => {
                let payload = with_record_id(data.clone(), record_id)
                    .map_err(|e| SyncError::new(ErrorKind::ValidationFailure, e))?;
                self.insert(table, &payload).await.map(|_| ())
            }
            SyncOperation::Update => {
                let payload = with_record_id(data.clone(), record_id)
                    .map_err(|e| SyncError::new(ErrorKind::ValidationFailure, e))?;
                self.update(table, record_id, &payload).await
            }
            SyncOperation::Delete => self.delete(table, record_id).await,
        }
    }
}

/// Gateway backed by the Supabase REST API (PostgREST)
pub struct SupabaseGateway {
    client: SupabaseClient,
}

impl SupabaseGateway {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteGateway for SupabaseGateway {
    async fn insert(&self, table: TableName, data: &Value) -> Result<Value, SyncError> {
        self.client.insert(table.as_str(), data).await
    }

    async fn update(
        &self,
        table: TableName,
        record_id: &str,
        data: &Value,
    ) -> Result<(), SyncError> {
        let changed = self.client.update(table.as_str(), record_id, data).await?;
        if changed == 0 {
            return Err(SyncError::new(
                ErrorKind::NotFound,
                format!("{} with id {} does not exist remotely", table, record_id),
            ));
        }
        Ok(())
    }

    async fn delete(&self, table: TableName, record_id: &str) -> Result<(), SyncError> {
        self.client.delete(table.as_str(), record_id).await
    }

    async fn select_all(&self, table: TableName) -> Result<Vec<Value>, SyncError> {
        self.client.select_all(table.as_str()).await
    }

    async fn health_check(&self) -> Result<(), SyncError> {
        self.client.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records which CRUD call `replay` resolved to.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, TableName, Value)>>,
    }

    #[async_trait]
    impl RemoteGateway for Recorder {
        async fn insert(&self, table: TableName, data: &Value) -> Result<Value, SyncError> {
            self.calls
                .lock()
                .unwrap()
                .push(("insert".into(), table, data.clone()));
            Ok(data.clone())
        }

        async fn update(
            &self,
            table: TableName,
            record_id: &str,
            data: &Value,
        ) -> Result<(), SyncError> {
            self.calls
                .lock()
                .unwrap()
                .push((format!("update:{}", record_id), table, data.clone()));
            Ok(())
        }

        async fn delete(&self, table: TableName, record_id: &str) -> Result<(), SyncError> {
            self.calls
                .lock()
                .unwrap()
                .push((format!("delete:{}", record_id), table, Value::Null));
            Ok(())
        }

        async fn select_all(&self, _table: TableName) -> Result<Vec<Value>, SyncError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn replay_maps_each_operation_to_one_call() {
        let gateway = Recorder::default();

        gateway
            .replay(TableName::Sales, SyncOperation::Create, "s1", &json!({"total": 10.0}))
            .await
            .unwrap();
        gateway
            .replay(TableName::Sales, SyncOperation::Update, "s1", &json!({"total": 12.0}))
            .await
            .unwrap();
        gateway
            .replay(TableName::Sales, SyncOperation::Delete, "s1", &json!({"id": "s1"}))
            .await
            .unwrap();

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0, "insert");
        assert_eq!(calls[0].2, json!({"id": "s1", "total": 10.0}));
        assert_eq!(calls[1].0, "update:s1");
        assert_eq!(calls[2].0, "delete:s1");
    }

    #[tokio::test]
    async fn replay_rejects_non_object_payloads() {
        let gateway = Recorder::default();
        let err = gateway
            .replay(TableName::Products, SyncOperation::Create, "p1", &json!("oops"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailure);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }
}
