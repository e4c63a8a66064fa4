//! In-process remote store used by the service tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::database::local::{init_memory_db, Db};
use crate::database::remote::common::{ErrorKind, SyncError};
use crate::database::remote::gateway::RemoteGateway;
use crate::models::mirror::record_id_of;
use crate::models::tables::TableName;
use crate::services::cloud_sync::SyncEngine;
use crate::services::connectivity::ConnectivityMonitor;
use crate::settings::SyncSettings;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub table: TableName,
    pub record_id: Option<String>,
    pub data: Option<Value>,
}

#[derive(Default)]
pub struct FakeGateway {
    rows: Mutex<BTreeMap<TableName, BTreeMap<String, Value>>>,
    calls: Mutex<Vec<Call>>,
    scripted: Mutex<VecDeque<SyncError>>,
    always: Mutex<Option<SyncError>>,
    per_record: Mutex<HashMap<String, SyncError>>,
    select_failures: Mutex<HashMap<TableName, SyncError>>,
    lost_responses: Mutex<VecDeque<SyncError>>,
    network_drop: Mutex<Option<(Arc<ConnectivityMonitor>, usize)>>,
    offline_probe: AtomicBool,
    delay: Mutex<Option<Duration>>,
    holding: AtomicBool,
    pub entered: Notify,
    release: Notify,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, table: TableName, row: Value) {
        let id = record_id_of(&row).expect("seed row needs an id");
        self.rows
            .lock()
            .unwrap()
            .entry(table)
            .or_default()
            .insert(id, row);
    }

    pub fn row(&self, table: TableName, id: &str) -> Option<Value> {
        self.rows
            .lock()
            .unwrap()
            .get(&table)
            .and_then(|rows| rows.get(id).cloned())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// (method, record id) of every mutating call, in order
    pub fn mutations(&self) -> Vec<(&'static str, String)> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != "select_all")
            .map(|c| (c.method, c.record_id.unwrap_or_default()))
            .collect()
    }

    pub fn fail_next(&self, error: SyncError) {
        self.scripted.lock().unwrap().push_back(error);
    }

    pub fn fail_always(&self, error: SyncError) {
        *self.always.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.always.lock().unwrap() = None;
        self.per_record.lock().unwrap().clear();
    }

    pub fn fail_record(&self, record_id: &str, error: SyncError) {
        self.per_record
            .lock()
            .unwrap()
            .insert(record_id.to_string(), error);
    }

    /// Apply the next mutation remotely but report `error` to the caller.
    pub fn lose_next_response(&self, error: SyncError) {
        self.lost_responses.lock().unwrap().push_back(error);
    }

    /// From the `after`-th call on, take `monitor` offline and fail every
    /// call as unreachable.
    pub fn drop_network_after(&self, monitor: Arc<ConnectivityMonitor>, after: usize) {
        *self.network_drop.lock().unwrap() = Some((monitor, after));
    }

    pub fn fail_select(&self, table: TableName, error: SyncError) {
        self.select_failures.lock().unwrap().insert(table, error);
    }

    pub fn set_probe_offline(&self, offline: bool) {
        self.offline_probe.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Block every call until `release` is called; `entered` fires as each
    /// call arrives.
    pub fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.holding.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    async fn arrive(&self, call: Call, record_id: Option<&str>) -> Result<(), SyncError> {
        if self.holding.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let made = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call);
            calls.len()
        };
        let dropped = self
            .network_drop
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(_, after)| made >= *after)
            .map(|(monitor, _)| monitor.clone());
        if let Some(monitor) = dropped {
            monitor.set_online(false);
            return Err(SyncError::connectivity("network unreachable"));
        }

        if let Some(error) = self.always.lock().unwrap().clone() {
            return Err(error);
        }
        if let Some(error) = record_id.and_then(|id| self.per_record.lock().unwrap().get(id).cloned()) {
            return Err(error);
        }
        match self.scripted.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl FakeGateway {
    fn lost_response(&self) -> Result<(), SyncError> {
        match self.lost_responses.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn insert(&self, table: TableName, data: &Value) -> Result<Value, SyncError> {
        let id = record_id_of(data)
            .ok_or_else(|| SyncError::new(ErrorKind::ValidationFailure, "payload without id"))?;
        let call = Call {
            method: "insert",
            table,
            record_id: Some(id.clone()),
            data: Some(data.clone()),
        };
        self.arrive(call, Some(&id)).await?;
        self.rows
            .lock()
            .unwrap()
            .entry(table)
            .or_default()
            .insert(id, data.clone());
        self.lost_response()?;
        Ok(data.clone())
    }

    async fn update(&self, table: TableName, record_id: &str, data: &Value) -> Result<(), SyncError> {
        let call = Call {
            method: "update",
            table,
            record_id: Some(record_id.to_string()),
            data: Some(data.clone()),
        };
        self.arrive(call, Some(record_id)).await?;
        let found = match self.rows.lock().unwrap().get_mut(&table).and_then(|t| t.get_mut(record_id)) {
            Some(row) => {
                *row = data.clone();
                true
            }
            None => false,
        };
        if !found {
            return Err(SyncError::new(
                ErrorKind::NotFound,
                format!("{} with id {} does not exist remotely", table, record_id),
            ));
        }
        self.lost_response()
    }

    async fn delete(&self, table: TableName, record_id: &str) -> Result<(), SyncError> {
        let call = Call {
            method: "delete",
            table,
            record_id: Some(record_id.to_string()),
            data: None,
        };
        self.arrive(call, Some(record_id)).await?;
        if let Some(rows) = self.rows.lock().unwrap().get_mut(&table) {
            rows.remove(record_id);
        }
        self.lost_response()
    }

    async fn select_all(&self, table: TableName) -> Result<Vec<Value>, SyncError> {
        let call = Call {
            method: "select_all",
            table,
            record_id: None,
            data: None,
        };
        self.arrive(call, None).await?;
        if let Some(error) = self.select_failures.lock().unwrap().get(&table).cloned() {
            return Err(error);
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<(), SyncError> {
        if self.offline_probe.load(Ordering::SeqCst) {
            return Err(SyncError::connectivity("connection refused"));
        }
        Ok(())
    }
}

pub struct Harness {
    pub db: Db,
    pub gateway: Arc<FakeGateway>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub engine: Arc<SyncEngine>,
}

pub async fn harness(online: bool, settings: SyncSettings) -> Harness {
    let db = init_memory_db().await.unwrap();
    let gateway = FakeGateway::new();
    let monitor = Arc::new(ConnectivityMonitor::new(online));
    let engine = Arc::new(SyncEngine::new(
        db.0.clone(),
        gateway.clone(),
        monitor.clone(),
        settings,
    ));

    Harness {
        db,
        gateway,
        monitor,
        engine,
    }
}
