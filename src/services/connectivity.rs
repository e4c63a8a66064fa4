//! Online/offline tracking and the background tasks that react to it.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::database::remote::common::{ErrorKind, SyncError};
use crate::database::remote::gateway::RemoteGateway;
use crate::services::cloud_sync::{cancel_pair, CancelHandle, CancelToken, CloudSyncError, SyncEngine};

/// Owns the online flag. Transitions are pushed in by the host (or a probe)
/// and observed through `subscribe`.
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current state. Returns true on a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });

        if changed {
            if online {
                info!("[connectivity] back online");
            } else {
                warn!("[connectivity] offline, changes will be queued locally");
            }
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// ============================================================================
// Auto sync
// ============================================================================

pub struct AutoSyncHandle {
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    /// Cancel any running sync and wait for the task to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("[auto-sync] task ended abnormally: {}", e);
        }
    }
}

/// Run `sync_all` whenever connectivity returns and every `interval` while
/// online.
pub fn spawn_auto_sync(engine: Arc<SyncEngine>, interval: Duration) -> AutoSyncHandle {
    let (cancel, token) = cancel_pair();
    let mut online_rx = engine.monitor().subscribe();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*online_rx.borrow_and_update() {
                        continue;
                    }
                    info!("[auto-sync] connectivity restored, syncing");
                }
                _ = ticker.tick() => {
                    if !engine.monitor().is_online() {
                        continue;
                    }
                }
            }
            run_sync(&engine, &token).await;
        }
        debug!("[auto-sync] stopped");
    });

    AutoSyncHandle { cancel, task }
}

async fn run_sync(engine: &SyncEngine, token: &CancelToken) {
    match engine.sync_all(token).await {
        Ok(report) => {
            for message in report.errors() {
                debug!("[auto-sync] {}", message);
            }
        }
        Err(CloudSyncError::SyncInProgress) => {
            debug!("[auto-sync] a sync is already running, skipping");
        }
        Err(e) => error!("[auto-sync] sync failed: {}", e),
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Whether a health check result means the remote is reachable. Any HTTP
/// answer counts; only transport failures mean offline.
pub fn is_reachable(result: &Result<(), SyncError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => !(e.kind == ErrorKind::ConnectivityFailure && e.status.is_none()),
    }
}

pub async fn probe_once(gateway: &dyn RemoteGateway, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, gateway.health_check()).await {
        Ok(result) => is_reachable(&result),
        Err(_) => false,
    }
}

/// Poll the remote every `interval` and feed the result to the monitor.
pub fn spawn_probe(
    monitor: Arc<ConnectivityMonitor>,
    gateway: Arc<dyn RemoteGateway>,
    interval: Duration,
    timeout: Duration,
    token: CancelToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let online = probe_once(gateway.as_ref(), timeout).await;
            monitor.set_online(online);
        }
    })
}
