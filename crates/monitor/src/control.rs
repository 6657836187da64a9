//! Operator actions
//!
//! [`ControlHandle`] is what the terminal UI and the service loop use to act
//! on the monitor. Queries that need a fresh snapshot go to the worker thread
//! through the bridge; trust store mutations that do not need the provider
//! run on the blocking pool.

use crate::audit::AuditLogger;
use crate::store::TrustStore;
use common::{
    ClassifiedDevice, Error, MonitorBridge, MonitorCommand, MonitorEvent, Result, StoreError,
    TrustAllReport, TrustEntry,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Result of a revoke request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// The entry that was removed
    Removed(TrustEntry),
    /// Nothing was trusted under that serial
    NotTrusted,
}

#[derive(Clone)]
pub struct ControlHandle {
    bridge: MonitorBridge,
    store: Arc<TrustStore>,
    audit: Option<Arc<AuditLogger>>,
}

impl ControlHandle {
    pub fn new(bridge: MonitorBridge, store: Arc<TrustStore>) -> Self {
        Self {
            bridge,
            store,
            audit: None,
        }
    }

    /// Record trust changes in `audit`
    pub fn with_audit(mut self, audit: Option<Arc<AuditLogger>>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    /// Next event from the monitor
    pub async fn recv_event(&self) -> Result<MonitorEvent> {
        self.bridge.recv_event().await
    }

    /// Take a fresh snapshot and classify each device
    pub async fn list_current(&self) -> Result<Vec<ClassifiedDevice>> {
        let (response, rx) = oneshot::channel();
        self.bridge
            .send_command(MonitorCommand::ListCurrent { response })
            .await?;
        let devices = rx.await.map_err(|_| worker_gone())??;
        Ok(devices)
    }

    /// Trust every attached device that is not trusted yet
    pub async fn trust_all_current(&self) -> Result<TrustAllReport> {
        let (response, rx) = oneshot::channel();
        self.bridge
            .send_command(MonitorCommand::TrustAllCurrent { response })
            .await?;
        let report = rx.await.map_err(|_| worker_gone())??;

        if let Some(audit) = &self.audit {
            for entry in &report.added {
                audit.log_device_trusted(entry);
            }
            for (serial, reason) in &report.failed {
                audit.log_trust_failure(serial, reason);
            }
        }

        Ok(report)
    }

    /// Remove `serial` from the trust store
    ///
    /// An unknown serial is reported as [`RevokeOutcome::NotTrusted`], not
    /// as an error.
    pub async fn revoke(&self, serial: &str) -> std::result::Result<RevokeOutcome, StoreError> {
        let serial = serial.trim().to_string();
        let store = self.store.clone();
        let target = serial.clone();

        let outcome = tokio::task::spawn_blocking(move || revoke_serial(&store, &target))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))??;

        if let Some(audit) = &self.audit {
            match &outcome {
                RevokeOutcome::Removed(entry) => audit.log_device_revoked(&serial, Some(entry)),
                RevokeOutcome::NotTrusted => audit.log_device_revoked(&serial, None),
            }
        }

        Ok(outcome)
    }

    /// Every trusted entry, sorted by serial
    pub fn trusted_entries(&self) -> std::result::Result<Vec<TrustEntry>, StoreError> {
        self.store.entries()
    }

    /// Ask the worker to stop after its current tick
    pub async fn shutdown(&self) -> Result<()> {
        self.bridge.send_command(MonitorCommand::Shutdown).await
    }
}

/// Remove `serial` from `store`, mapping "not present" to
/// [`RevokeOutcome::NotTrusted`]
///
/// Blocks on the store's file I/O.
pub fn revoke_serial(
    store: &TrustStore,
    serial: &str,
) -> std::result::Result<RevokeOutcome, StoreError> {
    match store.remove(serial) {
        Ok(entry) => Ok(RevokeOutcome::Removed(entry)),
        Err(StoreError::NotFound { .. }) | Err(StoreError::InvalidSerial) => {
            info!("Revoke requested for {:?}, which is not trusted", serial.trim());
            Ok(RevokeOutcome::NotTrusted)
        }
        Err(e) => {
            warn!("Revoke of {} failed: {}", serial.trim(), e);
            Err(e)
        }
    }
}

fn worker_gone() -> Error {
    Error::Channel("monitor worker dropped the request".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DeviceRecord;

    fn store() -> (Arc<TrustStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrustStore::open(dir.path().join("trusted.json")).unwrap());
        (store, dir)
    }

    #[tokio::test]
    async fn test_revoke_unknown_is_not_trusted() {
        let (store, _dir) = store();
        let (bridge, _worker) = common::create_monitor_bridge();
        let control = ControlHandle::new(bridge, store);

        assert_eq!(control.revoke("NOPE").await.unwrap(), RevokeOutcome::NotTrusted);
        assert_eq!(control.revoke("   ").await.unwrap(), RevokeOutcome::NotTrusted);
    }

    #[tokio::test]
    async fn test_revoke_removes_entry() {
        let (store, _dir) = store();
        let entry = TrustEntry::from(DeviceRecord::new("Stick", "0781", "5567", "SN1"));
        store.add(entry.clone()).unwrap();

        let (bridge, _worker) = common::create_monitor_bridge();
        let control = ControlHandle::new(bridge, store.clone());

        assert_eq!(
            control.revoke(" SN1 ").await.unwrap(),
            RevokeOutcome::Removed(entry)
        );
        assert!(!store.is_trusted("SN1"));
        assert!(control.trusted_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_fails_when_worker_gone() {
        let (store, _dir) = store();
        let (bridge, worker) = common::create_monitor_bridge();
        drop(worker);
        let control = ControlHandle::new(bridge, store);

        assert!(matches!(control.list_current().await, Err(Error::Channel(_))));
    }
}
