//! Monitor engine
//!
//! Owns the set of serials believed attached and turns successive provider
//! snapshots into connect/disconnect events. Every newly seen device is
//! classified against the trust store at the moment its event is produced.
//!
//! The engine is driven by the monitor worker thread; nothing else touches
//! `connected`. Other tasks observe attachment state through
//! [`ConnectedView`].

use crate::eject::Ejector;
use crate::provider::DeviceProvider;
use crate::store::TrustStore;
use common::{
    ClassifiedDevice, DeviceRecord, MonitorEvent, ProviderError, StoreError, TrustAllReport,
    TrustEntry,
};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Read-only view of the devices attached as of the last tick
#[derive(Clone, Default)]
pub struct ConnectedView {
    inner: Arc<RwLock<Vec<DeviceRecord>>>,
}

impl ConnectedView {
    /// Devices seen by the last completed tick, in provider order
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.inner.read().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, devices: Vec<DeviceRecord>) {
        match self.inner.write() {
            Ok(mut current) => *current = devices,
            Err(poisoned) => *poisoned.into_inner() = devices,
        }
    }
}

pub struct MonitorEngine {
    provider: Box<dyn DeviceProvider>,
    store: Arc<TrustStore>,
    /// Serials currently believed attached
    connected: HashSet<String>,
    /// False while the provider is in a failure streak
    provider_healthy: bool,
    view: ConnectedView,
    ejector: Option<Ejector>,
}

impl MonitorEngine {
    pub fn new(provider: impl DeviceProvider + 'static, store: Arc<TrustStore>) -> Self {
        Self {
            provider: Box::new(provider),
            store,
            connected: HashSet::new(),
            provider_healthy: true,
            view: ConnectedView::default(),
            ejector: None,
        }
    }

    /// Run `ejector` for every untrusted device that connects
    pub fn with_ejector(mut self, ejector: Ejector) -> Self {
        self.ejector = Some(ejector);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    pub fn connected_view(&self) -> ConnectedView {
        self.view.clone()
    }

    pub fn is_connected(&self, serial: &str) -> bool {
        self.connected.contains(serial)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    /// Run one poll iteration, collecting the events it produces
    pub fn tick(&mut self) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        self.tick_with(|event| events.push(event));
        events
    }

    /// Run one poll iteration, handing each event to `emit` as it happens
    ///
    /// A provider failure counts as an empty snapshot. Connect events follow
    /// snapshot order; the first record wins when a serial repeats.
    pub fn tick_with(&mut self, mut emit: impl FnMut(MonitorEvent)) {
        let snapshot = match self.provider.snapshot() {
            Ok(records) => {
                if !self.provider_healthy {
                    info!("Provider {} recovered", self.provider.name());
                    self.provider_healthy = true;
                    emit(MonitorEvent::ProviderRecovered);
                }
                records
            }
            Err(e) => {
                warn!("Provider {} failed: {}", self.provider.name(), e);
                if self.provider_healthy {
                    self.provider_healthy = false;
                    emit(MonitorEvent::ProviderFailed {
                        reason: e.to_string(),
                    });
                }
                Vec::new()
            }
        };

        let current = dedupe_by_serial(snapshot);

        for device in &current {
            if self.connected.contains(&device.serial) {
                continue;
            }

            let trusted = self.store.is_trusted(&device.serial);
            debug!("Classified {} (trusted: {})", device.serial, trusted);

            self.connected.insert(device.serial.clone());
            emit(MonitorEvent::DeviceConnected {
                device: device.clone(),
                trusted,
            });

            if !trusted {
                if let Some(ejector) = &self.ejector {
                    ejector.eject_best_effort(device);
                }
            }
        }

        let present: HashSet<&str> = current.iter().map(|d| d.serial.as_str()).collect();
        let mut gone: Vec<String> = self
            .connected
            .iter()
            .filter(|serial| !present.contains(serial.as_str()))
            .cloned()
            .collect();
        gone.sort();

        for serial in gone {
            self.connected.remove(&serial);
            debug!("Device disconnected: {}", serial);
            emit(MonitorEvent::DeviceDisconnected { serial });
        }

        self.view.publish(current);
    }

    /// Fresh snapshot with trust status; leaves `connected` alone
    pub fn list_current(&self) -> Result<Vec<ClassifiedDevice>, ProviderError> {
        let devices = dedupe_by_serial(self.provider.snapshot()?);
        Ok(devices
            .into_iter()
            .map(|device| {
                let trusted = self.store.is_trusted(&device.serial);
                ClassifiedDevice { device, trusted }
            })
            .collect())
    }

    /// Trust every attached device that is not trusted yet
    ///
    /// An insert that loses a race with a concurrent add counts as already
    /// trusted. Other per-device failures are reported without aborting the
    /// remaining inserts.
    pub fn trust_all_current(&self) -> Result<TrustAllReport, ProviderError> {
        let devices = dedupe_by_serial(self.provider.snapshot()?);
        let mut report = TrustAllReport::default();

        for device in devices {
            if self.store.is_trusted(&device.serial) {
                report.already_trusted.push(device.serial);
                continue;
            }

            let entry = TrustEntry::from(&device);
            match self.store.add(entry.clone()) {
                Ok(()) => report.added.push(entry),
                Err(StoreError::AlreadyExists { serial }) => report.already_trusted.push(serial),
                Err(e) => {
                    warn!("Failed to trust {}: {}", device.serial, e);
                    report.failed.push((device.serial, e.to_string()));
                }
            }
        }

        info!(
            "Bulk trust: {} added, {} already trusted, {} failed",
            report.added.len(),
            report.already_trusted.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// Identified records only, first occurrence of each serial, order kept
fn dedupe_by_serial(records: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| record.is_identified() && seen.insert(record.serial.clone()))
        .collect()
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// Snapshots over a small serial universe so attach/detach cycles repeat
    fn snapshots_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
        proptest::collection::vec(proptest::collection::vec(0u8..6, 0..8), 1..12)
    }

    proptest! {
        /// Property: one connect per absent->present transition, and the
        /// connected set always equals the last snapshot's serials
        #[test]
        fn prop_one_connect_per_attachment(snapshots in snapshots_strategy()) {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(TrustStore::open(dir.path().join("t.json")).unwrap());
            let provider = ScriptedProvider::new();
            let script = provider.clone();
            let mut engine = MonitorEngine::new(provider, store);

            let mut previous: HashSet<String> = HashSet::new();
            for snapshot in snapshots {
                let records: Vec<DeviceRecord> = snapshot
                    .iter()
                    .map(|n| DeviceRecord::new(format!("dev{}", n), "1", "2", format!("SN{}", n)))
                    .collect();
                let present: HashSet<String> = records.iter().map(|r| r.serial.clone()).collect();
                script.push(records);

                let events = engine.tick();

                let mut connects: HashMap<String, usize> = HashMap::new();
                for event in &events {
                    if let MonitorEvent::DeviceConnected { device, .. } = event {
                        *connects.entry(device.serial.clone()).or_default() += 1;
                    }
                }
                let expected: HashSet<String> = present.difference(&previous).cloned().collect();
                prop_assert_eq!(connects.len(), expected.len());
                for serial in &expected {
                    prop_assert_eq!(connects.get(serial).copied(), Some(1));
                }
                for serial in &present {
                    prop_assert!(engine.is_connected(serial));
                }
                prop_assert_eq!(engine.connected_count(), present.len());

                previous = present;
            }
        }
    }
}
