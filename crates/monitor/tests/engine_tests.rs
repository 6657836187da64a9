//! Integration tests for the monitor engine
//!
//! Drives a [`MonitorEngine`] tick by tick with a scripted provider and a
//! file-backed trust store:
//! - Connect events and the connected set across ticks
//! - Trust, revoke and reconnect cycles
//! - Duplicate and unidentified records
//!
//! Run with: `cargo test -p monitor --test engine_tests`

use common::{DeviceRecord, MonitorEvent, TrustEntry};
use monitor::control::{RevokeOutcome, revoke_serial};
use monitor::provider::ScriptedProvider;
use monitor::{MonitorEngine, TrustStore};
use std::sync::Arc;
use tempfile::TempDir;

fn drive_e() -> DeviceRecord {
    DeviceRecord::new("Drive E", "0781", "5567", "SN123")
}

fn device(serial: &str) -> DeviceRecord {
    DeviceRecord::new(format!("Device {}", serial), "1234", "5678", serial)
}

fn setup(provider: &ScriptedProvider) -> (MonitorEngine, Arc<TrustStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TrustStore::open(dir.path().join("trusted_devices.json")).unwrap());
    let engine = MonitorEngine::new(provider.clone(), store.clone());
    (engine, store, dir)
}

/// (serial, trusted) of every connect event, in emission order
fn connects(events: &[MonitorEvent]) -> Vec<(String, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::DeviceConnected { device, trusted } => {
                Some((device.serial.clone(), *trusted))
            }
            _ => None,
        })
        .collect()
}

// ============================================================================
// Walkthrough
// ============================================================================

#[test]
fn test_untrusted_then_bulk_trust_then_reconnect() {
    let provider = ScriptedProvider::new();
    let (mut engine, store, _dir) = setup(&provider);

    // Tick 1: unknown device attached
    provider.push(vec![drive_e()]);
    let events = engine.tick();
    assert_eq!(
        events,
        vec![MonitorEvent::DeviceConnected {
            device: drive_e(),
            trusted: false
        }]
    );
    assert!(events[0].is_alert());

    // Operator trusts everything attached
    let report = engine.trust_all_current().unwrap();
    assert_eq!(report.added, vec![TrustEntry::from(drive_e())]);
    assert!(report.is_complete());
    assert!(store.is_trusted("SN123"));

    // Tick 2: still attached, nothing new
    provider.push(vec![drive_e()]);
    assert!(engine.tick().iter().all(|e| !matches!(e, MonitorEvent::DeviceConnected { .. })));

    // Tick 3: removed
    provider.push(vec![]);
    let events = engine.tick();
    assert_eq!(
        events,
        vec![MonitorEvent::DeviceDisconnected {
            serial: "SN123".to_string()
        }]
    );
    assert!(!engine.is_connected("SN123"));

    // Tick 4: reattached, now trusted
    provider.push(vec![drive_e()]);
    assert_eq!(connects(&engine.tick()), vec![("SN123".to_string(), true)]);
}

// ============================================================================
// Connect Event Properties
// ============================================================================

#[test]
fn test_device_in_both_snapshots_connects_once() {
    let provider = ScriptedProvider::new()
        .then(vec![device("A"), device("X")])
        .then(vec![device("X"), device("B")]);
    let (mut engine, store, _dir) = setup(&provider);
    store.add(TrustEntry::from(device("X"))).unwrap();

    let first = connects(&engine.tick());
    let second = connects(&engine.tick());

    assert_eq!(
        first,
        vec![("A".to_string(), false), ("X".to_string(), true)]
    );
    assert_eq!(second, vec![("B".to_string(), false)]);
}

#[test]
fn test_duplicate_serial_in_snapshot_yields_one_event() {
    let first = DeviceRecord::new("First", "1111", "2222", "DUP");
    let second = DeviceRecord::new("Second", "3333", "4444", "DUP");
    let provider = ScriptedProvider::new().then(vec![first.clone(), second]);
    let (mut engine, _store, _dir) = setup(&provider);

    let events = engine.tick();
    assert_eq!(
        events,
        vec![MonitorEvent::DeviceConnected {
            device: first,
            trusted: false
        }]
    );
    assert_eq!(engine.connected_count(), 1);
}

#[test]
fn test_unidentified_record_never_connects() {
    let blank = DeviceRecord::new("No Serial", "1234", "5678", "   ");
    let provider = ScriptedProvider::new().then(vec![blank, device("OK")]);
    let (mut engine, store, _dir) = setup(&provider);

    assert_eq!(connects(&engine.tick()), vec![("OK".to_string(), false)]);

    let report = engine.trust_all_current().unwrap();
    assert_eq!(report.added.len(), 1);
    assert_eq!(store.len(), 1);
    assert!(store.get("").is_none());
}

#[test]
fn test_disconnect_reconnect_cycle() {
    let provider = ScriptedProvider::new()
        .then(vec![device("CYC")])
        .then(vec![])
        .then(vec![device("CYC")])
        .then(vec![device("CYC")]);
    let (mut engine, _store, _dir) = setup(&provider);

    assert_eq!(connects(&engine.tick()).len(), 1);
    assert!(connects(&engine.tick()).is_empty());
    assert_eq!(connects(&engine.tick()).len(), 1);
    assert!(connects(&engine.tick()).is_empty());
}

#[test]
fn test_reordered_snapshot_is_not_a_change() {
    let provider = ScriptedProvider::new()
        .then(vec![device("A"), device("B"), device("C")])
        .then(vec![device("C"), device("A"), device("B")]);
    let (mut engine, _store, _dir) = setup(&provider);

    assert_eq!(engine.tick().len(), 3);
    assert!(engine.tick().is_empty());
    assert_eq!(engine.connected_count(), 3);
}

#[test]
fn test_attached_at_startup_connects_on_first_tick() {
    let provider = ScriptedProvider::new().then(vec![device("BOOT")]);
    let (mut engine, _store, _dir) = setup(&provider);

    assert_eq!(engine.connected_count(), 0);
    assert_eq!(connects(&engine.tick()), vec![("BOOT".to_string(), false)]);
}

// ============================================================================
// Trust Changes
// ============================================================================

#[test]
fn test_revoke_then_reconnect_is_untrusted() {
    let provider = ScriptedProvider::new()
        .then(vec![device("REV")])
        .then(vec![])
        .then(vec![device("REV")]);
    let (mut engine, store, _dir) = setup(&provider);
    store.add(TrustEntry::from(device("REV"))).unwrap();

    assert_eq!(connects(&engine.tick()), vec![("REV".to_string(), true)]);
    engine.tick();

    let outcome = revoke_serial(&store, "REV").unwrap();
    assert!(matches!(outcome, RevokeOutcome::Removed(_)));

    assert_eq!(connects(&engine.tick()), vec![("REV".to_string(), false)]);
}

#[test]
fn test_trust_all_is_idempotent() {
    let provider = ScriptedProvider::new().then(vec![device("A"), device("B")]);
    let (engine, store, _dir) = setup(&provider);

    let first = engine.trust_all_current().unwrap();
    assert_eq!(first.added.len(), 2);

    let second = engine.trust_all_current().unwrap();
    assert!(second.added.is_empty());
    assert!(second.failed.is_empty());
    assert_eq!(store.len(), 2);
}

#[test]
fn test_list_current_classifies_without_connecting() {
    let provider = ScriptedProvider::new().then(vec![device("T"), device("U")]);
    let (mut engine, store, _dir) = setup(&provider);
    store.add(TrustEntry::from(device("T"))).unwrap();

    let listed = engine.list_current().unwrap();
    let summary: Vec<_> = listed
        .iter()
        .map(|c| (c.device.serial.as_str(), c.trusted))
        .collect();
    assert_eq!(summary, vec![("T", true), ("U", false)]);
    assert_eq!(engine.connected_count(), 0);

    // The first tick still reports both devices
    assert_eq!(engine.tick().len(), 2);
}

// ============================================================================
// Failure Handling
// ============================================================================

#[test]
fn test_provider_failure_then_recovery() {
    let provider = ScriptedProvider::new()
        .then(vec![device("P")])
        .then_fail("profiler crashed")
        .then_fail("profiler crashed again")
        .then(vec![device("P")]);
    let (mut engine, _store, _dir) = setup(&provider);

    assert_eq!(connects(&engine.tick()).len(), 1);

    // Failure counts as an empty snapshot
    let failed = engine.tick();
    assert!(failed.contains(&MonitorEvent::DeviceDisconnected {
        serial: "P".to_string()
    }));
    assert!(
        failed
            .iter()
            .any(|e| matches!(e, MonitorEvent::ProviderFailed { .. }))
    );

    // Second failure in the streak is quiet
    assert!(engine.tick().is_empty());

    let recovered = engine.tick();
    assert!(recovered.contains(&MonitorEvent::ProviderRecovered));
    assert_eq!(connects(&recovered), vec![("P".to_string(), false)]);
}

#[test]
fn test_degraded_store_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trusted_devices.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(TrustStore::open(&path).is_err());

    let store = Arc::new(TrustStore::degraded(&path));
    let provider = ScriptedProvider::new().then(vec![drive_e()]);
    let mut engine = MonitorEngine::new(provider, store.clone());

    assert_eq!(connects(&engine.tick()), vec![("SN123".to_string(), false)]);

    let report = engine.trust_all_current().unwrap();
    assert!(report.added.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(!report.is_complete());

    // The unreadable file is left untouched
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[test]
fn test_connected_view_is_shared_snapshot() {
    let provider = ScriptedProvider::new()
        .then(vec![device("V1"), device("V2")])
        .then(vec![device("V2")]);
    let (mut engine, _store, _dir) = setup(&provider);
    let view = engine.connected_view();

    assert!(view.is_empty());
    engine.tick();
    assert_eq!(view.len(), 2);
    engine.tick();
    assert_eq!(view.snapshot(), vec![device("V2")]);
}
