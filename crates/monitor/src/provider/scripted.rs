//! In-memory provider for tests and demos
//!
//! Plays back a queue of snapshots (or failures). When the queue runs dry the
//! last successful snapshot repeats, which models devices staying attached.
//! Clones share the same script, so a test can keep a handle and push more
//! steps after moving the provider into an engine.

use super::{DeviceProvider, retain_identified};
use common::{DeviceRecord, ProviderError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type Step = Result<Vec<DeviceRecord>, ProviderError>;

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    last: Vec<DeviceRecord>,
    calls: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a snapshot (builder form)
    pub fn then(self, devices: Vec<DeviceRecord>) -> Self {
        self.push(devices);
        self
    }

    /// Queue a failing tick (builder form)
    pub fn then_fail(self, reason: &str) -> Self {
        self.push_failure(reason);
        self
    }

    pub fn push(&self, devices: Vec<DeviceRecord>) {
        self.with_script(|s| s.steps.push_back(Ok(devices)));
    }

    pub fn push_failure(&self, reason: &str) {
        let err = ProviderError::Other(reason.to_string());
        self.with_script(|s| s.steps.push_back(Err(err)));
    }

    /// Number of snapshots taken so far
    pub fn calls(&self) -> usize {
        self.with_script(|s| s.calls)
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut script)
    }
}

impl DeviceProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn snapshot(&self) -> Result<Vec<DeviceRecord>, ProviderError> {
        self.with_script(|s| {
            s.calls += 1;
            match s.steps.pop_front() {
                Some(Ok(devices)) => {
                    s.last = devices.clone();
                    Ok(retain_identified(devices))
                }
                Some(Err(e)) => Err(e),
                None => Ok(retain_identified(s.last.clone())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_and_repeat() {
        let a = DeviceRecord::new("A", "1", "2", "SN1");
        let provider = ScriptedProvider::new()
            .then(vec![a.clone()])
            .then_fail("boom");

        assert_eq!(provider.snapshot().unwrap(), vec![a.clone()]);
        assert!(provider.snapshot().is_err());
        // Script exhausted: last good snapshot repeats
        assert_eq!(provider.snapshot().unwrap(), vec![a]);
        assert_eq!(provider.calls(), 3);
    }

    #[test]
    fn test_clones_share_script() {
        let provider = ScriptedProvider::new();
        let handle = provider.clone();
        handle.push(vec![DeviceRecord::new("A", "1", "2", "SN1")]);

        assert_eq!(provider.snapshot().unwrap().len(), 1);
        assert_eq!(handle.calls(), 1);
    }

    #[test]
    fn test_blank_serials_filtered() {
        let provider = ScriptedProvider::new().then(vec![
            DeviceRecord::new("A", "1", "2", ""),
            DeviceRecord::new("B", "1", "2", "SN2"),
        ]);
        let snapshot = provider.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].serial, "SN2");
    }
}
