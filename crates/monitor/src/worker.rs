//! Monitor worker thread
//!
//! Dedicated thread that owns the [`MonitorEngine`] and runs the poll loop.
//! Providers block on subprocesses and system calls, so they never run on the
//! Tokio runtime; the runtime talks to this thread through the channel bridge
//! in `common::channel`.
//!
//! The loop sleeps in short slices between ticks and checks for commands in
//! each slice, so a `Shutdown` is honoured within one slice rather than one
//! poll interval.

use crate::engine::MonitorEngine;
use crate::notifier::Notifier;
use common::{MonitorCommand, MonitorWorker};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound on how long the loop sleeps before looking at commands again
const COMMAND_SLICE: Duration = Duration::from_millis(100);

/// Longest accepted time between polls
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Monitor worker thread state
pub struct MonitorWorkerThread {
    engine: MonitorEngine,
    worker: MonitorWorker,
    interval: Duration,
    notifier: Option<Box<dyn Notifier>>,
}

impl MonitorWorkerThread {
    pub fn new(engine: MonitorEngine, worker: MonitorWorker, interval: Duration) -> Self {
        Self {
            engine,
            worker,
            interval: interval.min(MAX_POLL_INTERVAL),
            notifier: None,
        }
    }

    /// Also hand every event to `notifier` before it is sent to the runtime
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run the poll loop until `Shutdown` arrives or the bridge is dropped
    ///
    /// The first tick runs immediately, so devices attached before startup
    /// are reported as connections.
    pub fn run(mut self) {
        info!(
            "Monitor worker started (provider: {}, interval: {:?})",
            self.engine.provider_name(),
            self.interval
        );

        let mut next_tick = Instant::now();

        'poll: loop {
            while let Some(cmd) = self.worker.try_recv_command() {
                if matches!(cmd, MonitorCommand::Shutdown) {
                    info!("Monitor worker shutting down");
                    break 'poll;
                }
                self.handle_command(cmd);
            }

            if self.worker.is_orphaned() {
                info!("All monitor handles dropped, stopping worker");
                break;
            }

            let now = Instant::now();
            if now >= next_tick {
                self.tick();
                let now = Instant::now();
                next_tick = now.checked_add(self.interval).unwrap_or(now + COMMAND_SLICE);
                continue;
            }

            std::thread::sleep(COMMAND_SLICE.min(next_tick - now));
        }

        info!("Monitor worker stopped");
    }

    fn tick(&mut self) {
        let worker = &self.worker;
        let notifier = &mut self.notifier;
        self.engine.tick_with(|event| {
            if let Some(notifier) = notifier.as_mut() {
                notifier.notify(&event);
            }
            if let Err(e) = worker.send_event(event) {
                debug!("Dropping monitor event: {}", e);
            }
        });
    }

    /// Handle a command, keeping the thread alive if the handler panics
    fn handle_command(&mut self, cmd: MonitorCommand) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in monitor command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: MonitorCommand) {
        match cmd {
            MonitorCommand::ListCurrent { response } => {
                let result = self.engine.list_current();
                if let Err(e) = &result {
                    warn!("List of current devices failed: {}", e);
                }
                let _ = response.send(result);
            }

            MonitorCommand::TrustAllCurrent { response } => {
                let result = self.engine.trust_all_current();
                if let Err(e) = &result {
                    warn!("Bulk trust failed: {}", e);
                }
                let _ = response.send(result);
            }

            MonitorCommand::Shutdown => {
                // Handled by the run loop
            }
        }
    }
}

/// Spawn the monitor worker thread
pub fn spawn_monitor_worker(thread: MonitorWorkerThread) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("monitor-worker".to_string())
        .spawn(move || thread.run())
}
