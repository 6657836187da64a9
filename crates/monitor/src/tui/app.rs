//! TUI application state
//!
//! Holds what the screen shows (attached devices, recent events, open
//! dialog) and turns key presses into operator actions. Actions that need the
//! worker or the trust store are recorded as pending flags and executed by
//! the run loop, so key handling itself never awaits.

use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{
    event::{KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::events::{Action, Event, EventHandler};
use super::ui;
use crate::control::{ControlHandle, RevokeOutcome};
use common::{DeviceRecord, MonitorEvent};

/// Lines kept in the event log panel
const MAX_LOG_LINES: usize = 200;

/// An attached device and its trust status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRow {
    pub device: DeviceRecord,
    pub trusted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Warning,
    /// Untrusted device
    Alert,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    /// Local wall-clock time, `HH:MM:SS`
    pub time: String,
    pub kind: LogKind,
    pub message: String,
}

/// Current dialog/popup being displayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
    None,
    Help,
    /// An untrusted device just connected
    UntrustedAlert(DeviceRecord),
    ConfirmTrustAll,
    /// Serial entry for revoking trust
    Revoke { input: String },
}

/// Application state
pub struct App {
    control: ControlHandle,
    provider_name: String,
    devices: Vec<DeviceRow>,
    selected_index: usize,
    dialog: Dialog,
    /// Alerts waiting behind the currently open dialog
    queued_alerts: VecDeque<DeviceRecord>,
    log: VecDeque<LogLine>,
    should_quit: bool,
    start_time: Instant,
    provider_healthy: bool,
    pub pending_refresh: bool,
    pub pending_trust_all: bool,
    pub pending_revoke: Option<String>,
}

impl App {
    pub fn new(control: ControlHandle, provider_name: impl Into<String>) -> Self {
        Self {
            control,
            provider_name: provider_name.into(),
            devices: Vec::new(),
            selected_index: 0,
            dialog: Dialog::None,
            queued_alerts: VecDeque::new(),
            log: VecDeque::new(),
            should_quit: false,
            start_time: Instant::now(),
            provider_healthy: true,
            pending_refresh: false,
            pending_trust_all: false,
            pending_revoke: None,
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn provider_healthy(&self) -> bool {
        self.provider_healthy
    }

    pub fn store_degraded(&self) -> bool {
        self.control.store().is_degraded()
    }

    pub fn trusted_count(&self) -> usize {
        self.control.store().len()
    }

    pub fn devices(&self) -> &[DeviceRow] {
        &self.devices
    }

    pub fn untrusted_count(&self) -> usize {
        self.devices.iter().filter(|row| !row.trusted).count()
    }

    pub fn selected_device(&self) -> Option<&DeviceRow> {
        self.devices.get(self.selected_index)
    }

    pub fn selected_index(&self) -> usize {
        self.selected_index
    }

    pub fn dialog(&self) -> &Dialog {
        &self.dialog
    }

    /// Newest entries last
    pub fn log_lines(&self) -> impl DoubleEndedIterator<Item = &LogLine> {
        self.log.iter()
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Handle a key press, routing text to the revoke dialog while it is open
    pub fn handle_key(&mut self, key: KeyEvent) {
        if let Dialog::Revoke { input } = &mut self.dialog {
            match key.code {
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    self.should_quit = true;
                }
                KeyCode::Esc => self.close_dialog(),
                KeyCode::Enter => {
                    let serial = input.trim().to_string();
                    if !serial.is_empty() {
                        self.pending_revoke = Some(serial);
                    }
                    self.close_dialog();
                }
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(c) => input.push(c),
                _ => {}
            }
            return;
        }

        self.handle_action(Action::from(key));
    }

    /// Handle user action
    pub fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => {
                if self.dialog != Dialog::None {
                    self.close_dialog();
                } else {
                    self.should_quit = true;
                }
            }
            Action::CloseDialog => self.close_dialog(),
            Action::Up => {
                if self.dialog == Dialog::None && self.selected_index > 0 {
                    self.selected_index -= 1;
                }
            }
            Action::Down => {
                if self.dialog == Dialog::None && self.selected_index + 1 < self.devices.len() {
                    self.selected_index += 1;
                }
            }
            Action::Refresh => {
                if self.dialog == Dialog::None {
                    self.pending_refresh = true;
                }
            }
            Action::TrustAll => {
                if self.dialog == Dialog::None {
                    self.dialog = Dialog::ConfirmTrustAll;
                }
            }
            Action::Revoke => {
                if self.dialog == Dialog::None {
                    let input = self
                        .selected_device()
                        .map(|row| row.device.serial.clone())
                        .unwrap_or_default();
                    self.dialog = Dialog::Revoke { input };
                }
            }
            Action::ShowHelp => {
                if self.dialog == Dialog::None {
                    self.dialog = Dialog::Help;
                }
            }
            Action::Confirm => match self.dialog {
                Dialog::ConfirmTrustAll => {
                    self.pending_trust_all = true;
                    self.close_dialog();
                }
                Dialog::Help | Dialog::UntrustedAlert(_) => self.close_dialog(),
                Dialog::None | Dialog::Revoke { .. } => {}
            },
            Action::None => {}
        }
    }

    /// Close the open dialog, showing the next queued alert if any
    fn close_dialog(&mut self) {
        self.dialog = match self.queued_alerts.pop_front() {
            Some(device) => Dialog::UntrustedAlert(device),
            None => Dialog::None,
        };
    }

    /// Apply an event from the monitor worker
    pub fn handle_monitor_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::DeviceConnected { device, trusted } => {
                if trusted {
                    self.push_log(LogKind::Info, format!("Trusted device connected: {}", device));
                } else {
                    self.push_log(
                        LogKind::Alert,
                        format!("UNTRUSTED device connected: {}", device),
                    );
                    if self.dialog == Dialog::None {
                        self.dialog = Dialog::UntrustedAlert(device.clone());
                    } else {
                        self.queued_alerts.push_back(device.clone());
                    }
                }
                self.upsert_device(DeviceRow { device, trusted });
            }
            MonitorEvent::DeviceDisconnected { serial } => {
                self.push_log(LogKind::Info, format!("Device disconnected: {}", serial));
                self.devices.retain(|row| row.device.serial != serial);
                self.queued_alerts.retain(|device| device.serial != serial);
                self.clamp_selection();
            }
            MonitorEvent::ProviderFailed { reason } => {
                self.provider_healthy = false;
                self.push_log(LogKind::Warning, format!("Device provider failing: {}", reason));
            }
            MonitorEvent::ProviderRecovered => {
                self.provider_healthy = true;
                self.push_log(LogKind::Info, "Device provider recovered".to_string());
            }
        }
    }

    /// Replace the device list with a fresh classified snapshot
    pub async fn refresh_devices(&mut self) -> Result<()> {
        let control = self.control.clone();
        let devices = self
            .while_draining(&control, control.list_current())
            .await
            .context("Failed to list devices")?;

        self.devices = devices
            .into_iter()
            .map(|classified| DeviceRow {
                device: classified.device,
                trusted: classified.trusted,
            })
            .collect();
        self.clamp_selection();
        debug!("Device list refreshed: {} devices", self.devices.len());
        Ok(())
    }

    /// Trust every attached device
    pub async fn trust_all(&mut self) -> Result<()> {
        let control = self.control.clone();
        let report = self
            .while_draining(&control, control.trust_all_current())
            .await
            .context("Failed to trust current devices")?;

        for entry in &report.added {
            self.set_trusted(&entry.serial, true);
        }
        for serial in &report.already_trusted {
            self.set_trusted(serial, true);
        }

        self.push_log(
            LogKind::Info,
            format!(
                "Trusted {} device(s), {} already trusted",
                report.added.len(),
                report.already_trusted.len()
            ),
        );
        for (serial, reason) in &report.failed {
            self.push_log(
                LogKind::Warning,
                format!("Could not trust {}: {}", serial, reason),
            );
        }
        Ok(())
    }

    /// Revoke trust for `serial`
    pub async fn revoke(&mut self, serial: &str) -> Result<()> {
        let outcome = self
            .control
            .revoke(serial)
            .await
            .with_context(|| format!("Failed to revoke {}", serial))?;

        match outcome {
            RevokeOutcome::Removed(entry) => {
                self.set_trusted(&entry.serial, false);
                self.push_log(
                    LogKind::Info,
                    format!("Revoked trust for {} ({})", entry.serial, entry.name),
                );
            }
            RevokeOutcome::NotTrusted => {
                self.push_log(LogKind::Info, format!("{} was not trusted", serial));
            }
        }
        Ok(())
    }

    /// Await a worker reply while still applying monitor events
    ///
    /// The worker blocks once the event queue is full, so it could never
    /// answer if events were left unread during the wait.
    async fn while_draining<T>(
        &mut self,
        monitor: &ControlHandle,
        reply: impl Future<Output = T>,
    ) -> T {
        tokio::pin!(reply);
        loop {
            tokio::select! {
                result = &mut reply => return result,
                event = monitor.recv_event() => match event {
                    Ok(event) => self.handle_monitor_event(event),
                    Err(_) => return (&mut reply).await,
                },
            }
        }
    }

    /// Record a failed operator action in the event log
    pub fn report_error(&mut self, error: &anyhow::Error) {
        warn!("{:#}", error);
        self.push_log(LogKind::Warning, format!("{:#}", error));
    }

    fn upsert_device(&mut self, row: DeviceRow) {
        match self
            .devices
            .iter_mut()
            .find(|existing| existing.device.serial == row.device.serial)
        {
            Some(existing) => *existing = row,
            None => self.devices.push(row),
        }
    }

    fn set_trusted(&mut self, serial: &str, trusted: bool) {
        for row in self.devices.iter_mut().filter(|r| r.device.serial == serial) {
            row.trusted = trusted;
        }
    }

    fn clamp_selection(&mut self) {
        if self.selected_index >= self.devices.len() {
            self.selected_index = self.devices.len().saturating_sub(1);
        }
    }

    fn push_log(&mut self, kind: LogKind, message: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(LogLine {
            time: Local::now().format("%H:%M:%S").to_string(),
            kind,
            message,
        });
    }
}

/// Terminal wrapper for setup/teardown
pub struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Tui {
    pub fn new() -> Result<Self> {
        let backend = CrosstermBackend::new(io::stdout());
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
    }

    /// Enter TUI mode (raw mode, alternate screen)
    pub fn enter(&mut self) -> Result<()> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        self.terminal.hide_cursor()?;
        self.terminal.clear()?;
        Ok(())
    }

    /// Exit TUI mode (restore terminal state)
    pub fn exit(&mut self) -> Result<()> {
        disable_raw_mode()?;
        execute!(io::stdout(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }

    pub fn draw(&mut self, app: &App) -> Result<()> {
        self.terminal.draw(|frame| ui::render(frame, app))?;
        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        // Best effort cleanup
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Run the TUI until the operator quits or the monitor worker goes away
pub async fn run(control: ControlHandle, provider_name: &str) -> Result<()> {
    let mut tui = Tui::new()?;
    tui.enter()?;

    let monitor = control.clone();
    let mut app = App::new(control, provider_name);

    if let Err(e) = app.refresh_devices().await {
        app.report_error(&e);
    }

    let mut events = EventHandler::new(Duration::from_millis(250));

    loop {
        if let Err(e) = tui.draw(&app) {
            error!("Failed to draw UI: {:#}", e);
            break;
        }

        if std::mem::take(&mut app.pending_refresh) {
            if let Err(e) = app.refresh_devices().await {
                app.report_error(&e);
            }
        }
        if std::mem::take(&mut app.pending_trust_all) {
            if let Err(e) = app.trust_all().await {
                app.report_error(&e);
            }
        }
        if let Some(serial) = app.pending_revoke.take() {
            if let Err(e) = app.revoke(&serial).await {
                app.report_error(&e);
            }
        }

        tokio::select! {
            event = events.next() => {
                match event {
                    Some(Event::Key(key)) => app.handle_key(key),
                    // Resize is handled by ratatui on the next draw
                    Some(Event::Resize(_, _)) | Some(Event::Tick) => {}
                    None => break,
                }
            }

            monitor_event = monitor.recv_event() => {
                match monitor_event {
                    Ok(event) => app.handle_monitor_event(event),
                    Err(e) => {
                        error!("Monitor worker stopped: {}", e);
                        break;
                    }
                }
            }
        }

        if app.should_quit() {
            break;
        }
    }

    tui.exit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TrustStore;
    use common::{ClassifiedDevice, MonitorCommand, create_monitor_bridge};
    use std::sync::Arc;

    fn app() -> (App, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrustStore::open(dir.path().join("t.json")).unwrap());
        let (bridge, _worker) = create_monitor_bridge();
        (App::new(ControlHandle::new(bridge, store), "scripted"), dir)
    }

    fn connected(serial: &str, trusted: bool) -> MonitorEvent {
        MonitorEvent::DeviceConnected {
            device: DeviceRecord::new(format!("Stick {}", serial), "0781", "5567", serial),
            trusted,
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_untrusted_connect_opens_alert() {
        let (mut app, _dir) = app();

        app.handle_monitor_event(connected("A", true));
        assert_eq!(app.dialog, Dialog::None);

        app.handle_monitor_event(connected("B", false));
        assert!(matches!(app.dialog, Dialog::UntrustedAlert(ref d) if d.serial == "B"));
        assert_eq!(app.devices().len(), 2);
        assert_eq!(app.untrusted_count(), 1);
    }

    #[test]
    fn test_alerts_queue_behind_open_dialog() {
        let (mut app, _dir) = app();

        app.handle_monitor_event(connected("A", false));
        app.handle_monitor_event(connected("B", false));

        app.handle_action(Action::Confirm);
        assert!(matches!(app.dialog, Dialog::UntrustedAlert(ref d) if d.serial == "B"));

        app.handle_action(Action::CloseDialog);
        assert_eq!(app.dialog, Dialog::None);
    }

    #[test]
    fn test_disconnect_removes_row() {
        let (mut app, _dir) = app();
        app.handle_monitor_event(connected("A", true));
        app.handle_monitor_event(connected("B", true));
        app.handle_action(Action::Down);
        assert_eq!(app.selected_index(), 1);

        app.handle_monitor_event(MonitorEvent::DeviceDisconnected {
            serial: "B".to_string(),
        });
        assert_eq!(app.devices().len(), 1);
        assert_eq!(app.selected_index(), 0);
    }

    #[test]
    fn test_provider_health_tracking() {
        let (mut app, _dir) = app();
        app.handle_monitor_event(MonitorEvent::ProviderFailed {
            reason: "boom".to_string(),
        });
        assert!(!app.provider_healthy());
        app.handle_monitor_event(MonitorEvent::ProviderRecovered);
        assert!(app.provider_healthy());
        assert_eq!(app.log_lines().count(), 2);
    }

    #[test]
    fn test_revoke_dialog_prefilled_and_editable() {
        let (mut app, _dir) = app();
        app.handle_monitor_event(connected("SN1", true));

        app.handle_action(Action::Revoke);
        assert_eq!(
            app.dialog,
            Dialog::Revoke {
                input: "SN1".to_string()
            }
        );

        // Typed characters go to the input, not to key bindings
        app.handle_key(key(KeyCode::Char('q')));
        app.handle_key(key(KeyCode::Backspace));
        app.handle_key(key(KeyCode::Char('2')));
        app.handle_key(key(KeyCode::Enter));

        assert_eq!(app.pending_revoke.as_deref(), Some("SN2"));
        assert_eq!(app.dialog, Dialog::None);
        assert!(!app.should_quit());
    }

    #[test]
    fn test_empty_revoke_input_is_ignored() {
        let (mut app, _dir) = app();
        app.handle_action(Action::Revoke);
        app.handle_key(key(KeyCode::Enter));
        assert!(app.pending_revoke.is_none());
    }

    #[test]
    fn test_trust_all_requires_confirmation() {
        let (mut app, _dir) = app();

        app.handle_action(Action::TrustAll);
        assert_eq!(app.dialog, Dialog::ConfirmTrustAll);
        assert!(!app.pending_trust_all);

        app.handle_action(Action::Confirm);
        assert!(app.pending_trust_all);
        assert_eq!(app.dialog, Dialog::None);
    }

    #[test]
    fn test_dialogs_and_quit() {
        let (mut app, _dir) = app();

        app.handle_action(Action::ShowHelp);
        assert_eq!(app.dialog, Dialog::Help);

        // Quit should close dialog first
        app.handle_action(Action::Quit);
        assert_eq!(app.dialog, Dialog::None);
        assert!(!app.should_quit());

        app.handle_action(Action::Quit);
        assert!(app.should_quit());
    }

    #[tokio::test]
    async fn test_refresh_with_full_event_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrustStore::open(dir.path().join("t.json")).unwrap());
        let (bridge, worker) = create_monitor_bridge();
        let mut app = App::new(ControlHandle::new(bridge, store), "scripted");

        // The worker has more events to hand over than the queue holds
        // before it gets to answer the list request
        let handle = std::thread::spawn(move || {
            loop {
                match worker.try_recv_command() {
                    Some(MonitorCommand::ListCurrent { response }) => {
                        for i in 0..300 {
                            worker
                                .send_event(MonitorEvent::DeviceDisconnected {
                                    serial: i.to_string(),
                                })
                                .unwrap();
                        }
                        let _ = response.send(Ok(vec![ClassifiedDevice {
                            device: DeviceRecord::new("Stick", "0781", "5567", "SN1"),
                            trusted: true,
                        }]));
                        break;
                    }
                    Some(_) => {}
                    None => std::thread::sleep(Duration::from_millis(5)),
                }
            }
        });

        tokio::time::timeout(Duration::from_secs(5), app.refresh_devices())
            .await
            .expect("refresh stalled on a full event queue")
            .unwrap();
        handle.join().unwrap();

        assert_eq!(app.devices().len(), 1);
        assert!(app.log_lines().count() > 0);
    }

    #[test]
    fn test_log_is_bounded() {
        let (mut app, _dir) = app();
        for i in 0..(MAX_LOG_LINES + 10) {
            app.handle_monitor_event(MonitorEvent::DeviceDisconnected {
                serial: i.to_string(),
            });
        }
        assert_eq!(app.log_lines().count(), MAX_LOG_LINES);
    }
}
