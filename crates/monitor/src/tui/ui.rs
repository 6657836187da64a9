//! TUI rendering with ratatui
//!
//! Status bar on top, device table and event log in the middle, key hints at
//! the bottom; dialogs are drawn over the centre of the screen.

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Table, TableState, Wrap},
};
use std::time::Duration;

use super::app::{App, DeviceRow, Dialog, LogKind};
use common::DeviceRecord;

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Status bar
            Constraint::Min(8),     // Device table
            Constraint::Length(10), // Event log
            Constraint::Length(3),  // Key hints
        ])
        .split(frame.area());

    render_status_bar(frame, app, chunks[0]);
    render_device_table(frame, app, chunks[1]);
    render_event_log(frame, app, chunks[2]);
    render_help_bar(frame, chunks[3]);

    match app.dialog() {
        Dialog::None => {}
        Dialog::Help => render_help_dialog(frame),
        Dialog::UntrustedAlert(device) => render_alert_dialog(frame, device),
        Dialog::ConfirmTrustAll => render_confirm_trust_all_dialog(frame, app),
        Dialog::Revoke { input } => render_revoke_dialog(frame, input),
    }
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let (provider_status, provider_style) = if app.provider_healthy() {
        ("ok", Style::default().fg(Color::Green))
    } else {
        ("FAILING", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
    };

    let mut status_text = vec![
        Span::styled("Provider: ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.provider_name().to_string(), Style::default().fg(Color::Cyan)),
        Span::raw(" "),
        Span::styled(provider_status, provider_style),
        Span::raw("  |  "),
        Span::styled("Trusted: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{}", app.trusted_count()),
            Style::default().fg(Color::Green),
        ),
        Span::raw("  |  "),
        Span::styled("Uptime: ", Style::default().fg(Color::DarkGray)),
        Span::styled(format_duration(app.uptime()), Style::default().fg(Color::Yellow)),
    ];

    if app.store_degraded() {
        status_text.push(Span::raw("  |  "));
        status_text.push(Span::styled(
            "TRUST STORE UNREADABLE",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    let status = Paragraph::new(Line::from(status_text))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" USB Sentinel ")
                .title_alignment(Alignment::Center)
                .border_style(Style::default().fg(Color::Blue)),
        )
        .alignment(Alignment::Center);

    frame.render_widget(status, area);
}

fn render_device_table(frame: &mut Frame, app: &App, area: Rect) {
    let devices = app.devices();

    let header_cells = ["Name", "VID:PID", "Serial", "Status"].iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = devices.iter().map(create_device_row).collect();

    let untrusted = app.untrusted_count();
    let title = if untrusted > 0 {
        format!(" Attached Devices ({}, {} untrusted) ", devices.len(), untrusted)
    } else {
        format!(" Attached Devices ({}) ", devices.len())
    };

    let table = Table::new(
        rows,
        [
            Constraint::Min(20),    // Name
            Constraint::Length(11), // VID:PID
            Constraint::Min(16),    // Serial
            Constraint::Length(11), // Status
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::Blue)),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );

    let mut state = TableState::default();
    if !devices.is_empty() {
        state.select(Some(app.selected_index()));
    }

    frame.render_stateful_widget(table, area, &mut state);
}

fn create_device_row(row: &DeviceRow) -> Row<'static> {
    let (status_text, status_style) = trust_label(row.trusted);
    let device = &row.device;

    Row::new(vec![
        Cell::from(device.name.clone()),
        Cell::from(format!("{}:{}", device.vendor_id, device.product_id)),
        Cell::from(device.serial.clone()),
        Cell::from(status_text).style(status_style),
    ])
}

fn trust_label(trusted: bool) -> (&'static str, Style) {
    if trusted {
        ("Trusted", Style::default().fg(Color::Green))
    } else {
        (
            "UNTRUSTED",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    }
}

fn render_event_log(frame: &mut Frame, app: &App, area: Rect) {
    // Newest first, as many as fit
    let visible = area.height.saturating_sub(2) as usize;
    let items: Vec<ListItem> = app
        .log_lines()
        .rev()
        .take(visible)
        .map(|line| {
            let style = match line.kind {
                LogKind::Info => Style::default().fg(Color::White),
                LogKind::Warning => Style::default().fg(Color::Yellow),
                LogKind::Alert => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{} ", line.time), Style::default().fg(Color::DarkGray)),
                Span::styled(line.message.clone(), style),
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Events ")
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    frame.render_widget(list, area);
}

fn key_hint(key: &'static str) -> Span<'static> {
    Span::styled(
        key,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

fn render_help_bar(frame: &mut Frame, area: Rect) {
    let help_text = vec![
        key_hint("q"),
        Span::raw(" Quit  "),
        key_hint("j/k"),
        Span::raw(" Navigate  "),
        key_hint("r"),
        Span::raw(" Refresh  "),
        key_hint("t"),
        Span::raw(" Trust all  "),
        key_hint("d"),
        Span::raw(" Revoke  "),
        key_hint("?"),
        Span::raw(" Help"),
    ];

    let help = Paragraph::new(Line::from(help_text))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
        .alignment(Alignment::Center);

    frame.render_widget(help, area);
}

fn help_line(keys: &'static str, text: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("  {:<13}", keys), Style::default().fg(Color::Cyan)),
        Span::raw(text),
    ])
}

fn section(title: &'static str) -> Line<'static> {
    Line::from(vec![Span::styled(
        title,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )])
}

fn render_help_dialog(frame: &mut Frame) {
    let area = centered_rect(60, 70, frame.area());

    let help_content = vec![
        section("Navigation"),
        Line::from(""),
        help_line("Up / k", "Move selection up"),
        help_line("Down / j", "Move selection down"),
        Line::from(""),
        section("Actions"),
        Line::from(""),
        help_line("r", "Re-list attached devices"),
        help_line("t", "Trust every attached device"),
        help_line("d", "Revoke trust (selected serial pre-filled)"),
        Line::from(""),
        section("General"),
        Line::from(""),
        help_line("?", "Show this help"),
        help_line("Esc", "Close dialog"),
        help_line("q / Ctrl+C", "Quit application"),
        Line::from(""),
        section("Status"),
        Line::from(""),
        Line::from(vec![
            Span::styled("  Trusted      ", Style::default().fg(Color::Green)),
            Span::raw("Serial is in the trust store"),
        ]),
        Line::from(vec![
            Span::styled("  UNTRUSTED    ", Style::default().fg(Color::Red)),
            Span::raw("Unknown serial, review before use"),
        ]),
    ];

    let help_paragraph = Paragraph::new(help_content)
        .block(
            Block::default()
                .title(" Help ")
                .title_alignment(Alignment::Center)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(Clear, area);
    frame.render_widget(help_paragraph, area);
}

fn detail_line(label: &'static str, value: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{:<13}", label), Style::default().fg(Color::DarkGray)),
        Span::styled(value.to_string(), Style::default().fg(Color::White)),
    ])
}

fn render_alert_dialog(frame: &mut Frame, device: &DeviceRecord) {
    let area = centered_rect(55, 45, frame.area());

    let content = vec![
        Line::from(vec![Span::styled(
            "Untrusted USB device connected",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )]),
        Line::from(""),
        detail_line("Name:", &device.name),
        detail_line("Vendor ID:", &device.vendor_id),
        detail_line("Product ID:", &device.product_id),
        detail_line("Serial:", &device.serial),
        Line::from(""),
        Line::from(vec![
            Span::raw("Press "),
            Span::styled("Enter", Style::default().fg(Color::Green)),
            Span::raw(" to dismiss, then "),
            Span::styled("t", Style::default().fg(Color::Yellow)),
            Span::raw(" to trust it"),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(
            Block::default()
                .title(" ALERT ")
                .title_alignment(Alignment::Center)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red)),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

fn render_confirm_trust_all_dialog(frame: &mut Frame, app: &App) {
    let area = centered_rect(50, 30, frame.area());

    let content = vec![
        Line::from(vec![Span::styled(
            "Trust every attached device?",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )]),
        Line::from(""),
        Line::from(format!(
            "{} device(s) shown, {} untrusted",
            app.devices().len(),
            app.untrusted_count()
        )),
        Line::from(""),
        Line::from(vec![
            Span::raw("Press "),
            Span::styled("Enter", Style::default().fg(Color::Green)),
            Span::raw(" to confirm or "),
            Span::styled("Esc", Style::default().fg(Color::Green)),
            Span::raw(" to cancel"),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(
            Block::default()
                .title(" Trust All ")
                .title_alignment(Alignment::Center)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: false });

    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

fn render_revoke_dialog(frame: &mut Frame, input: &str) {
    let area = centered_rect(50, 25, frame.area());

    let content = vec![
        Line::from("Serial to revoke:"),
        Line::from(""),
        Line::from(vec![
            Span::styled(input.to_string(), Style::default().fg(Color::Cyan)),
            Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
        ]),
        Line::from(""),
        Line::from(vec![
            Span::styled("Enter", Style::default().fg(Color::Green)),
            Span::raw(" revoke  "),
            Span::styled("Esc", Style::default().fg(Color::Green)),
            Span::raw(" cancel"),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(
            Block::default()
                .title(" Revoke Trust ")
                .title_alignment(Alignment::Center)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red)),
        )
        .alignment(Alignment::Center);

    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

/// Helper to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
