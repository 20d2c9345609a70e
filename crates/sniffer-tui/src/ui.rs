use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};

use crate::app::App;

pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_status_bar(frame, app, chunks[0]);
    render_main(frame, app, chunks[1]);
    render_help_bar(frame, chunks[2]);
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let interface_label = if app.interface.is_empty() {
        "default".to_string()
    } else {
        app.interface.clone()
    };
    let ports_label = app
        .ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let status = Line::from(vec![
        Span::styled(
            " tcpsniffer",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" | iface {interface_label} | ports {ports_label} | ")),
        Span::styled(
            format!("req {} / resp {}", app.stats.requests_emitted, app.stats.responses_emitted),
            Style::default().fg(Color::Green),
        ),
        Span::raw(" | "),
        Span::raw(format!("conns {}", app.stats.active_connections)),
        Span::raw(" | "),
        Span::raw(format!("packets {}", app.stats.packets_decoded)),
        Span::raw(" | "),
        Span::styled(
            format!("errors {}", app.errors),
            Style::default().fg(Color::Red),
        ),
    ]);
    let detail = Line::from(vec![
        Span::raw(format!(
            " evictions {} | gaps {} | non-http {} | sink overflows {}",
            app.stats.evictions,
            app.stats.gaps,
            app.stats.non_http_streams,
            app.stats.sink_overflows,
        )),
    ]);
    let status_area = Rect {
        height: 1,
        ..area
    };
    let detail_area = Rect {
        y: area.y + 1,
        height: 1,
        ..area
    };
    frame.render_widget(
        Paragraph::new(status).style(Style::default().bg(Color::DarkGray)),
        status_area,
    );
    frame.render_widget(
        Paragraph::new(detail).style(Style::default().bg(Color::DarkGray).fg(Color::Gray)),
        detail_area,
    );
}

fn render_main(frame: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    render_message_list(frame, app, chunks[0]);
    render_message_detail(frame, app, chunks[1]);
}

fn render_message_list(frame: &mut Frame, app: &App, area: Rect) {
    let header = Row::new(vec![
        Cell::from("Time"),
        Cell::from("Dir"),
        Cell::from("Method/Status"),
        Cell::from("Path"),
        Cell::from("Peer"),
    ])
    .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = app
        .messages
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let time = record
                .timestamp
                .get(11..23)
                .unwrap_or(record.timestamp.as_str())
                .to_string();
            let direction = match record.direction {
                sniffer_core::model::MessageDirection::Request => "req",
                sniffer_core::model::MessageDirection::Response => "resp",
            };
            let summary = match record.direction {
                sniffer_core::model::MessageDirection::Request => {
                    record.method.clone().unwrap_or_default()
                }
                sniffer_core::model::MessageDirection::Response => record
                    .status_code
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            };
            let path = record.path.clone().unwrap_or_default();
            let peer = record.destination.to_string();

            let style = if i == app.selected_index {
                Style::default().bg(Color::Blue).fg(Color::White)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(time),
                Cell::from(direction),
                Cell::from(summary),
                Cell::from(path),
                Cell::from(peer),
            ])
            .style(style)
        })
        .collect();

    let widths = [
        Constraint::Length(12),
        Constraint::Length(5),
        Constraint::Length(14),
        Constraint::Min(10),
        Constraint::Length(22),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(" Messages "));
    frame.render_widget(table, area);
}

fn render_message_detail(frame: &mut Frame, app: &App, area: Rect) {
    let text = match app.selected() {
        Some(record) => {
            let mut lines = vec![
                Line::from(format!("timestamp: {}", record.timestamp)),
                Line::from(format!("receiver:  {}", record.receiver)),
                Line::from(format!("destination: {}", record.destination)),
            ];
            if let Some(method) = &record.method {
                lines.push(Line::from(format!("method: {method}")));
            }
            if let Some(path) = &record.path {
                lines.push(Line::from(format!("path: {path}")));
            }
            if let Some(status) = record.status_code {
                lines.push(Line::from(format!("status: {status}")));
            }
            lines.push(Line::from(""));
            lines.push(Line::from("headers:"));
            let mut header_names: Vec<&String> = record.headers.keys().collect();
            header_names.sort();
            for name in header_names {
                lines.push(Line::from(format!("  {name}: {}", record.headers[name])));
            }
            lines.push(Line::from(""));
            let body_label = if record.body_truncated {
                format!("body ({} bytes, truncated):", record.body.len())
            } else {
                format!("body ({} bytes):", record.body.len())
            };
            lines.push(Line::from(body_label));
            if record.body_encoding.is_some() {
                lines.push(Line::from("<binary>"));
            } else {
                lines.push(Line::from(String::from_utf8_lossy(&record.body).to_string()));
            }
            lines
        }
        None => vec![Line::from("no message selected")],
    };

    let detail = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(ratatui::widgets::Wrap { trim: false });
    frame.render_widget(detail, area);
}

fn render_help_bar(frame: &mut Frame, area: Rect) {
    let help = Line::from(" j/k or ↑/↓ scroll · q quit ");
    frame.render_widget(Paragraph::new(help).style(Style::default().fg(Color::DarkGray)), area);
}
