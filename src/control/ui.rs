use std::error::Error;
use std::io::stdout;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use crossbeam_channel::unbounded;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction as LayoutDirection, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap};

use crate::control::api;
use crate::{ClientStatus, Connector, Direction, ProcessorInfo};

const TICK_RATE: Duration = Duration::from_millis(100);

#[derive(Default)]
struct AppState {
    status: Option<ClientStatus>,
    selected: usize,
    view: View,
    message: Option<String>,
    last_update: Option<Instant>,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    #[default]
    Processors,
    Connectors,
}

/// Run the ratatui-based developer console.
pub fn run() -> Result<(), Box<dyn Error>> {
    setup_terminal()?;

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let (status_tx, status_rx) = unbounded();
    std::thread::spawn(move || {
        loop {
            let status = api::get_status();
            if status_tx.send(status).is_err() {
                break;
            }
            std::thread::sleep(TICK_RATE);
        }
    });

    let mut app = AppState::default();

    loop {
        terminal.draw(|frame| draw(frame, &app))?;

        if let Some(status) = try_recv_latest(&status_rx) {
            app.status = status;
            app.last_update = Some(Instant::now());
            let processor_len = app
                .status
                .as_ref()
                .map(|s| s.processors.len())
                .unwrap_or(0);
            app.selected = app.selected.min(processor_len.saturating_sub(1));
        }

        if event::poll(Duration::from_millis(10))? {
            if let CEvent::Key(key) = event::read()? {
                if handle_key(&mut app, key) {
                    break;
                }
            }
        }
    }

    restore_terminal()?;
    Ok(())
}

fn setup_terminal() -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    Ok(())
}

fn restore_terminal() -> Result<(), Box<dyn Error>> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

fn try_recv_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut last = None;
    while let Ok(value) = rx.try_recv() {
        last = Some(value);
    }
    last
}

fn handle_key(app: &mut AppState, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Tab => {
            app.view = match app.view {
                View::Processors => View::Connectors,
                View::Connectors => View::Processors,
            };
        }
        KeyCode::Up => {
            app.selected = app.selected.saturating_sub(1);
        }
        KeyCode::Down => {
            if let Some(status) = &app.status {
                if app.selected + 1 < status.processors.len() {
                    app.selected += 1;
                }
            }
        }
        KeyCode::Char('a') => {
            if let Some(processor) = current_processor(app) {
                let activate = !processor.activated;
                app.message = Some(if api::set_active(processor.id, activate) {
                    format!(
                        "{} {}",
                        processor.name,
                        if activate { "activated" } else { "deactivated" }
                    )
                } else {
                    format!("{}: request refused, see log", processor.name)
                });
            }
        }
        _ => {}
    }
    false
}

fn current_processor(app: &AppState) -> Option<ProcessorInfo> {
    app.status.as_ref()?.processors.get(app.selected).cloned()
}

fn draw(frame: &mut ratatui::Frame<'_>, app: &AppState) {
    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], app);
    match app.view {
        View::Processors => draw_processors(frame, chunks[1], app),
        View::Connectors => draw_connectors(frame, chunks[1], app),
    }
    draw_footer(frame, chunks[2], app);
}

fn draw_header(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default()
        .title("Processor Registry Console")
        .borders(Borders::ALL);

    let content = match &app.status {
        Some(status) => {
            let state = if status.closed {
                "closed"
            } else if status.severe {
                "severe error"
            } else if status.shutdown {
                "shutting down"
            } else if status.active {
                "active"
            } else {
                "inactive"
            };
            Paragraph::new(format!(
                "Client: {}    State: {}    Sample Rate: {} Hz    Buffer: {} frames    Frame Time: {}",
                status.name, state, status.sample_rate, status.buffer_size, status.frame_time,
            ))
        }
        None => Paragraph::new(Line::from(vec![Span::styled(
            "No attached client",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )])),
    };

    frame.render_widget(content.block(block), area);
}

fn connector_label(direction: Direction, connector: &Connector) -> String {
    match direction {
        Direction::In => format!("<- {connector}"),
        Direction::Out => format!("-> {connector}"),
    }
}

fn draw_processors(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default().title("Processors").borders(Borders::ALL);

    let Some(status) = &app.status else {
        frame.render_widget(Paragraph::new("").block(block), area);
        return;
    };

    let header = Row::new(vec![
        Cell::from(""),
        Cell::from("Id"),
        Cell::from("Name"),
        Cell::from("Active"),
        Cell::from("Frames"),
        Cell::from("Connectors"),
    ])
    .style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );

    let rows = status.processors.iter().enumerate().map(|(idx, processor)| {
        let indicator = if idx == app.selected { ">" } else { "" };
        let connectors = processor
            .connectors
            .iter()
            .map(|(direction, connector)| connector_label(*direction, connector))
            .collect::<Vec<_>>()
            .join("  ");
        let mut row = Row::new(vec![
            Cell::from(indicator.to_string()),
            Cell::from(processor.id.serial().to_string()),
            Cell::from(processor.name.clone()),
            Cell::from(if processor.activated { "Yes" } else { "No" }),
            Cell::from(processor.buffer_frames.to_string()),
            Cell::from(connectors),
        ]);
        if idx == app.selected {
            row = row.style(Style::default().fg(Color::Yellow));
        }
        row
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(6),
            Constraint::Length(20),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Min(20),
        ],
    )
    .header(header)
    .block(block)
    .column_spacing(2);

    frame.render_widget(table, area);
}

fn draw_connectors(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default()
        .title("Ports and ProcessBuffers")
        .borders(Borders::ALL);

    let Some(status) = &app.status else {
        frame.render_widget(Paragraph::new("").block(block), area);
        return;
    };

    let header = Row::new(vec![
        Cell::from("Connector"),
        Cell::from("Name"),
        Cell::from("Type"),
        Cell::from("Writers"),
        Cell::from("Readers"),
        Cell::from("Active W/R"),
    ])
    .style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );

    let ports = status.ports.iter().map(|port| {
        Row::new(vec![
            Cell::from(port.id.to_string()),
            Cell::from(port.name.clone()),
            Cell::from(format!("{:?} {:?}", port.ty, port.direction)),
            Cell::from(port.usage.out_usage.to_string()),
            Cell::from(port.usage.inp_usage.to_string()),
            Cell::from(format!("{}/{}", port.usage.out_active, port.usage.inp_active)),
        ])
    });
    let buffers = status.buffers.iter().map(|buffer| {
        Row::new(vec![
            Cell::from(buffer.id.to_string()),
            Cell::from(""),
            Cell::from(format!("{:?}", buffer.ty)),
            Cell::from(buffer.usage.out_usage.to_string()),
            Cell::from(buffer.usage.inp_usage.to_string()),
            Cell::from(format!("{}/{}", buffer.usage.out_active, buffer.usage.inp_active)),
        ])
    });

    let table = Table::new(
        ports.chain(buffers),
        [
            Constraint::Length(18),
            Constraint::Length(16),
            Constraint::Length(12),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .block(block)
    .column_spacing(2);

    frame.render_widget(table, area);
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let info = "Up/Down: Select  •  a: Toggle activation  •  Tab: Switch view  •  q: Quit";
    let mut lines = vec![Line::from(info)];
    if let Some(message) = &app.message {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Green),
        )));
    }
    if let Some(updated) = app.last_update {
        let ago = updated.elapsed().as_secs_f32();
        lines.push(Line::from(Span::styled(
            format!("Last update {:.1}s ago", ago),
            Style::default().fg(Color::DarkGray),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}
