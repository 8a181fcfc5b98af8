//! Live session table
//!
//! The view owns all display state. Sessions post snapshots over a channel;
//! the duplicate overlay and durations are recomputed on every frame.

use crate::monitor::{DisplayStatus, IpTracker, SessionSnapshot};
use crate::tui::format::{format_bytes, format_duration};
use crate::Result;
use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use tracing::debug;

/// How long to wait for a key press before redrawing
const FRAME_POLL: Duration = Duration::from_millis(200);

const HEADERS: [&str; 10] = [
    "Host",
    "Session ID",
    "Status",
    "IP Address",
    "Location",
    "Duration",
    "Checks",
    "Rotations",
    "Avg Latency (ms)",
    "Bandwidth",
];

static WIDTHS: [Constraint; 10] = [
    Constraint::Percentage(12),
    Constraint::Percentage(12),
    Constraint::Percentage(12),
    Constraint::Percentage(12),
    Constraint::Percentage(16),
    Constraint::Percentage(8),
    Constraint::Percentage(6),
    Constraint::Percentage(7),
    Constraint::Percentage(8),
    Constraint::Percentage(7),
];

/// Terminal view of every monitored session
pub struct MonitorApp {
    /// Latest snapshot per session, in list order
    rows: Vec<SessionSnapshot>,
    /// Session id to row position
    index: HashMap<String, usize>,
    tracker: Arc<IpTracker>,
    updates: UnboundedReceiver<SessionSnapshot>,
    interval: Duration,
    table_state: TableState,
    should_quit: bool,
}

impl MonitorApp {
    pub fn new(
        initial: Vec<SessionSnapshot>,
        tracker: Arc<IpTracker>,
        updates: UnboundedReceiver<SessionSnapshot>,
        interval: Duration,
    ) -> Self {
        let index = initial
            .iter()
            .enumerate()
            .map(|(row, snapshot)| (snapshot.id.clone(), row))
            .collect();

        Self {
            rows: initial,
            index,
            tracker,
            updates,
            interval,
            table_state: TableState::default(),
            should_quit: false,
        }
    }

    /// Run the TUI until the user quits
    pub async fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        while !self.should_quit {
            self.drain_updates();

            terminal.draw(|f| self.ui(f))?;

            if event::poll(FRAME_POLL)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key);
                    }
                }
            }

            tokio::task::yield_now().await;
        }

        Ok(())
    }

    /// Apply every pending snapshot without blocking
    fn drain_updates(&mut self) {
        loop {
            match self.updates.try_recv() {
                Ok(snapshot) => self.apply(snapshot),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("all session loops stopped");
                    break;
                }
            }
        }
    }

    fn apply(&mut self, snapshot: SessionSnapshot) {
        match self.index.get(&snapshot.id) {
            Some(&row) => self.rows[row] = snapshot,
            None => {
                self.index.insert(snapshot.id.clone(), self.rows.len());
                self.rows.push(snapshot);
            }
        }
    }

    fn handle_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true
            }
            KeyCode::Down => {
                let last = self.rows.len().saturating_sub(1);
                let i = match self.table_state.selected() {
                    Some(i) if i >= last => 0,
                    Some(i) => i + 1,
                    None => 0,
                };
                self.table_state.select(Some(i));
            }
            KeyCode::Up => {
                let i = match self.table_state.selected() {
                    Some(0) | None => self.rows.len().saturating_sub(1),
                    Some(i) => i - 1,
                };
                self.table_state.select(Some(i));
            }
            _ => {}
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Info line
                Constraint::Min(0),    // Session table
                Constraint::Length(1), // Summary
            ])
            .split(f.size());

        let info = Paragraph::new(format!(
            "Monitoring {} proxies (interval: {}s) | q to quit",
            self.rows.len(),
            self.interval.as_secs()
        ))
        .style(Style::default().fg(Color::Cyan))
        .alignment(Alignment::Center);
        f.render_widget(info, chunks[0]);

        let now = Utc::now();
        let statuses: Vec<DisplayStatus> = self
            .rows
            .iter()
            .map(|s| s.display_status(&self.tracker))
            .collect();

        let header = Row::new(HEADERS.iter().map(|h| Cell::from(*h)))
            .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

        let rows: Vec<Row> = self
            .rows
            .iter()
            .zip(&statuses)
            .map(|(snapshot, status)| session_row(snapshot, *status, now))
            .collect();

        let table = Table::new(rows)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title("Sessions"))
            .widths(&WIDTHS)
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");
        f.render_stateful_widget(table, chunks[1], &mut self.table_state);

        let summary = Paragraph::new(summary_line(&statuses)).alignment(Alignment::Center);
        f.render_widget(summary, chunks[2]);
    }
}

fn status_color(status: DisplayStatus) -> Color {
    match status {
        DisplayStatus::Stable => Color::Green,
        DisplayStatus::StableDuplicate => Color::Yellow,
        DisplayStatus::Rotated => Color::Red,
        DisplayStatus::Starting => Color::Blue,
        DisplayStatus::Dead => Color::Gray,
    }
}

fn latency_color(ms: u64) -> Color {
    match ms {
        0..=999 => Color::Green,
        1000..=2000 => Color::Yellow,
        _ => Color::Red,
    }
}

fn dash_if_empty(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

fn session_row(snapshot: &SessionSnapshot, status: DisplayStatus, now: DateTime<Utc>) -> Row<'static> {
    let duration = snapshot
        .duration_since_first_seen(now)
        .map_or_else(|| "-".to_string(), format_duration);

    let latency = match snapshot.avg_latency_ms() {
        Some(ms) => Cell::from(ms.to_string()).style(Style::default().fg(latency_color(ms))),
        None => Cell::from("-"),
    };

    let rotation_style = if snapshot.rotation_count > 0 {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };

    Row::new(vec![
        Cell::from(snapshot.host.clone()),
        Cell::from(snapshot.id.clone()),
        Cell::from(status.to_string()).style(Style::default().fg(status_color(status))),
        Cell::from(dash_if_empty(&snapshot.current_ip)),
        Cell::from(dash_if_empty(&snapshot.location)),
        Cell::from(duration),
        Cell::from(snapshot.check_count.to_string()),
        Cell::from(snapshot.rotation_count.to_string()).style(rotation_style),
        latency,
        Cell::from(format_bytes(snapshot.total_bandwidth)),
    ])
}

fn summary_line(statuses: &[DisplayStatus]) -> String {
    let count = |wanted: DisplayStatus| statuses.iter().filter(|s| **s == wanted).count();
    format!(
        "Stable: {} | Duplicate: {} | Rotated: {} | Dead: {} | Starting: {}",
        count(DisplayStatus::Stable),
        count(DisplayStatus::StableDuplicate),
        count(DisplayStatus::Rotated),
        count(DisplayStatus::Dead),
        count(DisplayStatus::Starting),
    )
}
