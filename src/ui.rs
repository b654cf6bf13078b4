//! Terminal view of a session: one header, a divider and one row per worker slot.
//!
//! The renderer only ever reads [`Snapshot`]s from a watch channel, so a slow
//! redraw can't hold up a fetcher. Key input is read on its own blocking thread.

use std::io::{IsTerminal, Write};
use std::time::Duration;

use crossterm::{
    cursor,
    event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style},
    widgets::Paragraph,
    Frame, Terminal,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::format::{format_duration, human_bytes};
use crate::progress::{HeaderView, RowView, Slot, Snapshot};

const MIN_TICK: Duration = Duration::from_millis(33);
const LINE_TICK: Duration = Duration::from_millis(250);
const KEY_POLL: Duration = Duration::from_millis(100);

pub fn header_text(header: &HeaderView) -> String {
    let total = header
        .estimated_total_bytes
        .map(|b| human_bytes(b as f64))
        .unwrap_or_else(|| "?".to_string());
    let pct = header
        .overall_percent
        .map(|p| p.to_string())
        .unwrap_or_else(|| "--".to_string());
    let eta = header
        .eta_seconds
        .map(format_duration)
        .unwrap_or_else(|| "--".to_string());
    format!(
        "{} of {total} ({pct}%) ETA {eta}",
        human_bytes(header.bytes_downloaded as f64)
    )
}

pub fn row_text(slot: Slot, row: &RowView) -> String {
    match row {
        RowView::Idle => format!("#{slot:02} │ Idle"),
        RowView::Initializing { filename } => format!("#{slot:02} │ {filename} │ Initializing..."),
        RowView::Active {
            filename,
            percent,
            throughput,
        } => {
            let pct = percent
                .map(|p| format!("{p}%"))
                .unwrap_or_else(|| "--%".to_string());
            let speed = throughput
                .map(human_bytes)
                .unwrap_or_else(|| "--".to_string());
            format!("#{slot:02} │ {filename} │ {pct} │ {speed}/s")
        }
    }
}

fn footer_text(header: &HeaderView) -> String {
    let mut out = format!(
        "segments {}/{}",
        header.finished_tasks, header.task_count
    );
    if header.failed_tasks > 0 {
        out.push_str(&format!("  failed {}", header.failed_tasks));
    }
    out.push_str("  [q] quit");
    out
}

/// Status line for the line-mode fallback.
pub fn status_line(header: &HeaderView) -> String {
    let mut line = header_text(header);
    line.push_str(&format!(
        "  segments {}/{}",
        header.finished_tasks, header.task_count
    ));
    if header.failed_tasks > 0 {
        line.push_str(&format!("  failed {}", header.failed_tasks));
    }
    line
}

/// Draws one frame. Depends on nothing but `snapshot`.
pub fn draw(f: &mut Frame, snapshot: &Snapshot) {
    let area = f.area();
    let mut constraints = Vec::with_capacity(snapshot.rows.len() + 4);
    constraints.push(Constraint::Length(1));
    constraints.push(Constraint::Length(1));
    constraints.extend(std::iter::repeat(Constraint::Length(1)).take(snapshot.rows.len()));
    constraints.push(Constraint::Length(1));
    constraints.push(Constraint::Min(0));
    let chunks = Layout::vertical(constraints).split(area);

    let header = Paragraph::new(header_text(&snapshot.header))
        .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD));
    f.render_widget(header, chunks[0]);

    let divider = Paragraph::new("─".repeat(area.width as usize))
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(divider, chunks[1]);

    for (slot, row) in snapshot.rows.iter().enumerate() {
        let style = match row {
            RowView::Idle | RowView::Initializing { .. } => Style::default().fg(Color::DarkGray),
            RowView::Active { .. } => Style::default().fg(Color::White),
        };
        f.render_widget(Paragraph::new(row_text(slot, row)).style(style), chunks[slot + 2]);
    }

    let footer = Paragraph::new(footer_text(&snapshot.header))
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(footer, chunks[snapshot.rows.len() + 2]);
}

struct TermGuard;

impl TermGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode().map_err(Error::Ui)?;
        let guard = TermGuard;
        execute!(std::io::stdout(), EnterAlternateScreen, cursor::Hide).map_err(Error::Ui)?;
        Ok(guard)
    }
}

impl Drop for TermGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = std::io::stdout();
        let _ = execute!(stdout, LeaveAlternateScreen, cursor::Show);
    }
}

/// Full-screen view until `cancel` fires or the snapshot sender goes away.
/// Only entering the alternate screen can fail; redraw errors are logged.
pub async fn run_tui(
    mut snapshots: watch::Receiver<Snapshot>,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = TermGuard::enter()?;
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut terminal = Terminal::new(backend).map_err(Error::Ui)?;
    terminal.clear().ok();

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if let Err(err) = terminal.draw(|f| draw(f, &snapshot)) {
            warn!("redraw failed: {err}");
        }
        let next_draw = Instant::now() + MIN_TICK;

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(next_draw) => {}
        }
    }
    Ok(())
}

/// Non-TTY fallback: the header as a single status line on stderr.
pub async fn run_lines(mut snapshots: watch::Receiver<Snapshot>, cancel: CancellationToken) {
    let in_place = std::io::stderr().is_terminal();
    let mut tick = tokio::time::interval(LINE_TICK);
    let mut stderr = std::io::stderr();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        if !snapshots.has_changed().unwrap_or(false) {
            continue;
        }
        let line = status_line(&snapshots.borrow_and_update().header);
        if in_place {
            let _ = write!(stderr, "\r\x1b[2K{line}");
        } else {
            let _ = writeln!(stderr, "{line}");
        }
        let _ = stderr.flush();
    }
    let line = status_line(&snapshots.borrow().header);
    if in_place {
        let _ = write!(stderr, "\r\x1b[2K{line}\r\n");
    } else {
        let _ = writeln!(stderr, "{line}");
    }
    let _ = stderr.flush();
}

pub fn is_quit_key(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') => true,
        // Raw mode swallows SIGINT, so Ctrl+C arrives as a key.
        KeyCode::Char('c') | KeyCode::Char('C') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Watches the keyboard on a blocking thread; the quit key cancels the session.
pub fn spawn_key_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !cancel.is_cancelled() {
            match event::poll(KEY_POLL) {
                Ok(true) => match event::read() {
                    Ok(CEvent::Key(key)) if is_quit_key(&key) => {
                        info!("quit requested");
                        cancel.cancel();
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("reading key input failed: {err}");
                        break;
                    }
                },
                Ok(false) => {}
                Err(err) => {
                    warn!("key input unavailable: {err}");
                    break;
                }
            }
        }
    })
}
