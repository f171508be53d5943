//! Command sources: stdin lines in plain mode, key events in panel mode.

use std::time::Duration;

use ratatui::crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tunes_proto::protocol::Command;

use crate::core::EngineEvent;
use crate::display::UiHandle;

/// Forward recognised stdin lines to the coordinator until EOF or shutdown.
pub fn spawn_console_input(
    events: mpsc::Sender<EngineEvent>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    let Some(cmd) = Command::parse(&line) else {
                        continue;
                    };
                    if events.send(EngineEvent::Command(cmd)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed, console input stopped");
                    break;
                }
                Err(e) => {
                    debug!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    })
}

/// Map a terminal event to a command. Ctrl-C quits since raw mode swallows SIGINT.
pub fn command_for_event(ev: &Event) -> Option<Command> {
    let Event::Key(key) = ev else {
        return None;
    };
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Command::Quit),
        KeyCode::Char(c) => Command::parse(&c.to_string()),
        KeyCode::Esc => Some(Command::Quit),
        _ => None,
    }
}

/// Read terminal events on a blocking thread, polling so shutdown is noticed.
pub fn spawn_panel_input(
    events: mpsc::Sender<EngineEvent>,
    ui: UiHandle,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !shutdown.is_cancelled() {
            match event::poll(Duration::from_millis(100)) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(_) => break,
            }
            let ev = match event::read() {
                Ok(ev) => ev,
                Err(_) => break,
            };
            if let Event::Resize(_, _) = ev {
                ui.resize();
                continue;
            }
            if let Some(cmd) = command_for_event(&ev) {
                if events.blocking_send(EngineEvent::Command(cmd)).is_err() {
                    break;
                }
            }
        }
    })
}
