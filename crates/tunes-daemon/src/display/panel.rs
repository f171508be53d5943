//! Full-screen panel: the current track centered in the upper half, and in
//! verbose mode a rolling log in the lower half.

use std::collections::VecDeque;
use std::io;

use ratatui::crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use tunes_proto::protocol::NowPlaying;

use super::Display;

const LOG_CAPACITY: usize = 500;

pub struct PanelDisplay<B: Backend> {
    terminal: Terminal<B>,
    verbose: bool,
    /// Whether `close` has to leave raw mode and the alternate screen.
    owns_terminal: bool,
    now_playing: Option<NowPlaying>,
    log: VecDeque<String>,
}

impl PanelDisplay<CrosstermBackend<io::Stdout>> {
    /// Switch the real terminal to raw mode and the alternate screen.
    pub fn open(verbose: bool) -> anyhow::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        let mut panel = Self::with_terminal(terminal, verbose);
        panel.owns_terminal = true;
        panel.draw();
        Ok(panel)
    }
}

/// Leave raw mode and the alternate screen. Safe to call more than once.
pub fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen);
}

impl<B: Backend> PanelDisplay<B> {
    pub fn with_terminal(terminal: Terminal<B>, verbose: bool) -> Self {
        Self {
            terminal,
            verbose,
            owns_terminal: false,
            now_playing: None,
            log: VecDeque::new(),
        }
    }

    fn draw(&mut self) {
        let verbose = self.verbose;
        let now_playing = self.now_playing.as_ref();
        let log = &self.log;
        let _ = self.terminal.draw(|frame| {
            let area = frame.area();
            let (top, bottom) = if verbose {
                let chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                    .split(area);
                (chunks[0], Some(chunks[1]))
            } else {
                (area, None)
            };
            frame.render_widget(now_playing_widget(now_playing, top), top);
            if let Some(bottom) = bottom {
                frame.render_widget(log_widget(log, bottom), bottom);
            }
        });
    }
}

fn now_playing_widget(now_playing: Option<&NowPlaying>, area: Rect) -> Paragraph<'static> {
    let mut text: Vec<Line<'static>> = match now_playing {
        Some(NowPlaying {
            artist: Some(artist),
            title: Some(title),
            ..
        }) => vec![
            Line::styled(artist.clone(), Style::default().add_modifier(Modifier::BOLD)),
            Line::from(title.clone()),
        ],
        Some(np) => vec![Line::from(
            np.headline().unwrap_or_else(|| "Playing next track".to_string()),
        )],
        None => vec![Line::from("Waiting for the first track")],
    };

    let inner = area.height.saturating_sub(2) as usize;
    let padding = inner.saturating_sub(text.len()) / 2;
    let mut lines = vec![Line::from(""); padding];
    lines.append(&mut text);

    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title(" tunes "))
}

fn log_widget(log: &VecDeque<String>, area: Rect) -> Paragraph<'static> {
    let inner = area.height.saturating_sub(2) as usize;
    let skip = log.len().saturating_sub(inner);
    let lines: Vec<Line<'static>> = log.iter().skip(skip).map(|l| Line::from(l.clone())).collect();
    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" log "))
}

impl<B: Backend + Send> Display for PanelDisplay<B> {
    fn log(&mut self, line: &str) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(line.to_string());
        if self.verbose {
            self.draw();
        }
    }

    fn show_now_playing(&mut self, now_playing: &NowPlaying) {
        self.now_playing = Some(now_playing.clone());
        self.draw();
    }

    fn resize(&mut self) {
        let _ = self.terminal.autoresize();
        self.draw();
    }

    fn close(&mut self) {
        if self.owns_terminal {
            restore_terminal();
        }
        let _ = self.terminal.show_cursor();
    }
}
