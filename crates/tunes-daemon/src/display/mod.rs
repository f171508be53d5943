//! Display sinks.
//!
//! The engine only talks to a `UiHandle`; a renderer thread owns the chosen
//! `Display` and applies `UiMessage`s in order.

mod console;
mod panel;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tunes_proto::config::UiMode;
use tunes_proto::protocol::NowPlaying;

pub use console::ConsoleDisplay;
pub use panel::{restore_terminal, PanelDisplay};

pub trait Display: Send {
    fn log(&mut self, line: &str);
    fn show_now_playing(&mut self, now_playing: &NowPlaying);
    fn resize(&mut self) {}
    fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiMessage {
    Log(String),
    NowPlaying(NowPlaying),
    Resize,
    Close,
}

/// Cloneable, non-blocking sender to the renderer. Sends after close are dropped.
#[derive(Debug, Clone)]
pub struct UiHandle {
    tx: mpsc::UnboundedSender<UiMessage>,
}

impl UiHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn log(&self, line: impl Into<String>) {
        let _ = self.tx.send(UiMessage::Log(line.into()));
    }

    pub fn now_playing(&self, now_playing: NowPlaying) {
        let _ = self.tx.send(UiMessage::NowPlaying(now_playing));
    }

    pub fn resize(&self) {
        let _ = self.tx.send(UiMessage::Resize);
    }

    pub fn close(&self) {
        let _ = self.tx.send(UiMessage::Close);
    }
}

/// Drive `display` from `rx` on a blocking thread until `Close` or until every
/// handle is gone.
pub fn spawn_renderer(
    mut display: Box<dyn Display>,
    mut rx: mpsc::UnboundedReceiver<UiMessage>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while let Some(msg) = rx.blocking_recv() {
            match msg {
                UiMessage::Log(line) => display.log(&line),
                UiMessage::NowPlaying(np) => display.show_now_playing(&np),
                UiMessage::Resize => display.resize(),
                UiMessage::Close => break,
            }
        }
        display.close();
    })
}

pub fn create(mode: UiMode, verbose: bool) -> anyhow::Result<Box<dyn Display>> {
    Ok(match mode {
        UiMode::Plain => Box::new(ConsoleDisplay::new(std::io::stdout())),
        UiMode::Panel => Box::new(PanelDisplay::open(verbose)?),
    })
}
