use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Commands accepted from the console, the panel and the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Next,
    Stop,
    Play,
    Quit,
}

impl Command {
    /// Parse a user token such as `n`, ` Next\n` or `q`.
    /// Unrecognised tokens yield `None` and are meant to be ignored.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "n" | "next" => Some(Command::Next),
            "s" | "stop" => Some(Command::Stop),
            "p" | "play" => Some(Command::Play),
            "q" | "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    /// Playback disabled for this process (download-only mode).
    Disabled,
}

/// What the display shows for the current track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub artist: Option<String>,
    pub title: Option<String>,
    /// Shown when the file carries no usable title tag.
    pub fallback: Option<String>,
}

impl NowPlaying {
    /// `artist - title`, `title`, the fallback, or `None` when nothing is known.
    pub fn headline(&self) -> Option<String> {
        let artist = self.artist.as_deref().filter(|a| !a.trim().is_empty());
        match (artist, self.title.as_deref().filter(|t| !t.trim().is_empty())) {
            (Some(artist), Some(title)) => Some(format!("{} - {}", artist, title)),
            (None, Some(title)) => Some(title.to_string()),
            _ => self.fallback.clone(),
        }
    }
}

/// Snapshot of the engine served by `GET /api/state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineStatus {
    pub library_size: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub workers: usize,
    pub fetch_since: NaiveDate,
    pub fetch_until: NaiveDate,
    pub discovery_exhausted: bool,
    pub playback: PlaybackStatus,
    pub now_playing: Option<String>,
}
