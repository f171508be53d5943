/// External player process and the playback cursor feeding it.
///
/// Architecture:
///
/// ```text
///   PlayerProcess          ← owns the child, respawns it on a broken pipe
///         │ stdin (PlayerInput, shared)
///   PlaybackCursor::play_next()
///         ├── feeder task  ← file chunks → player stdin, reports TrackEnded
///         └── tag task     ← spawn_blocking lofty read, reports TagsExtracted
/// ```
///
/// The player's stdin is never closed between tracks; stopping a track only
/// cancels its feeder. Every track gets a fresh generation number and the
/// coordinator drops reports whose generation is no longer current.
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunes_proto::config::PlayerConfig;
use tunes_proto::protocol::{NowPlaying, PlaybackStatus};

use crate::core::EngineEvent;
use crate::library::LibraryStore;
use crate::metadata::{self, TagExtractor};

const FEED_CHUNK: usize = 16 * 1024;

/// Write side of the player's stdin, swapped in place on respawn.
pub type PlayerInput = Arc<Mutex<Pin<Box<dyn AsyncWrite + Send>>>>;

pub fn input_from(writer: impl AsyncWrite + Send + 'static) -> PlayerInput {
    Arc::new(Mutex::new(Box::pin(writer)))
}

// ── process ───────────────────────────────────────────────────────────────────

pub struct PlayerProcess {
    config: PlayerConfig,
    child: Option<tokio::process::Child>,
    input: PlayerInput,
}

impl PlayerProcess {
    pub fn spawn(config: &PlayerConfig) -> anyhow::Result<Self> {
        let (child, stdin) = launch(config)?;
        Ok(Self {
            config: config.clone(),
            child: Some(child),
            input: input_from(stdin),
        })
    }

    pub fn input(&self) -> PlayerInput {
        Arc::clone(&self.input)
    }

    #[cfg(test)]
    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.child {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    /// Replace a dead player with a fresh one behind the same input.
    pub async fn respawn(&mut self) -> anyhow::Result<()> {
        self.kill().await;
        let (child, stdin) = launch(&self.config)?;
        *self.input.lock().await = Box::pin(stdin);
        self.child = Some(child);
        Ok(())
    }

    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

fn launch(
    config: &PlayerConfig,
) -> anyhow::Result<(tokio::process::Child, tokio::process::ChildStdin)> {
    let binary = tunes_proto::platform::find_player_binary(&config.command)
        .ok_or_else(|| anyhow::anyhow!("player binary '{}' not found", config.command))?;

    info!("Player: spawning {} {}", binary.display(), config.args.join(" "));
    let mut child = tokio::process::Command::new(&binary)
        .args(&config.args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", binary.display()))?;
    let stdin = child.stdin.take().context("player stdin not captured")?;
    Ok((child, stdin))
}

// ── feeder ────────────────────────────────────────────────────────────────────

/// How a feeder stopped on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    Finished,
    /// The track file could not be read.
    ReadFailed(String),
    /// The player's stdin refused the bytes.
    PlayerFailed(String),
}

/// Copy `path` into the player. Returns `None` when cancelled.
pub async fn feed(path: &Path, input: &PlayerInput, cancel: &CancellationToken) -> Option<FeedOutcome> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => return Some(FeedOutcome::ReadFailed(e.to_string())),
    };
    let mut buf = vec![0u8; FEED_CHUNK];
    let mut fed = 0u64;

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return None,
            r = file.read(&mut buf) => match r {
                Ok(n) => n,
                Err(e) => return Some(FeedOutcome::ReadFailed(e.to_string())),
            },
        };
        if n == 0 {
            break;
        }
        fed += n as u64;

        let mut writer = tokio::select! {
            _ = cancel.cancelled() => return None,
            w = input.lock() => w,
        };
        let written = tokio::select! {
            _ = cancel.cancelled() => return None,
            r = writer.write_all(&buf[..n]) => r,
        };
        if let Err(e) = written {
            return Some(FeedOutcome::PlayerFailed(e.to_string()));
        }
    }

    // A track that fed nothing is treated as unreadable.
    if fed == 0 {
        return Some(FeedOutcome::ReadFailed("file is empty".to_string()));
    }

    let mut writer = input.lock().await;
    if let Err(e) = writer.flush().await {
        return Some(FeedOutcome::PlayerFailed(e.to_string()));
    }
    Some(FeedOutcome::Finished)
}

// ── cursor ────────────────────────────────────────────────────────────────────

struct CurrentTrack {
    path: PathBuf,
    generation: u64,
    cancel: CancellationToken,
    feeder: JoinHandle<()>,
}

pub struct PlaybackCursor {
    input: PlayerInput,
    events: mpsc::Sender<EngineEvent>,
    extractor: Arc<dyn TagExtractor>,
    current: Option<CurrentTrack>,
    next_generation: u64,
    now_playing: Option<NowPlaying>,
}

impl PlaybackCursor {
    pub fn new(
        input: PlayerInput,
        events: mpsc::Sender<EngineEvent>,
        extractor: Arc<dyn TagExtractor>,
    ) -> Self {
        Self {
            input,
            events,
            extractor,
            current: None,
            next_generation: 1,
            now_playing: None,
        }
    }

    /// Stop the current track and start the head of the library, rotating it
    /// to the tail. With an empty library the cursor is left idle.
    pub fn play_next(&mut self, library: &mut LibraryStore) -> Option<PathBuf> {
        self.stop();
        let Some(path) = library.rotate() else {
            debug!("Playback: library empty, staying idle");
            return None;
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        let cancel = CancellationToken::new();
        debug!("Playback: start {} (generation {})", path.display(), generation);

        let feeder = {
            let path = path.clone();
            let input = Arc::clone(&self.input);
            let cancel = cancel.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                if let Some(outcome) = feed(&path, &input, &cancel).await {
                    let _ = events
                        .send(EngineEvent::TrackEnded {
                            generation,
                            path,
                            outcome,
                        })
                        .await;
                }
            })
        };

        {
            let path = path.clone();
            let extractor = Arc::clone(&self.extractor);
            let events = self.events.clone();
            tokio::spawn(async move {
                let lookup = tokio::task::spawn_blocking(move || {
                    metadata::lookup_now_playing(extractor.as_ref(), &path)
                });
                match lookup.await {
                    Ok(now_playing) => {
                        let _ = events
                            .send(EngineEvent::TagsExtracted {
                                generation,
                                now_playing,
                            })
                            .await;
                    }
                    Err(e) => warn!("Tag lookup task failed: {}", e),
                }
            });
        }

        self.current = Some(CurrentTrack {
            path: path.clone(),
            generation,
            cancel,
            feeder,
        });
        Some(path)
    }

    /// Cancel the current feeder, if any.
    pub fn stop(&mut self) {
        if let Some(track) = self.current.take() {
            debug!("Playback: stop generation {}", track.generation);
            track.cancel.cancel();
        }
        self.now_playing = None;
    }

    pub fn is_idle(&self) -> bool {
        self.current
            .as_ref()
            .map_or(true, |track| track.feeder.is_finished())
    }

    pub fn play_if_idle(&mut self, library: &mut LibraryStore) -> Option<PathBuf> {
        if self.is_idle() {
            self.play_next(library)
        } else {
            None
        }
    }

    /// Clear the current track if `generation` is still current.
    pub fn track_ended(&mut self, generation: u64) -> bool {
        if self.current_generation() != Some(generation) {
            return false;
        }
        self.current = None;
        true
    }

    pub fn set_now_playing(&mut self, generation: u64, now_playing: NowPlaying) -> bool {
        if self.current_generation() != Some(generation) {
            return false;
        }
        self.now_playing = Some(now_playing);
        true
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    #[cfg(test)]
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|t| t.path.as_path())
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.current.as_ref().map(|t| t.generation)
    }

    pub fn status(&self) -> PlaybackStatus {
        if self.current.is_some() {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Idle
        }
    }
}
