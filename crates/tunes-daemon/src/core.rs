/// Coordinator — single-owner event loop for the library and playback.
///
/// Discovery, download workers, feeders, tag lookups, command sources and the
/// HTTP API all report through `EngineEvent`s. The coordinator owns the
/// `LibraryStore`, the `PlaybackCursor` and the player process exclusively, so
/// prepend-on-download and rotate-on-play are applied one at a time.
///
/// The download queue, the in-flight set and the fetch window are shared with
/// the background tasks through `Arc`s; the root `CancellationToken` stops
/// every loop on shutdown.
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tunes_proto::config::{Config, UiMode};
use tunes_proto::protocol::{Command, EngineStatus, NowPlaying, PlaybackStatus};

use crate::discovery::{FetchWindow, PlaylistCursor};
use crate::display::UiHandle;
use crate::download::{self, DownloadQueue, InFlightSet, WorkerContext};
use crate::library::LibraryStore;
use crate::metadata::TagExtractor;
use crate::player::{FeedOutcome, PlaybackCursor, PlayerInput, PlayerProcess};

/// How long shutdown waits for discovery and workers to wind down.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

// ── EngineEvent ───────────────────────────────────────────────────────────────

/// All inputs into the coordinator loop.
#[derive(Debug)]
pub enum EngineEvent {
    /// A command from stdin, the panel or the HTTP API.
    Command(Command),
    /// A worker published a complete track.
    Downloaded(PathBuf),
    /// A feeder stopped on its own.
    TrackEnded {
        generation: u64,
        path: PathBuf,
        outcome: FeedOutcome,
    },
    TagsExtracted {
        generation: u64,
        now_playing: NowPlaying,
    },
    StatusRequest(oneshot::Sender<EngineStatus>),
    Shutdown(ShutdownReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Quit,
    Signal(&'static str),
    Fault(String),
}

impl ShutdownReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Quit | ShutdownReason::Signal(_) => 0,
            ShutdownReason::Fault(_) => 1,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Quit => write!(f, "quit requested"),
            ShutdownReason::Signal(name) => write!(f, "received {}", name),
            ShutdownReason::Fault(msg) => write!(f, "fault: {}", msg),
        }
    }
}

// ── settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub library_dir: PathBuf,
    pub workers: usize,
    pub retry_delay: Duration,
    pub url_template: String,
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub download_only: bool,
    pub verbose: bool,
    pub panel: bool,
    pub quit_grace: Duration,
}

impl EngineSettings {
    /// Discovery starts at `today` and walks back to the configured floor.
    pub fn from_config(config: &Config, today: NaiveDate) -> Self {
        Self {
            library_dir: config.library.dir.clone(),
            workers: config.download.workers.max(1),
            retry_delay: Duration::from_millis(config.download.retry_delay_ms),
            url_template: config.playlist.url_template.clone(),
            since: today,
            until: config.playlist.floor_date,
            download_only: config.download.download_only,
            verbose: config.ui.verbose,
            panel: config.ui.mode == UiMode::Panel,
            quit_grace: Duration::from_millis(config.ui.quit_grace_ms),
        }
    }
}

// ── Coordinator ───────────────────────────────────────────────────────────────

pub struct Coordinator {
    settings: EngineSettings,
    library: LibraryStore,
    /// `None` in download-only mode.
    playback: Option<PlaybackCursor>,
    player: Option<PlayerProcess>,
    queue: Arc<DownloadQueue>,
    in_flight: Arc<InFlightSet>,
    window: Arc<FetchWindow>,
    client: reqwest::Client,
    events_tx: mpsc::Sender<EngineEvent>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    ui: UiHandle,
    extractor: Arc<dyn TagExtractor>,
}

impl Coordinator {
    pub fn new(
        settings: EngineSettings,
        ui: UiHandle,
        events_tx: mpsc::Sender<EngineEvent>,
        extractor: Arc<dyn TagExtractor>,
    ) -> Self {
        let window = Arc::new(FetchWindow::new(settings.since, settings.until));
        Self {
            library: LibraryStore::new(settings.library_dir.clone()),
            settings,
            playback: None,
            player: None,
            queue: Arc::new(DownloadQueue::new()),
            in_flight: Arc::new(InFlightSet::new()),
            window,
            client: reqwest::Client::new(),
            events_tx,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            ui,
            extractor,
        }
    }

    /// Play through a spawned player process.
    pub fn with_player(mut self, player: PlayerProcess) -> Self {
        let input = player.input();
        self.player = Some(player);
        self.with_player_input(input)
    }

    /// Play into `input` without owning a process.
    pub fn with_player_input(mut self, input: PlayerInput) -> Self {
        if self.settings.download_only {
            return self;
        }
        self.playback = Some(PlaybackCursor::new(
            input,
            self.events_tx.clone(),
            Arc::clone(&self.extractor),
        ));
        self
    }

    pub fn in_flight(&self) -> Arc<InFlightSet> {
        Arc::clone(&self.in_flight)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn library(&self) -> &LibraryStore {
        &self.library
    }

    #[cfg(test)]
    pub fn playback(&self) -> Option<&PlaybackCursor> {
        self.playback.as_ref()
    }

    /// Load the library, start playback if possible, then start discovery
    /// and the download pool.
    pub fn start(&mut self) -> anyhow::Result<()> {
        let found = self.library.load_existing()?;
        if found == 0 {
            let notice = format!(
                "No tracks in {} yet, playback starts with the first download",
                self.library.dir().display()
            );
            // Verbose displays already get it through the log layer.
            if !self.settings.verbose {
                self.ui.log(notice.clone());
            }
            info!("{}", notice);
        } else {
            self.play_if_idle();
        }

        let cursor = PlaylistCursor::new(
            self.client.clone(),
            self.settings.url_template.clone(),
            self.settings.library_dir.clone(),
            Arc::clone(&self.window),
            Arc::clone(&self.queue),
            Arc::clone(&self.in_flight),
            self.shutdown.clone(),
        );
        self.tasks.push(tokio::spawn(cursor.run()));

        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            library_dir: self.settings.library_dir.clone(),
            queue: Arc::clone(&self.queue),
            in_flight: Arc::clone(&self.in_flight),
            window: Arc::clone(&self.window),
            events: self.events_tx.clone(),
            shutdown: self.shutdown.clone(),
            retry_delay: self.settings.retry_delay,
        });
        self.tasks
            .extend(download::spawn_pool(self.settings.workers, ctx));
        info!(
            "Started discovery from {} to {} with {} download workers",
            self.settings.since, self.settings.until, self.settings.workers
        );
        Ok(())
    }

    /// Run until a shutdown reason arrives, then shut down.
    pub async fn run(mut self, mut events_rx: mpsc::Receiver<EngineEvent>) -> ShutdownReason {
        info!("Coordinator: starting event loop");
        let reason = loop {
            match events_rx.recv().await {
                None => {
                    info!("Coordinator: event channel closed, shutting down");
                    break ShutdownReason::Quit;
                }
                Some(ev) => {
                    if let Some(reason) = self.handle(ev).await {
                        break reason;
                    }
                }
            }
        };
        self.shutdown(&reason).await;
        reason
    }

    pub(crate) async fn handle(&mut self, ev: EngineEvent) -> Option<ShutdownReason> {
        match ev {
            EngineEvent::Command(cmd) => return self.handle_command(cmd),

            EngineEvent::Downloaded(path) => {
                self.library.prepend(path);
                self.play_if_idle();
            }

            EngineEvent::TrackEnded {
                generation,
                path,
                outcome,
            } => self.handle_track_ended(generation, path, outcome).await,

            EngineEvent::TagsExtracted {
                generation,
                now_playing,
            } => {
                let Some(playback) = self.playback.as_mut() else {
                    return None;
                };
                if playback.set_now_playing(generation, now_playing.clone()) {
                    if let Some(headline) = now_playing.headline() {
                        debug!("Playing {}", headline);
                    }
                    self.ui.now_playing(now_playing);
                }
            }

            EngineEvent::StatusRequest(reply) => {
                let _ = reply.send(self.status());
            }

            EngineEvent::Shutdown(reason) => return Some(reason),
        }
        None
    }

    fn handle_command(&mut self, cmd: Command) -> Option<ShutdownReason> {
        debug!("Coordinator: command {:?}", cmd);
        if cmd == Command::Quit {
            return Some(ShutdownReason::Quit);
        }
        let Some(playback) = self.playback.as_mut() else {
            debug!("Playback disabled, ignoring {:?}", cmd);
            return None;
        };
        match cmd {
            Command::Next => {
                if playback.play_next(&mut self.library).is_none() {
                    info!("Nothing to play yet");
                }
            }
            Command::Stop => playback.stop(),
            Command::Play => {
                playback.play_if_idle(&mut self.library);
            }
            Command::Quit => {}
        }
        None
    }

    async fn handle_track_ended(&mut self, generation: u64, path: PathBuf, outcome: FeedOutcome) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        if !playback.track_ended(generation) {
            debug!("Ignoring end of stale track generation {}", generation);
            return;
        }

        match outcome {
            FeedOutcome::Finished => debug!("Finished {}", path.display()),
            FeedOutcome::ReadFailed(e) => {
                warn!("Unable to read {}: {}, dropping it", path.display(), e);
                self.library.remove(&path);
            }
            FeedOutcome::PlayerFailed(e) => {
                warn!("Player stopped accepting audio: {}", e);
                if let Some(player) = self.player.as_mut() {
                    if let Err(e) = player.respawn().await {
                        error!("Unable to restart the player: {:#}", e);
                        return;
                    }
                    info!("Player restarted");
                }
            }
        }

        self.play_next();
    }

    fn play_next(&mut self) {
        if let Some(playback) = self.playback.as_mut() {
            playback.play_next(&mut self.library);
        }
    }

    fn play_if_idle(&mut self) {
        if let Some(playback) = self.playback.as_mut() {
            playback.play_if_idle(&mut self.library);
        }
    }

    pub fn status(&self) -> EngineStatus {
        let (playback, now_playing) = match &self.playback {
            Some(p) => (p.status(), p.now_playing().and_then(NowPlaying::headline)),
            None => (PlaybackStatus::Disabled, None),
        };
        EngineStatus {
            library_size: self.library.len(),
            queued: self.queue.len(),
            in_flight: self.in_flight.len(),
            workers: self.settings.workers,
            fetch_since: self.window.since(),
            fetch_until: self.window.until(),
            discovery_exhausted: self.window.is_exhausted(),
            playback,
            now_playing,
        }
    }

    /// Stop every loop, purge partial downloads and stop playback.
    /// Returns the paths that were in flight.
    pub async fn shutdown(&mut self, reason: &ShutdownReason) -> Vec<PathBuf> {
        info!("Shutting down: {}", reason);
        self.shutdown.cancel();

        let drained = self.in_flight.drain();
        for (path, track) in &drained {
            info!("Aborting download of {}", track.name());
            download::remove_partial(path);
        }

        let tasks = std::mem::take(&mut self.tasks);
        if tokio::time::timeout(TASK_JOIN_TIMEOUT, futures_util::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!("Background tasks did not stop within {:?}", TASK_JOIN_TIMEOUT);
        }
        // A worker may have created its file after the first pass.
        for (path, _) in &drained {
            download::remove_partial(path);
        }

        if let Some(playback) = self.playback.as_mut() {
            playback.stop();
        }
        if let Some(player) = self.player.as_mut() {
            player.kill().await;
        }

        if self.settings.verbose || self.settings.panel {
            tokio::time::sleep(self.settings.quit_grace).await;
        }
        drained.into_iter().map(|(path, _)| path).collect()
    }
}
