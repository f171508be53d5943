//! Coordinator scenarios: library, playback cursor, downloads and shutdown
//! driven through `EngineEvent`s, with a duplex pipe standing in for the
//! player's stdin.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use chrono::NaiveDate;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tunes_proto::protocol::{Command, PlaybackStatus};
use tunes_proto::track::TrackRecord;

use crate::core::{Coordinator, EngineEvent, EngineSettings, ShutdownReason};
use crate::display::{UiHandle, UiMessage};
use crate::metadata::{TagExtractor, TrackTags};
use crate::player::{input_from, FeedOutcome, PlayerProcess};
use crate::test_support::{serve, stalled_body, wait_until};

struct NoTags;

impl TagExtractor for NoTags {
    fn extract(&self, _path: &Path) -> anyhow::Result<TrackTags> {
        anyhow::bail!("no tags in test files")
    }
}

struct PanickingTags;

impl TagExtractor for PanickingTags {
    fn extract(&self, _path: &Path) -> anyhow::Result<TrackTags> {
        panic!("malformed tag frame")
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Settings whose discovery window is already exhausted, so `start` issues
/// no playlist requests.
fn settings(dir: &Path) -> EngineSettings {
    EngineSettings {
        library_dir: dir.to_path_buf(),
        workers: 2,
        retry_delay: Duration::from_millis(20),
        url_template: "http://127.0.0.1:9/xspf/{date}/".to_string(),
        since: date(2012, 9, 7),
        until: date(2012, 9, 8),
        download_only: false,
        verbose: false,
        panel: false,
        quit_grace: Duration::from_millis(0),
    }
}

struct Harness {
    coord: Coordinator,
    events: mpsc::Receiver<EngineEvent>,
    ui: mpsc::UnboundedReceiver<UiMessage>,
    /// Read side of the fake player stdin; nothing reads it unless a test does.
    player_out: Option<DuplexStream>,
    dir: TempDir,
}

impl Harness {
    fn build(
        dir: TempDir,
        settings: EngineSettings,
        extractor: Arc<dyn TagExtractor>,
        player: Option<PlayerProcess>,
    ) -> Self {
        let (tx, events) = mpsc::channel(64);
        let (ui_handle, ui) = UiHandle::channel();
        let coord = Coordinator::new(settings, ui_handle, tx, extractor);
        let (coord, player_out) = match player {
            Some(player) => (coord.with_player(player), None),
            None => {
                let (writer, reader) = tokio::io::duplex(64);
                (coord.with_player_input(input_from(writer)), Some(reader))
            }
        };
        Self {
            coord,
            events,
            ui,
            player_out,
            dir,
        }
    }

    fn with_settings(dir: TempDir, settings: EngineSettings) -> Self {
        Self::build(dir, settings, Arc::new(NoTags), None)
    }

    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        Self::with_settings(dir, settings)
    }

    fn add_track(&self, title: &str) -> PathBuf {
        let path = TrackRecord::new("Tester", title, "").path(self.dir.path());
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        path
    }

    fn order(&self) -> Vec<PathBuf> {
        self.coord.library().order().map(Path::to_path_buf).collect()
    }

    fn current(&self) -> Option<PathBuf> {
        self.coord
            .playback()
            .and_then(|p| p.current_path())
            .map(Path::to_path_buf)
    }

    fn generation(&self) -> Option<u64> {
        self.coord.playback().and_then(|p| p.current_generation())
    }

    fn playback_status(&self) -> PlaybackStatus {
        self.coord.status().playback
    }

    /// Keep reading the fake player stdin so feeders run to completion.
    fn drain_player(&mut self) {
        if let Some(mut reader) = self.player_out.take() {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = reader.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    }

    /// Handle events until the current track reports its end; returns how it ended.
    async fn settle_track_end(&mut self) -> FeedOutcome {
        loop {
            match self.next_event().await {
                EngineEvent::TrackEnded {
                    generation,
                    path,
                    outcome,
                } => {
                    let reported = outcome.clone();
                    self.coord
                        .handle(EngineEvent::TrackEnded {
                            generation,
                            path,
                            outcome,
                        })
                        .await;
                    return reported;
                }
                ev => {
                    self.coord.handle(ev).await;
                }
            }
        }
    }

    fn logged_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(msg) = self.ui.try_recv() {
            if let UiMessage::Log(line) = msg {
                lines.push(line);
            }
        }
        lines
    }

    async fn next_event(&mut self) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for an engine event")
            .expect("event channel closed")
    }
}

#[tokio::test]
async fn existing_library_starts_playing() {
    let mut h = Harness::new();
    h.add_track("One");
    h.add_track("Two");

    h.coord.start().unwrap();
    assert_eq!(h.playback_status(), PlaybackStatus::Playing);
    assert_eq!(h.coord.library().len(), 2);
}

#[tokio::test]
async fn first_download_starts_playback_without_a_command() {
    let tracks = serve(Router::new().route("/one.mp3", get(|| async { vec![7u8; 4096] }))).await;
    let playlist = format!(
        r#"<playlist><trackList><track><creator>Tester</creator><title>First</title><location>{}/one.mp3</location></track></trackList></playlist>"#,
        tracks
    );
    let host = serve(Router::new().route("/xspf/:day/", get(move || async move { playlist }))).await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.url_template = format!("{}/xspf/{{date}}/", host);
    settings.since = date(2013, 5, 4);
    settings.until = date(2013, 5, 4);
    let mut h = Harness::with_settings(dir, settings);

    h.coord.start().unwrap();
    assert_eq!(h.playback_status(), PlaybackStatus::Idle);

    let expected = TrackRecord::new("Tester", "First", "").path(h.dir.path());
    let path = match h.next_event().await {
        EngineEvent::Downloaded(path) => path,
        other => panic!("unexpected event {:?}", other),
    };
    assert_eq!(path, expected);

    h.coord.handle(EngineEvent::Downloaded(path.clone())).await;
    assert_eq!(h.playback_status(), PlaybackStatus::Playing);
    assert_eq!(h.current(), Some(path));
}

#[tokio::test]
async fn next_cycles_back_to_the_same_order() {
    let mut h = Harness::new();
    for title in ["A", "B", "C"] {
        h.add_track(title);
    }
    h.coord.start().unwrap();

    let before = h.order();
    let mut played = Vec::new();
    for _ in 0..3 {
        h.coord.handle(EngineEvent::Command(Command::Next)).await;
        played.push(h.current().unwrap());
    }
    assert_eq!(played, before);
    assert_eq!(h.order(), before);
}

#[tokio::test]
async fn stopped_track_does_not_advance() {
    let mut h = Harness::new();
    h.add_track("Only");
    h.coord.start().unwrap();
    let generation = h.generation().unwrap();
    let path = h.current().unwrap();

    h.coord.handle(EngineEvent::Command(Command::Stop)).await;
    assert_eq!(h.playback_status(), PlaybackStatus::Idle);

    h.coord
        .handle(EngineEvent::TrackEnded {
            generation,
            path,
            outcome: FeedOutcome::Finished,
        })
        .await;
    assert_eq!(h.playback_status(), PlaybackStatus::Idle);

    h.coord.handle(EngineEvent::Command(Command::Play)).await;
    assert_eq!(h.playback_status(), PlaybackStatus::Playing);
}

#[tokio::test]
async fn natural_end_advances_to_the_next_track() {
    let mut h = Harness::new();
    h.add_track("A");
    h.add_track("B");
    h.coord.start().unwrap();
    let first = h.current().unwrap();
    let first_generation = h.generation().unwrap();

    h.drain_player();
    loop {
        match h.next_event().await {
            ev @ EngineEvent::TrackEnded { .. } => {
                h.coord.handle(ev).await;
                break;
            }
            ev => {
                h.coord.handle(ev).await;
            }
        }
    }

    assert_eq!(h.playback_status(), PlaybackStatus::Playing);
    assert_eq!(h.generation(), Some(first_generation + 1));
    assert_ne!(h.current(), Some(first));
}

#[tokio::test]
async fn unreadable_track_leaves_the_library() {
    let mut h = Harness::new();
    h.add_track("A");
    h.add_track("B");
    h.coord.start().unwrap();
    let broken = h.current().unwrap();
    let generation = h.generation().unwrap();

    h.coord
        .handle(EngineEvent::TrackEnded {
            generation,
            path: broken.clone(),
            outcome: FeedOutcome::ReadFailed("gone".into()),
        })
        .await;

    assert!(!h.coord.library().contains(&broken));
    assert_eq!(h.coord.library().len(), 1);
    assert_eq!(h.playback_status(), PlaybackStatus::Playing);
    assert_ne!(h.current(), Some(broken));
}

#[tokio::test]
async fn status_reports_engine_state() {
    let mut h = Harness::new();
    h.add_track("A");
    h.coord.start().unwrap();

    let (tx, rx) = oneshot::channel();
    h.coord.handle(EngineEvent::StatusRequest(tx)).await;
    let status = rx.await.unwrap();
    assert_eq!(status.library_size, 1);
    assert_eq!(status.workers, 2);
    assert!(status.discovery_exhausted);
    assert_eq!(status.playback, PlaybackStatus::Playing);
}

#[tokio::test]
async fn download_only_ignores_playback_commands() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.download_only = true;
    let mut h = Harness::with_settings(dir, settings);
    let path = h.add_track("A");
    h.coord.start().unwrap();

    h.coord.handle(EngineEvent::Command(Command::Next)).await;
    h.coord.handle(EngineEvent::Downloaded(path)).await;
    assert_eq!(h.playback_status(), PlaybackStatus::Disabled);
    assert_eq!(h.coord.library().len(), 1);

    let quit = h.coord.handle(EngineEvent::Command(Command::Quit)).await;
    assert_eq!(quit, Some(ShutdownReason::Quit));
}

#[derive(Clone)]
struct TrackHost(String);

async fn stalled_playlist(State(host): State<TrackHost>) -> String {
    format!(
        r#"<playlist><trackList>
            <track><creator>Tester</creator><title>Stall A</title><location>{0}/stall/a</location></track>
            <track><creator>Tester</creator><title>Stall B</title><location>{0}/stall/b</location></track>
        </trackList></playlist>"#,
        host.0
    )
}

#[tokio::test]
async fn quit_removes_partial_downloads() {
    let tracks = serve(Router::new().route("/stall/:n", get(|| async { stalled_body() }))).await;
    let host = serve(
        Router::new()
            .route("/xspf/:day/", get(stalled_playlist))
            .with_state(TrackHost(tracks)),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.url_template = format!("{}/xspf/{{date}}/", host);
    settings.since = date(2013, 5, 4);
    settings.until = date(2013, 5, 4);
    let mut h = Harness::with_settings(dir, settings);
    h.coord.start().unwrap();

    let in_flight = h.coord.in_flight();
    let a = TrackRecord::new("Tester", "Stall A", "").path(h.dir.path());
    let b = TrackRecord::new("Tester", "Stall B", "").path(h.dir.path());
    assert!(
        wait_until(Duration::from_secs(5), || {
            in_flight.len() == 2 && a.exists() && b.exists()
        })
        .await
    );

    let mut removed = h.coord.shutdown(&ShutdownReason::Quit).await;
    removed.sort();
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(removed, expected);
    assert!(!a.exists());
    assert!(!b.exists());
    assert!(h.coord.shutdown_token().is_cancelled());

    // No aborted transfer was published.
    while let Ok(ev) = h.events.try_recv() {
        assert!(!matches!(ev, EngineEvent::Downloaded(_)), "unexpected {:?}", ev);
    }
}

#[tokio::test]
async fn run_returns_the_shutdown_reason() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let (tx, rx) = mpsc::channel(8);
    let (ui, _ui_rx) = UiHandle::channel();
    let coord = Coordinator::new(settings, ui, tx.clone(), Arc::new(NoTags));

    tx.send(EngineEvent::Shutdown(ShutdownReason::Fault("boom".into())))
        .await
        .unwrap();
    let reason = tokio::time::timeout(Duration::from_secs(5), coord.run(rx))
        .await
        .unwrap();
    assert_eq!(reason, ShutdownReason::Fault("boom".into()));
    assert_eq!(reason.exit_code(), 1);
    assert_eq!(ShutdownReason::Signal("SIGTERM").exit_code(), 0);
}

#[tokio::test]
async fn empty_track_is_dropped_instead_of_looping() {
    let mut h = Harness::new();
    let path = TrackRecord::new("Tester", "Silence", "").path(h.dir.path());
    std::fs::write(&path, b"").unwrap();
    h.coord.start().unwrap();
    assert_eq!(h.current(), Some(path.clone()));

    let outcome = h.settle_track_end().await;
    assert!(matches!(outcome, FeedOutcome::ReadFailed(_)));
    assert_eq!(h.playback_status(), PlaybackStatus::Idle);
    assert!(h.coord.library().is_empty());
}

#[tokio::test]
async fn panicking_tag_lookup_keeps_playing() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let mut h = Harness::build(dir, settings, Arc::new(PanickingTags), None);
    h.add_track("A");
    h.add_track("B");
    h.coord.start().unwrap();
    let generation = h.generation().unwrap();

    // The reader is idle, so the feeder stays blocked and no event is due.
    let quiet = tokio::time::timeout(Duration::from_millis(200), h.events.recv()).await;
    assert!(quiet.is_err(), "unexpected event {:?}", quiet);
    assert_eq!(h.playback_status(), PlaybackStatus::Playing);

    h.coord.handle(EngineEvent::Command(Command::Next)).await;
    assert_eq!(h.playback_status(), PlaybackStatus::Playing);
    assert_eq!(h.generation(), Some(generation + 1));
}

#[tokio::test]
async fn broken_player_pipe_moves_on_to_the_next_track() {
    let mut h = Harness::new();
    h.add_track("A");
    h.add_track("B");
    h.coord.start().unwrap();
    let first = h.current().unwrap();
    let generation = h.generation().unwrap();

    drop(h.player_out.take());
    let outcome = h.settle_track_end().await;
    assert!(matches!(outcome, FeedOutcome::PlayerFailed(_)));
    assert_eq!(h.playback_status(), PlaybackStatus::Playing);
    assert_eq!(h.generation(), Some(generation + 1));
    assert_ne!(h.current(), Some(first));
    assert_eq!(h.coord.library().len(), 2);
}

/// A player launched through a symlink to `cat`, so removing the link makes
/// the next launch fail.
#[cfg(unix)]
fn linked_player(dir: &Path) -> (PathBuf, PlayerProcess) {
    let cat = tunes_proto::platform::find_player_binary("cat").unwrap();
    let link = dir.join("player");
    std::os::unix::fs::symlink(cat, &link).unwrap();
    let config = tunes_proto::config::PlayerConfig {
        command: link.to_string_lossy().into_owned(),
        args: Vec::new(),
    };
    let player = PlayerProcess::spawn(&config).unwrap();
    (link, player)
}

#[cfg(unix)]
#[tokio::test]
async fn failed_player_is_restarted_and_playback_advances() {
    let bin = tempfile::tempdir().unwrap();
    let (_link, player) = linked_player(bin.path());
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let mut h = Harness::build(dir, settings, Arc::new(NoTags), Some(player));
    h.add_track("A");
    h.add_track("B");
    h.coord.start().unwrap();
    let generation = h.generation().unwrap();
    let path = h.current().unwrap();

    h.coord
        .handle(EngineEvent::TrackEnded {
            generation,
            path,
            outcome: FeedOutcome::PlayerFailed("broken pipe".into()),
        })
        .await;
    assert_eq!(h.playback_status(), PlaybackStatus::Playing);
    assert_eq!(h.generation(), Some(generation + 1));
}

#[cfg(unix)]
#[tokio::test]
async fn player_that_cannot_restart_leaves_playback_idle() {
    let bin = tempfile::tempdir().unwrap();
    let (link, player) = linked_player(bin.path());
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let mut h = Harness::build(dir, settings, Arc::new(NoTags), Some(player));
    h.add_track("A");
    h.coord.start().unwrap();
    let generation = h.generation().unwrap();
    let path = h.current().unwrap();

    std::fs::remove_file(&link).unwrap();
    h.coord
        .handle(EngineEvent::TrackEnded {
            generation,
            path,
            outcome: FeedOutcome::PlayerFailed("broken pipe".into()),
        })
        .await;
    assert_eq!(h.playback_status(), PlaybackStatus::Idle);
    assert_eq!(h.coord.library().len(), 1);
}

#[tokio::test]
async fn empty_library_notice_reaches_a_quiet_display() {
    let mut h = Harness::new();
    h.coord.start().unwrap();
    let lines = h.logged_lines();
    assert!(
        lines.iter().any(|l| l.contains("playback starts with the first download")),
        "{:?}",
        lines
    );

    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.verbose = true;
    let mut verbose = Harness::with_settings(dir, settings);
    verbose.coord.start().unwrap();
    assert!(verbose.logged_lines().is_empty());
}
