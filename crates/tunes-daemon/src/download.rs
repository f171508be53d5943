//! Download queue, in-flight bookkeeping and the download worker pool.
//!
//! Each worker is a tokio task running an explicit loop: pop one track,
//! fetch it, publish or discard the file, repeat. At most one transfer per
//! worker is open at a time, so `workers` bounds concurrent connections.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunes_proto::track::TrackRecord;

use crate::core::EngineEvent;
use crate::discovery::FetchWindow;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("unsupported location scheme: {0}")]
    UnsupportedScheme(String),
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("server answered {0}")]
    Status(StatusCode),
    #[error("empty response body")]
    EmptyBody,
    #[error("transfer interrupted: {0}")]
    Transfer(#[source] reqwest::Error),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("aborted by shutdown")]
    Aborted,
    /// Another worker already owns or finished this path; nothing to clean up.
    #[error("already downloaded or in flight")]
    AlreadyPresent,
}

// ── queue ─────────────────────────────────────────────────────────────────────

/// FIFO of tracks waiting for a worker. Every entry is popped exactly once.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    entries: Mutex<VecDeque<TrackRecord>>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<TrackRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue unless a track with the same name is already waiting.
    pub fn push_unique(&self, track: TrackRecord) -> bool {
        let mut entries = self.entries();
        let name = track.name();
        if entries.iter().any(|t| t.name() == name) {
            return false;
        }
        entries.push_back(track);
        true
    }

    pub fn pop(&self) -> Option<TrackRecord> {
        self.entries().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

// ── in-flight set ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct InFlightEntry {
    track: TrackRecord,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct InFlightInner {
    entries: HashMap<PathBuf, InFlightEntry>,
    /// Set by `drain`; no transfer may start afterwards.
    closed: bool,
}

/// Transfers currently writing into the library, keyed by destination path.
///
/// `finish` and `drain` take the same lock, so a transfer is either published
/// by its worker or purged by shutdown, never both.
#[derive(Debug, Default)]
pub struct InFlightSet {
    inner: Mutex<InFlightInner>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, InFlightInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `path` for a transfer. The returned token is cancelled when
    /// `parent` is, or when the set is drained.
    pub fn register(
        &self,
        path: &Path,
        track: &TrackRecord,
        parent: &CancellationToken,
    ) -> Result<CancellationToken, DownloadError> {
        let mut inner = self.inner();
        if inner.closed {
            return Err(DownloadError::Aborted);
        }
        if inner.entries.contains_key(path) {
            return Err(DownloadError::AlreadyPresent);
        }
        let cancel = parent.child_token();
        inner.entries.insert(
            path.to_path_buf(),
            InFlightEntry {
                track: track.clone(),
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }

    /// Release `path`. Returns false when shutdown already took it.
    pub fn finish(&self, path: &Path) -> bool {
        self.inner().entries.remove(path).is_some()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner().entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner().entries.is_empty()
    }

    /// Close the set, cancel every transfer and hand back what was in flight.
    pub fn drain(&self) -> Vec<(PathBuf, TrackRecord)> {
        let mut inner = self.inner();
        inner.closed = true;
        inner
            .entries
            .drain()
            .map(|(path, entry)| {
                entry.cancel.cancel();
                (path, entry.track)
            })
            .collect()
    }
}

/// Delete a partial file; a file that is already gone is fine.
pub fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial file {}: {}", path.display(), e),
    }
}

// ── workers ───────────────────────────────────────────────────────────────────

/// State shared by every worker of the pool.
pub struct WorkerContext {
    pub client: reqwest::Client,
    pub library_dir: PathBuf,
    pub queue: Arc<DownloadQueue>,
    pub in_flight: Arc<InFlightSet>,
    pub window: Arc<FetchWindow>,
    pub events: mpsc::Sender<EngineEvent>,
    pub shutdown: CancellationToken,
    /// Pause between polls of an empty queue while discovery is still active.
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStep {
    Downloaded,
    Failed,
    Skipped,
    Empty,
}

pub struct DownloadWorker {
    id: usize,
    ctx: Arc<WorkerContext>,
}

impl DownloadWorker {
    pub fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { id, ctx }
    }

    /// Drain the queue until shutdown, or until it is empty for good.
    pub async fn run(self) {
        debug!("Download worker {} started", self.id);
        loop {
            if self.ctx.shutdown.is_cancelled() {
                break;
            }
            if self.run_once().await != WorkerStep::Empty {
                continue;
            }
            // Discovery pushes its last day before flagging exhaustion, so an
            // empty queue seen after the flag stays empty.
            if self.ctx.window.is_exhausted() {
                if !self.ctx.queue.is_empty() {
                    continue;
                }
                info!("No work for downloader {}", self.id);
                break;
            }
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.ctx.retry_delay) => {}
            }
        }
        debug!("Download worker {} stopped", self.id);
    }

    /// Pop at most one track and make one attempt at downloading it.
    pub async fn run_once(&self) -> WorkerStep {
        let Some(track) = self.ctx.queue.pop() else {
            return WorkerStep::Empty;
        };
        let path = track.path(&self.ctx.library_dir);
        let name = track.name();

        match self.download(&track, &path).await {
            Ok(bytes) => {
                info!("Downloaded {} ({} bytes)", name, bytes);
                let _ = self
                    .ctx
                    .events
                    .send(EngineEvent::Downloaded(path))
                    .await;
                WorkerStep::Downloaded
            }
            Err(DownloadError::AlreadyPresent) => {
                debug!("Skipping {}, already present", name);
                WorkerStep::Skipped
            }
            Err(e) => {
                warn!("Unable to download {} from {}: {}", name, track.location, e);
                WorkerStep::Failed
            }
        }
    }

    async fn download(&self, track: &TrackRecord, path: &Path) -> Result<u64, DownloadError> {
        check_scheme(&track.location)?;
        if path.exists() {
            return Err(DownloadError::AlreadyPresent);
        }

        debug!(
            "Worker {} trying to download {} {}",
            self.id,
            track.name(),
            track.location
        );
        let response = tokio::select! {
            _ = self.ctx.shutdown.cancelled() => return Err(DownloadError::Aborted),
            r = self.ctx.client.get(&track.location).send() => r.map_err(DownloadError::Connect)?,
        };
        if response.status() != StatusCode::OK {
            return Err(DownloadError::Status(response.status()));
        }

        let cancel = self
            .ctx
            .in_flight
            .register(path, track, &self.ctx.shutdown)?;
        let result = transfer(response, path, &cancel).await;
        let published = self.ctx.in_flight.finish(path);

        match result {
            Ok(0) => {
                remove_partial(path);
                Err(DownloadError::EmptyBody)
            }
            Ok(bytes) if published => Ok(bytes),
            Ok(_) => {
                remove_partial(path);
                Err(DownloadError::Aborted)
            }
            Err(e) => {
                remove_partial(path);
                Err(e)
            }
        }
    }
}

/// Plain or TLS transport is picked by reqwest from the scheme; anything else
/// is rejected before a connection is attempted.
fn check_scheme(location: &str) -> Result<(), DownloadError> {
    let scheme = location.split_once("://").map(|(s, _)| s.to_ascii_lowercase());
    match scheme.as_deref() {
        Some("http") | Some("https") => Ok(()),
        _ => Err(DownloadError::UnsupportedScheme(location.to_string())),
    }
}

async fn transfer(
    response: reqwest::Response,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Aborted),
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                file.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
            Some(Err(e)) => return Err(DownloadError::Transfer(e)),
            None => break,
        }
    }

    file.flush().await?;
    Ok(written)
}

/// Spawn `count` workers sharing `ctx`.
pub fn spawn_pool(count: usize, ctx: Arc<WorkerContext>) -> Vec<tokio::task::JoinHandle<()>> {
    (0..count)
        .map(|id| tokio::spawn(DownloadWorker::new(id, Arc::clone(&ctx)).run()))
        .collect()
}
