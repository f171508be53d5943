//! Playlist discovery: walk back one day at a time from today to the floor
//! date, queueing every track that is not already in the library.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunes_proto::track::TrackRecord;
use tunes_proto::xspf::{self, XspfError};

use crate::download::{DownloadQueue, InFlightSet};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("request failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(StatusCode),
    #[error(transparent)]
    Parse(#[from] XspfError),
}

/// The `[until, since]` range of days not yet fetched.
#[derive(Debug)]
pub struct FetchWindow {
    since: Mutex<NaiveDate>,
    until: NaiveDate,
}

impl FetchWindow {
    pub fn new(since: NaiveDate, until: NaiveDate) -> Self {
        Self {
            since: Mutex::new(since),
            until,
        }
    }

    fn since_guard(&self) -> MutexGuard<'_, NaiveDate> {
        self.since.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn since(&self) -> NaiveDate {
        *self.since_guard()
    }

    pub fn until(&self) -> NaiveDate {
        self.until
    }

    pub fn is_active(&self) -> bool {
        *self.since_guard() >= self.until
    }

    pub fn is_exhausted(&self) -> bool {
        !self.is_active()
    }

    /// Move `since` one day back; returns whether discovery is still active.
    pub fn step_back(&self) -> bool {
        let mut since = self.since_guard();
        *since = since.pred_opt().unwrap_or(NaiveDate::MIN);
        *since >= self.until
    }
}

/// Expand `{date}` in a playlist URL template.
pub fn playlist_url(template: &str, day: NaiveDate) -> String {
    template.replace("{date}", &day.format("%Y-%m-%d").to_string())
}

pub struct PlaylistCursor {
    client: reqwest::Client,
    url_template: String,
    library_dir: PathBuf,
    window: Arc<FetchWindow>,
    queue: Arc<DownloadQueue>,
    in_flight: Arc<InFlightSet>,
    shutdown: CancellationToken,
}

impl PlaylistCursor {
    pub fn new(
        client: reqwest::Client,
        url_template: String,
        library_dir: PathBuf,
        window: Arc<FetchWindow>,
        queue: Arc<DownloadQueue>,
        in_flight: Arc<InFlightSet>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            url_template,
            library_dir,
            window,
            queue,
            in_flight,
            shutdown,
        }
    }

    /// Fetch the playlist for the current `since` day and queue its new
    /// tracks. Returns how many were queued. Does not move the window.
    pub async fn advance(&self) -> Result<usize, DiscoveryError> {
        let day = self.window.since();
        let url = playlist_url(&self.url_template, day);
        debug!("Fetching playlist for {} from {}", day, url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status()));
        }
        let body = response.bytes().await?;
        let tracks = xspf::parse_tracks(&body)?;

        let total = tracks.len();
        let queued = tracks.into_iter().filter(|t| self.enqueue(t)).count();
        debug!("Playlist for {}: {} tracks, {} new", day, total, queued);
        Ok(queued)
    }

    fn enqueue(&self, track: &TrackRecord) -> bool {
        let path = track.path(&self.library_dir);
        if path.exists() || self.in_flight.contains(&path) {
            return false;
        }
        self.queue.push_unique(track.clone())
    }

    /// Fetch day after day until the window is exhausted or shutdown.
    /// A failed day counts as a day without tracks.
    pub async fn run(self) {
        while !self.shutdown.is_cancelled() && self.window.is_active() {
            let day = self.window.since();
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                r = self.advance() => r,
            };
            match result {
                Ok(queued) => info!("Fetched playlist for {} ({} new tracks)", day, queued),
                Err(e) => warn!("Unable to fetch playlist for {}: {}", day, e),
            }
            self.window.step_back();
        }

        if self.window.is_exhausted() {
            info!(
                "Playlist discovery reached {}, no more playlists to fetch",
                self.window.until()
            );
        }
    }
}
