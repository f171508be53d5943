//! The local library: every fully downloaded track, in playback order.
//!
//! Owned by the coordinator, so prepend-on-download and rotate-on-play never
//! interleave.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use tracing::{debug, info};
use tunes_proto::track::TRACK_EXTENSION;

#[derive(Debug)]
pub struct LibraryStore {
    dir: PathBuf,
    order: VecDeque<PathBuf>,
}

impl LibraryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            order: VecDeque::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// Create the directory if needed, then replace the play order with a
    /// uniformly shuffled scan of the tracks already on disk.
    pub fn load_existing(&mut self) -> std::io::Result<usize> {
        self.ensure_dir()?;
        let mut found = VecDeque::from(scan(&self.dir)?);
        found.make_contiguous().shuffle(&mut rand::thread_rng());
        self.order = found;
        info!(
            "Loaded {} tracks from {}",
            self.order.len(),
            self.dir.display()
        );
        Ok(self.order.len())
    }

    /// Give `path` next-playback priority.
    pub fn prepend(&mut self, path: PathBuf) {
        self.remove(&path);
        debug!("Library: prepend {}", path.display());
        self.order.push_front(path);
    }

    /// Move the head to the tail and return it.
    pub fn rotate(&mut self) -> Option<PathBuf> {
        let head = self.order.pop_front()?;
        self.order.push_back(head.clone());
        Some(head)
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.order.len();
        self.order.retain(|p| p != path);
        self.order.len() != before
    }

    #[cfg(test)]
    pub fn contains(&self, path: &Path) -> bool {
        self.order.iter().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[cfg(test)]
    pub fn order(&self) -> impl Iterator<Item = &Path> {
        self.order.iter().map(PathBuf::as_path)
    }
}

/// Track files directly inside `dir`, sorted by name.
pub fn scan(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut tracks = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let is_track = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(TRACK_EXTENSION));
        if is_track {
            tracks.push(path);
        }
    }
    tracks.sort();
    Ok(tracks)
}
