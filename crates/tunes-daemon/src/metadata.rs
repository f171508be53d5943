//! Artist/title lookup for the now-playing display, using lofty.

use std::cell::Cell;
use std::path::Path;

use anyhow::{Context, Result};
use lofty::prelude::*;
use tunes_proto::protocol::NowPlaying;
use tunes_proto::track::decode_file_name;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub artist: Option<String>,
    pub title: Option<String>,
}

/// Reads tags from a track file. Called on a blocking thread.
pub trait TagExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<TrackTags>;
}

pub struct LoftyExtractor;

impl TagExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Result<TrackTags> {
        let tagged_file = lofty::read_from_path(path)
            .with_context(|| format!("Failed to read tags of {}", path.display()))?;
        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            return Ok(TrackTags::default());
        };
        Ok(TrackTags {
            artist: tag.artist().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            title: tag.title().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        })
    }
}

/// Tags for `path`, with the track name recovered from the file name as the
/// fallback. Extraction errors only lose the tags.
pub fn now_playing_for(extractor: &dyn TagExtractor, path: &Path) -> NowPlaying {
    let fallback = path
        .file_name()
        .and_then(|f| f.to_str())
        .and_then(decode_file_name)
        .or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        });

    let tags = match extractor.extract(path) {
        Ok(tags) => tags,
        Err(e) => {
            tracing::debug!("{:#}", e);
            TrackTags::default()
        }
    };

    NowPlaying {
        artist: tags.artist,
        title: tags.title,
        fallback,
    }
}

thread_local! {
    static IN_TAG_LOOKUP: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is inside `lookup_now_playing`. A panic there
/// only loses the tags, so the panic hook leaves the engine running.
pub fn in_tag_lookup() -> bool {
    IN_TAG_LOOKUP.with(Cell::get)
}

struct LookupMark;

impl LookupMark {
    fn enter() -> Self {
        IN_TAG_LOOKUP.with(|flag| flag.set(true));
        LookupMark
    }
}

impl Drop for LookupMark {
    fn drop(&mut self) {
        IN_TAG_LOOKUP.with(|flag| flag.set(false));
    }
}

/// `now_playing_for` with the thread marked as a tag lookup.
pub fn lookup_now_playing(extractor: &dyn TagExtractor, path: &Path) -> NowPlaying {
    let _mark = LookupMark::enter();
    now_playing_for(extractor, path)
}
