//! XSPF playlist documents.
//!
//! Only the fields the downloader needs are read; everything else in the
//! document (annotations, images, extensions, attributes) is ignored.

use serde::Deserialize;
use thiserror::Error;

use crate::track::TrackRecord;

#[derive(Debug, Error)]
pub enum XspfError {
    #[error("malformed playlist document: {0}")]
    Malformed(#[from] quick_xml::de::DeError),
}

#[derive(Debug, Deserialize)]
struct Playlist {
    #[serde(rename = "trackList", default)]
    track_list: TrackList,
}

#[derive(Debug, Default, Deserialize)]
struct TrackList {
    #[serde(rename = "track", default)]
    tracks: Vec<RawTrack>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    #[serde(default)]
    creator: Option<String>,
    #[serde(default)]
    title: Option<String>,
    /// XSPF allows several locations per track; the first one wins.
    #[serde(default)]
    location: Vec<String>,
}

impl RawTrack {
    fn into_record(self) -> Option<TrackRecord> {
        let location = self
            .location
            .into_iter()
            .map(|l| l.trim().to_string())
            .find(|l| !l.is_empty())?;
        let creator = self.creator.unwrap_or_default().trim().to_string();
        let title = self.title.unwrap_or_default().trim().to_string();
        if creator.is_empty() && title.is_empty() {
            return None;
        }
        Some(TrackRecord {
            creator,
            title,
            location,
        })
    }
}

/// Parse the tracks of an XSPF document, in document order.
///
/// Tracks without a location, or without both creator and title, are skipped.
pub fn parse_tracks(document: &[u8]) -> Result<Vec<TrackRecord>, XspfError> {
    let playlist: Playlist = quick_xml::de::from_reader(document)?;
    Ok(playlist
        .track_list
        .tracks
        .into_iter()
        .filter_map(RawTrack::into_record)
        .collect())
}
