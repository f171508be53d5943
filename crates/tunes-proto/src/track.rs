//! Track records discovered in playlists and their library file names.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Extension of every file kept in the library.
pub const TRACK_EXTENSION: &str = "mp3";

/// Longest encoded stem kept verbatim; stays under the usual 255-byte limit
/// once the extension is appended.
const MAX_ENCODED_STEM: usize = 240;
/// Encoded prefix kept for over-long names, followed by `~` and a digest.
const TRUNCATED_STEM: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub creator: String,
    pub title: String,
    pub location: String,
}

impl TrackRecord {
    pub fn new(
        creator: impl Into<String>,
        title: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            creator: creator.into(),
            title: title.into(),
            location: location.into(),
        }
    }

    /// `"creator - title"`
    pub fn name(&self) -> String {
        format!("{} - {}", self.creator, self.title)
    }

    pub fn file_name(&self) -> String {
        file_name_for(&self.name())
    }

    pub fn path(&self, library_dir: &Path) -> PathBuf {
        library_dir.join(self.file_name())
    }
}

/// Library file name for a track name.
///
/// URL-safe unpadded base64 keeps the name reversible without `/`. Names too
/// long for a file name keep a prefix of the encoding plus a SHA-256 digest.
pub fn file_name_for(name: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(name.as_bytes());
    if encoded.len() <= MAX_ENCODED_STEM {
        return format!("{}.{}", encoded, TRACK_EXTENSION);
    }

    let digest = Sha256::digest(name.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}~{}.{}", &encoded[..TRUNCATED_STEM], hex, TRACK_EXTENSION)
}

/// Recover the track name from a library file name, if it was encoded reversibly.
pub fn decode_file_name(file_name: &str) -> Option<String> {
    let stem = file_name
        .strip_suffix(TRACK_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))?;
    if stem.contains('~') {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}
