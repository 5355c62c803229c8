//! Playlist entries and their play order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

pub use channelcast_av::MediaType;

/// One scheduled media item. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Path or URI handed to the transcoder.
    pub media: String,

    #[serde(rename = "type", default)]
    pub media_type: MediaType,

    /// Absolute start time; `None` plays right after the previous item.
    #[serde(default, alias = "timestamp")]
    pub start: Option<DateTime<Utc>>,
}

impl PlaylistItem {
    pub fn new(media: impl Into<String>) -> Self {
        Self {
            media: media.into(),
            media_type: MediaType::Video,
            start: None,
        }
    }

    pub fn at(media: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            ..Self::new(media)
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistFile {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

/// Items for plain media paths given on the command line, played back to back.
pub fn from_paths<S: AsRef<str>>(paths: &[S]) -> Vec<PlaylistItem> {
    paths.iter().map(|p| PlaylistItem::new(p.as_ref())).collect()
}

/// Load a playlist file. `.json` files are read as JSON, anything else as TOML.
///
/// ```toml
/// [[items]]
/// media = "/srv/media/news.ts"
/// type = "video"
/// start = "2026-10-18T20:00:00Z"
/// ```
pub fn load_playlist(path: &Path) -> Result<Vec<PlaylistItem>> {
    let content = std::fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let file: PlaylistFile = if is_json {
        serde_json::from_str(&content)
            .map_err(|e| Error::Playlist(format!("{}: {e}", path.display())))?
    } else {
        toml::from_str(&content).map_err(|e| Error::Playlist(format!("{}: {e}", path.display())))?
    };

    Ok(file.items)
}

/// Sort items ascending by start time.
///
/// The sort is stable and an untimed item keeps following the item before
/// it, so "play immediately after previous" survives reordering.
pub fn order(items: Vec<PlaylistItem>) -> Vec<PlaylistItem> {
    let mut anchor: Option<DateTime<Utc>> = None;
    let mut keyed: Vec<(Option<DateTime<Utc>>, PlaylistItem)> = items
        .into_iter()
        .map(|item| {
            if item.start.is_some() {
                anchor = item.start;
            }
            (anchor, item)
        })
        .collect();

    // None sorts first: leading untimed items play straight away.
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, item)| item).collect()
}
