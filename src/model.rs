//! Defines the unified `Track` and `Playlist` model produced by every
//! extractor and consumed by the playback queue collaborator.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::format_duration;

/// Lazily initialized, thread-safe cache mapping a resolved URL to its track
/// metadata, so repeated requests for the same URL skip the catalog round trip.
pub static TRACK_CACHE: LazyLock<Arc<DashMap<String, Track>>> =
    LazyLock::new(|| Arc::new(DashMap::new()));

/// Unified representation of a playable (or bridgeable) track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    /// The title of the track as the catalog reports it.
    pub title: String,
    /// Normalized title with bracketed qualifiers stripped, used for bridging.
    pub clean_title: String,
    /// Comma/ampersand-joined artist names.
    pub author: String,
    /// Human-readable duration banner (mm:ss or h:mm:ss).
    pub duration: String,
    /// Raw duration in milliseconds. 0 means unknown, never an error.
    pub duration_ms: u64,
    /// Catalog-qualified URL for this track.
    pub url: String,
    /// Thumbnail image URL.
    pub thumbnail: String,
    /// Identifier of the catalog that produced this track.
    pub source: String,
    /// Opaque per-catalog track id.
    pub id: String,
    /// The name of the user who requested the track.
    pub requested_by: Option<String>,
    /// Back-reference to the playlist this track came from, used only for
    /// fallback title/thumbnail inheritance.
    pub playlist: Option<PlaylistRef>,
    /// Identifier of the extractor that supplied audio for this track, set
    /// exactly once when bridging succeeds.
    pub bridged_extractor: Option<String>,
    /// The equivalent track found on the bridged catalog.
    pub bridged_track: Option<Box<Track>>,
    /// Free-form per-track metadata (album name, autoplay flag, ...).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            title: "Unknown Track".to_string(),
            clean_title: "Unknown Track".to_string(),
            author: String::new(),
            duration: "0:00".to_string(),
            duration_ms: 0,
            url: String::new(),
            thumbnail: String::new(),
            source: String::new(),
            id: String::new(),
            requested_by: None,
            playlist: None,
            bridged_extractor: None,
            bridged_track: None,
            metadata: HashMap::new(),
        }
    }
}

impl Track {
    /// Creates a track with the derived fields (clean title, duration banner)
    /// filled in from the raw values.
    pub fn new(title: impl Into<String>, author: impl Into<String>, duration_ms: u64) -> Self {
        let title = title.into();
        Self {
            clean_title: clean_title(&title),
            duration: format_duration(duration_ms),
            duration_ms,
            title,
            author: author.into(),
            ..Default::default()
        }
    }

    /// The first artist name, split off before any comma or ampersand.
    pub fn primary_artist(&self) -> &str {
        self.author
            .split(&[',', '&'][..])
            .next()
            .unwrap_or(&self.author)
            .trim()
    }

    /// Whether a stream can only be obtained for this track via bridging.
    pub fn is_bridged(&self) -> bool {
        self.bridged_extractor.is_some()
    }

    /// Records the outcome of a successful bridge. Set exactly once; a second
    /// call is ignored. Backfills an unknown duration from the bridged track.
    pub fn set_bridge(&mut self, extractor_id: &str, bridged: Track) {
        if self.bridged_extractor.is_some() {
            warn!(
                "Track '{}' is already bridged via {:?}, ignoring re-bridge",
                self.title, self.bridged_extractor
            );
            return;
        }

        if self.duration_ms == 0 && bridged.duration_ms > 0 {
            debug!(
                "Backfilling duration of '{}' from bridged track ({} ms)",
                self.title, bridged.duration_ms
            );
            self.duration_ms = bridged.duration_ms;
            self.duration = format_duration(bridged.duration_ms);
        }

        self.bridged_extractor = Some(extractor_id.to_string());
        self.bridged_track = Some(Box::new(bridged));
    }

    /// Inherits a missing thumbnail from the playlist back-reference.
    pub fn effective_thumbnail(&self) -> &str {
        if !self.thumbnail.is_empty() {
            return &self.thumbnail;
        }
        self.playlist
            .as_ref()
            .map(|p| p.thumbnail.as_str())
            .unwrap_or("")
    }
}

/// Non-owning reference from a track back to the playlist it was listed in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistRef {
    pub title: String,
    pub thumbnail: String,
    pub url: String,
}

/// Whether a playlist-shaped result is an album or a user playlist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistKind {
    Album,
    Playlist,
}

/// Author of a playlist or album.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaylistAuthor {
    pub name: String,
    pub url: String,
}

/// A playlist or album with its tracks in catalog order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Playlist {
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub kind: PlaylistKind,
    pub source: String,
    pub author: PlaylistAuthor,
    pub tracks: Vec<Track>,
    pub id: String,
    pub url: String,
}

impl Playlist {
    /// Attaches tracks to this playlist, setting each track's back-reference.
    pub fn attach_tracks(&mut self, tracks: Vec<Track>) {
        let back_ref = PlaylistRef {
            title: self.title.clone(),
            thumbnail: self.thumbnail.clone(),
            url: self.url.clone(),
        };
        self.tracks = tracks
            .into_iter()
            .map(|mut t| {
                t.playlist = Some(back_ref.clone());
                t
            })
            .collect();
    }
}

/// Strips bracketed and parenthesized qualifiers ("(feat. ...)", "[Remaster]")
/// and collapses whitespace, yielding the title used for bridge matching.
pub fn clean_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut depth = 0usize;
    for c in title.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    let cleaned = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        title.trim().to_string()
    } else {
        cleaned
    }
}
