//! The common contract implemented by every catalog adapter.

use async_trait::async_trait;

use crate::bridge::BridgeQuery;
use crate::model::{Playlist, Track};
use crate::registry::ExtractorDescriptor;
use crate::search::SearchContext;
use crate::{ResolveError, ResolveResult};

/// An audio source handed to the playback queue collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioStream {
    /// A direct progressive/HLS URL the player can read.
    Url(String),
    /// A page URL the player resolves through yt-dlp.
    YtDlp(String),
}

impl AudioStream {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(u) | Self::YtDlp(u) => u,
        }
    }
}

/// Outcome of a successful bridge attempt: the stream plus the equivalent
/// track found on the streamable catalog.
#[derive(Debug, Clone)]
pub struct BridgedStream {
    pub source: AudioStream,
    pub track: Track,
}

/// What an extractor resolved a query into.
#[derive(Debug, Clone, Default)]
pub struct ExtractorResult {
    pub playlist: Option<Playlist>,
    pub tracks: Vec<Track>,
}

impl ExtractorResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        Self {
            playlist: None,
            tracks,
        }
    }

    pub fn from_playlist(playlist: Playlist) -> Self {
        let tracks = playlist.tracks.clone();
        Self {
            playlist: Some(playlist),
            tracks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Trait defining the common interface for all catalog extractors.
/// Requires `Send + Sync` to be safely shared across concurrently resolving
/// guilds.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Identity, priority, capabilities, and recognized modifiers.
    fn descriptor(&self) -> ExtractorDescriptor;

    /// True if this extractor's URL patterns match the query, or (for a
    /// catch-all extractor) if the query is free text.
    fn validate(&self, query: &str) -> bool;

    /// Resolves a URL to a single track/playlist/album, or performs a
    /// free-text search returning candidate tracks. "Not found" yields an
    /// empty result, never an error.
    async fn handle(&self, ctx: &SearchContext) -> ResolveResult<ExtractorResult>;

    /// Produces an audio stream for a track of this extractor's own catalog.
    async fn stream(&self, _track: &Track) -> ResolveResult<AudioStream> {
        Err(ResolveError::NotStreamable(self.descriptor().id))
    }

    /// Locates an equivalent track in this extractor's catalog and streams
    /// it. The bridge resolver supplies the match parameters (built from its
    /// configured tolerances); `Ok(None)` means "no acceptable match",
    /// letting the resolver try the next candidate.
    async fn bridge(
        &self,
        _track: &Track,
        _query: &BridgeQuery,
    ) -> ResolveResult<Option<BridgedStream>> {
        Ok(None)
    }
}
