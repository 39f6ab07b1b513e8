//! Finds an equivalent, streamable track for metadata-only catalog results.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::extractor::{AudioStream, Extractor};
use crate::model::Track;
use crate::registry::ExtractorRegistry;
use crate::{ResolveError, ResolveResult};

/// Metadata key under which a pre-bridged stream URL is stashed so the
/// playback engine's later stream request skips a second search.
const BRIDGED_STREAM_KEY: &str = "bridged_stream_url";

/// Tunables for bridge matching and retry behavior. The duration window and
/// artist-contains rule are heuristics, not hard requirements.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Accept candidates within this many milliseconds of the source
    /// duration when no album is known.
    pub duration_tolerance_ms: u64,
    /// Bounded retries after a forced extractor re-initialization.
    pub reinit_retries: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_ms: 2_000,
            reinit_retries: 1,
        }
    }
}

/// Catalog-specific search parameters built from a track, with a simplified
/// fallback form.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeQuery {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_window_ms: Option<(u64, u64)>,
}

impl BridgeQuery {
    /// Full parameters: clean title plus primary artist, narrowed by album
    /// when known, otherwise by a duration window around the track's
    /// duration.
    pub fn from_track(track: &Track, tolerance_ms: u64) -> Self {
        let album = track
            .metadata
            .get("album")
            .and_then(Value::as_str)
            .map(|s| s.to_string());

        let duration_window_ms = if album.is_none() && track.duration_ms > 0 {
            Some((
                track.duration_ms.saturating_sub(tolerance_ms),
                track.duration_ms + tolerance_ms,
            ))
        } else {
            None
        };

        Self {
            title: track.clean_title.clone(),
            artist: track.primary_artist().to_string(),
            album,
            duration_window_ms,
        }
    }

    /// Fallback parameters: title and primary artist only.
    pub fn simplified(&self) -> Self {
        Self {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: None,
            duration_window_ms: None,
        }
    }

    /// The free-text search term sent to a streamable catalog.
    pub fn search_terms(&self) -> String {
        match &self.album {
            Some(album) => format!("{} {} {}", self.title, self.artist, album),
            None => format!("{} {}", self.title, self.artist),
        }
    }

    /// Accepts a candidate only on an exact (case-insensitive) title match
    /// with the wanted artist contained in the candidate's artist field, and
    /// within the duration window when one is set.
    pub fn accepts(&self, candidate: &Track) -> bool {
        let title_matches = candidate.title.eq_ignore_ascii_case(&self.title)
            || candidate.clean_title.eq_ignore_ascii_case(&self.title);
        if !title_matches {
            return false;
        }

        if !candidate
            .author
            .to_lowercase()
            .contains(&self.artist.to_lowercase())
        {
            return false;
        }

        match self.duration_window_ms {
            Some((lo, hi)) if candidate.duration_ms > 0 => {
                (lo..=hi).contains(&candidate.duration_ms)
            }
            _ => true,
        }
    }
}

/// Orchestrates bridge attempts across the registered streamable extractors
/// in priority order, with one bounded retry after forced re-initialization.
pub struct BridgeResolver {
    registry: Arc<ExtractorRegistry>,
    config: BridgeConfig,
}

impl BridgeResolver {
    pub fn new(registry: Arc<ExtractorRegistry>) -> Self {
        Self::with_config(registry, BridgeConfig::default())
    }

    pub fn with_config(registry: Arc<ExtractorRegistry>, config: BridgeConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Produces a stream for any track: directly if its source catalog (or a
    /// previous bridge) can stream it, otherwise by bridging.
    pub async fn request_stream(&self, track: &mut Track) -> ResolveResult<AudioStream> {
        // A pre-bridged stream from on_before_create_stream is reused as is.
        if let Some(url) = track.metadata.get(BRIDGED_STREAM_KEY).and_then(Value::as_str) {
            return Ok(AudioStream::Url(url.to_string()));
        }

        if let (Some(extractor_id), Some(bridged)) =
            (track.bridged_extractor.clone(), track.bridged_track.clone())
        {
            if let Some(extractor) = self.registry.get(&extractor_id) {
                return extractor.stream(&bridged).await;
            }
        }

        if let Some(extractor) = self.registry.get(&track.source) {
            if extractor.descriptor().streamable {
                return extractor.stream(track).await;
            }
        }

        self.request_bridge_from(track, None).await
    }

    /// Hook invoked by the playback engine before it requests audio, giving
    /// metadata-only tracks a chance to bridge ahead of time. Failures are
    /// logged and surface again on the actual stream request.
    pub async fn on_before_create_stream(&self, track: &mut Track) {
        if track.is_bridged() {
            return;
        }
        let streamable_source = self
            .registry
            .get(&track.source)
            .map(|e| e.descriptor().streamable)
            .unwrap_or(false);
        if streamable_source {
            return;
        }

        match self.request_bridge_from(track, None).await {
            Ok(stream) => {
                track.metadata.insert(
                    BRIDGED_STREAM_KEY.to_string(),
                    Value::String(stream.url().to_string()),
                );
            }
            Err(e) => warn!("Pre-bridge of '{}' failed: {}", track.title, e),
        }
    }

    /// Bridges `track` via the pinned target extractor, or, when none is
    /// pinned, via every registered streamable extractor (excluding the
    /// track's source) in priority order.
    ///
    /// If a failed attempt involved an extractor that requires periodic
    /// external state refresh, all extractors are re-initialized from scratch
    /// and the bridge is retried exactly once.
    pub async fn request_bridge_from(
        &self,
        track: &mut Track,
        target: Option<&str>,
    ) -> ResolveResult<AudioStream> {
        for attempt in 0..=self.config.reinit_retries {
            match self.bridge_once(track, target).await {
                Ok(stream) => return Ok(stream),
                Err(needs_reinit) => {
                    if !needs_reinit || attempt == self.config.reinit_retries {
                        break;
                    }
                    info!(
                        "Bridge attempt {} for '{}' failed, reinitializing extractors",
                        attempt + 1,
                        track.title
                    );
                    self.registry.reinitialize();
                }
            }
        }

        Err(ResolveError::NoStreamFound {
            title: track.title.clone(),
            author: track.author.clone(),
        })
    }

    /// One pass over the candidate extractors. The error value reports
    /// whether any attempted extractor is eligible for re-initialization.
    async fn bridge_once(&self, track: &mut Track, target: Option<&str>) -> Result<AudioStream, bool> {
        let candidates: Vec<Arc<dyn Extractor>> = match target {
            Some(id) => self.registry.get(id).into_iter().collect(),
            None => self
                .registry
                .streamables()
                .into_iter()
                .filter(|e| e.descriptor().id != track.source)
                .collect(),
        };

        let query = BridgeQuery::from_track(track, self.config.duration_tolerance_ms);

        let mut needs_reinit = false;
        for extractor in candidates {
            let descriptor = extractor.descriptor();
            debug!(
                "Attempting bridge of '{}' via '{}'",
                track.title, descriptor.id
            );
            match extractor.bridge(track, &query).await {
                Ok(Some(bridged)) => {
                    info!(
                        "Bridged '{}' by {} via '{}'",
                        track.title, track.author, descriptor.id
                    );
                    track.set_bridge(&descriptor.id, bridged.track);
                    return Ok(bridged.source);
                }
                Ok(None) => {
                    debug!("No acceptable match on '{}'", descriptor.id);
                    needs_reinit |= descriptor.requires_reinit;
                }
                Err(e) => {
                    warn!("Bridge via '{}' failed: {}", descriptor.id, e);
                    needs_reinit |= descriptor.requires_reinit;
                }
            }
        }

        Err(needs_reinit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metadata_track(title: &str, author: &str, duration_ms: u64) -> Track {
        let mut track = Track::new(title, author, duration_ms);
        track.source = "spotify".to_string();
        track
    }

    #[test]
    fn full_query_uses_album_when_known() {
        let mut track = metadata_track("One More Time", "Daft Punk", 320_000);
        track
            .metadata
            .insert("album".to_string(), Value::String("Discovery".to_string()));

        let query = BridgeQuery::from_track(&track, 2_000);
        assert_eq!(query.album.as_deref(), Some("Discovery"));
        assert_eq!(query.duration_window_ms, None);
        assert_eq!(query.search_terms(), "One More Time Daft Punk Discovery");
    }

    #[test]
    fn full_query_falls_back_to_duration_window() {
        let track = metadata_track("One More Time", "Daft Punk, Romanthony", 320_000);
        let query = BridgeQuery::from_track(&track, 2_000);

        assert_eq!(query.artist, "Daft Punk");
        assert_eq!(query.duration_window_ms, Some((318_000, 322_000)));
    }

    #[test]
    fn unknown_duration_sets_no_window() {
        let track = metadata_track("One More Time", "Daft Punk", 0);
        let query = BridgeQuery::from_track(&track, 2_000);
        assert_eq!(query.duration_window_ms, None);
    }

    #[test]
    fn simplified_drops_album_and_duration_constraints() {
        let mut track = metadata_track("One More Time", "Daft Punk", 320_000);
        track
            .metadata
            .insert("album".to_string(), Value::String("Discovery".to_string()));

        let simplified = BridgeQuery::from_track(&track, 2_000).simplified();
        assert_eq!(simplified.album, None);
        assert_eq!(simplified.duration_window_ms, None);
        assert_eq!(simplified.search_terms(), "One More Time Daft Punk");
    }

    #[test]
    fn accepts_exact_title_with_contained_artist() {
        let track = metadata_track("One More Time", "Daft Punk", 320_000);
        let query = BridgeQuery::from_track(&track, 2_000);

        let candidate = {
            let mut c = Track::new("One More Time", "Daft Punk - Topic", 321_000);
            c.source = "youtube".to_string();
            c
        };
        assert!(query.accepts(&candidate));
    }

    #[test]
    fn rejects_title_mismatch_and_foreign_artist() {
        let track = metadata_track("One More Time", "Daft Punk", 320_000);
        let query = BridgeQuery::from_track(&track, 2_000);

        let wrong_title = Track::new("One More Time (Live)", "Daft Punk", 320_000);
        assert!(!query.accepts(&wrong_title));

        let wrong_artist = Track::new("One More Time", "Some Cover Band", 320_000);
        assert!(!query.accepts(&wrong_artist));
    }

    #[test]
    fn rejects_candidates_outside_duration_window() {
        let track = metadata_track("One More Time", "Daft Punk", 320_000);
        let query = BridgeQuery::from_track(&track, 2_000);

        let too_long = Track::new("One More Time", "Daft Punk", 330_000);
        assert!(!query.accepts(&too_long));

        // Candidates with unknown duration pass the window check.
        let unknown = Track::new("One More Time", "Daft Punk", 0);
        assert!(query.accepts(&unknown));
    }

    #[test]
    fn clean_title_match_is_accepted() {
        let track = metadata_track("One More Time", "Daft Punk", 0);
        let query = BridgeQuery::from_track(&track, 2_000);

        let candidate = Track::new("One More Time (Official Video)", "Daft Punk", 0);
        assert!(query.accepts(&candidate));
    }
}
