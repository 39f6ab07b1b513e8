//! Streamable YouTube adapter backed by the `yt-dlp` command-line tool.
//! Doubles as the catch-all for free-text queries and as the primary bridge
//! target for metadata-only tracks.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::aggregate::ytdlp_track;
use crate::bridge::BridgeQuery;
use crate::extractor::{AudioStream, BridgedStream, Extractor, ExtractorResult};
use crate::model::{TRACK_CACHE, Track};
use crate::registry::ExtractorDescriptor;
use crate::search::{QueryParser, ResultType, SearchContext};
use crate::{ResolveError, ResolveResult};

static YOUTUBE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:https?:)?//)?((?:www|m)\.)?((?:youtube\.com|youtu.be))(/(?:[\w\-]+\?v=|embed/|v/)?)([\w\-]+)(\S+)?$").unwrap()
});

/// YouTube catalog adapter (via `yt-dlp`).
#[derive(Default)]
pub struct YoutubeExtractor;

impl YoutubeExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn is_youtube_url(url: &str) -> bool {
        YOUTUBE_REGEX.is_match(url)
    }

    async fn run_ytdlp(args: &[&str]) -> ResolveResult<String> {
        let output = Command::new("yt-dlp")
            .args(args)
            .output()
            .await
            .map_err(|e| {
                ResolveError::AudioSource(format!("Failed to run yt-dlp: {}", e))
            })?;

        if !output.status.success() {
            return Err(ResolveError::AudioSource(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Fetches metadata for a single video URL, consulting the shared track
    /// cache first.
    async fn metadata_for_url(
        &self,
        url: &str,
        requested_by: Option<&str>,
    ) -> ResolveResult<Option<Track>> {
        if let Some(cached) = TRACK_CACHE.get(url) {
            debug!("Track cache hit for {}", url);
            let mut track = cached.value().clone();
            track.requested_by = requested_by.map(|s| s.to_string());
            return Ok(Some(track));
        }

        let stdout = Self::run_ytdlp(&["-j", "--no-playlist", url]).await?;
        let value: Value = serde_json::from_str(&stdout).map_err(|e| {
            ResolveError::AudioSource(format!("Failed to parse video metadata: {}", e))
        })?;

        let track = ytdlp_track(&value, requested_by);
        if let Some(track) = &track {
            TRACK_CACHE.insert(track.url.clone(), track.clone());
        }
        Ok(track)
    }

    /// Runs a `ytsearchN` query and parses one JSON object per result line.
    async fn search_tracks(
        &self,
        term: &str,
        count: usize,
        requested_by: Option<&str>,
    ) -> ResolveResult<Vec<Track>> {
        let search_param = format!("ytsearch{}", count);
        let stdout = Self::run_ytdlp(&[
            "-j",
            "--flat-playlist",
            "--no-download",
            "--default-search",
            &search_param,
            term,
        ])
        .await?;

        let mut tracks = Vec::new();
        for line in stdout.lines() {
            if let Ok(value) = serde_json::from_str::<Value>(line) {
                if let Some(track) = ytdlp_track(&value, requested_by) {
                    tracks.push(track);
                }
            }
        }
        Ok(tracks)
    }

    /// Accepts the first search hit matching the bridge query, or `None`.
    async fn find_match(&self, query: &BridgeQuery) -> ResolveResult<Option<Track>> {
        let candidates = self.search_tracks(&query.search_terms(), 5, None).await?;
        Ok(candidates.into_iter().find(|c| query.accepts(c)))
    }
}

#[async_trait]
impl Extractor for YoutubeExtractor {
    fn descriptor(&self) -> ExtractorDescriptor {
        ExtractorDescriptor {
            id: "youtube".to_string(),
            priority: 10,
            streamable: true,
            query_modifiers: vec!["youtube".to_string(), "yt".to_string()],
            protocols: vec!["ytsearch".to_string()],
            result_types: vec![ResultType::Song, ResultType::Playlist],
            // Session-bound: signature ciphers rotate and a stale instance
            // needs rebuilding from scratch.
            requires_reinit: true,
        }
    }

    fn validate(&self, query: &str) -> bool {
        // Catch-all for free text; URLs must match the YouTube patterns.
        Self::is_youtube_url(query) || !QueryParser::is_url(query)
    }

    async fn handle(&self, ctx: &SearchContext) -> ResolveResult<ExtractorResult> {
        if QueryParser::is_url(&ctx.query) {
            info!("Resolving YouTube URL: {}", ctx.query);
            return Ok(self
                .metadata_for_url(&ctx.query, ctx.requested_by.as_deref())
                .await?
                .map(|t| ExtractorResult::from_tracks(vec![t]))
                .unwrap_or_default());
        }

        info!("Searching YouTube for: {}", ctx.query);
        let tracks = self
            .search_tracks(&ctx.query, 5, ctx.requested_by.as_deref())
            .await?;
        Ok(ExtractorResult::from_tracks(tracks))
    }

    async fn stream(&self, track: &Track) -> ResolveResult<AudioStream> {
        if track.url.is_empty() {
            return Err(ResolveError::AudioSource(format!(
                "Track '{}' has no URL to stream",
                track.title
            )));
        }
        Ok(AudioStream::YtDlp(track.url.clone()))
    }

    async fn bridge(
        &self,
        track: &Track,
        query: &BridgeQuery,
    ) -> ResolveResult<Option<BridgedStream>> {
        debug!("Bridging '{}' via YouTube search", track.title);

        let matched = match self.find_match(query).await? {
            Some(hit) => Some(hit),
            None => {
                debug!("No match on full parameters, retrying simplified");
                self.find_match(&query.simplified()).await?
            }
        };

        let Some(hit) = matched else {
            return Ok(None);
        };

        let source = self.stream(&hit).await?;
        Ok(Some(BridgedStream { source, track: hit }))
    }
}
