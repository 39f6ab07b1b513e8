//! Streamable SoundCloud adapter over the public api-v2 surface. Requires a
//! `SOUNDCLOUD_CLIENT_ID`; without one the extractor is skipped at
//! registration.

use std::env;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::aggregate::{PLACEHOLDER_THUMBNAIL, soundcloud_track};
use crate::bridge::BridgeQuery;
use crate::extractor::{AudioStream, BridgedStream, Extractor, ExtractorResult};
use crate::model::{Playlist, PlaylistAuthor, PlaylistKind, Track};
use crate::registry::ExtractorDescriptor;
use crate::search::{QueryParser, ResultType, SearchContext};
use crate::{HTTP_CLIENT, ResolveError, ResolveResult};

pub const SOUNDCLOUD_API_BASE: &str = "https://api-v2.soundcloud.com";

static SOUNDCLOUD_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?((www|m)\.)?soundcloud\.com/[\w\-]+(/(sets/)?[\w\-]+)?(\?.*)?$")
        .unwrap()
});

/// SoundCloud catalog adapter.
pub struct SoundcloudExtractor {
    api_base: String,
    client_id: String,
}

impl SoundcloudExtractor {
    pub fn from_env() -> ResolveResult<Self> {
        let client_id = env::var("SOUNDCLOUD_CLIENT_ID")
            .map_err(|_| ResolveError::Config("SOUNDCLOUD_CLIENT_ID not set".to_string()))?;
        Ok(Self::new(SOUNDCLOUD_API_BASE, client_id))
    }

    pub fn new(api_base: impl Into<String>, client_id: String) -> Self {
        Self {
            api_base: api_base.into(),
            client_id,
        }
    }

    pub fn is_soundcloud_url(url: &str) -> bool {
        SOUNDCLOUD_URL_REGEX.is_match(url)
    }

    async fn get_json(&self, url: &str) -> ResolveResult<Option<Value>> {
        let response = HTTP_CLIENT
            .get(url)
            .query(&[("client_id", self.client_id.as_str())])
            .send()
            .await
            .map_err(|e| {
                ResolveError::ExternalApi(format!("SoundCloud request failed: {}", e))
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ResolveError::ExternalApi(format!(
                "SoundCloud API error: {}",
                response.status()
            )));
        }

        let body = response.json().await.map_err(|e| {
            ResolveError::ExternalApi(format!("Failed to parse SoundCloud response: {}", e))
        })?;
        Ok(Some(body))
    }

    async fn resolve_url(
        &self,
        url: &str,
        requested_by: Option<&str>,
    ) -> ResolveResult<ExtractorResult> {
        let endpoint = format!(
            "{}/resolve?url={}",
            self.api_base,
            url::form_urlencoded::byte_serialize(url.as_bytes()).collect::<String>()
        );
        let Some(body) = self.get_json(&endpoint).await? else {
            return Ok(ExtractorResult::empty());
        };

        match body["kind"].as_str() {
            Some("track") => Ok(soundcloud_track(&body, requested_by)
                .map(|t| ExtractorResult::from_tracks(vec![t]))
                .unwrap_or_default()),
            Some("playlist") => {
                let mut playlist = Playlist {
                    title: body["title"].as_str().unwrap_or("Unknown").to_string(),
                    description: body["description"].as_str().unwrap_or("").to_string(),
                    thumbnail: body["artwork_url"]
                        .as_str()
                        .unwrap_or(PLACEHOLDER_THUMBNAIL)
                        .to_string(),
                    kind: if body["is_album"].as_bool().unwrap_or(false) {
                        PlaylistKind::Album
                    } else {
                        PlaylistKind::Playlist
                    },
                    source: "soundcloud".to_string(),
                    author: PlaylistAuthor {
                        name: body["user"]["username"].as_str().unwrap_or("").to_string(),
                        url: body["user"]["permalink_url"].as_str().unwrap_or("").to_string(),
                    },
                    tracks: Vec::new(),
                    id: body["id"].as_u64().unwrap_or(0).to_string(),
                    url: body["permalink_url"].as_str().unwrap_or("").to_string(),
                };

                // Set listings include stub entries carrying only an id;
                // those are dropped rather than fetched one by one.
                let tracks = body["tracks"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| soundcloud_track(item, requested_by))
                            .collect()
                    })
                    .unwrap_or_default();
                playlist.attach_tracks(tracks);
                Ok(ExtractorResult::from_playlist(playlist))
            }
            _ => Ok(ExtractorResult::empty()),
        }
    }

    async fn search_tracks(
        &self,
        term: &str,
        requested_by: Option<&str>,
    ) -> ResolveResult<Vec<Track>> {
        let endpoint = format!(
            "{}/search/tracks?q={}&limit=10",
            self.api_base,
            url::form_urlencoded::byte_serialize(term.as_bytes()).collect::<String>()
        );
        let Some(body) = self.get_json(&endpoint).await? else {
            return Ok(Vec::new());
        };

        Ok(body["collection"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| soundcloud_track(item, requested_by))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_match(&self, query: &BridgeQuery) -> ResolveResult<Option<Track>> {
        let candidates = self.search_tracks(&query.search_terms(), None).await?;
        Ok(candidates.into_iter().find(|c| query.accepts(c)))
    }
}

#[async_trait]
impl Extractor for SoundcloudExtractor {
    fn descriptor(&self) -> ExtractorDescriptor {
        ExtractorDescriptor {
            id: "soundcloud".to_string(),
            priority: 20,
            streamable: true,
            query_modifiers: vec!["soundcloud".to_string(), "sc".to_string()],
            protocols: vec!["scsearch".to_string()],
            result_types: vec![ResultType::Song, ResultType::Playlist],
            requires_reinit: false,
        }
    }

    fn validate(&self, query: &str) -> bool {
        QueryParser::is_url(query) && Self::is_soundcloud_url(query)
    }

    async fn handle(&self, ctx: &SearchContext) -> ResolveResult<ExtractorResult> {
        if QueryParser::is_url(&ctx.query) {
            info!("Resolving SoundCloud URL: {}", ctx.query);
            return self
                .resolve_url(&ctx.query, ctx.requested_by.as_deref())
                .await;
        }

        info!("Searching SoundCloud for: {}", ctx.query);
        let tracks = self
            .search_tracks(&ctx.query, ctx.requested_by.as_deref())
            .await?;
        Ok(ExtractorResult::from_tracks(tracks))
    }

    /// Resolves the progressive transcoding of a track into a direct URL.
    async fn stream(&self, track: &Track) -> ResolveResult<AudioStream> {
        let endpoint = format!("{}/tracks/{}", self.api_base, track.id);
        let Some(body) = self.get_json(&endpoint).await? else {
            return Err(ResolveError::AudioSource(format!(
                "SoundCloud track '{}' no longer exists",
                track.title
            )));
        };

        let transcoding_url = body["media"]["transcodings"]
            .as_array()
            .and_then(|list| {
                list.iter().find(|t| {
                    t["format"]["protocol"].as_str() == Some("progressive")
                })
            })
            .and_then(|t| t["url"].as_str())
            .ok_or_else(|| {
                ResolveError::AudioSource(format!(
                    "No progressive transcoding for '{}'",
                    track.title
                ))
            })?
            .to_string();

        let Some(resolved) = self.get_json(&transcoding_url).await? else {
            return Err(ResolveError::AudioSource(
                "Transcoding endpoint vanished".to_string(),
            ));
        };
        let stream_url = resolved["url"]
            .as_str()
            .ok_or_else(|| ResolveError::AudioSource("Missing stream URL".to_string()))?;

        Ok(AudioStream::Url(stream_url.to_string()))
    }

    async fn bridge(
        &self,
        track: &Track,
        query: &BridgeQuery,
    ) -> ResolveResult<Option<BridgedStream>> {
        debug!("Bridging '{}' via SoundCloud search", track.title);

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
