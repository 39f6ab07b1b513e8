//! Metadata-only Spotify adapter. Resolves track/playlist/album URLs and
//! free-text searches; produced tracks carry no stream until bridged.

use std::env;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{StatusCode, header};
use serde_json::Value;
use tracing::{debug, info};

use crate::aggregate::{spotify_playlist, spotify_track};
use crate::extractor::{Extractor, ExtractorResult};
use crate::model::{Playlist, PlaylistKind, Track};
use crate::registry::ExtractorDescriptor;
use crate::search::{ResultType, SearchContext};
use crate::token::{AnonymousTokenSource, ClientCredentialsSource, TokenManager, TokenSource};
use crate::{HTTP_CLIENT, ResolveError, ResolveResult};

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const SPOTIFY_WEB_BASE: &str = "https://open.spotify.com";

static SPOTIFY_TRACK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(open\.spotify\.com|spotify)/track/([a-zA-Z0-9]+)(\?.*)?$").unwrap()
});

static SPOTIFY_PLAYLIST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(open\.spotify\.com|spotify)/playlist/([a-zA-Z0-9]+)(\?.*)?$")
        .unwrap()
});

static SPOTIFY_ALBUM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(open\.spotify\.com|spotify)/album/([a-zA-Z0-9]+)(\?.*)?$").unwrap()
});

/// Spotify catalog adapter.
pub struct SpotifyExtractor {
    api_base: String,
    token: TokenManager,
}

impl SpotifyExtractor {
    /// Builds the extractor from the environment. With
    /// `SPOTIFY_CLIENT_ID`/`SPOTIFY_CLIENT_SECRET` set, the client-credentials
    /// flow is used; otherwise the anonymous TOTP-gated flow.
    pub fn from_env() -> ResolveResult<Self> {
        let source: Box<dyn TokenSource> = match (
            env::var("SPOTIFY_CLIENT_ID"),
            env::var("SPOTIFY_CLIENT_SECRET"),
        ) {
            (Ok(id), Ok(secret)) => {
                debug!("Using Spotify client-credentials authentication");
                Box::new(ClientCredentialsSource::new(SPOTIFY_TOKEN_URL, id, secret))
            }
            _ => {
                debug!("No Spotify application credentials, using anonymous token flow");
                Box::new(AnonymousTokenSource::new(SPOTIFY_WEB_BASE))
            }
        };
        Ok(Self::with_token_source(SPOTIFY_API_BASE, source))
    }

    /// Builds the extractor against an explicit API base and token source,
    /// used by tests to point at a stub server.
    pub fn with_token_source(api_base: impl Into<String>, source: Box<dyn TokenSource>) -> Self {
        Self {
            api_base: api_base.into(),
            token: TokenManager::new(source),
        }
    }

    pub fn is_spotify_url(url: &str) -> bool {
        SPOTIFY_TRACK_REGEX.is_match(url)
            || SPOTIFY_PLAYLIST_REGEX.is_match(url)
            || SPOTIFY_ALBUM_REGEX.is_match(url)
    }

    pub fn extract_track_id(url: &str) -> Option<String> {
        SPOTIFY_TRACK_REGEX
            .captures(url)
            .and_then(|cap| cap.get(3))
            .map(|m| m.as_str().to_string())
    }

    pub fn extract_playlist_id(url: &str) -> Option<String> {
        SPOTIFY_PLAYLIST_REGEX
            .captures(url)
            .and_then(|cap| cap.get(3))
            .map(|m| m.as_str().to_string())
    }

    pub fn extract_album_id(url: &str) -> Option<String> {
        SPOTIFY_ALBUM_REGEX
            .captures(url)
            .and_then(|cap| cap.get(3))
            .map(|m| m.as_str().to_string())
    }

    /// Authenticated GET. A 401 triggers exactly one forced token refresh and
    /// retry; 404 resolves to `None` so callers can return an empty result.
    async fn authed_get(&self, url: &str) -> ResolveResult<Option<Value>> {
        let mut token = self.token.access_token().await?;

        for attempt in 0..2 {
            let response = HTTP_CLIENT
                .get(url)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .send()
                .await
                .map_err(|e| {
                    ResolveError::ExternalApi(format!("Spotify request failed: {}", e))
                })?;

            match response.status() {
                StatusCode::UNAUTHORIZED if attempt == 0 => {
                    info!("Spotify rejected the access token, refreshing once");
                    token = self.token.force_refresh().await?;
                }
                StatusCode::NOT_FOUND => return Ok(None),
                status if !status.is_success() => {
                    let text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Cannot read response".to_string());
                    return Err(ResolveError::ExternalApi(format!(
                        "Spotify API error: {} - {}",
                        status, text
                    )));
                }
                _ => {
                    let body = response.json().await.map_err(|e| {
                        ResolveError::ExternalApi(format!(
                            "Failed to parse Spotify response: {}",
                            e
                        ))
                    })?;
                    return Ok(Some(body));
                }
            }
        }

        Err(ResolveError::ExternalApi(
            "Spotify rejected the refreshed access token".to_string(),
        ))
    }

    async fn get_track(&self, track_id: &str, requested_by: Option<&str>) -> ResolveResult<Option<Track>> {
        let url = format!("{}/tracks/{}", self.api_base, track_id);
        let Some(body) = self.authed_get(&url).await? else {
            return Ok(None);
        };
        Ok(spotify_track(&body, requested_by))
    }

    /// Walks the paginated track listing of a playlist or album.
    async fn collect_pages(
        &self,
        first_url: String,
        requested_by: Option<&str>,
        item_is_wrapped: bool,
    ) -> ResolveResult<Vec<Track>> {
        let mut tracks = Vec::new();
        let mut url = first_url;

        loop {
            let Some(page) = self.authed_get(&url).await? else {
                break;
            };

            if let Some(items) = page["items"].as_array() {
                for item in items {
                    // Playlist pages wrap each entry in a {"track": ...}
                    // envelope; album pages do not.
                    let raw = if item_is_wrapped { &item["track"] } else { item };
                    // Local tracks without a catalog id are skipped.
                    if let Some(track) = spotify_track(raw, requested_by) {
                        tracks.push(track);
                    }
                }
            }

            match page["next"].as_str() {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }

        Ok(tracks)
    }

    async fn get_playlist(
        &self,
        playlist_id: &str,
        requested_by: Option<&str>,
    ) -> ResolveResult<Option<Playlist>> {
        let url = format!("{}/playlists/{}", self.api_base, playlist_id);
        let Some(body) = self.authed_get(&url).await? else {
            return Ok(None);
        };
        let Some(mut playlist) = spotify_playlist(&body, PlaylistKind::Playlist) else {
            return Ok(None);
        };

        let tracks = self
            .collect_pages(
                format!("{}/playlists/{}/tracks?limit=50", self.api_base, playlist_id),
                requested_by,
                true,
            )
            .await?;
        playlist.attach_tracks(tracks);
        Ok(Some(playlist))
    }

    async fn get_album(
        &self,
        album_id: &str,
        requested_by: Option<&str>,
    ) -> ResolveResult<Option<Playlist>> {
        let url = format!("{}/albums/{}", self.api_base, album_id);
        let Some(body) = self.authed_get(&url).await? else {
            return Ok(None);
        };
        let Some(mut album) = spotify_playlist(&body, PlaylistKind::Album) else {
            return Ok(None);
        };

        let mut tracks = self
            .collect_pages(
                format!("{}/albums/{}/tracks?limit=50", self.api_base, album_id),
                requested_by,
                false,
            )
            .await?;
        // Album track listings omit album art; inherit it from the header.
        for track in &mut tracks {
            if track.thumbnail == crate::aggregate::PLACEHOLDER_THUMBNAIL {
                track.thumbnail = album.thumbnail.clone();
            }
            track
                .metadata
                .insert("album".to_string(), Value::String(album.title.clone()));
        }
        album.attach_tracks(tracks);
        Ok(Some(album))
    }

    async fn search(&self, ctx: &SearchContext) -> ResolveResult<ExtractorResult> {
        let result_type = ctx.engine.result_type().unwrap_or(ResultType::Song);
        let type_param = match result_type {
            ResultType::Song => "track",
            ResultType::Album => "album",
            ResultType::Playlist => "playlist",
        };

        let url = format!(
            "{}/search?q={}&type={}&limit=10",
            self.api_base,
            urlencode(&ctx.query),
            type_param
        );
        let Some(body) = self.authed_get(&url).await? else {
            return Ok(ExtractorResult::empty());
        };

        match result_type {
            ResultType::Song => {
                let tracks = body["tracks"]["items"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| spotify_track(item, ctx.requested_by.as_deref()))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(ExtractorResult::from_tracks(tracks))
            }
            // Album/playlist searches resolve the top hit into a full listing.
            ResultType::Album => {
                let Some(id) = body["albums"]["items"][0]["id"].as_str() else {
                    return Ok(ExtractorResult::empty());
                };
                match self.get_album(&id.to_string(), ctx.requested_by.as_deref()).await? {
                    Some(album) => Ok(ExtractorResult::from_playlist(album)),
                    None => Ok(ExtractorResult::empty()),
                }
            }
            ResultType::Playlist => {
                let Some(id) = body["playlists"]["items"][0]["id"].as_str() else {
                    return Ok(ExtractorResult::empty());
                };
                match self
                    .get_playlist(&id.to_string(), ctx.requested_by.as_deref())
                    .await?
                {
                    Some(playlist) => Ok(ExtractorResult::from_playlist(playlist)),
                    None => Ok(ExtractorResult::empty()),
                }
            }
        }
    }
}

fn urlencode(input: &str) -> String {
    url::form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

#[async_trait]
impl Extractor for SpotifyExtractor {
    fn descriptor(&self) -> ExtractorDescriptor {
        ExtractorDescriptor {
            id: "spotify".to_string(),
            priority: 30,
            streamable: false,
            query_modifiers: vec!["spotify".to_string(), "sp".to_string()],
            protocols: vec!["spsearch".to_string()],
            result_types: vec![ResultType::Song, ResultType::Album, ResultType::Playlist],
            requires_reinit: false,
        }
    }

    fn validate(&self, query: &str) -> bool {
        Self::is_spotify_url(query)
    }

    async fn handle(&self, ctx: &SearchContext) -> ResolveResult<ExtractorResult> {
        info!("Resolving Spotify query: {}", ctx.query);

        if let Some(track_id) = Self::extract_track_id(&ctx.query) {
            return Ok(self
                .get_track(&track_id, ctx.requested_by.as_deref())
                .await?
                .map(|t| ExtractorResult::from_tracks(vec![t]))
                .unwrap_or_default());
        }

        if let Some(playlist_id) = Self::extract_playlist_id(&ctx.query) {
            return Ok(self
                .get_playlist(&playlist_id, ctx.requested_by.as_deref())
                .await?
                .map(ExtractorResult::from_playlist)
                .unwrap_or_default());
        }

        if let Some(album_id) = Self::extract_album_id(&ctx.query) {
            return Ok(self
                .get_album(&album_id, ctx.requested_by.as_deref())
                .await?
                .map(ExtractorResult::from_playlist)
                .unwrap_or_default());
        }

        self.search(ctx).await
    }
}
