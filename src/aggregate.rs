//! Pure transforms from each catalog's native JSON shape into the unified
//! `Track`/`Playlist` model.

use serde_json::Value;
use tracing::debug;

use crate::model::{Playlist, PlaylistAuthor, PlaylistKind, Track};

/// Generic artwork shown when a catalog supplies no thumbnail.
pub const PLACEHOLDER_THUMBNAIL: &str =
    "https://upload.wikimedia.org/wikipedia/commons/2/2a/ITunes_12.2_logo.png";

/// Formats a millisecond count as mm:ss or h:mm:ss. 0 is a valid "unknown
/// duration" sentinel and renders as "0:00".
pub fn format_duration(duration_ms: u64) -> String {
    let total_secs = duration_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Parses duration banners like "5:32" or "1:23:45" back into milliseconds.
pub fn parse_duration(duration_str: &str) -> Option<u64> {
    let parts: Vec<&str> = duration_str.split(':').collect();

    match parts.len() {
        // MM:SS format
        2 => {
            let minutes = parts[0].parse::<u64>().ok()?;
            let seconds = parts[1].parse::<u64>().ok()?;
            Some((minutes * 60 + seconds) * 1000)
        }
        // HH:MM:SS format
        3 => {
            let hours = parts[0].parse::<u64>().ok()?;
            let minutes = parts[1].parse::<u64>().ok()?;
            let seconds = parts[2].parse::<u64>().ok()?;
            Some((hours * 3600 + minutes * 60 + seconds) * 1000)
        }
        _ => None,
    }
}

fn joined_artists(value: &Value) -> String {
    value["artists"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a["name"].as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn album_image(value: &Value) -> String {
    value["album"]["images"]
        .as_array()
        .or_else(|| value["images"].as_array())
        .and_then(|imgs| imgs.first())
        .and_then(|img| img["url"].as_str())
        .unwrap_or(PLACEHOLDER_THUMBNAIL)
        .to_string()
}

/// Builds a `Track` from a raw Spotify track object. Returns `None` for
/// entries without a catalog id (local files inside playlists).
pub fn spotify_track(value: &Value, requested_by: Option<&str>) -> Option<Track> {
    let id = value["id"].as_str()?;
    let name = value["name"].as_str()?;

    let mut track = Track::new(name, joined_artists(value), value["duration_ms"].as_u64().unwrap_or(0));
    track.id = id.to_string();
    track.url = format!("https://open.spotify.com/track/{}", id);
    track.thumbnail = album_image(value);
    track.source = "spotify".to_string();
    track.requested_by = requested_by.map(|s| s.to_string());
    if let Some(album) = value["album"]["name"].as_str() {
        track
            .metadata
            .insert("album".to_string(), Value::String(album.to_string()));
    }
    Some(track)
}

/// Builds the playlist/album header from a raw Spotify playlist or album
/// object. Tracks are attached separately once the paginated listing is done.
pub fn spotify_playlist(value: &Value, kind: PlaylistKind) -> Option<Playlist> {
    let id = value["id"].as_str()?;
    let kind_segment = match kind {
        PlaylistKind::Album => "album",
        PlaylistKind::Playlist => "playlist",
    };

    let author = match kind {
        PlaylistKind::Album => PlaylistAuthor {
            name: joined_artists(value),
            url: String::new(),
        },
        PlaylistKind::Playlist => PlaylistAuthor {
            name: value["owner"]["display_name"].as_str().unwrap_or("").to_string(),
            url: value["owner"]["external_urls"]["spotify"]
                .as_str()
                .unwrap_or("")
                .to_string(),
        },
    };

    Some(Playlist {
        title: value["name"].as_str().unwrap_or("Unknown").to_string(),
        description: value["description"].as_str().unwrap_or("").to_string(),
        thumbnail: album_image(value),
        kind,
        source: "spotify".to_string(),
        author,
        tracks: Vec::new(),
        id: id.to_string(),
        url: format!("https://open.spotify.com/{}/{}", kind_segment, id),
    })
}

/// Builds a `Track` from a raw SoundCloud api-v2 track object.
pub fn soundcloud_track(value: &Value, requested_by: Option<&str>) -> Option<Track> {
    let id = value["id"].as_u64()?;
    let title = value["title"].as_str()?;

    let author = value["user"]["username"].as_str().unwrap_or("").to_string();
    let mut track = Track::new(title, author, value["duration"].as_u64().unwrap_or(0));
    track.id = id.to_string();
    track.url = value["permalink_url"].as_str().unwrap_or("").to_string();
    track.thumbnail = value["artwork_url"]
        .as_str()
        .or_else(|| value["user"]["avatar_url"].as_str())
        .unwrap_or(PLACEHOLDER_THUMBNAIL)
        .to_string();
    track.source = "soundcloud".to_string();
    track.requested_by = requested_by.map(|s| s.to_string());
    Some(track)
}

/// Builds a `Track` from one line of `yt-dlp -j` output.
pub fn ytdlp_track(value: &Value, requested_by: Option<&str>) -> Option<Track> {
    let title = value["title"].as_str()?;

    let duration_ms = value["duration"]
        .as_f64()
        .map(|secs| (secs * 1000.0) as u64)
        .unwrap_or(0);

    let author = value["artist"]
        .as_str()
        .or_else(|| value["channel"].as_str())
        .or_else(|| value["uploader"].as_str())
        .unwrap_or("")
        .to_string();

    let mut track = Track::new(title, author, duration_ms);
    track.id = value["id"].as_str().unwrap_or("").to_string();
    track.url = value["webpage_url"]
        .as_str()
        .or_else(|| value["url"].as_str())
        .unwrap_or("")
        .to_string();
    track.thumbnail = value["thumbnail"]
        .as_str()
        .unwrap_or(PLACEHOLDER_THUMBNAIL)
        .to_string();
    track.source = "youtube".to_string();
    track.requested_by = requested_by.map(|s| s.to_string());

    if track.url.is_empty() {
        debug!("Discarding yt-dlp entry '{}' without a URL", title);
        return None;
    }
    Some(track)
}
