//! Resolves free-text or URL search requests into playable audio for a
//! voice-chat bot, reconciling several independent music catalogs.
//!
//! Some catalogs (Spotify) only expose metadata; others (YouTube, SoundCloud)
//! can produce an actual audio stream. The pipeline parses user intent into a
//! catalog preference, queries the matching extractor, and bridges
//! metadata-only tracks onto a streamable catalog by title/artist/duration
//! similarity. The voice connection, playback queue, and chat command layer
//! are collaborators and live outside this crate.

use std::sync::LazyLock;

use thiserror::Error;

pub mod aggregate;
pub mod autocomplete;
pub mod bridge;
pub mod extractor;
pub mod extractors;
pub mod model;
pub mod registry;
pub mod resolve;
pub mod search;
pub mod token;
pub mod totp;

pub use bridge::{BridgeConfig, BridgeResolver};
pub use extractor::{AudioStream, Extractor, ExtractorResult};
pub use extractors::{SoundcloudExtractor, SpotifyExtractor, YoutubeExtractor};
pub use model::{Playlist, Track};
pub use registry::{ExtractorDescriptor, ExtractorRegistry};
pub use resolve::Resolver;
pub use search::{QueryParser, ResultType, SearchContext, SearchEngine};

/// Shared HTTP client used by all extractors and token sources.
pub static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(reqwest::Client::new);

/// Errors that can occur while resolving a query into playable audio
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Failed to retrieve access token: {0}")]
    Token(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio source error: {0}")]
    AudioSource(String),

    #[error("Extractor '{0}' cannot produce audio streams")]
    NotStreamable(String),

    #[error("Unknown extractor: {0}")]
    UnknownExtractor(String),

    #[error("No stream found for {title} by {author}")]
    NoStreamFound { title: String, author: String },
}

/// Result type for resolution operations
pub type ResolveResult<T> = Result<T, ResolveError>;
