//! Catalog adapters. Spotify resolves metadata only and relies on bridging;
//! YouTube and SoundCloud can produce audio streams themselves.

pub mod soundcloud;
pub mod spotify;
pub mod youtube;

pub use soundcloud::SoundcloudExtractor;
pub use spotify::SpotifyExtractor;
pub use youtube::YoutubeExtractor;
