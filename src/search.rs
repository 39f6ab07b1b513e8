//! Turns raw user input into a normalized query plus a resolved target
//! catalog, honoring explicit modifiers, the caller's stored preference, and
//! the auto-detect default, in that order.

use url::Url;

use crate::registry::ExtractorDescriptor;

/// Result-type filter selected by the second modifier namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Song,
    Album,
    Playlist,
}

impl ResultType {
    fn from_modifier(token: &str) -> Option<Self> {
        match token {
            "song" | "track" => Some(Self::Song),
            "album" => Some(Self::Album),
            "playlist" => Some(Self::Playlist),
            _ => None,
        }
    }
}

/// The search engine resolved for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEngine {
    /// Let each extractor's `validate()` claim the query by pattern.
    Auto,
    /// A specific catalog, optionally narrowed to one result type.
    Catalog {
        id: String,
        result_type: Option<ResultType>,
    },
}

impl SearchEngine {
    pub fn catalog(id: impl Into<String>) -> Self {
        Self::Catalog {
            id: id.into(),
            result_type: None,
        }
    }

    pub fn catalog_id(&self) -> Option<&str> {
        match self {
            Self::Auto => None,
            Self::Catalog { id, .. } => Some(id),
        }
    }

    pub fn result_type(&self) -> Option<ResultType> {
        match self {
            Self::Auto => None,
            Self::Catalog { result_type, .. } => *result_type,
        }
    }
}

/// Output of parsing one raw input string.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub query: String,
    pub engine: SearchEngine,
    pub fallback_engine: SearchEngine,
}

/// Per-invocation search state handed to extractors. Never persisted.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub query: String,
    pub requested_by: Option<String>,
    pub engine: SearchEngine,
    pub fallback_engine: SearchEngine,
}

impl SearchContext {
    pub fn new(parsed: ParsedQuery, requested_by: Option<String>) -> Self {
        Self {
            query: parsed.query,
            requested_by,
            engine: parsed.engine,
            fallback_engine: parsed.fallback_engine,
        }
    }
}

#[derive(Debug, Clone)]
struct CatalogModifiers {
    id: String,
    modifiers: Vec<String>,
    protocols: Vec<String>,
    result_types: Vec<ResultType>,
}

/// Parser over the modifier sets advertised by the registered extractors.
#[derive(Debug, Clone)]
pub struct QueryParser {
    catalogs: Vec<CatalogModifiers>,
}

impl QueryParser {
    pub fn new(descriptors: &[ExtractorDescriptor]) -> Self {
        let catalogs = descriptors
            .iter()
            .map(|d| CatalogModifiers {
                id: d.id.clone(),
                modifiers: d.query_modifiers.iter().map(|m| m.to_lowercase()).collect(),
                protocols: d.protocols.iter().map(|p| p.to_lowercase()).collect(),
                result_types: d.result_types.clone(),
            })
            .collect();
        Self { catalogs }
    }

    /// Checks whether the input is a well-formed absolute http(s) URL.
    pub fn is_url(input: &str) -> bool {
        Url::parse(input)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
            .unwrap_or(false)
    }

    /// Parses a trimmed free-text input into query text and target engine.
    ///
    /// URLs are never modifier-stripped; engine resolution is skipped so the
    /// matching extractor's own `validate()` can claim them by pattern.
    pub fn parse(&self, raw: &str, stored_preference: Option<SearchEngine>) -> ParsedQuery {
        let trimmed = raw.trim();
        let default_fallback = stored_preference.unwrap_or(SearchEngine::Auto);

        if Self::is_url(trimmed) {
            return ParsedQuery {
                query: trimmed.to_string(),
                engine: SearchEngine::Auto,
                fallback_engine: default_fallback,
            };
        }

        let (mut query, mut selected) = self.strip_catalog_modifier(trimmed);
        let mut result_type = match &selected {
            Some(catalog) => {
                let (stripped, rt) = Self::strip_result_type(&query, catalog);
                query = stripped;
                rt
            }
            None => None,
        };

        // "one more time spotify album": the result type trails the catalog
        // modifier, so peel it off and retry the catalog match.
        if selected.is_none() {
            if let Some((without_type, rt)) = Self::peel_result_type(trimmed) {
                let (stripped, retry) = self.strip_catalog_modifier(&without_type);
                if let Some(catalog) = retry {
                    query = stripped;
                    result_type = catalog.result_types.contains(&rt).then_some(rt);
                    selected = Some(catalog);
                }
            }
        }

        // A modifier strip can expose a bare URL ("https://... spotify").
        if Self::is_url(&query) {
            return ParsedQuery {
                query,
                engine: SearchEngine::Auto,
                fallback_engine: default_fallback,
            };
        }

        match selected {
            Some(catalog) => ParsedQuery {
                query,
                engine: SearchEngine::Catalog {
                    id: catalog.id.clone(),
                    result_type,
                },
                fallback_engine: SearchEngine::Auto,
            },
            None => ParsedQuery {
                query,
                engine: SearchEngine::Auto,
                fallback_engine: default_fallback,
            },
        }
    }

    /// Strips a protocol prefix ("spsearch:...") or a trailing catalog
    /// modifier ("... spotify"), returning the remaining query text and the
    /// catalog that claimed it.
    fn strip_catalog_modifier<'a>(&'a self, input: &str) -> (String, Option<&'a CatalogModifiers>) {
        // ASCII lowering keeps byte offsets valid for the slicing below even
        // when the query text itself is non-ASCII; the modifiers and
        // protocols being matched are all ASCII.
        let lowered = input.to_ascii_lowercase();

        for catalog in &self.catalogs {
            for protocol in &catalog.protocols {
                let prefix = format!("{}:", protocol);
                if lowered.starts_with(&prefix) {
                    return (input[prefix.len()..].trim().to_string(), Some(catalog));
                }
            }
        }

        for catalog in &self.catalogs {
            for modifier in &catalog.modifiers {
                let suffix = format!(" {}", modifier);
                if lowered.ends_with(&suffix) {
                    let cut = input.len() - suffix.len();
                    return (input[..cut].trim().to_string(), Some(catalog));
                }
            }
        }

        (input.to_string(), None)
    }

    /// Splits a trailing result-type token off the input, if one is present.
    fn peel_result_type(input: &str) -> Option<(String, ResultType)> {
        let last = input.split_whitespace().next_back()?;
        let result_type = ResultType::from_modifier(&last.to_lowercase())?;
        let cut = input.len() - last.len();
        Some((input[..cut].trim_end().to_string(), result_type))
    }

    /// Strips a trailing result-type modifier. The filter is applied only if
    /// the selected catalog supports that result type; otherwise the query
    /// falls through to the unfiltered engine.
    fn strip_result_type(query: &str, catalog: &CatalogModifiers) -> (String, Option<ResultType>) {
        let Some(last) = query.split_whitespace().next_back() else {
            return (query.to_string(), None);
        };
        let Some(result_type) = ResultType::from_modifier(&last.to_lowercase()) else {
            return (query.to_string(), None);
        };

        let cut = query.len() - last.len();
        let stripped = query[..cut].trim_end().to_string();
        if catalog.result_types.contains(&result_type) {
            (stripped, Some(result_type))
        } else {
            (stripped, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ExtractorDescriptor;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn parser() -> QueryParser {
        let descriptors = vec![
            ExtractorDescriptor {
                id: "youtube".to_string(),
                priority: 10,
                streamable: true,
                query_modifiers: vec!["youtube".to_string(), "yt".to_string()],
                protocols: vec!["ytsearch".to_string()],
                result_types: vec![ResultType::Song, ResultType::Playlist],
                requires_reinit: true,
            },
            ExtractorDescriptor {
                id: "soundcloud".to_string(),
                priority: 20,
                streamable: true,
                query_modifiers: vec!["soundcloud".to_string(), "sc".to_string()],
                protocols: vec!["scsearch".to_string()],
                result_types: vec![ResultType::Song, ResultType::Playlist],
                requires_reinit: false,
            },
            ExtractorDescriptor {
                id: "spotify".to_string(),
                priority: 30,
                streamable: false,
                query_modifiers: vec!["spotify".to_string(), "sp".to_string()],
                protocols: vec!["spsearch".to_string()],
                result_types: vec![ResultType::Song, ResultType::Album, ResultType::Playlist],
                requires_reinit: false,
            },
        ];
        QueryParser::new(&descriptors)
    }

    #[test_case("one more time spotify", "one more time", "spotify")]
    #[test_case("one more time sp", "one more time", "spotify")]
    #[test_case("one more time soundcloud", "one more time", "soundcloud")]
    #[test_case("one more time sc", "one more time", "soundcloud")]
    #[test_case("one more time youtube", "one more time", "youtube")]
    #[test_case("one more time yt", "one more time", "youtube")]
    fn strips_exactly_the_modifier_suffix(raw: &str, query: &str, catalog: &str) {
        let parsed = parser().parse(raw, None);
        assert_eq!(parsed.query, query);
        assert_eq!(parsed.engine.catalog_id(), Some(catalog));
        assert_eq!(parsed.fallback_engine, SearchEngine::Auto);
    }

    #[test]
    fn spotify_scenario_from_free_text() {
        let parsed = parser().parse("daft punk one more time spotify", None);
        assert_eq!(parsed.query, "daft punk one more time");
        assert_eq!(parsed.engine, SearchEngine::catalog("spotify"));
    }

    #[test]
    fn non_ascii_queries_keep_modifier_stripping() {
        let parsed = parser().parse("İstanbul spotify", None);
        assert_eq!(parsed.query, "İstanbul");
        assert_eq!(parsed.engine, SearchEngine::catalog("spotify"));

        let parsed = parser().parse("Mjölnir SPOTIFY", None);
        assert_eq!(parsed.query, "Mjölnir");
        assert_eq!(parsed.engine, SearchEngine::catalog("spotify"));
    }

    #[test]
    fn unmodified_input_selects_auto_with_stored_fallback() {
        let parsed = parser().parse(
            "daft punk one more time",
            Some(SearchEngine::catalog("soundcloud")),
        );
        assert_eq!(parsed.query, "daft punk one more time");
        assert_eq!(parsed.engine, SearchEngine::Auto);
        assert_eq!(parsed.fallback_engine, SearchEngine::catalog("soundcloud"));
    }

    #[test]
    fn urls_are_never_modifier_stripped() {
        let url = "https://open.spotify.com/track/0DiWol3AO6WpXZgp0goxAV";
        let parsed = parser().parse(url, Some(SearchEngine::catalog("youtube")));
        assert_eq!(parsed.query, url);
        assert_eq!(parsed.engine, SearchEngine::Auto);
        assert_eq!(parsed.fallback_engine, SearchEngine::catalog("youtube"));
    }

    #[test]
    fn protocol_prefix_pins_the_catalog() {
        let parsed = parser().parse("spsearch:one more time", None);
        assert_eq!(parsed.query, "one more time");
        assert_eq!(parsed.engine, SearchEngine::catalog("spotify"));
    }

    #[test]
    fn result_type_modifier_narrows_supported_catalog() {
        let parsed = parser().parse("discovery spotify album", None);
        assert_eq!(parsed.query, "discovery");
        assert_eq!(
            parsed.engine,
            SearchEngine::Catalog {
                id: "spotify".to_string(),
                result_type: Some(ResultType::Album),
            }
        );
    }

    #[test]
    fn unsupported_result_type_falls_through_to_unfiltered_engine() {
        // YouTube advertises no album result type.
        let parsed = parser().parse("discovery youtube album", None);
        assert_eq!(parsed.query, "discovery");
        assert_eq!(parsed.engine, SearchEngine::catalog("youtube"));
    }

    #[test]
    fn modifier_without_query_text_is_left_alone() {
        let parsed = parser().parse("spotify", None);
        assert_eq!(parsed.query, "spotify");
        assert_eq!(parsed.engine, SearchEngine::Auto);
    }

    #[test]
    fn non_http_schemes_are_not_urls() {
        assert!(!QueryParser::is_url("spotify:track:abc"));
        assert!(QueryParser::is_url("https://youtu.be/FGBhQbmPwH8"));
        assert!(!QueryParser::is_url("daft punk"));
    }
}
