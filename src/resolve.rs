//! Wires the pipeline together: parser, registry, extractor dispatch,
//! aggregation, and bridging.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ResolveResult;
use crate::autocomplete::{AutocompleteChoice, choices};
use crate::bridge::{BridgeConfig, BridgeResolver};
use crate::extractor::{Extractor, ExtractorResult};
use crate::registry::ExtractorRegistry;
use crate::search::{QueryParser, ResultType, SearchContext, SearchEngine};

/// Entry point used by the chat command collaborator: resolves raw user input
/// into tracks/playlists ready for the playback queue.
pub struct Resolver {
    registry: Arc<ExtractorRegistry>,
    bridge: BridgeResolver,
}

impl Resolver {
    pub fn new(registry: Arc<ExtractorRegistry>) -> Self {
        Self::with_bridge_config(registry, BridgeConfig::default())
    }

    pub fn with_bridge_config(registry: Arc<ExtractorRegistry>, config: BridgeConfig) -> Self {
        let bridge = BridgeResolver::with_config(Arc::clone(&registry), config);
        Self { registry, bridge }
    }

    pub fn registry(&self) -> &Arc<ExtractorRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &BridgeResolver {
        &self.bridge
    }

    /// Resolves a raw query. Transient catalog failures degrade to an empty
    /// result; only programmer errors and bridge exhaustion (from the later
    /// stream request) surface to the caller.
    pub async fn resolve(
        &self,
        raw_query: &str,
        requested_by: Option<String>,
        stored_preference: Option<SearchEngine>,
    ) -> ResolveResult<ExtractorResult> {
        let parser = QueryParser::new(&self.registry.descriptors());
        let parsed = parser.parse(raw_query, stored_preference);
        info!(
            "Resolved '{}' to query '{}' (engine {:?})",
            raw_query, parsed.query, parsed.engine
        );

        let fallback = parsed.fallback_engine.clone();
        let ctx = SearchContext::new(parsed, requested_by);

        let result = self.dispatch(&ctx).await;
        if !result.is_empty() {
            return Ok(result);
        }

        // Empty result: give the caller's stored preference a chance.
        if let Some(fallback_id) = fallback.catalog_id() {
            if ctx.engine.catalog_id() != Some(fallback_id) {
                debug!("Primary engine returned nothing, trying fallback '{}'", fallback_id);
                let fallback_ctx = SearchContext {
                    engine: fallback.clone(),
                    ..ctx.clone()
                };
                return Ok(self.dispatch(&fallback_ctx).await);
            }
        }

        Ok(result)
    }

    /// Autocomplete support: same pipeline, capped and truncated for the
    /// chat platform's choice list.
    pub async fn autocomplete(
        &self,
        raw_query: &str,
        result_type: Option<ResultType>,
    ) -> ResolveResult<Vec<AutocompleteChoice>> {
        let parser = QueryParser::new(&self.registry.descriptors());
        let mut parsed = parser.parse(raw_query, None);

        if let (Some(filter), SearchEngine::Catalog { id, result_type: rt @ None }) =
            (result_type, &mut parsed.engine)
        {
            let supported = self
                .registry
                .get(id)
                .map(|e| e.descriptor().result_types.contains(&filter))
                .unwrap_or(false);
            if supported {
                *rt = Some(filter);
            }
        }

        let ctx = SearchContext::new(parsed, None);
        let result = self.dispatch(&ctx).await;
        Ok(choices(&result.tracks))
    }

    /// Runs the selected extractor, degrading recoverable failures to an
    /// empty result.
    async fn dispatch(&self, ctx: &SearchContext) -> ExtractorResult {
        let Some(extractor) = self.select_extractor(ctx) else {
            debug!("No extractor claimed query '{}'", ctx.query);
            return ExtractorResult::empty();
        };

        match extractor.handle(ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "Extractor '{}' failed for '{}': {}",
                    extractor.descriptor().id,
                    ctx.query,
                    e
                );
                ExtractorResult::empty()
            }
        }
    }

    /// Picks the extractor for a context: the pinned catalog when the engine
    /// names one, otherwise the first (priority order) extractor whose
    /// `validate()` claims the query.
    fn select_extractor(&self, ctx: &SearchContext) -> Option<Arc<dyn Extractor>> {
        match &ctx.engine {
            SearchEngine::Catalog { id, .. } => self.registry.get(id),
            SearchEngine::Auto => self
                .registry
                .list()
                .into_iter()
                .find(|e| e.validate(&ctx.query)),
        }
    }
}
