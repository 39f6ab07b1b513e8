//! Ordered, priority-ranked collection of the active extractors. The single
//! source of truth the rest of the pipeline queries.

use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::ResolveResult;
use crate::extractor::Extractor;
use crate::search::ResultType;

/// Identity and capabilities an extractor advertises at registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorDescriptor {
    pub id: String,
    /// Lower values are tried first for bridging and catalog auto-selection.
    pub priority: u32,
    /// Whether this extractor can produce an audio stream itself.
    pub streamable: bool,
    /// Trailing-phrase modifiers recognized in user input ("spotify", "sp").
    pub query_modifiers: Vec<String>,
    /// Scheme-style prefixes recognized in user input ("spsearch").
    pub protocols: Vec<String>,
    /// Result types this catalog's search can be narrowed to.
    pub result_types: Vec<ResultType>,
    /// Session-bound catalogs that the bridge resolver may force through a
    /// full re-initialization before its one retry.
    pub requires_reinit: bool,
}

/// Factory used to rebuild an extractor from scratch on re-initialization.
pub type ExtractorFactory = Arc<dyn Fn() -> ResolveResult<Arc<dyn Extractor>> + Send + Sync>;

struct Registration {
    descriptor: ExtractorDescriptor,
    extractor: Arc<dyn Extractor>,
}

/// Process-wide extractor registry.
///
/// Registration is an infrequent administrative operation; all queries are
/// read operations safe to call while other guilds are concurrently
/// streaming.
#[derive(Default)]
pub struct ExtractorRegistry {
    entries: RwLock<Vec<Registration>>,
    factories: RwLock<Vec<ExtractorFactory>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an extractor under its identifier, replacing any prior
    /// registration with the same id.
    pub fn register(&self, extractor: Arc<dyn Extractor>) {
        let descriptor = extractor.descriptor();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.retain(|r| r.descriptor.id != descriptor.id);
        info!(
            "Registered extractor '{}' (priority {}, streamable: {})",
            descriptor.id, descriptor.priority, descriptor.streamable
        );
        entries.push(Registration {
            descriptor,
            extractor,
        });
    }

    /// Builds an extractor via `factory` and registers it, remembering the
    /// factory so `reinitialize` can rebuild it from scratch. A factory that
    /// fails (missing credentials) is logged and skipped, not fatal.
    pub fn register_with_factory(&self, factory: ExtractorFactory) {
        match factory() {
            Ok(extractor) => self.register(extractor),
            Err(e) => warn!("Skipping extractor registration: {}", e),
        }
        self.factories
            .write()
            .expect("registry lock poisoned")
            .push(factory);
    }

    /// Removes an extractor. Does nothing if the id is not registered.
    pub fn unregister(&self, id: &str) {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        let before = entries.len();
        entries.retain(|r| r.descriptor.id != id);
        if entries.len() < before {
            info!("Unregistered extractor '{}'", id);
        }
    }

    /// Returns the active extractor registered under `id`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Extractor>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .find(|r| r.descriptor.id == id)
            .map(|r| Arc::clone(&r.extractor))
    }

    /// All extractors ordered by priority ascending, registration order
    /// breaking ties.
    pub fn list(&self) -> Vec<Arc<dyn Extractor>> {
        let mut pairs: Vec<(u32, usize, Arc<dyn Extractor>)> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .enumerate()
            .map(|(i, r)| (r.descriptor.priority, i, Arc::clone(&r.extractor)))
            .collect();
        pairs.sort_by_key(|(priority, order, _)| (*priority, *order));
        pairs.into_iter().map(|(_, _, e)| e).collect()
    }

    /// Streamable extractors only, same ordering as `list`.
    pub fn streamables(&self) -> Vec<Arc<dyn Extractor>> {
        self.list()
            .into_iter()
            .filter(|e| e.descriptor().streamable)
            .collect()
    }

    /// Descriptors of every registered extractor, priority order.
    pub fn descriptors(&self) -> Vec<ExtractorDescriptor> {
        self.list().iter().map(|e| e.descriptor()).collect()
    }

    /// Unregisters everything and re-registers every factory-built extractor
    /// from scratch. Used by the bridge resolver for session-bound catalogs.
    pub fn reinitialize(&self) {
        info!("Reinitializing all registered extractors");
        self.entries.write().expect("registry lock poisoned").clear();
        let factories: Vec<ExtractorFactory> = self
            .factories
            .read()
            .expect("registry lock poisoned")
            .clone();
        for factory in factories {
            match factory() {
                Ok(extractor) => self.register(extractor),
                Err(e) => warn!("Skipping extractor during reinitialization: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResolveResult;
    use crate::extractor::ExtractorResult;
    use crate::search::SearchContext;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FakeExtractor {
        descriptor: ExtractorDescriptor,
    }

    impl FakeExtractor {
        fn new(id: &str, priority: u32, streamable: bool) -> Arc<Self> {
            Arc::new(Self {
                descriptor: ExtractorDescriptor {
                    id: id.to_string(),
                    priority,
                    streamable,
                    query_modifiers: vec![id.to_string()],
                    protocols: Vec::new(),
                    result_types: vec![ResultType::Song],
                    requires_reinit: false,
                },
            })
        }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        fn descriptor(&self) -> ExtractorDescriptor {
            self.descriptor.clone()
        }

        fn validate(&self, _query: &str) -> bool {
            true
        }

        async fn handle(&self, _ctx: &SearchContext) -> ResolveResult<ExtractorResult> {
            Ok(ExtractorResult::empty())
        }
    }

    #[test]
    fn list_orders_by_priority_ascending() {
        let registry = ExtractorRegistry::new();
        registry.register(FakeExtractor::new("b", 20, true));
        registry.register(FakeExtractor::new("a", 10, true));
        registry.register(FakeExtractor::new("c", 30, false));

        let ids: Vec<String> = registry.list().iter().map(|e| e.descriptor().id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn ties_break_by_registration_order() {
        let registry = ExtractorRegistry::new();
        registry.register(FakeExtractor::new("first", 10, true));
        registry.register(FakeExtractor::new("second", 10, true));

        let ids: Vec<String> = registry.list().iter().map(|e| e.descriptor().id).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn streamables_filters_metadata_only_extractors() {
        let registry = ExtractorRegistry::new();
        registry.register(FakeExtractor::new("meta", 5, false));
        registry.register(FakeExtractor::new("audio", 10, true));

        let ids: Vec<String> = registry
            .streamables()
            .iter()
            .map(|e| e.descriptor().id)
            .collect();
        assert_eq!(ids, vec!["audio"]);
    }

    #[test]
    fn register_replaces_prior_registration_with_same_id() {
        let registry = ExtractorRegistry::new();
        registry.register(FakeExtractor::new("x", 10, false));
        registry.register(FakeExtractor::new("x", 99, true));

        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].priority, 99);
        assert!(descriptors[0].streamable);
    }

    #[test]
    fn unregister_twice_does_not_panic() {
        let registry = ExtractorRegistry::new();
        registry.register(FakeExtractor::new("x", 10, true));
        registry.unregister("x");
        registry.unregister("x");
        assert!(registry.get("x").is_none());
    }

    #[test]
    fn reinitialize_rebuilds_factory_extractors() {
        let registry = ExtractorRegistry::new();
        registry.register_with_factory(Arc::new(|| {
            Ok(FakeExtractor::new("rebuilt", 10, true) as Arc<dyn Extractor>)
        }));
        registry.register(FakeExtractor::new("manual", 20, true));

        registry.reinitialize();

        assert!(registry.get("rebuilt").is_some());
        // Manually registered extractors have no factory and are dropped.
        assert!(registry.get("manual").is_none());
    }
}
