//! End-to-end bridging scenarios over the registry and bridge resolver,
//! using scripted in-memory extractors.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};

use songbridge::bridge::BridgeQuery;
use songbridge::extractor::{AudioStream, BridgedStream, Extractor, ExtractorResult};
use songbridge::model::Track;
use songbridge::registry::{ExtractorDescriptor, ExtractorRegistry};
use songbridge::search::{ResultType, SearchContext};
use songbridge::{BridgeConfig, BridgeResolver, ResolveError, ResolveResult};

/// What a scripted extractor's `bridge()` should do.
#[derive(Clone, Copy)]
enum BridgeScript {
    Match,
    NoMatch,
    Fail,
}

struct ScriptedStreamable {
    id: String,
    priority: u32,
    requires_reinit: bool,
    script: BridgeScript,
    bridge_calls: Arc<AtomicUsize>,
}

impl ScriptedStreamable {
    fn new(id: &str, priority: u32, script: BridgeScript) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            priority,
            requires_reinit: false,
            script,
            bridge_calls: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Extractor for ScriptedStreamable {
    fn descriptor(&self) -> ExtractorDescriptor {
        ExtractorDescriptor {
            id: self.id.clone(),
            priority: self.priority,
            streamable: true,
            query_modifiers: vec![self.id.clone()],
            protocols: Vec::new(),
            result_types: vec![ResultType::Song],
            requires_reinit: self.requires_reinit,
        }
    }

    fn validate(&self, _query: &str) -> bool {
        true
    }

    async fn handle(&self, _ctx: &SearchContext) -> ResolveResult<ExtractorResult> {
        Ok(ExtractorResult::empty())
    }

    async fn stream(&self, track: &Track) -> ResolveResult<AudioStream> {
        Ok(AudioStream::Url(format!(
            "https://{}.example/stream/{}",
            self.id, track.id
        )))
    }

    async fn bridge(
        &self,
        track: &Track,
        _query: &BridgeQuery,
    ) -> ResolveResult<Option<BridgedStream>> {
        self.bridge_calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            BridgeScript::Match => {
                let mut hit = Track::new(track.title.clone(), track.author.clone(), 320_000);
                hit.id = "match-1".to_string();
                hit.url = format!("https://{}.example/match-1", self.id);
                hit.source = self.id.clone();
                let source = self.stream(&hit).await?;
                Ok(Some(BridgedStream { source, track: hit }))
            }
            BridgeScript::NoMatch => Ok(None),
            BridgeScript::Fail => Err(ResolveError::ExternalApi("scripted failure".to_string())),
        }
    }
}

fn metadata_only_track() -> Track {
    let mut track = Track::new("One More Time", "Daft Punk", 320_000);
    track.source = "spotify".to_string();
    track.id = "0DiWol3AO6WpXZgp0goxAV".to_string();
    track
}

#[fixture]
fn registry() -> Arc<ExtractorRegistry> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Arc::new(ExtractorRegistry::new())
}

#[rstest]
#[tokio::test]
async fn lower_priority_extractor_is_tried_first(registry: Arc<ExtractorRegistry>) {
    let first = ScriptedStreamable::new("first", 10, BridgeScript::Match);
    let second = ScriptedStreamable::new("second", 20, BridgeScript::Match);
    registry.register(first.clone());
    registry.register(second.clone());

    let resolver = BridgeResolver::new(registry);
    let mut track = metadata_only_track();
    let stream = resolver.request_bridge_from(&mut track, None).await.unwrap();

    assert_eq!(stream, AudioStream::Url("https://first.example/stream/match-1".to_string()));
    assert_eq!(first.bridge_calls.load(Ordering::SeqCst), 1);
    // The priority-20 extractor is never consulted once priority 10 matched.
    assert_eq!(second.bridge_calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn successful_bridge_sets_bridge_fields_without_retry(registry: Arc<ExtractorRegistry>) {
    let target = ScriptedStreamable::new("youtube", 10, BridgeScript::Match);
    registry.register(target.clone());

    let resolver = BridgeResolver::new(registry);
    let mut track = metadata_only_track();
    resolver.request_bridge_from(&mut track, None).await.unwrap();

    assert_eq!(track.bridged_extractor.as_deref(), Some("youtube"));
    assert_eq!(track.bridged_track.as_ref().unwrap().id, "match-1");
    assert_eq!(target.bridge_calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn bridge_backfills_unknown_duration(registry: Arc<ExtractorRegistry>) {
    registry.register(ScriptedStreamable::new("youtube", 10, BridgeScript::Match));

    let resolver = BridgeResolver::new(registry);
    let mut track = metadata_only_track();
    track.duration_ms = 0;
    track.duration = "0:00".to_string();

    resolver.request_bridge_from(&mut track, None).await.unwrap();

    assert_eq!(track.duration_ms, 320_000);
    assert_eq!(track.duration, "5:20");
}

#[rstest]
#[tokio::test]
async fn exhausted_bridge_reports_title_and_author(registry: Arc<ExtractorRegistry>) {
    registry.register(ScriptedStreamable::new("youtube", 10, BridgeScript::NoMatch));
    registry.register(ScriptedStreamable::new("soundcloud", 20, BridgeScript::NoMatch));

    let resolver = BridgeResolver::new(registry);
    let mut track = metadata_only_track();
    let err = resolver
        .request_bridge_from(&mut track, None)
        .await
        .unwrap_err();

    assert_matches!(err, ResolveError::NoStreamFound { .. });
    assert_eq!(
        err.to_string(),
        "No stream found for One More Time by Daft Punk"
    );
    assert!(track.bridged_extractor.is_none());
}

#[rstest]
#[tokio::test]
async fn source_extractor_is_excluded_from_bridging(registry: Arc<ExtractorRegistry>) {
    let same_catalog = ScriptedStreamable::new("spotify", 10, BridgeScript::Match);
    registry.register(same_catalog.clone());

    let resolver = BridgeResolver::new(registry);
    let mut track = metadata_only_track();
    let err = resolver
        .request_bridge_from(&mut track, None)
        .await
        .unwrap_err();

    assert_matches!(err, ResolveError::NoStreamFound { .. });
    assert_eq!(same_catalog.bridge_calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn pinned_target_bypasses_priority_order(registry: Arc<ExtractorRegistry>) {
    let first = ScriptedStreamable::new("first", 10, BridgeScript::Match);
    let second = ScriptedStreamable::new("second", 20, BridgeScript::Match);
    registry.register(first.clone());
    registry.register(second.clone());

    let resolver = BridgeResolver::new(registry);
    let mut track = metadata_only_track();
    resolver
        .request_bridge_from(&mut track, Some("second"))
        .await
        .unwrap();

    assert_eq!(track.bridged_extractor.as_deref(), Some("second"));
    assert_eq!(first.bridge_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_session_bound_extractor_triggers_one_reinitialization() {
    let registry = Arc::new(ExtractorRegistry::new());
    let builds = Arc::new(AtomicUsize::new(0));

    // First build fails to match; the rebuilt instance succeeds.
    let builds_in_factory = Arc::clone(&builds);
    registry.register_with_factory(Arc::new(move || {
        let build = builds_in_factory.fetch_add(1, Ordering::SeqCst);
        let script = if build == 0 {
            BridgeScript::Fail
        } else {
            BridgeScript::Match
        };
        let extractor = Arc::new(ScriptedStreamable {
            id: "session-bound".to_string(),
            priority: 10,
            requires_reinit: true,
            script,
            bridge_calls: Arc::new(AtomicUsize::new(0)),
        });
        Ok(extractor as Arc<dyn Extractor>)
    }));

    let resolver = BridgeResolver::new(Arc::clone(&registry));
    let mut track = metadata_only_track();
    let stream = resolver.request_bridge_from(&mut track, None).await.unwrap();

    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(track.bridged_extractor.as_deref(), Some("session-bound"));
    assert_matches!(stream, AudioStream::Url(_));
}

#[tokio::test]
async fn reinit_is_bounded_to_a_single_retry() {
    let registry = Arc::new(ExtractorRegistry::new());
    let builds = Arc::new(AtomicUsize::new(0));

    let builds_in_factory = Arc::clone(&builds);
    registry.register_with_factory(Arc::new(move || {
        builds_in_factory.fetch_add(1, Ordering::SeqCst);
        let extractor = Arc::new(ScriptedStreamable {
            id: "session-bound".to_string(),
            priority: 10,
            requires_reinit: true,
            script: BridgeScript::NoMatch,
            bridge_calls: Arc::new(AtomicUsize::new(0)),
        });
        Ok(extractor as Arc<dyn Extractor>)
    }));

    let resolver = BridgeResolver::new(Arc::clone(&registry));
    let mut track = metadata_only_track();
    let err = resolver
        .request_bridge_from(&mut track, None)
        .await
        .unwrap_err();

    assert_matches!(err, ResolveError::NoStreamFound { .. });
    // One initial registration plus exactly one reinitialization.
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

/// Streamable extractor that records the match parameters it is handed.
struct RecordingStreamable {
    queries: std::sync::Mutex<Vec<BridgeQuery>>,
}

#[async_trait]
impl Extractor for RecordingStreamable {
    fn descriptor(&self) -> ExtractorDescriptor {
        ExtractorDescriptor {
            id: "recording".to_string(),
            priority: 10,
            streamable: true,
            query_modifiers: vec!["recording".to_string()],
            protocols: Vec::new(),
            result_types: vec![ResultType::Song],
            requires_reinit: false,
        }
    }

    fn validate(&self, _query: &str) -> bool {
        true
    }

    async fn handle(&self, _ctx: &SearchContext) -> ResolveResult<ExtractorResult> {
        Ok(ExtractorResult::empty())
    }

    async fn bridge(
        &self,
        _track: &Track,
        query: &BridgeQuery,
    ) -> ResolveResult<Option<BridgedStream>> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(None)
    }
}

#[rstest]
#[tokio::test]
async fn configured_duration_tolerance_reaches_the_extractor(registry: Arc<ExtractorRegistry>) {
    let recorder = Arc::new(RecordingStreamable {
        queries: std::sync::Mutex::new(Vec::new()),
    });
    registry.register(recorder.clone());

    let resolver = BridgeResolver::with_config(
        registry,
        BridgeConfig {
            duration_tolerance_ms: 10_000,
            reinit_retries: 0,
        },
    );
    let mut track = metadata_only_track();
    let _ = resolver.request_bridge_from(&mut track, None).await;

    let seen = recorder.queries.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].duration_window_ms, Some((310_000, 330_000)));
}

#[rstest]
#[tokio::test]
async fn pre_bridge_hook_is_reused_by_the_stream_request(registry: Arc<ExtractorRegistry>) {
    let target = ScriptedStreamable::new("youtube", 10, BridgeScript::Match);
    registry.register(target.clone());

    let resolver = BridgeResolver::new(registry);
    let mut track = metadata_only_track();

    resolver.on_before_create_stream(&mut track).await;
    assert!(track.is_bridged());

    let stream = resolver.request_stream(&mut track).await.unwrap();
    assert_eq!(
        stream,
        AudioStream::Url("https://youtube.example/stream/match-1".to_string())
    );
    // The stream request reuses the pre-bridged result instead of searching
    // again.
    assert_eq!(target.bridge_calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn streamable_source_streams_directly_without_bridging(registry: Arc<ExtractorRegistry>) {
    let own_catalog = ScriptedStreamable::new("soundcloud", 20, BridgeScript::NoMatch);
    registry.register(own_catalog.clone());

    let resolver = BridgeResolver::new(registry);
    let mut track = Track::new("Native Track", "Someone", 180_000);
    track.source = "soundcloud".to_string();
    track.id = "42".to_string();

    let stream = resolver.request_stream(&mut track).await.unwrap();
    assert_eq!(
        stream,
        AudioStream::Url("https://soundcloud.example/stream/42".to_string())
    );
    assert_eq!(own_catalog.bridge_calls.load(Ordering::SeqCst), 0);
}
