use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use metrics_util::debugging::DebuggingRecorder;
use storefront_cache::cache::{
    BackendKind, BroadcastChannel, CacheConfig, EventStream, FetchError, ImageCache,
    ImageCacheConfig, ImageFetcher, ImageResponse, InvalidationBus, InvalidationConfig,
    InvalidationEvent, KeyValueCache, LocalBroadcastHub, LocalChangeFeed, MemoryStore, Origin,
    PreloadOptions, SessionStore, SetOptions, TransportError,
};
use storefront_cache::infra::telemetry;

struct StaticFetcher;

#[async_trait]
impl ImageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<ImageResponse, FetchError> {
        if url.ends_with("missing.png") {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            });
        }
        let chunks: Vec<Result<Bytes, FetchError>> = vec![Ok(Bytes::from_static(b"png"))];
        Ok(ImageResponse {
            content_length: Some(3),
            content_type: Some("image/png".to_string()),
            body: Box::pin(futures::stream::iter(chunks)),
        })
    }
}

struct RefusingChannel;

#[async_trait]
impl BroadcastChannel for RefusingChannel {
    async fn publish(&self, topic: &str, _event: &InvalidationEvent) -> Result<(), TransportError> {
        Err(TransportError::publish(topic, "refused"))
    }

    async fn subscribe(&self, topic: &str) -> Result<EventStream, TransportError> {
        Err(TransportError::subscribe(topic, "refused"))
    }
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Key/value hit, miss, expiry and quota fallback
    let cache = Arc::new(KeyValueCache::with_backends(
        CacheConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(SessionStore::new(16)),
        Arc::new(SessionStore::new(1024 * 1024)),
    ));
    assert!(cache.get::<u32>("menu_items", Some(BackendKind::Session)).is_none());
    cache.set(
        "menu_items",
        &3,
        SetOptions::default().with_backend(BackendKind::Session),
    );
    assert_eq!(
        cache.get::<u32>("menu_items", Some(BackendKind::Session)),
        Some(3)
    );
    cache.set("carousel_images", &vec!["too large for sixteen bytes"], SetOptions::default());
    cache.set(
        "home_data",
        &1,
        SetOptions::ttl(std::time::Duration::from_millis(5))
            .with_backend(BackendKind::Memory),
    );
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert!(cache.get::<u32>("home_data", Some(BackendKind::Memory)).is_none());

    // Image preload outcomes and fetch latency
    let images = ImageCache::new(
        cache.clone(),
        Arc::new(StaticFetcher),
        ImageCacheConfig::default(),
    );
    images
        .preload_many(
            &["https://cdn.example/a.png", "https://cdn.example/missing.png"],
            PreloadOptions::default(),
        )
        .await;

    // Invalidation receipt and publish failure
    let hub = Arc::new(LocalBroadcastHub::new());
    let feed = Arc::new(LocalChangeFeed::new());
    let receiver = InvalidationBus::start(
        cache.clone(),
        hub.clone(),
        feed.clone(),
        InvalidationConfig::default(),
    )
    .await;
    let sender = InvalidationBus::start(
        Arc::new(KeyValueCache::in_memory(CacheConfig::default())),
        hub,
        feed.clone(),
        InvalidationConfig::default(),
    )
    .await;
    receiver.handle_event(&InvalidationEvent::invalidate(
        sender.id(),
        ["menu_items"],
        Origin::Viewer,
        None,
    ));
    let offline = InvalidationBus::start(
        cache.clone(),
        Arc::new(RefusingChannel),
        feed,
        InvalidationConfig::default(),
    )
    .await;
    offline
        .broadcast_invalidation(["menu_items"], None, Origin::Admin)
        .await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "storefront_cache_hit_total",
        "storefront_cache_miss_total",
        "storefront_cache_expired_total",
        "storefront_cache_fallback_total",
        "storefront_image_preload_total",
        "storefront_image_fetch_seconds",
        "storefront_invalidation_received_total",
        "storefront_invalidation_publish_failed_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
