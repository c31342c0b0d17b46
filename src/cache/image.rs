//! Image preloading on top of the key/value cache.
//!
//! Images are fetched once per URL, size-checked while streaming, and kept in the
//! memory backend so a renderer can turn them into `data:` URLs without awaiting.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use futures::stream::{BoxStream, Stream, StreamExt};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::BackendKind;
use super::config::ImageCacheConfig;
use super::error::{FetchError, ImageCacheError};
use super::keys::{IMAGE_BLOB_PREFIX, image_blob_key};
use super::store::{KeyValueCache, SetOptions};

const METRIC_PRELOAD: &str = "storefront_image_preload_total";
const METRIC_FETCH_SECONDS: &str = "storefront_image_fetch_seconds";
const FALLBACK_MIME: &str = "application/octet-stream";

// ============================================================================
// Fetching
// ============================================================================

/// Response headers and streamed body of an image fetch.
pub struct ImageResponse {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub body: BoxStream<'static, Result<Bytes, FetchError>>,
}

/// Source of image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ImageResponse, FetchError>;
}

/// [`ImageFetcher`] over HTTP(S).
#[derive(Clone, Default)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<ImageResponse, FetchError> {
        let parsed = url::Url::parse(url).map_err(|err| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|err| FetchError::Network {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(ImageResponse {
            content_length: response.content_length(),
            content_type,
            body: Box::pin(response_body(url.to_string(), response)),
        })
    }
}

fn response_body(
    url: String,
    mut response: reqwest::Response,
) -> impl Stream<Item = Result<Bytes, FetchError>> + Send + 'static {
    async_stream::try_stream! {
        while let Some(chunk) = response.chunk().await.map_err(|err| FetchError::Body {
            url: url.clone(),
            reason: err.to_string(),
        })? {
            yield chunk;
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// How a cached image is held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEncoding {
    /// Raw bytes; a `data:` URL is built on every lookup.
    #[default]
    Binary,
    /// A ready-made `data:` URL string.
    DataUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImagePayload {
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
    Text(String),
}

/// Cached image payload and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCacheRecord {
    pub payload: ImagePayload,
    pub encoding: ImageEncoding,
    pub byte_size: u64,
    pub mime_type: String,
    pub source_url: String,
}

impl ImageCacheRecord {
    fn new(url: &str, body: Vec<u8>, mime_type: String, encoding: ImageEncoding) -> Self {
        let byte_size = body.len() as u64;
        let payload = match encoding {
            ImageEncoding::Binary => ImagePayload::Binary(body),
            ImageEncoding::DataUrl => ImagePayload::Text(data_url(&mime_type, &body)),
        };
        Self {
            payload,
            encoding,
            byte_size,
            mime_type,
            source_url: url.to_string(),
        }
    }

    /// Renderable `data:` URL for this image.
    pub fn to_data_url(&self) -> String {
        match &self.payload {
            ImagePayload::Binary(bytes) => data_url(&self.mime_type, bytes),
            ImagePayload::Text(url) => url.clone(),
        }
    }
}

fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(D::Error::custom)
    }
}

fn mime_for(url: &str, content_type: Option<&str>) -> String {
    let declared = content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(declared) = declared {
        return declared.to_string();
    }

    let path = url::Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

// ============================================================================
// Preloading
// ============================================================================

/// Scheduling of a batch preload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadPriority {
    /// Every image at once.
    High,
    /// Fixed-size chunks, one chunk at a time.
    #[default]
    Medium,
    /// One image at a time with a pause between them.
    Low,
}

#[derive(Debug, Clone, Default)]
pub struct PreloadOptions {
    pub priority: PreloadPriority,
    pub encoding: ImageEncoding,
    /// Per-image cap; the configured `max_item_bytes` when unset.
    pub max_bytes: Option<u64>,
}

impl PreloadOptions {
    pub fn with_priority(mut self, priority: PreloadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_encoding(mut self, encoding: ImageEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadStatus {
    AlreadyCached,
    Cached { byte_size: u64 },
    /// Discarded: the image is larger than `limit` bytes.
    Oversize { limit: u64, observed: u64 },
}

impl PreloadStatus {
    fn outcome(&self) -> &'static str {
        match self {
            Self::AlreadyCached => "already_cached",
            Self::Cached { .. } => "cached",
            Self::Oversize { .. } => "oversize",
        }
    }
}

/// Tally of a `preload_many` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub cached: usize,
    /// Already cached or oversize.
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, url: &str, result: Result<PreloadStatus, ImageCacheError>) {
        match result {
            Ok(PreloadStatus::Cached { .. }) => self.cached += 1,
            Ok(PreloadStatus::AlreadyCached | PreloadStatus::Oversize { .. }) => self.skipped += 1,
            Err(error) => {
                warn!(url, error = %error, "Image preload failed");
                self.failed += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCacheStats {
    pub cached_images: usize,
    pub cached_bytes: u64,
    pub in_flight: usize,
}

type PreloadFuture = Shared<BoxFuture<'static, Result<PreloadStatus, ImageCacheError>>>;

/// Removes the in-flight entry once the fetch settles or is abandoned.
struct InFlightGuard {
    key: String,
    in_flight: Arc<DashMap<String, PreloadFuture>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Preloads and memoizes image payloads.
pub struct ImageCache {
    cache: Arc<KeyValueCache>,
    fetcher: Arc<dyn ImageFetcher>,
    config: ImageCacheConfig,
    in_flight: Arc<DashMap<String, PreloadFuture>>,
}

impl ImageCache {
    pub fn new(
        cache: Arc<KeyValueCache>,
        fetcher: Arc<dyn ImageFetcher>,
        config: ImageCacheConfig,
    ) -> Self {
        Self {
            cache,
            fetcher,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Fetch `url` and cache it, sharing the fetch with concurrent callers.
    pub async fn preload(
        &self,
        url: &str,
        options: PreloadOptions,
    ) -> Result<PreloadStatus, ImageCacheError> {
        let key = image_blob_key(url);

        if self.cache.has(&key, Some(BackendKind::Memory)) {
            counter!(METRIC_PRELOAD, "outcome" => "already_cached").increment(1);
            return Ok(PreloadStatus::AlreadyCached);
        }

        let pending = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                debug!(url, "Joining in-flight image preload");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let guard = InFlightGuard {
                    key: key.clone(),
                    in_flight: Arc::clone(&self.in_flight),
                };
                let cache = Arc::clone(&self.cache);
                let fetcher = Arc::clone(&self.fetcher);
                let ttl = self.config.ttl();
                let limit = options.max_bytes.unwrap_or(self.config.max_item_bytes);
                let encoding = options.encoding;
                let url = url.to_string();

                let future = async move {
                    let _guard = guard;
                    let result =
                        fetch_and_store(&cache, fetcher.as_ref(), &url, &key, limit, encoding, ttl)
                            .await;
                    let outcome = match &result {
                        Ok(status) => status.outcome(),
                        Err(_) => "failed",
                    };
                    counter!(METRIC_PRELOAD, "outcome" => outcome).increment(1);
                    result
                }
                .boxed()
                .shared();

                vacant.insert(future.clone());
                future
            }
        };

        pending.await
    }

    /// Preload `urls` according to `options.priority`. Individual failures are
    /// logged and counted, never propagated.
    pub async fn preload_many<S: AsRef<str>>(
        &self,
        urls: &[S],
        options: PreloadOptions,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        if urls.is_empty() {
            return report;
        }

        match options.priority {
            PreloadPriority::High => {
                let results = join_all(
                    urls.iter()
                        .map(|url| self.preload(url.as_ref(), options.clone())),
                )
                .await;
                for (url, result) in urls.iter().zip(results) {
                    report.record(url.as_ref(), result);
                }
            }
            PreloadPriority::Medium => {
                for chunk in urls.chunks(self.config.medium_batch_size_non_zero()) {
                    let results = join_all(
                        chunk
                            .iter()
                            .map(|url| self.preload(url.as_ref(), options.clone())),
                    )
                    .await;
                    for (url, result) in chunk.iter().zip(results) {
                        report.record(url.as_ref(), result);
                    }
                }
            }
            PreloadPriority::Low => {
                for (index, url) in urls.iter().enumerate() {
                    if index > 0 {
                        tokio::time::sleep(self.config.low_priority_delay()).await;
                    }
                    let result = self.preload(url.as_ref(), options.clone()).await;
                    report.record(url.as_ref(), result);
                }
            }
        }

        debug!(
            priority = ?options.priority,
            cached = report.cached,
            skipped = report.skipped,
            failed = report.failed,
            "Image batch preloaded"
        );
        report
    }

    /// Renderable `data:` URL of a cached image. Never fetches.
    pub fn get_cached_url(&self, url: &str) -> Option<String> {
        self.get_cached_image(url)
            .map(|record| record.to_data_url())
    }

    pub fn get_cached_image(&self, url: &str) -> Option<ImageCacheRecord> {
        self.cache
            .get(&image_blob_key(url), Some(BackendKind::Memory))
    }

    /// Drop every cached image from the memory backend. Returns the number removed.
    pub fn clear(&self) -> usize {
        let keys = self.image_keys();
        for key in &keys {
            self.cache.delete(key, Some(BackendKind::Memory));
        }
        keys.len()
    }

    pub fn stats(&self) -> ImageCacheStats {
        let mut stats = ImageCacheStats {
            in_flight: self.in_flight.len(),
            ..Default::default()
        };
        for key in self.image_keys() {
            if let Some(record) = self
                .cache
                .get::<ImageCacheRecord>(&key, Some(BackendKind::Memory))
            {
                stats.cached_images += 1;
                stats.cached_bytes += record.byte_size;
            }
        }
        stats
    }

    fn image_keys(&self) -> Vec<String> {
        self.cache
            .keys(BackendKind::Memory)
            .into_iter()
            .filter(|key| key.starts_with(IMAGE_BLOB_PREFIX))
            .collect()
    }
}

async fn fetch_and_store(
    cache: &KeyValueCache,
    fetcher: &dyn ImageFetcher,
    url: &str,
    key: &str,
    limit: u64,
    encoding: ImageEncoding,
    ttl: std::time::Duration,
) -> Result<PreloadStatus, ImageCacheError> {
    let started = Instant::now();
    let response = fetcher.fetch(url).await?;

    if let Some(declared) = response.content_length
        && declared > limit
    {
        warn!(url, limit, declared, "Image exceeds size cap, skipping");
        return Ok(PreloadStatus::Oversize {
            limit,
            observed: declared,
        });
    }

    let mut body = Vec::new();
    let mut stream = response.body;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let observed = (body.len() + chunk.len()) as u64;
        if observed > limit {
            warn!(url, limit, observed, "Image body exceeded size cap, aborting");
            return Ok(PreloadStatus::Oversize { limit, observed });
        }
        body.extend_from_slice(&chunk);
    }
    histogram!(METRIC_FETCH_SECONDS).record(started.elapsed().as_secs_f64());

    let mime_type = mime_for(url, response.content_type.as_deref());
    let record = ImageCacheRecord::new(url, body, mime_type, encoding);
    let byte_size = record.byte_size;

    cache
        .try_set(
            key,
            &record,
            SetOptions::ttl(ttl).with_backend(BackendKind::Memory),
        )
        .map_err(|err| ImageCacheError::Store {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

    debug!(url, byte_size, "Image cached");
    Ok(PreloadStatus::Cached { byte_size })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::stream;

    use super::*;
    use crate::cache::config::CacheConfig;

    #[derive(Clone)]
    struct FakeImage {
        chunks: Vec<&'static [u8]>,
        content_length: Option<u64>,
        content_type: Option<&'static str>,
    }

    impl FakeImage {
        fn png(bytes: &'static [u8]) -> Self {
            Self {
                chunks: vec![bytes],
                content_length: Some(bytes.len() as u64),
                content_type: Some("image/png"),
            }
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        images: HashMap<String, FakeImage>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeFetcher {
        fn with(mut self, url: &str, image: FakeImage) -> Self {
            self.images.insert(url.to_string(), image);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<ImageResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let image = self.images.get(url).cloned().ok_or(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })?;
            let chunks: Vec<Result<Bytes, FetchError>> = image
                .chunks
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk)))
                .collect();
            Ok(ImageResponse {
                content_length: image.content_length,
                content_type: image.content_type.map(str::to_string),
                body: Box::pin(stream::iter(chunks)),
            })
        }
    }

    const A: &str = "https://cdn.example/a.png";
    const B: &str = "https://cdn.example/b.png";

    fn image_cache(fetcher: Arc<FakeFetcher>, config: ImageCacheConfig) -> ImageCache {
        let cache = Arc::new(KeyValueCache::in_memory(CacheConfig::default()));
        ImageCache::new(cache, fetcher, config)
    }

    #[tokio::test]
    async fn preload_then_render_from_cache() {
        let fetcher = Arc::new(FakeFetcher::default().with(A, FakeImage::png(b"png-bytes")));
        let images = image_cache(fetcher.clone(), ImageCacheConfig::default());

        assert_eq!(images.get_cached_url(A), None);

        let status = images
            .preload(A, PreloadOptions::default())
            .await
            .expect("preload");
        assert_eq!(status, PreloadStatus::Cached { byte_size: 9 });

        assert_eq!(
            images.get_cached_url(A),
            Some(format!("data:image/png;base64,{}", BASE64.encode(b"png-bytes")))
        );
        let record = images.get_cached_image(A).expect("record");
        assert_eq!(record.source_url, A);
        assert_eq!(record.payload, ImagePayload::Binary(b"png-bytes".to_vec()));

        let again = images
            .preload(A, PreloadOptions::default())
            .await
            .expect("preload");
        assert_eq!(again, PreloadStatus::AlreadyCached);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_preloads_share_one_fetch() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Some(Duration::from_millis(20)),
            ..FakeFetcher::default().with(A, FakeImage::png(b"abc"))
        });
        let images = image_cache(fetcher.clone(), ImageCacheConfig::default());

        let (first, second) = tokio::join!(
            images.preload(A, PreloadOptions::default()),
            images.preload(A, PreloadOptions::default()),
        );

        assert_eq!(first, Ok(PreloadStatus::Cached { byte_size: 3 }));
        assert_eq!(second, Ok(PreloadStatus::Cached { byte_size: 3 }));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(images.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn declared_oversize_is_skipped() {
        let fetcher = Arc::new(FakeFetcher::default().with(A, FakeImage::png(b"0123456789")));
        let images = image_cache(fetcher, ImageCacheConfig::default());

        let status = images
            .preload(A, PreloadOptions::default().with_max_bytes(4))
            .await
            .expect("preload");

        assert_eq!(
            status,
            PreloadStatus::Oversize {
                limit: 4,
                observed: 10
            }
        );
        assert_eq!(images.get_cached_url(A), None);
    }

    #[tokio::test]
    async fn streamed_oversize_aborts_without_caching() {
        let image = FakeImage {
            chunks: vec![b"0123", b"4567", b"89"],
            content_length: None,
            content_type: None,
        };
        let fetcher = Arc::new(FakeFetcher::default().with(A, image));
        let images = image_cache(
            fetcher,
            ImageCacheConfig {
                max_item_bytes: 6,
                ..Default::default()
            },
        );

        let status = images
            .preload(A, PreloadOptions::default())
            .await
            .expect("preload");

        assert_eq!(
            status,
            PreloadStatus::Oversize {
                limit: 6,
                observed: 8
            }
        );
        assert_eq!(images.stats(), ImageCacheStats::default());
    }

    #[tokio::test]
    async fn fetch_failure_is_surfaced() {
        let images = image_cache(Arc::new(FakeFetcher::default()), ImageCacheConfig::default());

        let err = images
            .preload(B, PreloadOptions::default())
            .await
            .expect_err("missing image");

        assert_eq!(
            err,
            ImageCacheError::Fetch(FetchError::Status {
                url: B.to_string(),
                status: 404
            })
        );
    }

    #[tokio::test]
    async fn data_url_encoding_stores_text_payload() {
        let image = FakeImage {
            content_type: None,
            ..FakeImage::png(b"gif")
        };
        let url = "https://cdn.example/logo.gif";
        let fetcher = Arc::new(FakeFetcher::default().with(url, image));
        let images = image_cache(fetcher, ImageCacheConfig::default());

        images
            .preload(
                url,
                PreloadOptions::default().with_encoding(ImageEncoding::DataUrl),
            )
            .await
            .expect("preload");

        let record = images.get_cached_image(url).expect("record");
        let expected = format!("data:image/gif;base64,{}", BASE64.encode(b"gif"));
        assert_eq!(record.payload, ImagePayload::Text(expected.clone()));
        assert_eq!(images.get_cached_url(url), Some(expected));
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with(A, FakeImage::png(b"a"))
                .with(B, FakeImage::png(b"b")),
        );
        let images = image_cache(
            fetcher,
            ImageCacheConfig {
                low_priority_delay_ms: 1,
                ..Default::default()
            },
        );
        let urls = [A, "https://cdn.example/missing.png", B, A];

        for priority in [
            PreloadPriority::High,
            PreloadPriority::Medium,
            PreloadPriority::Low,
        ] {
            images.clear();
            let report = images
                .preload_many(&urls, PreloadOptions::default().with_priority(priority))
                .await;

            assert_eq!(report.failed, 1, "{priority:?}");
            assert_eq!(report.cached + report.skipped, 3, "{priority:?}");
            assert!(images.get_cached_url(A).is_some());
            assert!(images.get_cached_url(B).is_some());
        }
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let fetcher = Arc::new(FakeFetcher::default());
        let images = image_cache(fetcher.clone(), ImageCacheConfig::default());

        let report = images
            .preload_many::<&str>(&[], PreloadOptions::default())
            .await;

        assert_eq!(report, BatchReport::default());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn clear_drops_only_images() {
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with(A, FakeImage::png(b"aa"))
                .with(B, FakeImage::png(b"bbb")),
        );
        let cache = Arc::new(KeyValueCache::in_memory(CacheConfig::default()));
        let images = ImageCache::new(cache.clone(), fetcher, ImageCacheConfig::default());
        cache.set(
            "menu_items",
            &vec!["home"],
            SetOptions::default().with_backend(BackendKind::Memory),
        );

        images
            .preload_many(&[A, B], PreloadOptions::default())
            .await;
        assert_eq!(
            images.stats(),
            ImageCacheStats {
                cached_images: 2,
                cached_bytes: 5,
                in_flight: 0,
            }
        );

        assert_eq!(images.clear(), 2);
        assert_eq!(images.stats().cached_images, 0);
        assert!(cache.has("menu_items", Some(BackendKind::Memory)));
    }

    #[test]
    fn mime_prefers_declared_type() {
        assert_eq!(
            mime_for(A, Some("image/webp; charset=binary")),
            "image/webp"
        );
        assert_eq!(mime_for("https://cdn.example/x.jpg?v=2", None), "image/jpeg");
        assert_eq!(mime_for("https://cdn.example/blob", None), FALLBACK_MIME);
    }
}
