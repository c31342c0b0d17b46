use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "storefront_cache_hit_total",
            Unit::Count,
            "Total number of key/value cache hits, labelled by backend."
        );
        describe_counter!(
            "storefront_cache_miss_total",
            Unit::Count,
            "Total number of key/value cache misses, including version mismatches."
        );
        describe_counter!(
            "storefront_cache_expired_total",
            Unit::Count,
            "Total number of entries found expired on read."
        );
        describe_counter!(
            "storefront_cache_fallback_total",
            Unit::Count,
            "Total number of writes redirected to the memory backend, labelled by the refusing backend."
        );
        describe_counter!(
            "storefront_image_preload_total",
            Unit::Count,
            "Total number of image preloads, labelled by outcome."
        );
        describe_histogram!(
            "storefront_image_fetch_seconds",
            Unit::Seconds,
            "Image fetch latency in seconds, headers to last body chunk."
        );
        describe_counter!(
            "storefront_invalidation_received_total",
            Unit::Count,
            "Total number of invalidation events received from other sessions."
        );
        describe_counter!(
            "storefront_invalidation_publish_failed_total",
            Unit::Count,
            "Total number of invalidation broadcasts that only reached the local session."
        );
    });
}
