//! Admin-side invalidation helpers.
//!
//! Admin write paths announce their writes here; the invalidator maps the
//! written resource to cache keys and broadcasts them with [`Origin::Admin`].

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::bus::{BroadcastOutcome, InvalidationBus};
use super::events::Origin;
use super::keys;

/// Announces admin writes to every session.
///
/// # Usage
///
/// ```ignore
/// // After a successful menu update:
/// invalidator.menu_items_changed(Some(json!({"id": item.id}))).await;
/// ```
pub struct AdminInvalidator {
    bus: Arc<InvalidationBus>,
}

impl AdminInvalidator {
    pub fn new(bus: Arc<InvalidationBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<InvalidationBus> {
        &self.bus
    }

    /// Invalidate the cache keys fed by `resource`.
    ///
    /// Returns `None` for a resource with no mapped keys.
    pub async fn invalidate_resource(
        &self,
        resource: &str,
        payload: Option<Value>,
    ) -> Option<BroadcastOutcome> {
        let keys = self.bus.config().keys_for_resource(resource).to_vec();
        if keys.is_empty() {
            warn!(resource, "No cache keys mapped to resource, skipping invalidation");
            return None;
        }

        debug!(resource, keys = ?keys, "Invalidating resource");
        Some(
            self.bus
                .broadcast_invalidation(keys, payload, Origin::Admin)
                .await,
        )
    }

    pub async fn menu_items_changed(&self, payload: Option<Value>) -> Option<BroadcastOutcome> {
        self.invalidate_resource(keys::MENU_ITEMS, payload).await
    }

    pub async fn header_settings_changed(
        &self,
        payload: Option<Value>,
    ) -> Option<BroadcastOutcome> {
        self.invalidate_resource(keys::HEADER_SETTINGS, payload)
            .await
    }

    pub async fn carousel_images_changed(
        &self,
        payload: Option<Value>,
    ) -> Option<BroadcastOutcome> {
        self.invalidate_resource(keys::CAROUSEL_IMAGES, payload)
            .await
    }

    pub async fn help_settings_changed(&self, payload: Option<Value>) -> Option<BroadcastOutcome> {
        self.invalidate_resource(keys::HELP_SETTINGS, payload).await
    }

    pub async fn help_items_changed(&self, payload: Option<Value>) -> Option<BroadcastOutcome> {
        self.invalidate_resource(keys::HELP_ITEMS, payload).await
    }

    /// Run a write, then invalidate `resource` if it succeeded.
    ///
    /// Errors are returned untouched and nothing is invalidated.
    pub async fn with_cache_invalidation<T, E, F, Fut>(&self, resource: &str, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = op().await?;
        self.invalidate_resource(resource, None).await;
        Ok(value)
    }
}
