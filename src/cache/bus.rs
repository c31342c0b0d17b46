//! Invalidation bus.
//!
//! Keeps every session's cache consistent with admin writes. A bus:
//!
//! 1. Listens on the broadcast topic and drops the keys named by incoming events
//! 2. Runs the callbacks registered for those keys, so views can re-fetch
//! 3. Cascades admin-originated events to derived keys (`menu_items` also drops
//!    `header_settings`, and so on)
//! 4. Watches backend resources on the change feed and re-broadcasts their writes
//!
//! Local effects always happen before the remote publish, and transport failures
//! degrade the bus to local-only operation.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::StreamExt;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::InvalidationConfig;
use super::events::{ChangeEvent, InvalidationEvent, Origin};
use super::lock::mutex_lock;
use super::store::{KeyValueCache, SetOptions};
use super::transport::{BroadcastChannel, ChangeFeed};

const SOURCE: &str = "cache::bus";

const METRIC_RECEIVED: &str = "storefront_invalidation_received_total";
const METRIC_PUBLISH_FAILED: &str = "storefront_invalidation_publish_failed_total";

/// Callback run when its key is invalidated; receives the event payload.
pub type InvalidationCallback = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

/// Handle identifying one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Whether a broadcast reached the remote channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Delivered,
    /// Publishing failed; only this session was invalidated.
    LocalOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Started,
    AlreadyWatching,
    /// The change feed refused the subscription.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unwatched,
    Watching,
}

/// Unregisters its callback when dropped.
#[must_use = "the callback is unregistered when the guard is dropped"]
pub struct SubscriptionGuard {
    bus: Weak<InvalidationBus>,
    key: String,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.off(&self.key, self.id);
        }
    }
}

/// Pub/sub invalidation facade shared by a session.
pub struct InvalidationBus {
    id: Uuid,
    cache: Arc<KeyValueCache>,
    channel: Arc<dyn BroadcastChannel>,
    changes: Arc<dyn ChangeFeed>,
    config: InvalidationConfig,
    admin_mode: AtomicBool,
    next_subscription: AtomicU64,
    callbacks: Mutex<HashMap<String, Vec<(SubscriptionId, InvalidationCallback)>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    watches: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl InvalidationBus {
    /// Create a bus and subscribe it to the invalidation topic.
    ///
    /// A failed subscription is logged; the bus then works locally only.
    pub async fn start(
        cache: Arc<KeyValueCache>,
        channel: Arc<dyn BroadcastChannel>,
        changes: Arc<dyn ChangeFeed>,
        config: InvalidationConfig,
    ) -> Arc<Self> {
        let bus = Arc::new(Self {
            id: Uuid::new_v4(),
            cache,
            channel,
            changes,
            config,
            admin_mode: AtomicBool::new(false),
            next_subscription: AtomicU64::new(0),
            callbacks: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
            watches: Mutex::new(HashMap::new()),
        });
        bus.listen().await;
        bus
    }

    async fn listen(self: &Arc<Self>) {
        let topic = self.config.topic.clone();
        let mut events = match self.channel.subscribe(&topic).await {
            Ok(events) => events,
            Err(error) => {
                error!(
                    topic = %topic,
                    bus_id = %self.id,
                    error = %error,
                    "Invalidation subscription failed, running local-only"
                );
                return;
            }
        };

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(bus) = weak.upgrade() else {
                    break;
                };
                bus.handle_event(&event);
            }
        });

        *mutex_lock(&self.listener, SOURCE, "listen") = Some(handle);
        info!(topic = %topic, bus_id = %self.id, "Invalidation bus listening");
    }

    /// Identifier stamped on events this bus emits.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cache(&self) -> &Arc<KeyValueCache> {
        &self.cache
    }

    pub fn config(&self) -> &InvalidationConfig {
        &self.config
    }

    /// True while the topic subscription task is running.
    pub fn is_listening(&self) -> bool {
        mutex_lock(&self.listener, SOURCE, "is_listening")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Drop `keys` in this session, then announce the invalidation to every other one.
    pub async fn broadcast_invalidation<I, S>(
        &self,
        keys: I,
        payload: Option<Value>,
        origin: Origin,
    ) -> BroadcastOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let event = InvalidationEvent::invalidate(self.id, keys, origin, payload);
        self.apply(&event);

        match self.channel.publish(&self.config.topic, &event).await {
            Ok(()) => {
                debug!(
                    event_id = %event.id,
                    keys = ?event.affected_keys,
                    "Invalidation broadcast"
                );
                BroadcastOutcome::Delivered
            }
            Err(error) => {
                warn!(
                    event_id = %event.id,
                    keys = ?event.affected_keys,
                    error = %error,
                    "Invalidation publish failed, invalidated locally only"
                );
                counter!(METRIC_PUBLISH_FAILED).increment(1);
                BroadcastOutcome::LocalOnly
            }
        }
    }

    /// Apply an event received from the channel. Echoes of this bus's own events
    /// are ignored.
    pub fn handle_event(&self, event: &InvalidationEvent) {
        if event.sender == self.id {
            debug!(event_id = %event.id, "Ignoring own invalidation echo");
            return;
        }

        counter!(METRIC_RECEIVED).increment(1);
        info!(
            event_id = %event.id,
            origin = ?event.origin,
            keys = ?event.affected_keys,
            "Invalidation received"
        );
        self.apply(event);
    }

    fn apply(&self, event: &InvalidationEvent) {
        let payload = event.payload.as_ref();

        for key in &event.affected_keys {
            self.cache.purge(key);
        }
        for key in &event.affected_keys {
            self.run_callbacks(key, payload);
        }

        if event.origin != Origin::Admin || self.is_admin_mode() {
            return;
        }

        let derived: BTreeSet<&str> = event
            .affected_keys
            .iter()
            .flat_map(|key| self.config.cascade_for(key))
            .map(String::as_str)
            .filter(|key| !event.affected_keys.contains(*key))
            .collect();

        if !derived.is_empty() {
            debug!(event_id = %event.id, derived = ?derived, "Cascading invalidation");
        }
        for key in &derived {
            self.cache.purge(key);
        }
        for key in derived {
            self.run_callbacks(key, payload);
        }
    }

    fn run_callbacks(&self, key: &str, payload: Option<&Value>) {
        let callbacks: Vec<InvalidationCallback> = mutex_lock(&self.callbacks, SOURCE, "run")
            .get(key)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                error!(key, "Invalidation callback panicked");
            }
        }
    }

    /// Drop `key`, fetch a fresh value, and cache it for the short TTL.
    ///
    /// Fetch errors propagate and nothing is cached.
    pub async fn force_refresh<T, E, F, Fut>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.cache.purge(key);
        let value = fetch().await?;
        self.cache.set(
            key,
            &value,
            SetOptions::ttl(self.config.force_refresh_ttl()),
        );
        Ok(value)
    }

    // ========================================================================
    // Admin mode
    // ========================================================================

    /// In admin mode received events are applied without cascading.
    pub fn set_admin_mode(&self, enabled: bool) {
        self.admin_mode.store(enabled, Ordering::SeqCst);
        debug!(bus_id = %self.id, enabled, "Admin mode changed");
    }

    pub fn is_admin_mode(&self) -> bool {
        self.admin_mode.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Register `callback` for `key`. Callbacks run in registration order.
    pub fn on_invalidated<F>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        mutex_lock(&self.callbacks, SOURCE, "on_invalidated")
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Like [`on_invalidated`](Self::on_invalidated), unregistering when the guard drops.
    pub fn subscribe_scoped<F>(self: &Arc<Self>, key: &str, callback: F) -> SubscriptionGuard
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        SubscriptionGuard {
            bus: Arc::downgrade(self),
            key: key.to_string(),
            id: self.on_invalidated(key, callback),
        }
    }

    /// Unregister a callback. Returns false when it was not registered.
    pub fn off(&self, key: &str, id: SubscriptionId) -> bool {
        let mut callbacks = mutex_lock(&self.callbacks, SOURCE, "off");
        let Some(entries) = callbacks.get_mut(key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            callbacks.remove(key);
        }
        removed
    }

    pub fn callback_count(&self, key: &str) -> usize {
        mutex_lock(&self.callbacks, SOURCE, "callback_count")
            .get(key)
            .map_or(0, Vec::len)
    }

    // ========================================================================
    // Change feed
    // ========================================================================

    /// Watch `resource` on the change feed; every change drops `keys` everywhere.
    pub async fn setup_resource_invalidation<I, S>(
        self: &Arc<Self>,
        resource: &str,
        keys: I,
    ) -> WatchOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.watch_state(resource) == WatchState::Watching {
            return WatchOutcome::AlreadyWatching;
        }

        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let mut changes = match self.changes.subscribe(resource).await {
            Ok(changes) => changes,
            Err(error) => {
                warn!(resource, error = %error, "Change feed unavailable");
                return WatchOutcome::Unavailable;
            }
        };

        let weak = Arc::downgrade(self);
        let watched = resource.to_string();
        let handle = tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                let Some(bus) = weak.upgrade() else {
                    break;
                };
                bus.on_change(&watched, &keys, change).await;
            }
        });

        let mut watches = mutex_lock(&self.watches, SOURCE, "setup_resource_invalidation");
        if watches.contains_key(resource) {
            handle.abort();
            return WatchOutcome::AlreadyWatching;
        }
        watches.insert(resource.to_string(), handle);
        info!(resource, "Watching resource for changes");
        WatchOutcome::Started
    }

    async fn on_change(&self, resource: &str, keys: &[String], change: ChangeEvent) {
        debug!(
            resource,
            event_type = ?change.event_type,
            "Resource change received"
        );
        for key in keys {
            self.cache.purge(key);
        }
        let payload = serde_json::to_value(&change).ok();
        self.broadcast_invalidation(keys.iter().cloned(), payload, Origin::Admin)
            .await;
    }

    /// Watch every configured resource. Returns the outcome per resource.
    pub async fn setup_admin_invalidation(self: &Arc<Self>) -> Vec<(String, WatchOutcome)> {
        let mut outcomes = Vec::with_capacity(self.config.resources.len());
        for (resource, keys) in &self.config.resources {
            let outcome = self
                .setup_resource_invalidation(resource, keys.iter().cloned())
                .await;
            outcomes.push((resource.clone(), outcome));
        }
        outcomes
    }

    /// Stop watching `resource`. Returns false when it was not watched.
    pub fn teardown_resource(&self, resource: &str) -> bool {
        match mutex_lock(&self.watches, SOURCE, "teardown_resource").remove(resource) {
            Some(handle) => {
                handle.abort();
                info!(resource, "Stopped watching resource");
                true
            }
            None => false,
        }
    }

    pub fn watch_state(&self, resource: &str) -> WatchState {
        if mutex_lock(&self.watches, SOURCE, "watch_state").contains_key(resource) {
            WatchState::Watching
        } else {
            WatchState::Unwatched
        }
    }

    /// Stop every subscription and drop every callback. Safe to call repeatedly.
    pub fn teardown(&self) {
        let listener = mutex_lock(&self.listener, SOURCE, "teardown").take();
        let watches: Vec<(String, JoinHandle<()>)> =
            mutex_lock(&self.watches, SOURCE, "teardown").drain().collect();
        let was_active = listener.is_some() || !watches.is_empty();

        if let Some(handle) = listener {
            handle.abort();
        }
        for (_, handle) in watches {
            handle.abort();
        }
        mutex_lock(&self.callbacks, SOURCE, "teardown").clear();

        if was_active {
            info!(bus_id = %self.id, "Invalidation bus torn down");
        }
    }
}

impl Drop for InvalidationBus {
    fn drop(&mut self) {
        self.teardown();
    }
}
