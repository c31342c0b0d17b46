use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use storefront_cache::cache::{
    AdminInvalidator, BroadcastChannel, BroadcastOutcome, CacheConfig, ChangeEvent, ChangeKind,
    EventStream, InvalidationBus, InvalidationConfig, InvalidationEvent, KeyValueCache,
    LocalBroadcastHub, LocalChangeFeed, SetOptions, TransportError, WatchOutcome, keys,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MenuItem {
    label: String,
    href: String,
}

fn item(label: &str) -> MenuItem {
    MenuItem {
        label: label.to_string(),
        href: format!("/{}", label.to_lowercase()),
    }
}

/// Stand-in for the storefront database.
#[derive(Clone, Default)]
struct Backend {
    menu: Arc<Mutex<Vec<MenuItem>>>,
}

impl Backend {
    fn with_menu(items: Vec<MenuItem>) -> Self {
        Self {
            menu: Arc::new(Mutex::new(items)),
        }
    }

    fn menu(&self) -> Vec<MenuItem> {
        self.menu.lock().expect("menu lock").clone()
    }

    fn add_menu_item(&self, item: MenuItem) {
        self.menu.lock().expect("menu lock").push(item);
    }
}

/// Viewer-side fetcher: serve from cache, fall back to the backend and cache the result.
fn load_menu(cache: &KeyValueCache, backend: &Backend) -> Vec<MenuItem> {
    if let Some(cached) = cache.get::<Vec<MenuItem>>(keys::MENU_ITEMS, None) {
        return cached;
    }
    let fresh = backend.menu();
    cache.set(keys::MENU_ITEMS, &fresh, SetOptions::ttl(keys::MEDIUM));
    fresh
}

struct Session {
    cache: Arc<KeyValueCache>,
    bus: Arc<InvalidationBus>,
}

async fn session(
    channel: Arc<dyn BroadcastChannel>,
    feed: Arc<LocalChangeFeed>,
    admin: bool,
) -> Session {
    let cache = Arc::new(KeyValueCache::in_memory(CacheConfig::default()));
    let bus = InvalidationBus::start(
        cache.clone(),
        channel,
        feed,
        InvalidationConfig::default(),
    )
    .await;
    bus.set_admin_mode(admin);
    Session { cache, bus }
}

#[tokio::test]
async fn admin_menu_edit_reaches_viewer_session() {
    let hub: Arc<dyn BroadcastChannel> = Arc::new(LocalBroadcastHub::new());
    let feed = Arc::new(LocalChangeFeed::new());
    let backend = Backend::with_menu(vec![item("Home"), item("Shop"), item("About")]);

    let admin = session(hub.clone(), feed.clone(), true).await;
    let viewer = session(hub, feed, false).await;

    assert_eq!(load_menu(&viewer.cache, &backend).len(), 3);
    viewer
        .cache
        .set(keys::HEADER_SETTINGS, &json!({"sticky": true}), SetOptions::default());

    let (rendered_tx, mut rendered_rx) = mpsc::unbounded_channel();
    let _subscription = {
        let cache = viewer.cache.clone();
        let backend = backend.clone();
        viewer.bus.subscribe_scoped(keys::MENU_ITEMS, move |_| {
            let menu = load_menu(&cache, &backend);
            let _ = rendered_tx.send(menu.len());
        })
    };

    let invalidator = AdminInvalidator::new(admin.bus.clone());
    let written: Result<(), String> = invalidator
        .with_cache_invalidation(keys::MENU_ITEMS, || async {
            backend.add_menu_item(item("Sale"));
            Ok(())
        })
        .await;
    written.expect("admin write");

    let rendered = tokio::time::timeout(Duration::from_secs(2), rendered_rx.recv())
        .await
        .expect("viewer re-rendered in time")
        .expect("render notification");
    assert_eq!(rendered, 4);

    let cached = viewer
        .cache
        .get::<Vec<MenuItem>>(keys::MENU_ITEMS, None)
        .expect("viewer cache refilled");
    assert_eq!(cached.last(), Some(&item("Sale")));
    assert!(!viewer.cache.has(keys::HEADER_SETTINGS, None));
}

#[tokio::test]
async fn change_feed_invalidates_every_session() {
    let hub: Arc<dyn BroadcastChannel> = Arc::new(LocalBroadcastHub::new());
    let feed = Arc::new(LocalChangeFeed::new());

    let admin = session(hub.clone(), feed.clone(), true).await;
    let viewer = session(hub, feed.clone(), false).await;

    let outcomes = admin.bus.setup_admin_invalidation().await;
    assert!(
        outcomes
            .iter()
            .all(|(_, outcome)| *outcome == WatchOutcome::Started)
    );

    for participant in [&admin, &viewer] {
        participant
            .cache
            .set(keys::HELP_ITEMS, &vec!["Shipping"], SetOptions::default());
        participant
            .cache
            .set(keys::HEADER_SETTINGS, &json!({}), SetOptions::default());
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let _subscription = viewer.bus.subscribe_scoped(keys::HEADER_SETTINGS, move |_| {
        let _ = done_tx.send(());
    });

    assert_eq!(
        feed.emit(ChangeEvent::new(
            ChangeKind::Update,
            keys::HELP_ITEMS,
            json!({"id": 3, "title": "Returns"}),
        )),
        1
    );

    tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
        .await
        .expect("viewer notified in time")
        .expect("cascade notification");

    assert!(!admin.cache.has(keys::HELP_ITEMS, None));
    assert!(!viewer.cache.has(keys::HELP_ITEMS, None));
    assert!(!viewer.cache.has(keys::HEADER_SETTINGS, None));
    // Admin sessions apply events without cascading.
    assert!(admin.cache.has(keys::HEADER_SETTINGS, None));
}

/// Channel whose publishes always fail; subscriptions never deliver.
struct UnreachableChannel;

#[async_trait]
impl BroadcastChannel for UnreachableChannel {
    async fn publish(&self, topic: &str, _event: &InvalidationEvent) -> Result<(), TransportError> {
        Err(TransportError::publish(topic, "connection refused"))
    }

    async fn subscribe(&self, _topic: &str) -> Result<EventStream, TransportError> {
        Ok(Box::pin(futures::stream::pending::<InvalidationEvent>()))
    }
}

#[tokio::test]
async fn unreachable_channel_degrades_to_local_only() {
    let feed = Arc::new(LocalChangeFeed::new());
    let admin = session(Arc::new(UnreachableChannel), feed, true).await;
    admin
        .cache
        .set(keys::CAROUSEL_IMAGES, &vec!["hero.png"], SetOptions::default());

    let outcome = AdminInvalidator::new(admin.bus.clone())
        .carousel_images_changed(None)
        .await;

    assert_eq!(outcome, Some(BroadcastOutcome::LocalOnly));
    assert!(!admin.cache.has(keys::CAROUSEL_IMAGES, None));
    assert!(admin.bus.is_listening());
}
