//! Storefront cache system
//!
//! Client-side caching and real-time invalidation for the storefront:
//!
//! - **KeyValueCache**: TTL and version-tagged entries over memory, durable and
//!   session backends, with memory fallback when a backend is full
//! - **ImageCache**: single-flight image preloading into the memory backend
//! - **InvalidationBus**: pub/sub invalidation across sessions, fed by admin
//!   writes and the backend change feed
//!
//! ## Configuration
//!
//! Behavior is controlled via `storefront-cache.toml`:
//!
//! ```toml
//! [cache]
//! key_prefix = "cache_"
//! default_ttl_ms = 1800000
//! default_backend = "durable"
//!
//! [images]
//! max_item_bytes = 10485760
//!
//! [invalidation]
//! topic = "cache_invalidation"
//! # ... see config.rs for all options
//! ```

mod admin;
mod backend;
mod bus;
mod config;
mod entry;
mod error;
mod events;
mod image;
pub mod keys;
mod lock;
mod store;
mod transport;

pub use admin::AdminInvalidator;
pub use backend::{BackendKind, DurableStore, MemoryStore, SessionStore, StorageBackend};
pub use bus::{
    BroadcastOutcome, InvalidationBus, InvalidationCallback, SubscriptionGuard, SubscriptionId,
    WatchOutcome, WatchState,
};
pub use config::{CacheConfig, ImageCacheConfig, InvalidationConfig};
pub use entry::{CacheEntry, Lookup};
pub use error::{CacheError, FetchError, ImageCacheError, StorageError, TransportError};
pub use events::{ChangeEvent, ChangeKind, EventKind, InvalidationEvent, Origin};
pub use image::{
    BatchReport, HttpImageFetcher, ImageCache, ImageCacheRecord, ImageCacheStats, ImageEncoding,
    ImageFetcher, ImagePayload, ImageResponse, PreloadOptions, PreloadPriority, PreloadStatus,
};
pub use store::{CacheStats, ClearScope, KeyValueCache, SetOptions, SetOutcome, SweepReport};
pub use transport::{
    BroadcastChannel, ChangeFeed, ChangeStream, EventStream, LocalBroadcastHub, LocalChangeFeed,
};
