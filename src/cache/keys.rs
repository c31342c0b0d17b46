//! Well-known cache keys, resources and durations.
//!
//! Keys here are logical names; the key/value cache adds its reserved prefix
//! before anything reaches a storage backend.

use std::time::Duration;

use sha2::{Digest, Sha256};

/// Navigation menu entries rendered in the storefront header.
pub const MENU_ITEMS: &str = "menu_items";
/// Header configuration; composed from menu and help data.
pub const HEADER_SETTINGS: &str = "header_settings";
/// Home page carousel slides.
pub const CAROUSEL_IMAGES: &str = "carousel_images";
/// Help widget settings.
pub const HELP_SETTINGS: &str = "help_settings";
/// Help widget entries.
pub const HELP_ITEMS: &str = "help_items";
/// Aggregated home page payload.
pub const HOME_DATA: &str = "home_data";

/// Logical key prefix for image payloads.
pub const IMAGE_BLOB_PREFIX: &str = "image_blob_";

pub const SHORT: Duration = Duration::from_secs(5 * 60);
pub const MEDIUM: Duration = Duration::from_secs(30 * 60);
pub const LONG: Duration = Duration::from_secs(2 * 60 * 60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache key of the image fetched from `url`.
pub fn image_blob_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{IMAGE_BLOB_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Storefront resources (backend tables) and the cache keys they feed.
pub fn default_resource_keys() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        (MENU_ITEMS, vec![MENU_ITEMS]),
        (HEADER_SETTINGS, vec![HEADER_SETTINGS]),
        (CAROUSEL_IMAGES, vec![CAROUSEL_IMAGES]),
        (HELP_SETTINGS, vec![HELP_SETTINGS]),
        (HELP_ITEMS, vec![HELP_ITEMS]),
    ]
}

/// Derived views that must be dropped together with their sources.
pub fn default_cascade() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        (MENU_ITEMS, vec![HEADER_SETTINGS]),
        (CAROUSEL_IMAGES, vec![HOME_DATA]),
        (HELP_SETTINGS, vec![HEADER_SETTINGS]),
        (HELP_ITEMS, vec![HEADER_SETTINGS]),
    ]
}
