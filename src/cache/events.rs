//! Invalidation and change events.
//!
//! [`InvalidationEvent`]s travel over the broadcast channel between sessions;
//! [`ChangeEvent`]s arrive from the backend change feed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Who caused an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// A write made through the admin console; triggers cascades on receipt.
    Admin,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Invalidate,
}

/// Request to drop a set of cache keys in every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Unique identifier (UUIDv4).
    pub id: Uuid,
    /// Identifies the emitting bus so it can skip its own echo.
    pub sender: Uuid,
    pub kind: EventKind,
    pub affected_keys: BTreeSet<String>,
    pub origin: Origin,
    #[serde(with = "time::serde::rfc3339")]
    pub emitted_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl InvalidationEvent {
    pub fn invalidate<I, S>(sender: Uuid, keys: I, origin: Origin, payload: Option<Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            sender,
            kind: EventKind::Invalidate,
            affected_keys: keys.into_iter().map(Into::into).collect(),
            origin,
            emitted_at: OffsetDateTime::now_utc(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: ChangeKind,
    pub resource: String,
    #[serde(default)]
    pub payload: Value,
}

impl ChangeEvent {
    pub fn new(event_type: ChangeKind, resource: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type,
            resource: resource.into(),
            payload,
        }
    }
}
