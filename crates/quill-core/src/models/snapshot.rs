//! Snapshot models
//!
//! A [`Snapshot`] is an opaque, atomic, full-state serialization of every
//! content record at one instant. It is immutable once captured and is only
//! ever applied wholesale, never partially.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// An opaque full-state snapshot of the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Versioned payload produced by the state serializer
    pub payload: String,
    /// Capture instant (Unix ms); not part of the payload itself
    pub captured_at: i64,
}

impl Snapshot {
    /// Wrap a serialized payload captured right now
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            captured_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Whether two snapshots carry byte-identical payloads.
    ///
    /// Capture instants are ignored: a no-op edit recaptured a millisecond
    /// later still counts as the same state.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

/// A unique identifier for a saved version, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(Uuid);

impl VersionId {
    /// Create a new unique version ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A user-named snapshot ("save version").
///
/// Named versions are a distinct, unbounded collection: unlike undo/redo
/// history entries they are never evicted automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedSnapshot {
    /// Unique identifier
    pub id: VersionId,
    /// User-supplied label
    pub label: String,
    /// The captured state
    pub snapshot: Snapshot,
}

impl NamedSnapshot {
    /// Label a freshly captured snapshot
    #[must_use]
    pub fn new(label: impl Into<String>, snapshot: Snapshot) -> Self {
        Self {
            id: VersionId::new(),
            label: label.into(),
            snapshot,
        }
    }
}
