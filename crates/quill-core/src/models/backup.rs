//! Remote backup record model

use serde::{Deserialize, Serialize};

use super::Snapshot;

/// The latest backup held by the remote provider.
///
/// `content_timestamp` is the instant the backed-up content was last mutated;
/// `backup_timestamp` is the instant the backup itself was written. Divergence
/// checks compare `content_timestamp` against the local store's own latest
/// mutation instant, never against wall-clock now: a fresh backup of stale
/// content is not news.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBackup {
    /// The backed-up full-state snapshot
    pub content: Snapshot,
    /// Instant the content was last mutated (Unix ms)
    pub content_timestamp: i64,
    /// Instant the backup was written (Unix ms)
    pub backup_timestamp: i64,
}
