//! Conflict resolver
//!
//! A divergence is never auto-resolved: it carries both timestamps to a
//! human who answers with exactly one of two decisions. A pending divergence
//! blocks nothing; it simply waits.

use crate::models::{RemoteBackup, Snapshot};

/// A detected case where the remote backup's content is strictly newer than
/// the local store's latest mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// The remote backup that is ahead
    pub remote: RemoteBackup,
    /// Latest local mutation instant (Unix ms) at the time of the check
    pub local_timestamp: i64,
}

/// The human's answer to a divergence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DivergenceDecision {
    /// Replace local state with the remote backup
    AdoptRemote,
    /// Keep local state; the divergence is discarded without any change
    KeepLocal,
}

/// Pure decision surface mapping a divergence and a decision to an action
pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve a divergence.
    ///
    /// Returns the snapshot to restore (with origin remote-backup) for
    /// [`DivergenceDecision::AdoptRemote`], or `None` for
    /// [`DivergenceDecision::KeepLocal`]: declining makes no state change
    /// and records no history entry.
    #[must_use]
    pub fn resolve(divergence: &Divergence, decision: DivergenceDecision) -> Option<Snapshot> {
        match decision {
            DivergenceDecision::AdoptRemote => Some(divergence.remote.content.clone()),
            DivergenceDecision::KeepLocal => None,
        }
    }
}
