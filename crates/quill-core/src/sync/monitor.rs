//! Backup sync monitor
//!
//! Periodically compares the latest local mutation instant against the
//! latest remote backup's content instant and raises a divergence when the
//! remote content is strictly newer. The monitor only ever reads; all
//! mutation is deferred to the restore pipeline through an explicit human
//! decision.

use crate::sync::provider::BackupProvider;
use crate::sync::resolver::Divergence;

/// Monitor state machine: `Idle -> Checking -> {UpToDate | Diverged | CheckFailed}`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckState {
    /// Waiting for the next scheduled check
    Idle,
    /// A fetch is in flight
    Checking,
    /// Remote content is not newer than local
    UpToDate,
    /// Remote content is strictly newer; a decision is pending
    Diverged,
    /// The fetch failed; retried silently on the next cycle
    CheckFailed,
}

/// Result of a single check cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// No divergence: remote content is equal to or older than local
    UpToDate,
    /// Remote content is strictly newer than the latest local mutation
    Diverged(Divergence),
    /// The provider was unreachable; not surfaced as a user-facing error
    CheckFailed,
}

/// Compares local and remote state on demand
pub struct BackupSyncMonitor<P> {
    provider: P,
    state: CheckState,
}

impl<P: BackupProvider> BackupSyncMonitor<P> {
    /// Create an idle monitor over the given provider
    pub const fn new(provider: P) -> Self {
        Self {
            provider,
            state: CheckState::Idle,
        }
    }

    /// Current state machine position
    pub const fn state(&self) -> CheckState {
        self.state
    }

    /// Access the underlying provider
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Run one check cycle against the given local latest-mutation instant.
    ///
    /// Divergence is signaled if and only if the remote content timestamp is
    /// strictly greater than `local_timestamp`; a fresher `backup_timestamp`
    /// alone is not news. Fetch errors are swallowed here and logged: the
    /// next scheduled check simply tries again.
    pub async fn check(&mut self, local_timestamp: i64) -> CheckOutcome {
        self.state = CheckState::Checking;
        tracing::debug!(local_timestamp, "Checking remote backup");

        let remote = match self.provider.fetch_latest().await {
            Ok(remote) => remote,
            Err(error) => {
                tracing::warn!("Backup check failed: {error}");
                self.state = CheckState::CheckFailed;
                return CheckOutcome::CheckFailed;
            }
        };

        match remote {
            Some(remote) if remote.content_timestamp > local_timestamp => {
                tracing::info!(
                    remote_content = remote.content_timestamp,
                    local = local_timestamp,
                    "Remote backup diverged from local state"
                );
                self.state = CheckState::Diverged;
                CheckOutcome::Diverged(Divergence {
                    remote,
                    local_timestamp,
                })
            }
            _ => {
                self.state = CheckState::UpToDate;
                CheckOutcome::UpToDate
            }
        }
    }

    /// Return to `Idle` once a pending divergence decision has been made
    pub fn decision_made(&mut self) {
        self.state = CheckState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RemoteBackup, Snapshot};
    use crate::sync::provider::testing::MemoryBackupProvider;
    use std::sync::atomic::Ordering;

    fn backup(content_timestamp: i64, backup_timestamp: i64) -> RemoteBackup {
        RemoteBackup {
            content: Snapshot::new("{\"version\":1}"),
            content_timestamp,
            backup_timestamp,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn equal_timestamps_are_not_a_divergence() {
        // Fresh backup of stale content: backup written much later, but the
        // content itself is not newer
        let provider = MemoryBackupProvider::with_backup(backup(100, 500));
        let mut monitor = BackupSyncMonitor::new(provider);

        assert_eq!(monitor.check(100).await, CheckOutcome::UpToDate);
        assert_eq!(monitor.state(), CheckState::UpToDate);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn strictly_newer_remote_content_diverges() {
        let provider = MemoryBackupProvider::with_backup(backup(101, 101));
        let mut monitor = BackupSyncMonitor::new(provider);

        let outcome = monitor.check(100).await;
        match outcome {
            CheckOutcome::Diverged(divergence) => {
                assert_eq!(divergence.remote.content_timestamp, 101);
                assert_eq!(divergence.local_timestamp, 100);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
        assert_eq!(monitor.state(), CheckState::Diverged);

        monitor.decision_made();
        assert_eq!(monitor.state(), CheckState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn older_remote_content_is_up_to_date() {
        let provider = MemoryBackupProvider::with_backup(backup(99, 99));
        let mut monitor = BackupSyncMonitor::new(provider);

        assert_eq!(monitor.check(100).await, CheckOutcome::UpToDate);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_backup_is_up_to_date() {
        let provider = MemoryBackupProvider::default();
        let mut monitor = BackupSyncMonitor::new(provider);

        assert_eq!(monitor.check(0).await, CheckOutcome::UpToDate);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_error_is_swallowed_and_retried_next_cycle() {
        let provider = MemoryBackupProvider::with_backup(backup(200, 200));
        provider.fail.store(true, Ordering::SeqCst);
        let mut monitor = BackupSyncMonitor::new(provider);

        assert_eq!(monitor.check(100).await, CheckOutcome::CheckFailed);
        assert_eq!(monitor.state(), CheckState::CheckFailed);

        // Outage over: the next scheduled check sees the divergence
        monitor.provider().fail.store(false, Ordering::SeqCst);
        assert!(matches!(
            monitor.check(100).await,
            CheckOutcome::Diverged(_)
        ));
    }
}
