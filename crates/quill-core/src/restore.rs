//! Restore pipeline
//!
//! Applies a snapshot (from undo, redo, a saved version, a remote backup, or
//! an imported file) to the live store and then tells every stateful
//! consumer to reinitialize from a cold read. Incremental reconciliation is
//! deliberately not attempted: a restore can alter any number of unrelated
//! records at once, and "resume from a fresh read" is far less error-prone
//! than diff-and-patch of every dependent in-memory structure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::db::{Database, HistoryRepository};
use crate::error::{Error, Result};
use crate::history::SnapshotHistory;
use crate::models::Snapshot;
use crate::serializer::StateSerializer;

/// Where a restore request came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreOrigin {
    /// Local time travel, one step back
    Undo,
    /// Local time travel, one step forward
    Redo,
    /// A user-named saved version
    SavedVersion,
    /// Remote backup adopted after a divergence decision
    RemoteBackup,
    /// A snapshot file imported from disk
    FileImport,
}

/// Reentrancy guard around restore operations.
///
/// While a restore is in flight, no new snapshot may be captured; otherwise
/// the restore would be recorded as if it were a new user edit, corrupting
/// the undo chain. The flag is an explicit injected value rather than
/// ambient global state so it stays testable in isolation.
#[derive(Clone, Debug, Default)]
pub struct RestoreGate {
    restoring: Arc<AtomicBool>,
}

impl RestoreGate {
    /// Create a gate in the not-restoring state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a restore is currently in flight
    #[must_use]
    pub fn is_restoring(&self) -> bool {
        self.restoring.load(Ordering::SeqCst)
    }

    /// Mark a restore as in flight.
    ///
    /// The returned guard clears the flag when dropped, on every exit path,
    /// success or failure.
    #[must_use]
    pub fn enter(&self) -> RestoreGuard {
        self.restoring.store(true, Ordering::SeqCst);
        RestoreGuard {
            restoring: Arc::clone(&self.restoring),
        }
    }
}

/// RAII guard holding the restoring flag; clears it on drop
pub struct RestoreGuard {
    restoring: Arc<AtomicBool>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        self.restoring.store(false, Ordering::SeqCst);
    }
}

type ReloadListener = Box<dyn Fn(RestoreOrigin) + Send>;

/// Single "store replaced" signal every stateful consumer subscribes to.
///
/// After a successful restore no in-memory cache may be trusted; subscribers
/// reload themselves from a cold read when notified.
#[derive(Default)]
pub struct ReloadHub {
    listeners: Mutex<Vec<ReloadListener>>,
}

impl ReloadHub {
    /// Create a hub with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer to be told when the store has been replaced
    pub fn subscribe(&self, listener: impl Fn(RestoreOrigin) + Send + 'static) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    /// Notify all consumers that the store's contents were replaced wholesale
    pub fn notify_store_replaced(&self, origin: RestoreOrigin) {
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                listener(origin);
            }
        }
    }
}

/// Orchestrates gate, history, apply, and the forced consumer reload
pub struct RestorePipeline<'a> {
    db: &'a Database,
    gate: &'a RestoreGate,
    hub: &'a ReloadHub,
}

impl<'a> RestorePipeline<'a> {
    /// Build a pipeline over the given store, gate, and reload hub
    #[must_use]
    pub const fn new(db: &'a Database, gate: &'a RestoreGate, hub: &'a ReloadHub) -> Self {
        Self { db, gate, hub }
    }

    /// Step one state back.
    ///
    /// Captures the current state onto the redo stack so the undo is itself
    /// redoable. Returns `false` when there is nothing to undo. The content
    /// replace and the stack persistence run in one transaction, so a failure
    /// in either leaves both the store and the stacks untouched.
    pub fn undo(
        &self,
        history: &mut SnapshotHistory,
        repo: &impl HistoryRepository,
    ) -> Result<bool> {
        let _guard = self.gate.enter();

        let Some(target) = history.peek_undo(repo)? else {
            return Ok(false);
        };
        let current = StateSerializer::capture(self.db)?;

        let tx = self
            .db
            .connection()
            .unchecked_transaction()
            .map_err(|error| Error::StoreWrite(error.to_string()))?;
        StateSerializer::apply_within(&tx, &target)?;
        let _ = history.undo(repo, current)?;
        tx.commit()
            .map_err(|error| Error::StoreWrite(error.to_string()))?;

        tracing::info!("Restored previous state");
        self.hub.notify_store_replaced(RestoreOrigin::Undo);
        Ok(true)
    }

    /// Step one undone state forward; mirror of [`Self::undo`]
    pub fn redo(
        &self,
        history: &mut SnapshotHistory,
        repo: &impl HistoryRepository,
    ) -> Result<bool> {
        let _guard = self.gate.enter();

        let Some(target) = history.peek_redo(repo)? else {
            return Ok(false);
        };
        let current = StateSerializer::capture(self.db)?;

        let tx = self
            .db
            .connection()
            .unchecked_transaction()
            .map_err(|error| Error::StoreWrite(error.to_string()))?;
        StateSerializer::apply_within(&tx, &target)?;
        let _ = history.redo(repo, current)?;
        tx.commit()
            .map_err(|error| Error::StoreWrite(error.to_string()))?;

        tracing::info!("Reapplied undone state");
        self.hub.notify_store_replaced(RestoreOrigin::Redo);
        Ok(true)
    }

    /// Apply an externally sourced snapshot (saved version, remote backup,
    /// or imported file) wholesale.
    ///
    /// No history entry is recorded; the forced reload only fires after the
    /// apply fully succeeds, so a failure leaves no partial state visible.
    pub fn restore_snapshot(&self, snapshot: &Snapshot, origin: RestoreOrigin) -> Result<()> {
        let _guard = self.gate.enter();

        StateSerializer::apply(self.db, snapshot)?;

        tracing::info!(?origin, "Restored snapshot");
        self.hub.notify_store_replaced(origin);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ContentRepository, SqliteContentRepository, SqliteHistoryRepository};
    use crate::error::Error;
    use crate::models::{NamedSnapshot, VersionId};
    use std::sync::atomic::AtomicUsize;

    struct FailingSaveRepository<'a> {
        inner: SqliteHistoryRepository<'a>,
    }

    impl HistoryRepository for FailingSaveRepository<'_> {
        fn load_stacks(&self) -> Result<(Vec<Snapshot>, Vec<Snapshot>)> {
            self.inner.load_stacks()
        }

        fn save_stacks(&self, _undo: &[Snapshot], _redo: &[Snapshot]) -> Result<()> {
            Err(Error::StoreWrite("disk full".to_string()))
        }

        fn save_version(&self, version: &NamedSnapshot) -> Result<()> {
            self.inner.save_version(version)
        }

        fn get_version(&self, id: &VersionId) -> Result<Option<NamedSnapshot>> {
            self.inner.get_version(id)
        }

        fn list_versions(&self) -> Result<Vec<NamedSnapshot>> {
            self.inner.list_versions()
        }

        fn delete_version(&self, id: &VersionId) -> Result<()> {
            self.inner.delete_version(id)
        }
    }

    #[test]
    fn gate_clears_on_drop() {
        let gate = RestoreGate::new();
        assert!(!gate.is_restoring());
        {
            let _guard = gate.enter();
            assert!(gate.is_restoring());
        }
        assert!(!gate.is_restoring());
    }

    #[test]
    fn gate_clears_even_when_the_operation_panics() {
        let gate = RestoreGate::new();
        let cloned = gate.clone();

        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.enter();
            panic!("restore blew up");
        });
        assert!(result.is_err());
        assert!(!gate.is_restoring());
    }

    #[test]
    fn failed_apply_clears_gate_and_leaves_stacks_alone() {
        let db = Database::open_in_memory().unwrap();
        let gate = RestoreGate::new();
        let hub = ReloadHub::new();
        let repo = SqliteHistoryRepository::new(db.connection());
        let mut history = SnapshotHistory::new();

        // A corrupt entry at the top of the undo stack
        history
            .push(&repo, Snapshot::new("definitely not json"))
            .unwrap();

        let pipeline = RestorePipeline::new(&db, &gate, &hub);
        let error = pipeline.undo(&mut history, &repo).unwrap_err();
        assert!(matches!(error, Error::CorruptPayload(_)));

        assert!(!gate.is_restoring());
        // The failed target is still on the stack, nothing moved to redo
        assert_eq!(history.depths(&repo).unwrap(), (1, 0));
    }

    #[test]
    fn failed_stack_persist_rolls_back_the_restore() {
        let db = Database::open_in_memory().unwrap();
        let gate = RestoreGate::new();
        let hub = ReloadHub::new();
        let repo = SqliteHistoryRepository::new(db.connection());
        let mut history = SnapshotHistory::new();

        // Empty state on the undo stack, then content the undo would erase
        history
            .push(&repo, StateSerializer::capture(&db).unwrap())
            .unwrap();
        SqliteContentRepository::new(db.connection())
            .create_document(None, "Draft", "keep me")
            .unwrap();
        let before = StateSerializer::capture(&db).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            hub.subscribe(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let failing = FailingSaveRepository {
            inner: SqliteHistoryRepository::new(db.connection()),
        };
        let pipeline = RestorePipeline::new(&db, &gate, &hub);
        let error = pipeline.undo(&mut history, &failing).unwrap_err();
        assert!(matches!(error, Error::StoreWrite(_)));

        // The content replace rolled back with the stack write
        let after = StateSerializer::capture(&db).unwrap();
        assert_eq!(before.payload, after.payload);
        assert_eq!(history.depths(&repo).unwrap(), (1, 0));
        assert!(!gate.is_restoring());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn restore_snapshot_notifies_consumers_once() {
        let db = Database::open_in_memory().unwrap();
        let gate = RestoreGate::new();
        let hub = ReloadHub::new();

        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            hub.subscribe(move |origin| {
                assert_eq!(origin, RestoreOrigin::FileImport);
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let snapshot = StateSerializer::capture(&db).unwrap();
        let pipeline = RestorePipeline::new(&db, &gate, &hub);
        pipeline
            .restore_snapshot(&snapshot, RestoreOrigin::FileImport)
            .unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_restore_does_not_notify_consumers() {
        let db = Database::open_in_memory().unwrap();
        let gate = RestoreGate::new();
        let hub = ReloadHub::new();

        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            hub.subscribe(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let pipeline = RestorePipeline::new(&db, &gate, &hub);
        let result =
            pipeline.restore_snapshot(&Snapshot::new("garbage"), RestoreOrigin::RemoteBackup);
        assert!(result.is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
