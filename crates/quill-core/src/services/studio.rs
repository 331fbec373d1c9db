//! Shared studio service wrapper used across clients.
//!
//! Ties the local store, the snapshot history, the restore pipeline, and the
//! backup sync pieces together behind one async surface. Every undo-eligible
//! mutation records the pre-mutation state into history first, unless a
//! restore is in flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    ContentRepository, Database, HistoryRepository, SqliteContentRepository,
    SqliteHistoryRepository,
};
use crate::error::{Error, Result};
use crate::history::{HistorySignal, SnapshotHistory};
use crate::models::{
    Book, BookId, Document, DocumentId, NamedSnapshot, Snapshot, Template, VersionId,
};
use crate::restore::{ReloadHub, RestoreGate, RestoreOrigin, RestorePipeline};
use crate::serializer::StateSerializer;
use crate::sync::{
    BackupProvider, BackupSyncMonitor, CheckOutcome, ConflictResolver, Divergence,
    DivergenceDecision,
};

/// Thread-safe service for store, history, and backup operations.
#[derive(Clone)]
pub struct StudioService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    history: Arc<Mutex<SnapshotHistory>>,
    gate: RestoreGate,
    reload_hub: Arc<ReloadHub>,
}

impl StudioService {
    /// Open a studio service at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        Ok(Self::wrap(db, Some(db_path)))
    }

    /// Open an in-memory studio service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::wrap(Database::open_in_memory()?, None))
    }

    /// Last-resort recovery from an unreadable store: quarantine the
    /// corrupted database file, then reopen fresh.
    ///
    /// Destructive from the user's point of view (content is gone until a
    /// backup is adopted), so callers must have explicit confirmation.
    pub fn wipe_and_reopen(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        Self::quarantine_corrupted_db_files(&db_path)?;
        Self::open_path(db_path)
    }

    fn wrap(db: Database, db_path: Option<PathBuf>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            history: Arc::new(Mutex::new(SnapshotHistory::new())),
            gate: RestoreGate::new(),
            reload_hub: Arc::new(ReloadHub::new()),
        }
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let backup_name = format!("quill.db.corrupt-{timestamp}");
            let backup_path = db_path.with_file_name(backup_name);

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted store file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale store sidecar file {}", path.display());
            }
        }

        Ok(())
    }

    /// Path of the backing database file, if file-backed.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Whether a restore is currently in flight.
    pub fn restoring(&self) -> bool {
        self.gate.is_restoring()
    }

    /// Handle to the restore gate (for embedding hosts and tests).
    #[must_use]
    pub fn restore_gate(&self) -> RestoreGate {
        self.gate.clone()
    }

    /// Register a listener for `{can_undo, can_redo}` changes.
    pub async fn subscribe_history(&self, listener: impl Fn(HistorySignal) + Send + 'static) {
        self.history.lock().await.subscribe(listener);
    }

    /// Register a consumer to reload itself after any restore.
    pub fn subscribe_store_replaced(&self, listener: impl Fn(RestoreOrigin) + Send + 'static) {
        self.reload_hub.subscribe(listener);
    }

    /// Record the current state into undo history.
    ///
    /// This is the capture path gated by the restoring flag: while a restore
    /// is in flight it is a no-op, so a restore is never recorded as if it
    /// were a new user edit.
    async fn record_history(&self, db: &Database) -> Result<()> {
        if self.gate.is_restoring() {
            tracing::debug!("Skipping history capture during restore");
            return Ok(());
        }

        let snapshot = StateSerializer::capture(db)?;
        let repo = SqliteHistoryRepository::new(db.connection());
        self.history.lock().await.push(&repo, snapshot)
    }

    // -----------------------------------------------------------------
    // Content operations (each records history before mutating)
    // -----------------------------------------------------------------

    /// Create a book.
    pub async fn create_book(&self, title: &str, description: &str) -> Result<Book> {
        let db = self.db.lock().await;
        self.record_history(&db).await?;
        SqliteContentRepository::new(db.connection()).create_book(title, description)
    }

    /// Update a book's title and description.
    pub async fn update_book(&self, id: &BookId, title: &str, description: &str) -> Result<Book> {
        let db = self.db.lock().await;
        self.record_history(&db).await?;
        SqliteContentRepository::new(db.connection()).update_book(id, title, description)
    }

    /// Soft-delete a book.
    pub async fn delete_book(&self, id: &BookId) -> Result<()> {
        let db = self.db.lock().await;
        self.record_history(&db).await?;
        SqliteContentRepository::new(db.connection()).delete_book(id)
    }

    /// List books newest-first.
    pub async fn list_books(&self) -> Result<Vec<Book>> {
        let db = self.db.lock().await;
        SqliteContentRepository::new(db.connection()).list_books()
    }

    /// Create a document, optionally inside a book.
    pub async fn create_document(
        &self,
        book_id: Option<&BookId>,
        title: &str,
        content: &str,
    ) -> Result<Document> {
        let db = self.db.lock().await;
        self.record_history(&db).await?;
        SqliteContentRepository::new(db.connection()).create_document(book_id, title, content)
    }

    /// Fetch a document by id.
    pub async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
        let db = self.db.lock().await;
        SqliteContentRepository::new(db.connection()).get_document(id)
    }

    /// List documents newest-first, optionally filtered by book.
    pub async fn list_documents(&self, book_id: Option<&BookId>) -> Result<Vec<Document>> {
        let db = self.db.lock().await;
        SqliteContentRepository::new(db.connection()).list_documents(book_id)
    }

    /// Update a document's content.
    pub async fn update_document(&self, id: &DocumentId, content: &str) -> Result<Document> {
        let db = self.db.lock().await;
        self.record_history(&db).await?;
        SqliteContentRepository::new(db.connection()).update_document(id, content)
    }

    /// Soft-delete a document.
    pub async fn delete_document(&self, id: &DocumentId) -> Result<()> {
        let db = self.db.lock().await;
        self.record_history(&db).await?;
        SqliteContentRepository::new(db.connection()).delete_document(id)
    }

    /// Create a template.
    pub async fn create_template(&self, name: &str, content: &str) -> Result<Template> {
        let db = self.db.lock().await;
        self.record_history(&db).await?;
        SqliteContentRepository::new(db.connection()).create_template(name, content)
    }

    /// List templates newest-first.
    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let db = self.db.lock().await;
        SqliteContentRepository::new(db.connection()).list_templates()
    }

    // -----------------------------------------------------------------
    // Time travel
    // -----------------------------------------------------------------

    /// Undo the latest edit. Returns `false` when there is nothing to undo.
    pub async fn undo(&self) -> Result<bool> {
        let db = self.db.lock().await;
        let mut history = self.history.lock().await;
        let repo = SqliteHistoryRepository::new(db.connection());
        RestorePipeline::new(&db, &self.gate, &self.reload_hub).undo(&mut history, &repo)
    }

    /// Reapply the latest undone edit. Returns `false` when there is nothing
    /// to redo.
    pub async fn redo(&self) -> Result<bool> {
        let db = self.db.lock().await;
        let mut history = self.history.lock().await;
        let repo = SqliteHistoryRepository::new(db.connection());
        RestorePipeline::new(&db, &self.gate, &self.reload_hub).redo(&mut history, &repo)
    }

    /// Current `{can_undo, can_redo}` pair.
    pub async fn history_state(&self) -> Result<HistorySignal> {
        let db = self.db.lock().await;
        let repo = SqliteHistoryRepository::new(db.connection());
        self.history.lock().await.state(&repo)
    }

    // -----------------------------------------------------------------
    // Snapshots, saved versions, and file transfer
    // -----------------------------------------------------------------

    /// Capture the current full state as a snapshot (read-only).
    pub async fn capture_snapshot(&self) -> Result<Snapshot> {
        let db = self.db.lock().await;
        StateSerializer::capture(&db)
    }

    /// Save the current state as a named version.
    pub async fn save_version(&self, label: &str) -> Result<NamedSnapshot> {
        if self.gate.is_restoring() {
            return Err(Error::InvalidInput(
                "cannot save a version while a restore is in progress".to_string(),
            ));
        }
        let label = label.trim();
        if label.is_empty() {
            return Err(Error::InvalidInput("version label is empty".to_string()));
        }

        let db = self.db.lock().await;
        let snapshot = StateSerializer::capture(&db)?;
        let version = NamedSnapshot::new(label, snapshot);
        SqliteHistoryRepository::new(db.connection()).save_version(&version)?;
        tracing::info!(label, "Saved named version");
        Ok(version)
    }

    /// List saved versions newest-first.
    pub async fn list_versions(&self) -> Result<Vec<NamedSnapshot>> {
        let db = self.db.lock().await;
        SqliteHistoryRepository::new(db.connection()).list_versions()
    }

    /// Delete a saved version.
    pub async fn delete_version(&self, id: &VersionId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteHistoryRepository::new(db.connection()).delete_version(id)
    }

    /// Restore a saved version wholesale.
    pub async fn restore_version(&self, id: &VersionId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteHistoryRepository::new(db.connection());
        let version = repo
            .get_version(id)?
            .ok_or_else(|| Error::NotFound(id.as_str()))?;

        RestorePipeline::new(&db, &self.gate, &self.reload_hub)
            .restore_snapshot(&version.snapshot, RestoreOrigin::SavedVersion)
    }

    /// Export the current state as a snapshot file.
    pub async fn export_to_file(&self, path: &Path) -> Result<Snapshot> {
        let snapshot = self.capture_snapshot().await?;
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(snapshot)
    }

    /// Import a snapshot file and restore it wholesale.
    pub async fn import_from_file(&self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: Snapshot =
            serde_json::from_str(&raw).map_err(|error| Error::CorruptPayload(error.to_string()))?;

        let db = self.db.lock().await;
        RestorePipeline::new(&db, &self.gate, &self.reload_hub)
            .restore_snapshot(&snapshot, RestoreOrigin::FileImport)
    }

    // -----------------------------------------------------------------
    // Backup sync
    // -----------------------------------------------------------------

    /// Instant of the most recent content mutation (Unix ms).
    pub async fn latest_update_timestamp(&self) -> Result<i64> {
        let db = self.db.lock().await;
        db.latest_update_timestamp()
    }

    /// Overwrite the remote backup with the current local state.
    pub async fn push_backup(&self, provider: &impl BackupProvider) -> Result<()> {
        let (snapshot, timestamp) = {
            let db = self.db.lock().await;
            (StateSerializer::capture(&db)?, db.latest_update_timestamp()?)
        };

        provider.push(&snapshot, timestamp).await?;
        tracing::info!(content_timestamp = timestamp, "Pushed backup to remote");
        Ok(())
    }

    /// Run one backup check cycle.
    pub async fn check_backup<P: BackupProvider>(
        &self,
        monitor: &mut BackupSyncMonitor<P>,
    ) -> Result<CheckOutcome> {
        let local_timestamp = self.latest_update_timestamp().await?;
        Ok(monitor.check(local_timestamp).await)
    }

    /// Apply the human decision for a pending divergence.
    ///
    /// Returns `true` when the remote backup was adopted. Keeping local
    /// makes no state change and records no history entry.
    pub async fn resolve_divergence<P: BackupProvider>(
        &self,
        monitor: &mut BackupSyncMonitor<P>,
        divergence: &Divergence,
        decision: DivergenceDecision,
    ) -> Result<bool> {
        let adopted = match ConflictResolver::resolve(divergence, decision) {
            Some(snapshot) => {
                let db = self.db.lock().await;
                RestorePipeline::new(&db, &self.gate, &self.reload_hub)
                    .restore_snapshot(&snapshot, RestoreOrigin::RemoteBackup)?;
                tracing::info!("Adopted remote backup");
                true
            }
            None => {
                tracing::info!("Kept local state; remote divergence discarded");
                false
            }
        };

        monitor.decision_made();
        Ok(adopted)
    }

    /// Destructively clear all content, history, and saved versions.
    pub async fn wipe(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.wipe()?;

        let repo = SqliteHistoryRepository::new(db.connection());
        self.history.lock().await.clear(&repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::MemoryBackupProvider;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn edits_then_undo_then_redo_roundtrip() {
        let service = StudioService::open_in_memory().unwrap();

        let doc = service
            .create_document(None, "Chapter 1", "draft one")
            .await
            .unwrap();
        service.update_document(&doc.id, "draft two").await.unwrap();
        service.update_document(&doc.id, "draft three").await.unwrap();

        assert_eq!(
            service.get_document(&doc.id).await.unwrap().unwrap().content,
            "draft three"
        );

        // Walk all the way back to the empty store
        assert!(service.undo().await.unwrap());
        assert_eq!(
            service.get_document(&doc.id).await.unwrap().unwrap().content,
            "draft two"
        );
        assert!(service.undo().await.unwrap());
        assert_eq!(
            service.get_document(&doc.id).await.unwrap().unwrap().content,
            "draft one"
        );
        assert!(service.undo().await.unwrap());
        assert!(service.get_document(&doc.id).await.unwrap().is_none());
        assert!(!service.undo().await.unwrap());

        // And forward again, in original order
        assert!(service.redo().await.unwrap());
        assert_eq!(
            service.get_document(&doc.id).await.unwrap().unwrap().content,
            "draft one"
        );
        assert!(service.redo().await.unwrap());
        assert!(service.redo().await.unwrap());
        assert_eq!(
            service.get_document(&doc.id).await.unwrap().unwrap().content,
            "draft three"
        );
        assert!(!service.redo().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn new_edit_after_undo_clears_redo() {
        let service = StudioService::open_in_memory().unwrap();

        let doc = service.create_document(None, "Doc", "one").await.unwrap();
        service.update_document(&doc.id, "two").await.unwrap();
        service.undo().await.unwrap();
        assert!(service.history_state().await.unwrap().can_redo);

        service.update_document(&doc.id, "branch").await.unwrap();
        let signal = service.history_state().await.unwrap();
        assert!(signal.can_undo);
        assert!(!signal.can_redo);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capture_path_is_a_noop_while_restoring() {
        let service = StudioService::open_in_memory().unwrap();
        service.create_document(None, "Doc", "one").await.unwrap();

        let gate = service.restore_gate();
        let guard = gate.enter();
        service.create_document(None, "Doc2", "two").await.unwrap();
        drop(guard);

        // The gated mutation recorded no history entry: the only undo step
        // left is the empty-store capture from before the first document
        assert!(service.undo().await.unwrap());
        assert!(service.list_documents(None).await.unwrap().is_empty());
        assert!(!service.history_state().await.unwrap().can_undo);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_version_is_rejected_while_restoring() {
        let service = StudioService::open_in_memory().unwrap();
        let gate = service.restore_gate();
        let _guard = gate.enter();

        let error = service.save_version("mid-restore").await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn saved_version_restores_wholesale_without_history_entry() {
        let service = StudioService::open_in_memory().unwrap();

        let doc = service.create_document(None, "Doc", "keep me").await.unwrap();
        let version = service.save_version("checkpoint").await.unwrap();

        service.update_document(&doc.id, "overwritten").await.unwrap();
        let history_before = service.history_state().await.unwrap();

        service.restore_version(&version.id).await.unwrap();
        assert_eq!(
            service.get_document(&doc.id).await.unwrap().unwrap().content,
            "keep me"
        );
        // Restoring a version is not itself an undoable edit
        assert_eq!(service.history_state().await.unwrap(), history_before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn export_then_import_restores_state() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("studio.snapshot.json");

        let service = StudioService::open_in_memory().unwrap();
        let doc = service.create_document(None, "Doc", "exported").await.unwrap();
        service.export_to_file(&path).await.unwrap();

        service.update_document(&doc.id, "changed since").await.unwrap();
        service.import_from_file(&path).await.unwrap();

        assert_eq!(
            service.get_document(&doc.id).await.unwrap().unwrap().content,
            "exported"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn import_of_garbage_fails_and_leaves_state() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.snapshot.json");
        std::fs::write(&path, "][").unwrap();

        let service = StudioService::open_in_memory().unwrap();
        let doc = service.create_document(None, "Doc", "safe").await.unwrap();

        let error = service.import_from_file(&path).await.unwrap_err();
        assert!(matches!(error, Error::CorruptPayload(_)));
        assert!(!service.restoring());
        assert_eq!(
            service.get_document(&doc.id).await.unwrap().unwrap().content,
            "safe"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backup_check_and_adopt_roundtrip() {
        // "Device A" pushes a backup
        let device_a = StudioService::open_in_memory().unwrap();
        let doc = device_a
            .create_document(None, "Doc", "written on A")
            .await
            .unwrap();
        let provider = MemoryBackupProvider::default();
        device_a.push_backup(&provider).await.unwrap();

        // "Device B" has older content
        let device_b = StudioService::open_in_memory().unwrap();
        let mut monitor = BackupSyncMonitor::new(provider);

        let outcome = device_b.check_backup(&mut monitor).await.unwrap();
        let CheckOutcome::Diverged(divergence) = outcome else {
            panic!("expected divergence, got {outcome:?}");
        };

        let reloads = Arc::new(AtomicUsize::new(0));
        {
            let reloads = Arc::clone(&reloads);
            device_b.subscribe_store_replaced(move |origin| {
                assert_eq!(origin, RestoreOrigin::RemoteBackup);
                reloads.fetch_add(1, Ordering::SeqCst);
            });
        }

        let adopted = device_b
            .resolve_divergence(&mut monitor, &divergence, DivergenceDecision::AdoptRemote)
            .await
            .unwrap();
        assert!(adopted);
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
        assert_eq!(
            device_b.get_document(&doc.id).await.unwrap().unwrap().content,
            "written on A"
        );

        // Decision made: next check sees no divergence
        let outcome = device_b.check_backup(&mut monitor).await.unwrap();
        assert_eq!(outcome, CheckOutcome::UpToDate);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_local_discards_divergence_without_changes() {
        let remote_service = StudioService::open_in_memory().unwrap();
        remote_service
            .create_document(None, "Doc", "remote text")
            .await
            .unwrap();
        let provider = MemoryBackupProvider::default();
        remote_service.push_backup(&provider).await.unwrap();

        let local = StudioService::open_in_memory().unwrap();
        let mut monitor = BackupSyncMonitor::new(provider);
        let outcome = local.check_backup(&mut monitor).await.unwrap();
        let CheckOutcome::Diverged(divergence) = outcome else {
            panic!("expected divergence");
        };

        let adopted = local
            .resolve_divergence(&mut monitor, &divergence, DivergenceDecision::KeepLocal)
            .await
            .unwrap();
        assert!(!adopted);
        assert!(local.list_documents(None).await.unwrap().is_empty());
        assert!(!local.history_state().await.unwrap().can_undo);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn history_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("quill.db");

        {
            let service = StudioService::open_path(&path).unwrap();
            service.create_document(None, "Doc", "persisted").await.unwrap();
            assert!(service.history_state().await.unwrap().can_undo);
        }

        let reopened = StudioService::open_path(&path).unwrap();
        assert!(reopened.history_state().await.unwrap().can_undo);
        assert!(reopened.undo().await.unwrap());
        assert!(reopened.list_documents(None).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wipe_and_reopen_recovers_unreadable_store() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("quill.db");
        std::fs::write(&path, b"definitely not sqlite").unwrap();
        std::fs::write(tmp.path().join("quill.db-wal"), b"wal").unwrap();

        assert!(matches!(
            StudioService::open_path(&path),
            Err(Error::StoreUnavailable(_))
        ));

        let service = StudioService::wipe_and_reopen(&path).unwrap();
        assert!(service.list_documents(None).await.unwrap().is_empty());

        // The corrupted file was quarantined, not silently destroyed
        let quarantined = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("quill.db.corrupt-")
            });
        assert!(quarantined);
    }
}
