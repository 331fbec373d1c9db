//! Core library for Quill, a local-first personal writing studio.
//!
//! Everything revolves around one idea: the local store is the single source
//! of truth, and every destructive transition moves through full-state
//! snapshots. Undo/redo, named versions, file import, and remote backup
//! adoption are all the same operation, a wholesale snapshot restore, with
//! different origins.

pub mod db;
pub mod error;
pub mod history;
pub mod models;
pub mod restore;
pub mod serializer;
pub mod services;
pub mod sync;

pub use error::{Error, Result};
pub use history::{HistorySignal, SnapshotHistory, DEFAULT_HISTORY_CAPACITY};
pub use models::{
    Book, BookId, Document, DocumentId, NamedSnapshot, RemoteBackup, Snapshot, Template,
    TemplateId, VersionId,
};
pub use restore::{ReloadHub, RestoreGate, RestoreOrigin, RestorePipeline};
pub use serializer::StateSerializer;
pub use services::StudioService;
pub use sync::{
    BackupProvider, BackupSyncMonitor, CheckOutcome, CheckState, ConflictResolver, Divergence,
    DivergenceDecision, FileBackupProvider, HttpBackupProvider,
};
