//! History persistence implementation
//!
//! Undo/redo stacks and saved versions live in their own tables, stored
//! independently of the content they describe. They are excluded from
//! snapshot capture so a restore can never clobber the history that would
//! undo it.

use crate::error::Result;
use crate::models::{NamedSnapshot, Snapshot, VersionId};
use rusqlite::{params, Connection};

/// Persistence record keys for the two history stacks
const UNDO_STACK_KEY: &str = "undoStack";
const REDO_STACK_KEY: &str = "redoStack";

/// Trait for history storage operations
pub trait HistoryRepository {
    /// Load both stacks, oldest entry first; empty stacks if never saved
    fn load_stacks(&self) -> Result<(Vec<Snapshot>, Vec<Snapshot>)>;

    /// Persist both stacks atomically
    fn save_stacks(&self, undo: &[Snapshot], redo: &[Snapshot]) -> Result<()>;

    /// Persist a user-named version
    fn save_version(&self, version: &NamedSnapshot) -> Result<()>;

    /// Get a saved version by ID
    fn get_version(&self, id: &VersionId) -> Result<Option<NamedSnapshot>>;

    /// List saved versions, newest first
    fn list_versions(&self) -> Result<Vec<NamedSnapshot>>;

    /// Delete a saved version
    fn delete_version(&self, id: &VersionId) -> Result<()>;
}

/// `SQLite` implementation of `HistoryRepository`
pub struct SqliteHistoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteHistoryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn load_stack(&self, key: &str) -> Result<Vec<Snapshot>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM history WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|error| match error {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}

impl HistoryRepository for SqliteHistoryRepository<'_> {
    fn load_stacks(&self) -> Result<(Vec<Snapshot>, Vec<Snapshot>)> {
        Ok((
            self.load_stack(UNDO_STACK_KEY)?,
            self.load_stack(REDO_STACK_KEY)?,
        ))
    }

    fn save_stacks(&self, undo: &[Snapshot], redo: &[Snapshot]) -> Result<()> {
        let undo_raw = serde_json::to_string(undo)?;
        let redo_raw = serde_json::to_string(redo)?;

        // Inside a caller-owned transaction (e.g. a restore), the writes
        // join it; otherwise the two inserts get their own
        if self.conn.is_autocommit() {
            let tx = self.conn.unchecked_transaction()?;
            write_stacks(&tx, &undo_raw, &redo_raw)?;
            tx.commit()?;
        } else {
            write_stacks(self.conn, &undo_raw, &redo_raw)?;
        }
        Ok(())
    }

    fn save_version(&self, version: &NamedSnapshot) -> Result<()> {
        self.conn.execute(
            "INSERT INTO saved_versions (id, label, payload, captured_at)
             VALUES (?, ?, ?, ?)",
            params![
                version.id.as_str(),
                version.label,
                version.snapshot.payload,
                version.snapshot.captured_at
            ],
        )?;
        Ok(())
    }

    fn get_version(&self, id: &VersionId) -> Result<Option<NamedSnapshot>> {
        let result = self.conn.query_row(
            "SELECT id, label, payload, captured_at FROM saved_versions WHERE id = ?",
            params![id.as_str()],
            version_from_row,
        );

        match result {
            Ok(version) => Ok(Some(version)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_versions(&self) -> Result<Vec<NamedSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, label, payload, captured_at
             FROM saved_versions
             ORDER BY captured_at DESC",
        )?;

        let versions = stmt
            .query_map([], version_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    fn delete_version(&self, id: &VersionId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM saved_versions WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }
}

fn write_stacks(conn: &Connection, undo_raw: &str, redo_raw: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO history (key, value) VALUES (?, ?)",
        params![UNDO_STACK_KEY, undo_raw],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO history (key, value) VALUES (?, ?)",
        params![REDO_STACK_KEY, redo_raw],
    )?;
    Ok(())
}

fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NamedSnapshot> {
    let id: String = row.get(0)?;
    Ok(NamedSnapshot {
        id: id.parse().unwrap_or_default(),
        label: row.get(1)?,
        snapshot: Snapshot {
            payload: row.get(2)?,
            captured_at: row.get(3)?,
        },
    })
}
