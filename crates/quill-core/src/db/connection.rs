//! Database connection management

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;

use super::migrations;

/// Wrapper around the embedded `SQLite` store holding all studio content
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist.
    ///
    /// Runs migrations automatically. A store that cannot be opened or
    /// migrated is reported as [`Error::StoreUnavailable`]; the only recovery
    /// path from that is an explicit, user-confirmed wipe.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|error| Error::StoreUnavailable(error.to_string()))?;
        Self::initialize(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|error| Error::StoreUnavailable(error.to_string()))?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        let database = Self { conn };
        database
            .configure()
            .map_err(|error| Error::StoreUnavailable(error.to_string()))?;
        migrations::run(&database.conn)
            .map_err(|error| Error::StoreUnavailable(error.to_string()))?;
        Ok(database)
    }

    /// Configure `SQLite` for durability and concurrency
    fn configure(&self) -> Result<()> {
        // WAL is unsupported for in-memory databases; ignore the failure
        self.conn
            .pragma_update(None, "journal_mode", "WAL")
            .ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL").ok();
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Instant of the most recent content mutation (Unix ms).
    ///
    /// Soft deletes bump `updated_at` and therefore count as mutations.
    /// Returns 0 for an empty store. History and saved-version tables are
    /// metadata, not content, and are not consulted.
    pub fn latest_update_timestamp(&self) -> Result<i64> {
        let latest = self.conn.query_row(
            "SELECT COALESCE(MAX(updated_at), 0) FROM (
                SELECT updated_at FROM books
                UNION ALL SELECT updated_at FROM documents
                UNION ALL SELECT updated_at FROM templates
            )",
            [],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    /// Destructively clear every table: content, history, and saved versions.
    ///
    /// Last-resort recovery only; callers must have explicit user consent.
    pub fn wipe(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        // Children before parents: documents reference books
        for table in [
            "documents",
            "books",
            "templates",
            "history",
            "saved_versions",
        ] {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        tx.commit()?;
        tracing::warn!("Wiped local store");
        Ok(())
    }
}
