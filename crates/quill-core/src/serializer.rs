//! State serializer
//!
//! Converts the entire local store into one opaque, versioned payload and
//! back. Capture is a full dump of every content table taken inside a single
//! transaction; apply is a wholesale replace that either fully succeeds or
//! leaves the store exactly as it was.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::{book_from_row, document_from_row, template_from_row, Database};
use crate::error::{Error, Result};
use crate::models::{Book, Document, Snapshot, Template};

/// Current snapshot payload schema version
pub const PAYLOAD_VERSION: u32 = 1;

/// The versioned snapshot envelope.
///
/// Field order and deterministic row order (by id) make the payload
/// round-trippable: serialize, deserialize, serialize again yields
/// byte-identical output. New fields must carry `#[serde(default)]` so a
/// newer engine can still apply an older snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StatePayload {
    version: u32,
    #[serde(default)]
    books: Vec<Book>,
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    templates: Vec<Template>,
}

/// Full-state capture and wholesale restore over the local store
pub struct StateSerializer;

impl StateSerializer {
    /// Capture every content record as one snapshot.
    ///
    /// Reads run inside a single transaction so no table can be mutated
    /// mid-capture. History and saved-version tables are deliberately
    /// excluded: they are metadata about history, not content.
    pub fn capture(db: &Database) -> Result<Snapshot> {
        let conn = db.connection();
        let tx = conn.unchecked_transaction()?;

        let mut stmt = tx.prepare(
            "SELECT id, title, description, created_at, updated_at, is_deleted
             FROM books ORDER BY id",
        )?;
        let books = stmt
            .query_map([], book_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = tx.prepare(
            "SELECT id, book_id, title, content, created_at, updated_at, is_deleted
             FROM documents ORDER BY id",
        )?;
        let documents = stmt
            .query_map([], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = tx.prepare(
            "SELECT id, name, content, created_at, updated_at, is_deleted
             FROM templates ORDER BY id",
        )?;
        let templates = stmt
            .query_map([], template_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // The read-only transaction rolls back on scope exit
        let payload = StatePayload {
            version: PAYLOAD_VERSION,
            books,
            documents,
            templates,
        };

        Ok(Snapshot::new(serde_json::to_string(&payload)?))
    }

    /// Replace all content tables wholesale from a snapshot.
    ///
    /// Fails with [`Error::CorruptPayload`] before touching the store if the
    /// payload cannot be parsed, and with [`Error::StoreWrite`] if the
    /// destination rejects the write, in which case the transaction rolls
    /// back and readers keep seeing the pre-apply state.
    pub fn apply(db: &Database, snapshot: &Snapshot) -> Result<()> {
        let tx = db
            .connection()
            .unchecked_transaction()
            .map_err(|error| Error::StoreWrite(error.to_string()))?;

        Self::apply_within(&tx, snapshot)?;

        tx.commit()
            .map_err(|error| Error::StoreWrite(error.to_string()))?;
        Ok(())
    }

    /// Replace all content tables inside a caller-owned transaction.
    ///
    /// The caller commits (or rolls back) the transaction, so further writes
    /// can be made atomic with the replace.
    pub(crate) fn apply_within(
        tx: &rusqlite::Transaction<'_>,
        snapshot: &Snapshot,
    ) -> Result<()> {
        let payload: StatePayload = serde_json::from_str(&snapshot.payload)
            .map_err(|error| Error::CorruptPayload(error.to_string()))?;

        if payload.version == 0 || payload.version > PAYLOAD_VERSION {
            return Err(Error::CorruptPayload(format!(
                "unsupported payload version {}",
                payload.version
            )));
        }

        Self::replace_tables(tx, &payload).map_err(|error| match error {
            Error::Sqlite(e) => Error::StoreWrite(e.to_string()),
            other => other,
        })?;

        tracing::debug!(
            books = payload.books.len(),
            documents = payload.documents.len(),
            templates = payload.templates.len(),
            "Applied snapshot to store"
        );
        Ok(())
    }

    fn replace_tables(tx: &rusqlite::Transaction<'_>, payload: &StatePayload) -> Result<()> {
        // Children before parents: documents reference books
        tx.execute("DELETE FROM documents", [])?;
        tx.execute("DELETE FROM books", [])?;
        tx.execute("DELETE FROM templates", [])?;

        for book in &payload.books {
            tx.execute(
                "INSERT INTO books (id, title, description, created_at, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    book.id.as_str(),
                    book.title,
                    book.description,
                    book.created_at,
                    book.updated_at,
                    i32::from(book.is_deleted)
                ],
            )?;
        }

        for document in &payload.documents {
            tx.execute(
                "INSERT INTO documents (id, book_id, title, content, created_at, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    document.id.as_str(),
                    document.book_id.map(|id| id.as_str()),
                    document.title,
                    document.content,
                    document.created_at,
                    document.updated_at,
                    i32::from(document.is_deleted)
                ],
            )?;
        }

        for template in &payload.templates {
            tx.execute(
                "INSERT INTO templates (id, name, content, created_at, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    template.id.as_str(),
                    template.name,
                    template.content,
                    template.created_at,
                    template.updated_at,
                    i32::from(template.is_deleted)
                ],
            )?;
        }

        Ok(())
    }
}
