//! Content repository implementation

use crate::error::{Error, Result};
use crate::models::{Book, BookId, Document, DocumentId, Template};
use rusqlite::{params, Connection, Row};

/// Trait for content storage operations
pub trait ContentRepository {
    /// Create a new book
    fn create_book(&self, title: &str, description: &str) -> Result<Book>;

    /// Get a book by ID
    fn get_book(&self, id: &BookId) -> Result<Option<Book>>;

    /// List books (excluding deleted), newest first
    fn list_books(&self) -> Result<Vec<Book>>;

    /// Update a book's title and description
    fn update_book(&self, id: &BookId, title: &str, description: &str) -> Result<Book>;

    /// Soft delete a book
    fn delete_book(&self, id: &BookId) -> Result<()>;

    /// Create a new document, optionally inside a book
    fn create_document(
        &self,
        book_id: Option<&BookId>,
        title: &str,
        content: &str,
    ) -> Result<Document>;

    /// Get a document by ID
    fn get_document(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// List documents (excluding deleted), newest first; optionally filtered by book
    fn list_documents(&self, book_id: Option<&BookId>) -> Result<Vec<Document>>;

    /// Update a document's content
    fn update_document(&self, id: &DocumentId, content: &str) -> Result<Document>;

    /// Soft delete a document
    fn delete_document(&self, id: &DocumentId) -> Result<()>;

    /// Create a new template
    fn create_template(&self, name: &str, content: &str) -> Result<Template>;

    /// List templates (excluding deleted), newest first
    fn list_templates(&self) -> Result<Vec<Template>>;
}

/// `SQLite` implementation of `ContentRepository`
pub struct SqliteContentRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteContentRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

/// Parse a book from a database row
pub(crate) fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    let id: String = row.get(0)?;
    Ok(Book {
        id: id.parse().unwrap_or_default(),
        title: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        is_deleted: row.get::<_, i32>(5)? != 0,
    })
}

/// Parse a document from a database row
pub(crate) fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    let id: String = row.get(0)?;
    let book_id: Option<String> = row.get(1)?;
    Ok(Document {
        id: id.parse().unwrap_or_default(),
        book_id: book_id.and_then(|raw| raw.parse().ok()),
        title: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        is_deleted: row.get::<_, i32>(6)? != 0,
    })
}

/// Parse a template from a database row
pub(crate) fn template_from_row(row: &Row<'_>) -> rusqlite::Result<Template> {
    let id: String = row.get(0)?;
    Ok(Template {
        id: id.parse().unwrap_or_default(),
        name: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        is_deleted: row.get::<_, i32>(5)? != 0,
    })
}

impl ContentRepository for SqliteContentRepository<'_> {
    fn create_book(&self, title: &str, description: &str) -> Result<Book> {
        let mut book = Book::new(title);
        book.description = description.to_string();

        self.conn.execute(
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

        Ok(book)
    }

    fn get_book(&self, id: &BookId) -> Result<Option<Book>> {
        let result = self.conn.query_row(
            "SELECT id, title, description, created_at, updated_at, is_deleted
             FROM books WHERE id = ? AND is_deleted = 0",
            params![id.as_str()],
            book_from_row,
        );

        match result {
            Ok(book) => Ok(Some(book)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_books(&self) -> Result<Vec<Book>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, created_at, updated_at, is_deleted
             FROM books
             WHERE is_deleted = 0
             ORDER BY updated_at DESC",
        )?;

        let books = stmt
            .query_map([], book_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(books)
    }

    fn update_book(&self, id: &BookId, title: &str, description: &str) -> Result<Book> {
        let now = chrono::Utc::now().timestamp_millis();
        let changed = self.conn.execute(
            "UPDATE books SET title = ?, description = ?, updated_at = ?
             WHERE id = ? AND is_deleted = 0",
            params![title, description, now, id.as_str()],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(id.as_str()));
        }

        self.get_book(id)?
            .ok_or_else(|| Error::NotFound(id.as_str()))
    }

    fn delete_book(&self, id: &BookId) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let changed = self.conn.execute(
            "UPDATE books SET is_deleted = 1, updated_at = ?
             WHERE id = ? AND is_deleted = 0",
            params![now, id.as_str()],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(id.as_str()));
        }
        Ok(())
    }

    fn create_document(
        &self,
        book_id: Option<&BookId>,
        title: &str,
        content: &str,
    ) -> Result<Document> {
        let document = match book_id {
            Some(book_id) => Document::in_book(*book_id, title, content),
            None => Document::new(title, content),
        };

        self.conn.execute(
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

        Ok(document)
    }

    fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
        let result = self.conn.query_row(
            "SELECT id, book_id, title, content, created_at, updated_at, is_deleted
             FROM documents WHERE id = ? AND is_deleted = 0",
            params![id.as_str()],
            document_from_row,
        );

        match result {
            Ok(document) => Ok(Some(document)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_documents(&self, book_id: Option<&BookId>) -> Result<Vec<Document>> {
        let query = "SELECT id, book_id, title, content, created_at, updated_at, is_deleted
             FROM documents
             WHERE is_deleted = 0";

        if let Some(book_id) = book_id {
            let mut stmt = self
                .conn
                .prepare(&format!("{query} AND book_id = ? ORDER BY updated_at DESC"))?;
            let documents = stmt
                .query_map(params![book_id.as_str()], document_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            return Ok(documents);
        }

        let mut stmt = self
            .conn
            .prepare(&format!("{query} ORDER BY updated_at DESC"))?;
        let documents = stmt
            .query_map([], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    fn update_document(&self, id: &DocumentId, content: &str) -> Result<Document> {
        let now = chrono::Utc::now().timestamp_millis();
        let changed = self.conn.execute(
            "UPDATE documents SET content = ?, updated_at = ?
             WHERE id = ? AND is_deleted = 0",
            params![content, now, id.as_str()],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(id.as_str()));
        }

        self.get_document(id)?
            .ok_or_else(|| Error::NotFound(id.as_str()))
    }

    fn delete_document(&self, id: &DocumentId) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let changed = self.conn.execute(
            "UPDATE documents SET is_deleted = 1, updated_at = ?
             WHERE id = ? AND is_deleted = 0",
            params![now, id.as_str()],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(id.as_str()));
        }
        Ok(())
    }

    fn create_template(&self, name: &str, content: &str) -> Result<Template> {
        let template = Template::new(name, content);

        self.conn.execute(
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

        Ok(template)
    }

    fn list_templates(&self) -> Result<Vec<Template>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, content, created_at, updated_at, is_deleted
             FROM templates
             WHERE is_deleted = 0
             ORDER BY updated_at DESC",
        )?;

        let templates = stmt
            .query_map([], template_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(templates)
    }
}
