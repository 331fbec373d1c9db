//! Database layer for Quill

mod connection;
mod history_repository;
mod migrations;
mod repository;

pub use connection::Database;
pub use history_repository::{HistoryRepository, SqliteHistoryRepository};
pub use repository::{ContentRepository, SqliteContentRepository};

pub(crate) use repository::{book_from_row, document_from_row, template_from_row};
