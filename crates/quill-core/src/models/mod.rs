//! Data models for Quill

mod backup;
mod book;
mod document;
mod snapshot;
mod template;

pub use backup::RemoteBackup;
pub use book::{Book, BookId};
pub use document::{Document, DocumentId};
pub use snapshot::{NamedSnapshot, Snapshot, VersionId};
pub use template::{Template, TemplateId};
