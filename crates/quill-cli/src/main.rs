//! Quill CLI - Command-line interface for the Quill writing studio
//!
//! Books, documents, time travel, and backups from the terminal.

use std::env;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};
use quill_core::{
    BackupProvider, BackupSyncMonitor, Book, BookId, CheckOutcome, Divergence, DivergenceDecision,
    Document, DocumentId, FileBackupProvider, HttpBackupProvider, NamedSnapshot, RemoteBackup,
    Snapshot, StudioService, VersionId,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "A local-first personal writing studio")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Backup file path (alternative to the hosted backup endpoint)
    #[arg(long, global = true, value_name = "PATH")]
    backup_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage books
    Book {
        #[command(subcommand)]
        command: BookCommands,
    },
    /// Manage documents
    #[command(alias = "document")]
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },
    /// Undo the latest edit
    Undo,
    /// Reapply the latest undone edit
    Redo,
    /// Show undo/redo availability and last-edit time
    Status,
    /// Manage named saved versions
    Version {
        #[command(subcommand)]
        command: VersionCommands,
    },
    /// Export the full studio state to a snapshot file
    Export {
        /// Output path
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
    /// Import a snapshot file, replacing the full studio state
    Import {
        /// Snapshot file to import
        path: PathBuf,
    },
    /// Manage the remote backup
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Delete all content, history, and saved versions
    Wipe {
        /// Confirm the destructive wipe
        #[arg(long)]
        yes: bool,
    },
    /// Quarantine an unreadable database file and start fresh
    Recover {
        /// Confirm the destructive recovery
        #[arg(long)]
        yes: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BookCommands {
    /// Create a new book
    #[command(alias = "new")]
    Add {
        /// Book title
        title: String,
        /// Back-cover description
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List books
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a book
    #[command(alias = "delete")]
    Rm {
        /// Book ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
enum DocCommands {
    /// Create a new document
    #[command(alias = "new")]
    Add {
        /// Document title
        title: String,
        /// Owning book ID or unique ID prefix
        #[arg(long, value_name = "BOOK")]
        book: Option<String>,
        /// Document content (stdin or $EDITOR when omitted)
        content: Vec<String>,
    },
    /// List documents
    List {
        /// Filter by owning book ID or unique ID prefix
        #[arg(long, value_name = "BOOK")]
        book: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a document's content
    Show {
        /// Document ID or unique ID prefix
        id: String,
    },
    /// Edit a document's content in $EDITOR
    Edit {
        /// Document ID or unique ID prefix
        id: String,
    },
    /// Delete a document
    #[command(alias = "delete")]
    Rm {
        /// Document ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
enum VersionCommands {
    /// Save the current state under a label
    Save {
        /// Version label
        label: String,
    },
    /// List saved versions
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore a saved version wholesale
    Restore {
        /// Version ID, unique ID prefix, or exact label
        version: String,
    },
    /// Delete a saved version
    #[command(alias = "delete")]
    Rm {
        /// Version ID, unique ID prefix, or exact label
        version: String,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Overwrite the remote backup with the current local state
    Push,
    /// Check whether the remote backup has newer content
    Check,
    /// Adopt the remote backup, replacing local state
    Adopt {
        /// Confirm replacing local state
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] quill_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No document content provided")]
    EmptyContent,
    #[error("Edited document content cannot be empty")]
    EmptyEditedContent,
    #[error("Identifier cannot be empty")]
    EmptyIdentifier,
    #[error("Book not found for id/prefix: {0}")]
    BookNotFound(String),
    #[error("Document not found for id/prefix: {0}")]
    DocumentNotFound(String),
    #[error("Version not found for id/prefix/label: {0}")]
    VersionNotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error(
        "Backup is not configured. Pass --backup-file, or set QUILL_BACKUP_ENDPOINT (and \
         optionally QUILL_BACKUP_TOKEN) to enable `quill backup`."
    )]
    BackupNotConfigured,
    #[error("Remote backup has no newer content; nothing to adopt")]
    NothingToAdopt,
    #[error("Backup check failed; try again later")]
    BackupCheckFailed,
    #[error("Refusing to proceed without --yes")]
    ConfirmationRequired,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

/// Backup provider selected from flags and environment
enum ResolvedProvider {
    File(FileBackupProvider),
    Http(HttpBackupProvider),
}

impl BackupProvider for ResolvedProvider {
    async fn fetch_latest(&self) -> quill_core::Result<Option<RemoteBackup>> {
        match self {
            Self::File(provider) => provider.fetch_latest().await,
            Self::Http(provider) => provider.fetch_latest().await,
        }
    }

    async fn push(&self, snapshot: &Snapshot, content_timestamp: i64) -> quill_core::Result<()> {
        match self {
            Self::File(provider) => provider.push(snapshot, content_timestamp).await,
            Self::Http(provider) => provider.push(snapshot, content_timestamp).await,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quill=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Book { command } => match command {
            BookCommands::Add { title, description } => {
                run_book_add(&title, &description, &db_path).await?;
            }
            BookCommands::List { json } => run_book_list(json, &db_path).await?,
            BookCommands::Rm { id } => run_book_rm(&id, &db_path).await?,
        },
        Commands::Doc { command } => match command {
            DocCommands::Add {
                title,
                book,
                content,
            } => run_doc_add(&title, book.as_deref(), &content, &db_path).await?,
            DocCommands::List { book, json } => {
                run_doc_list(book.as_deref(), json, &db_path).await?;
            }
            DocCommands::Show { id } => run_doc_show(&id, &db_path).await?,
            DocCommands::Edit { id } => run_doc_edit(&id, &db_path).await?,
            DocCommands::Rm { id } => run_doc_rm(&id, &db_path).await?,
        },
        Commands::Undo => run_undo(&db_path).await?,
        Commands::Redo => run_redo(&db_path).await?,
        Commands::Status => run_status(&db_path).await?,
        Commands::Version { command } => match command {
            VersionCommands::Save { label } => run_version_save(&label, &db_path).await?,
            VersionCommands::List { json } => run_version_list(json, &db_path).await?,
            VersionCommands::Restore { version } => {
                run_version_restore(&version, &db_path).await?;
            }
            VersionCommands::Rm { version } => run_version_rm(&version, &db_path).await?,
        },
        Commands::Export { output } => run_export(&output, &db_path).await?,
        Commands::Import { path } => run_import(&path, &db_path).await?,
        Commands::Backup { command } => {
            let provider = resolve_backup_provider(cli.backup_file)?;
            match command {
                BackupCommands::Push => run_backup_push(provider, &db_path).await?,
                BackupCommands::Check => run_backup_check(provider, &db_path).await?,
                BackupCommands::Adopt { yes } => {
                    run_backup_adopt(provider, yes, &db_path).await?;
                }
            }
        }
        Commands::Wipe { yes } => run_wipe(yes, &db_path).await?,
        Commands::Recover { yes } => run_recover(yes, &db_path)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}

async fn run_book_add(title: &str, description: &str, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let book = service.create_book(title.trim(), description.trim()).await?;
    println!("{}", book.id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct BookListItem {
    id: String,
    title: String,
    description: String,
    updated_at: i64,
    relative_time: String,
}

async fn run_book_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let books = service.list_books().await?;
    let now_ms = Utc::now().timestamp_millis();

    if as_json {
        let items = books
            .iter()
            .map(|book| BookListItem {
                id: book.id.to_string(),
                title: book.title.clone(),
                description: book.description.clone(),
                updated_at: book.updated_at,
                relative_time: format_relative_time(book.updated_at, now_ms),
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for book in &books {
            let short_id = short_id(&book.id.to_string());
            let relative_time = format_relative_time(book.updated_at, now_ms);
            println!("{short_id:<13}  {:<40}  {relative_time}", book.title);
        }
    }

    Ok(())
}

async fn run_book_rm(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let book = resolve_book(id, &service).await?;
    service.delete_book(&book.id).await?;
    println!("{}", book.id);
    Ok(())
}

async fn run_doc_add(
    title: &str,
    book: Option<&str>,
    content_parts: &[String],
    db_path: &Path,
) -> Result<(), CliError> {
    let content = resolve_document_content(content_parts)?;
    let service = StudioService::open_path(db_path)?;

    let book_id = match book {
        Some(query) => Some(resolve_book(query, &service).await?.id),
        None => None,
    };

    let document = service
        .create_document(book_id.as_ref(), title.trim(), &content)
        .await?;
    println!("{}", document.id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct DocumentListItem {
    id: String,
    book_id: Option<String>,
    title: String,
    preview: String,
    updated_at: i64,
    relative_time: String,
}

async fn run_doc_list(book: Option<&str>, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let book_id = match book {
        Some(query) => Some(resolve_book(query, &service).await?.id),
        None => None,
    };
    let documents = service.list_documents(book_id.as_ref()).await?;
    let now_ms = Utc::now().timestamp_millis();

    if as_json {
        let items = documents
            .iter()
            .map(|document| DocumentListItem {
                id: document.id.to_string(),
                book_id: document.book_id.map(|id| id.to_string()),
                title: document.title.clone(),
                preview: document.content_preview(80),
                updated_at: document.updated_at,
                relative_time: format_relative_time(document.updated_at, now_ms),
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for document in &documents {
            let short_id = short_id(&document.id.to_string());
            let relative_time = format_relative_time(document.updated_at, now_ms);
            println!("{short_id:<13}  {:<40}  {relative_time}", document.title);
        }
    }

    Ok(())
}

async fn run_doc_show(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let document = resolve_document(id, &service).await?;
    println!("{}", document.content);
    Ok(())
}

async fn run_doc_edit(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let document = resolve_document(id, &service).await?;

    let Some(edited_content) = capture_editor_input_with_initial(&document.content)? else {
        return Err(CliError::EmptyEditedContent);
    };

    if edited_content == document.content {
        println!("{}", document.id);
        return Ok(());
    }

    let updated = service.update_document(&document.id, &edited_content).await?;
    println!("{}", updated.id);
    Ok(())
}

async fn run_doc_rm(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let document = resolve_document(id, &service).await?;
    service.delete_document(&document.id).await?;
    println!("{}", document.id);
    Ok(())
}

async fn run_undo(db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    if service.undo().await? {
        println!("Undone");
    } else {
        println!("Nothing to undo");
    }
    Ok(())
}

async fn run_redo(db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    if service.redo().await? {
        println!("Redone");
    } else {
        println!("Nothing to redo");
    }
    Ok(())
}

async fn run_status(db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let signal = service.history_state().await?;
    let last_edit = service.latest_update_timestamp().await?;
    let now_ms = Utc::now().timestamp_millis();

    println!("undo: {}", if signal.can_undo { "yes" } else { "no" });
    println!("redo: {}", if signal.can_redo { "yes" } else { "no" });
    if last_edit == 0 {
        println!("last edit: never");
    } else {
        println!("last edit: {}", format_relative_time(last_edit, now_ms));
    }
    Ok(())
}

async fn run_version_save(label: &str, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let version = service.save_version(label).await?;
    println!("{}", version.id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct VersionListItem {
    id: String,
    label: String,
    captured_at: i64,
    relative_time: String,
}

async fn run_version_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let versions = service.list_versions().await?;
    let now_ms = Utc::now().timestamp_millis();

    if as_json {
        let items = versions
            .iter()
            .map(|version| VersionListItem {
                id: version.id.to_string(),
                label: version.label.clone(),
                captured_at: version.snapshot.captured_at,
                relative_time: format_relative_time(version.snapshot.captured_at, now_ms),
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for version in &versions {
            let short_id = short_id(&version.id.to_string());
            let relative_time = format_relative_time(version.snapshot.captured_at, now_ms);
            println!("{short_id:<13}  {:<40}  {relative_time}", version.label);
        }
    }

    Ok(())
}

async fn run_version_restore(query: &str, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let version = resolve_version(query, &service).await?;
    service.restore_version(&version.id).await?;
    println!("{}", version.id);
    Ok(())
}

async fn run_version_rm(query: &str, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let version = resolve_version(query, &service).await?;
    service.delete_version(&version.id).await?;
    println!("{}", version.id);
    Ok(())
}

async fn run_export(output: &Path, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    service.export_to_file(output).await?;
    println!("{}", output.display());
    Ok(())
}

async fn run_import(path: &Path, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    service.import_from_file(path).await?;
    println!("Imported {}", path.display());
    Ok(())
}

async fn run_backup_push(provider: ResolvedProvider, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    service.push_backup(&provider).await?;
    println!("Backup pushed");
    Ok(())
}

async fn run_backup_check(provider: ResolvedProvider, db_path: &Path) -> Result<(), CliError> {
    let service = StudioService::open_path(db_path)?;
    let mut monitor = BackupSyncMonitor::new(provider);

    match service.check_backup(&mut monitor).await? {
        CheckOutcome::UpToDate => println!("Up to date"),
        CheckOutcome::Diverged(divergence) => {
            print_divergence(&divergence);
            println!("Run `quill backup adopt --yes` to replace local state, or ignore to keep it.");
        }
        CheckOutcome::CheckFailed => return Err(CliError::BackupCheckFailed),
    }

    Ok(())
}

async fn run_backup_adopt(
    provider: ResolvedProvider,
    yes: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::ConfirmationRequired);
    }

    let service = StudioService::open_path(db_path)?;
    let mut monitor = BackupSyncMonitor::new(provider);

    match service.check_backup(&mut monitor).await? {
        CheckOutcome::Diverged(divergence) => {
            service
                .resolve_divergence(&mut monitor, &divergence, DivergenceDecision::AdoptRemote)
                .await?;
            println!("Remote backup adopted");
            Ok(())
        }
        CheckOutcome::UpToDate => Err(CliError::NothingToAdopt),
        CheckOutcome::CheckFailed => Err(CliError::BackupCheckFailed),
    }
}

async fn run_wipe(yes: bool, db_path: &Path) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::ConfirmationRequired);
    }

    let service = StudioService::open_path(db_path)?;
    service.wipe().await?;
    println!("Wiped");
    Ok(())
}

fn run_recover(yes: bool, db_path: &Path) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::ConfirmationRequired);
    }

    StudioService::wipe_and_reopen(db_path)?;
    println!("Recovered with a fresh store");
    Ok(())
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "quill", buffer);
}

fn print_divergence(divergence: &Divergence) {
    println!("Remote backup has newer content:");
    println!(
        "  remote content: {}",
        format_instant(divergence.remote.content_timestamp)
    );
    println!(
        "  backup written: {}",
        format_instant(divergence.remote.backup_timestamp)
    );
    println!(
        "  local content:  {}",
        format_instant(divergence.local_timestamp)
    );
}

async fn resolve_book(query: &str, service: &StudioService) -> Result<Book, CliError> {
    let query = normalize_identifier(query)?;

    if let Ok(book_id) = query.parse::<BookId>() {
        if let Some(book) = service
            .list_books()
            .await?
            .into_iter()
            .find(|book| book.id == book_id)
        {
            return Ok(book);
        }
    }

    let matches = service
        .list_books()
        .await?
        .into_iter()
        .filter(|book| book.id.to_string().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::BookNotFound(query)),
        1 => Ok(matches.into_iter().next().unwrap()),
        _ => Err(ambiguous_error(
            &query,
            matches.iter().map(|book| book.id.to_string()),
        )),
    }
}

async fn resolve_document(query: &str, service: &StudioService) -> Result<Document, CliError> {
    let query = normalize_identifier(query)?;

    if let Ok(document_id) = query.parse::<DocumentId>() {
        if let Some(document) = service.get_document(&document_id).await? {
            return Ok(document);
        }
    }

    let matches = service
        .list_documents(None)
        .await?
        .into_iter()
        .filter(|document| document.id.to_string().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::DocumentNotFound(query)),
        1 => Ok(matches.into_iter().next().unwrap()),
        _ => Err(ambiguous_error(
            &query,
            matches.iter().map(|document| document.id.to_string()),
        )),
    }
}

async fn resolve_version(query: &str, service: &StudioService) -> Result<NamedSnapshot, CliError> {
    let query = normalize_identifier(query)?;
    let versions = service.list_versions().await?;

    if let Ok(version_id) = query.parse::<VersionId>() {
        if let Some(version) = versions.iter().find(|version| version.id == version_id) {
            return Ok(version.clone());
        }
    }

    if let Some(version) = versions.iter().find(|version| version.label == query) {
        return Ok(version.clone());
    }

    let matches = versions
        .into_iter()
        .filter(|version| version.id.to_string().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::VersionNotFound(query)),
        1 => Ok(matches.into_iter().next().unwrap()),
        _ => Err(ambiguous_error(
            &query,
            matches.iter().map(|version| version.id.to_string()),
        )),
    }
}

fn ambiguous_error(query: &str, ids: impl Iterator<Item = String>) -> CliError {
    let options = ids
        .take(3)
        .map(|id| short_id(&id))
        .collect::<Vec<_>>()
        .join(", ");
    CliError::AmbiguousId(format!(
        "ID prefix '{query}' is ambiguous; matches: {options}"
    ))
}

fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

fn format_instant(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || format!("{timestamp_ms} ms"),
        |instant| instant.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

fn resolve_document_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input_with_initial("")? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyIdentifier)
    } else {
        Ok(trimmed.to_string())
    }
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

fn capture_editor_input_with_initial(initial_content: &str) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_draft_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // Fallback for editor commands with args, e.g. "code --wait"
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_draft_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("quill-draft-{}-{now}.md", std::process::id()))
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("QUILL_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quill")
        .join("quill.db")
}

fn resolve_backup_provider(backup_file: Option<PathBuf>) -> Result<ResolvedProvider, CliError> {
    if let Some(path) = backup_file {
        return Ok(ResolvedProvider::File(FileBackupProvider::new(path)));
    }
    if let Some(path) = env::var_os("QUILL_BACKUP_FILE") {
        return Ok(ResolvedProvider::File(FileBackupProvider::new(
            PathBuf::from(path),
        )));
    }

    if let Ok(endpoint) = env::var("QUILL_BACKUP_ENDPOINT") {
        if !endpoint.is_empty() {
            let token = env::var("QUILL_BACKUP_TOKEN").ok().filter(|t| !t.is_empty());
            return Ok(ResolvedProvider::Http(HttpBackupProvider::new(
                endpoint, token,
            )?));
        }
    }

    Err(CliError::BackupNotConfigured)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use quill_core::StudioService;

    use super::{
        default_editor, format_instant, format_relative_time, normalize_content,
        normalize_identifier, resolve_backup_provider, resolve_book, resolve_document,
        resolve_version, run_backup_adopt, run_backup_push, run_completions, run_doc_rm,
        run_version_restore, run_wipe, CliError, CompletionShell, ResolvedProvider,
    };

    #[test]
    fn normalize_content_trims_and_rejects_empty() {
        assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
        assert_eq!(normalize_content(" \n\t "), None);
    }

    #[test]
    fn normalize_content_keeps_multiline_text() {
        assert_eq!(
            normalize_content("line 1\nline 2\n"),
            Some("line 1\nline 2".to_string())
        );
    }

    #[test]
    fn normalize_identifier_rejects_empty() {
        assert!(matches!(
            normalize_identifier(" \n "),
            Err(CliError::EmptyIdentifier)
        ));
        assert_eq!(
            normalize_identifier("  abc123  ").unwrap(),
            "abc123".to_string()
        );
    }

    #[test]
    fn default_editor_is_defined() {
        assert!(!default_editor().is_empty());
    }

    #[test]
    fn format_relative_time_units() {
        let now = 10_000_000;
        assert_eq!(format_relative_time(now - 30_000, now), "just now");
        assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
        assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    }

    #[test]
    fn format_instant_renders_utc() {
        assert_eq!(format_instant(0), "1970-01-01 00:00:00 UTC");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_document_supports_exact_and_prefix_id() {
        let tmp = tempdir().unwrap();
        let service = StudioService::open_path(tmp.path().join("quill.db")).unwrap();

        let doc_a = service.create_document(None, "A", "Note A").await.unwrap();
        let doc_b = service.create_document(None, "B", "Note B").await.unwrap();

        let by_exact = resolve_document(&doc_a.id.to_string(), &service)
            .await
            .unwrap();
        assert_eq!(by_exact.title, "A");

        // UUID v7 ids share a timestamp prefix; grow the prefix until unique
        let full = doc_b.id.to_string();
        let other = doc_a.id.to_string();
        let mut prefix_len = 1;
        while other.starts_with(&full[..prefix_len]) {
            prefix_len += 1;
        }
        let by_prefix = resolve_document(&full[..prefix_len], &service)
            .await
            .unwrap();
        assert_eq!(by_prefix.title, "B");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_document_rejects_ambiguous_and_missing() {
        let tmp = tempdir().unwrap();
        let service = StudioService::open_path(tmp.path().join("quill.db")).unwrap();

        let doc_a = service.create_document(None, "A", "Left").await.unwrap();
        let doc_b = service.create_document(None, "B", "Right").await.unwrap();

        // UUID v7 ids created back to back share a timestamp prefix
        let a = doc_a.id.to_string();
        let b = doc_b.id.to_string();
        let shared = a
            .chars()
            .zip(b.chars())
            .take_while(|(left, right)| left == right)
            .map(|(left, _)| left)
            .collect::<String>();
        assert!(!shared.is_empty());

        let error = resolve_document(&shared, &service).await.unwrap_err();
        assert!(matches!(error, CliError::AmbiguousId(_)));

        let error = resolve_document("ffffffff-ffff-7fff-8fff-ffffffffffff", &service)
            .await
            .unwrap_err();
        assert!(matches!(error, CliError::DocumentNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_book_finds_by_prefix() {
        let tmp = tempdir().unwrap();
        let service = StudioService::open_path(tmp.path().join("quill.db")).unwrap();

        let book = service.create_book("Winter Draft", "").await.unwrap();
        let resolved = resolve_book(&book.id.to_string(), &service).await.unwrap();
        assert_eq!(resolved.title, "Winter Draft");

        let error = resolve_book("ffffffff-ffff-7fff-8fff-ffffffffffff", &service)
            .await
            .unwrap_err();
        assert!(matches!(error, CliError::BookNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_version_matches_label_and_id() {
        let tmp = tempdir().unwrap();
        let service = StudioService::open_path(tmp.path().join("quill.db")).unwrap();

        service.create_document(None, "Doc", "v1").await.unwrap();
        let version = service.save_version("first draft").await.unwrap();

        let by_label = resolve_version("first draft", &service).await.unwrap();
        assert_eq!(by_label.id, version.id);

        let by_id = resolve_version(&version.id.to_string(), &service)
            .await
            .unwrap();
        assert_eq!(by_id.id, version.id);

        let error = resolve_version("no such label", &service).await.unwrap_err();
        assert!(matches!(error, CliError::VersionNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_doc_rm_soft_deletes_by_prefix() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("quill.db");

        let doc_id = {
            let service = StudioService::open_path(&db_path).unwrap();
            service
                .create_document(None, "Doomed", "delete me")
                .await
                .unwrap()
                .id
        };

        run_doc_rm(&doc_id.to_string(), &db_path).await.unwrap();

        let service = StudioService::open_path(&db_path).unwrap();
        assert!(service.get_document(&doc_id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_version_restore_round_trips_by_label() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("quill.db");

        let doc_id = {
            let service = StudioService::open_path(&db_path).unwrap();
            let doc = service
                .create_document(None, "Doc", "checkpoint text")
                .await
                .unwrap();
            service.save_version("checkpoint").await.unwrap();
            service.update_document(&doc.id, "later text").await.unwrap();
            doc.id
        };

        run_version_restore("checkpoint", &db_path).await.unwrap();

        let service = StudioService::open_path(&db_path).unwrap();
        assert_eq!(
            service.get_document(&doc_id).await.unwrap().unwrap().content,
            "checkpoint text"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_wipe_requires_confirmation() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("quill.db");

        let error = run_wipe(false, &db_path).await.unwrap_err();
        assert!(matches!(error, CliError::ConfirmationRequired));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backup_push_then_adopt_on_second_store() {
        let tmp = tempdir().unwrap();
        let backup_path = tmp.path().join("backup.json");
        let db_a = tmp.path().join("a.db");
        let db_b = tmp.path().join("b.db");

        let doc_id = {
            let service = StudioService::open_path(&db_a).unwrap();
            service
                .create_document(None, "Doc", "from device A")
                .await
                .unwrap()
                .id
        };

        let provider = |path: &std::path::Path| {
            ResolvedProvider::File(quill_core::FileBackupProvider::new(path.to_path_buf()))
        };

        run_backup_push(provider(&backup_path), &db_a).await.unwrap();
        run_backup_adopt(provider(&backup_path), true, &db_b)
            .await
            .unwrap();

        let service = StudioService::open_path(&db_b).unwrap();
        assert_eq!(
            service.get_document(&doc_id).await.unwrap().unwrap().content,
            "from device A"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backup_adopt_with_nothing_newer_fails() {
        let tmp = tempdir().unwrap();
        let backup_path = tmp.path().join("backup.json");
        let db_path = tmp.path().join("quill.db");

        {
            let service = StudioService::open_path(&db_path).unwrap();
            service.create_document(None, "Doc", "local").await.unwrap();
        }
        run_backup_push(
            ResolvedProvider::File(quill_core::FileBackupProvider::new(backup_path.clone())),
            &db_path,
        )
        .await
        .unwrap();

        let error = run_backup_adopt(
            ResolvedProvider::File(quill_core::FileBackupProvider::new(backup_path)),
            true,
            &db_path,
        )
        .await
        .unwrap_err();
        assert!(matches!(error, CliError::NothingToAdopt));
    }

    #[test]
    fn resolve_backup_provider_prefers_explicit_file() {
        let provider = resolve_backup_provider(Some("backup.json".into())).unwrap();
        assert!(matches!(provider, ResolvedProvider::File(_)));
    }

    #[test]
    fn run_completions_writes_bash_script_file() {
        let tmp = tempdir().unwrap();
        let output_path = tmp.path().join("quill.bash");

        run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

        let script = std::fs::read_to_string(&output_path).unwrap();
        assert!(script.contains("_quill()"));
        assert!(script.contains("complete -F _quill"));
    }
}
