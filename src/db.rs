//! Database connection management, migrations, and error types.
//!
//! This module handles all SQLite connection setup with appropriate settings
//! for concurrent access (WAL mode, foreign keys, busy timeout), schema
//! versioning via migrations, and a unified error type for the entire crate.

use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the prompt store.
///
/// Uses `thiserror` for automatic `Error` trait implementation and `Display`
/// formatting. The variants follow the operation contracts: callers can match
/// on `NotFound`/`Forbidden`/`Conflict` to map failures without string
/// inspection.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// I/O operation failed (directory creation, reading stdin, etc).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested entity was not found (or is soft-deleted).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller's effective permission is insufficient for the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The operation conflicts with current state (e.g. deleting a tag that
    /// is still in use, or inviting a collaborator twice).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The bounded retry loop for version-number assignment was exhausted.
    /// Surfaced to the caller, never swallowed.
    #[error("Version creation failed after {attempts} attempts, try again")]
    RetryExhausted { attempts: u32 },

    /// Invalid input provided by the user or caller.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Returns true if the error is a SQLite UNIQUE (or primary key) constraint
/// violation.
///
/// This is the signal the version store's retry loop keys on: two writers
/// computing the same version number produce exactly this failure on the
/// second insert. Any other constraint failure (foreign key, CHECK) is not
/// retryable and must propagate.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    // SQLITE_CONSTRAINT_UNIQUE = 2067, SQLITE_CONSTRAINT_PRIMARYKEY = 1555
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == 2067 || e.extended_code == 1555
    )
}

/// Returns true if the error is a transient SQLite busy/locked condition.
///
/// In WAL mode a read-then-write transaction that loses a write race can
/// surface SQLITE_BUSY_SNAPSHOT instead of a constraint failure. For the
/// version store both mean the same thing: someone else wrote first, read
/// again and retry.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Returns the path to the SQLite database file.
///
/// Resolution order:
/// 1. `PROMPTSTORE_PATH` environment variable (if set)
/// 2. `~/.promptstore/store.db` (default)
///
/// Creates the parent directory if it doesn't exist.
///
/// # Errors
///
/// Returns `StoreError::Io` if the home directory cannot be determined (when
/// `PROMPTSTORE_PATH` is not set) or parent directory creation fails.
pub fn db_path() -> Result<PathBuf, StoreError> {
    let path = if let Ok(env_path) = std::env::var("PROMPTSTORE_PATH") {
        PathBuf::from(env_path)
    } else {
        let home = dirs::home_dir().ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine home directory",
            ))
        })?;
        home.join(".promptstore").join("store.db")
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    Ok(path)
}

/// Opens a SQLite connection to the default database with proper settings.
///
/// # Errors
///
/// Returns `StoreError::Db` if the connection cannot be opened or configured.
pub fn open_connection() -> Result<Connection, StoreError> {
    let path = db_path()?;
    open_connection_at(&path)
}

/// Opens a SQLite connection at the specified path with proper settings.
///
/// Configured for concurrent request handlers on separate connections:
/// - **WAL mode**: Allows concurrent readers with serialized writers
/// - **Foreign keys**: Enabled for referential integrity
/// - **Busy timeout**: 5 seconds to handle write contention gracefully
///
/// # Errors
///
/// Returns `StoreError::Db` if the connection cannot be opened or configured.
pub fn open_connection_at(path: &std::path::Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    Ok(conn)
}

/// Runs all pending database migrations.
///
/// Migrations are applied transactionally and idempotently:
/// 1. Reads the current schema version from `schema_meta` (0 if the table
///    doesn't exist yet)
/// 2. Runs each embedded migration with version > current version, in order
/// 3. Each migration runs in its own transaction
///
/// Migrations are embedded in the binary with `include_str!` and named
/// `NNN_description.sql`; each updates `schema_meta.version` to its target.
///
/// # Errors
///
/// Returns `StoreError::Db` if a migration fails; the failing migration's
/// transaction is rolled back.
pub fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let current_version: i64 = conn
        .query_row("SELECT version FROM schema_meta LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0); // Fresh database starts at version 0

    let migrations: Vec<(i64, &str)> = vec![
        (1, include_str!("../migrations/001_initial.sql")),
        (2, include_str!("../migrations/002_tags.sql")),
        (3, include_str!("../migrations/003_collaborations.sql")),
    ];

    for (target_version, sql) in migrations {
        if target_version > current_version {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.commit()?;
        }
    }

    Ok(())
}
