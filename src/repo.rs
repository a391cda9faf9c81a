//! Storage layer for users and documents: all SQL for the two base relations.
//!
//! This module provides plain functions that execute SQL statements using
//! `rusqlite::Connection`. Each function takes a database connection as its
//! first parameter and returns a `Result<T, StoreError>`.
//!
//! No traits, no generics, no repository pattern — just simple functions that
//! map between Rust structs and SQLite tables. Versioning lives in
//! `versions`, the tag registry in `tags`, permissions in `access`.

use crate::db::StoreError;
use crate::models::{Document, User};
use crate::tags;
use rusqlite::Connection;

/// Sort key for document listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSort {
    CreatedAt,
    UpdatedAt,
    StarCount,
}

/// Filters for listing documents with structured queries.
pub struct DocumentFilters {
    pub owner_id: Option<String>,
    /// Substring match over title, content, and description.
    pub keyword: Option<String>,
    /// Filter to documents carrying a tag with this exact name.
    pub tag: Option<String>,
    pub include_deleted: bool,
    pub sort: DocumentSort,
}

impl Default for DocumentFilters {
    fn default() -> Self {
        DocumentFilters {
            owner_id: None,
            keyword: None,
            tag: None,
            include_deleted: false,
            sort: DocumentSort::CreatedAt,
        }
    }
}

/// Map a rusqlite Row to a Document struct.
/// Expects columns in order: id, title, content, description, owner_id,
/// is_deleted, view_count, test_count, star_count, version_count,
/// last_tested_at, created_at, updated_at
fn row_to_document(row: &rusqlite::Row) -> Result<Document, rusqlite::Error> {
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        description: row.get(3)?,
        owner_id: row.get(4)?,
        is_deleted: row.get::<_, i64>(5)? != 0,
        view_count: row.get(6)?,
        test_count: row.get(7)?,
        star_count: row.get(8)?,
        version_count: row.get(9)?,
        last_tested_at: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        tags: vec![],
    })
}

// =============================================================================
// Users
// =============================================================================

/// Creates a new user with a generated UUID and current timestamp.
///
/// # Errors
/// Returns `StoreError::Conflict` if the username is already taken and
/// `StoreError::InvalidInput` if it is empty.
pub fn create_user(conn: &Connection, username: &str) -> Result<User, StoreError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(StoreError::InvalidInput(
            "Username must not be empty".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO users (id, username, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, username, now, now],
    )
    .map_err(|e| {
        if crate::db::is_unique_violation(&e) {
            StoreError::Conflict(format!("Username '{}' is already taken", username))
        } else {
            StoreError::Db(e)
        }
    })?;

    Ok(User {
        id,
        username: username.to_string(),
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Retrieves a user by ID.
///
/// # Errors
/// Returns `StoreError::NotFound` if no user with the given ID exists.
pub fn get_user(conn: &Connection, id: &str) -> Result<User, StoreError> {
    conn.query_row(
        "SELECT id, username, created_at, updated_at FROM users WHERE id = ?1",
        [id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            StoreError::NotFound(format!("User '{}' not found", id))
        }
        _ => StoreError::Db(e),
    })
}

/// Retrieves a user by username (exact match).
///
/// # Errors
/// Returns `StoreError::NotFound` if no user with the given username exists.
pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<User, StoreError> {
    conn.query_row(
        "SELECT id, username, created_at, updated_at FROM users WHERE username = ?1",
        [username],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            StoreError::NotFound(format!("User '{}' not found", username))
        }
        _ => StoreError::Db(e),
    })
}

/// Returns the user with the given username, creating one if absent.
///
/// Safe under concurrent callers: a lost creation race falls back to
/// re-reading the winner's row.
pub fn ensure_user(conn: &Connection, username: &str) -> Result<User, StoreError> {
    match get_user_by_username(conn, username) {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound(_)) => match create_user(conn, username) {
            Ok(user) => Ok(user),
            Err(StoreError::Conflict(_)) => get_user_by_username(conn, username),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

// =============================================================================
// Documents
// =============================================================================

/// Creates a new document row with a generated UUID and current timestamps.
///
/// The row starts with `version_count = 0`; the document coordinator creates
/// version 1 immediately after, so the gapless-numbering invariant holds from
/// the first snapshot onward.
///
/// # Errors
/// Returns `StoreError::InvalidInput` if the trimmed title or content is
/// empty.
pub fn create_document(
    conn: &Connection,
    title: &str,
    content: &str,
    description: &str,
    owner_id: &str,
) -> Result<Document, StoreError> {
    let title = title.trim();
    let content = content.trim();
    let description = description.trim();

    if title.is_empty() {
        return Err(StoreError::InvalidInput(
            "Title must not be empty".to_string(),
        ));
    }
    if content.is_empty() {
        return Err(StoreError::InvalidInput(
            "Content must not be empty".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO documents (id, title, content, description, owner_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, title, content, description, owner_id, now, now],
    )?;

    Ok(Document {
        id,
        title: title.to_string(),
        content: content.to_string(),
        description: description.to_string(),
        owner_id: owner_id.to_string(),
        is_deleted: false,
        view_count: 0,
        test_count: 0,
        star_count: 0,
        version_count: 0,
        last_tested_at: None,
        created_at: now.clone(),
        updated_at: now,
        tags: vec![],
    })
}

/// Retrieves a live document by ID, with tag names populated.
///
/// Soft-deleted documents are treated as absent.
///
/// # Errors
/// Returns `StoreError::NotFound` if the document does not exist or has been
/// soft-deleted.
pub fn get_document(conn: &Connection, id: &str) -> Result<Document, StoreError> {
    let doc = get_document_any(conn, id)?;
    if doc.is_deleted {
        return Err(StoreError::NotFound(format!(
            "Document '{}' not found",
            id
        )));
    }
    Ok(doc)
}

/// Retrieves a document by ID regardless of its soft-delete flag.
///
/// Used by restore and by permission resolution (an owner must still be able
/// to act on a deleted document).
pub fn get_document_any(conn: &Connection, id: &str) -> Result<Document, StoreError> {
    let doc = conn
        .query_row(
            "SELECT id, title, content, description, owner_id, is_deleted,
                    view_count, test_count, star_count, version_count, last_tested_at,
                    created_at, updated_at
             FROM documents WHERE id = ?1",
            [id],
            row_to_document,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("Document '{}' not found", id))
            }
            _ => StoreError::Db(e),
        })?;

    let tag_names = tags::tag_names_for_document(conn, id)?;
    Ok(Document {
        tags: tag_names,
        ..doc
    })
}

/// Overwrites a document's mutable content fields and bumps `updated_at`.
///
/// Called by the coordinator after a version snapshot has been taken. The
/// overwrite itself is last-writer-wins: there is no optimistic check here
/// beyond the version-number race inside the version store.
pub fn update_document_fields(
    conn: &Connection,
    id: &str,
    title: &str,
    content: &str,
    description: &str,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE documents
         SET title = ?1, content = ?2, description = ?3, updated_at = ?4
         WHERE id = ?5",
        rusqlite::params![title, content, description, now, id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!(
            "Document '{}' not found",
            id
        )));
    }
    Ok(())
}

/// Partially updates title and/or content without touching version history.
///
/// Backs the autosave path: `None` fields are left as-is via COALESCE.
pub fn autosave_fields(
    conn: &Connection,
    id: &str,
    title: Option<&str>,
    content: Option<&str>,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE documents
         SET title = COALESCE(?1, title),
             content = COALESCE(?2, content),
             updated_at = ?3
         WHERE id = ?4",
        rusqlite::params![title, content, now, id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!(
            "Document '{}' not found",
            id
        )));
    }
    Ok(())
}

/// Lists documents matching the given filters.
///
/// Soft-deleted documents are excluded unless `include_deleted` is set.
pub fn list_documents(
    conn: &Connection,
    filters: &DocumentFilters,
) -> Result<Vec<Document>, StoreError> {
    let mut sql = String::from(
        "SELECT DISTINCT d.id, d.title, d.content, d.description, d.owner_id, d.is_deleted,
                d.view_count, d.test_count, d.star_count, d.version_count, d.last_tested_at,
                d.created_at, d.updated_at
         FROM documents d",
    );

    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if filters.tag.is_some() {
        sql.push_str(
            " INNER JOIN document_tags dt ON d.id = dt.document_id \
             INNER JOIN tags t ON dt.tag_id = t.id",
        );
    }

    if !filters.include_deleted {
        conditions.push("d.is_deleted = 0".to_string());
    }

    if let Some(ref owner_id) = filters.owner_id {
        conditions.push("d.owner_id = ?".to_string());
        params.push(Box::new(owner_id.clone()));
    }

    if let Some(ref keyword) = filters.keyword {
        // LIKE treats % and _ as wildcards; escape them so the keyword is
        // always a literal substring match.
        let escaped = keyword
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        conditions.push(
            "(d.title LIKE '%' || ? || '%' ESCAPE '\\' \
             OR d.content LIKE '%' || ? || '%' ESCAPE '\\' \
             OR d.description LIKE '%' || ? || '%' ESCAPE '\\')"
                .to_string(),
        );
        params.push(Box::new(escaped.clone()));
        params.push(Box::new(escaped.clone()));
        params.push(Box::new(escaped));
    }

    if let Some(ref tag) = filters.tag {
        conditions.push("t.name = ?".to_string());
        params.push(Box::new(tag.clone()));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(match filters.sort {
        DocumentSort::CreatedAt => " ORDER BY d.created_at DESC",
        DocumentSort::UpdatedAt => " ORDER BY d.updated_at DESC",
        DocumentSort::StarCount => " ORDER BY d.star_count DESC",
    });

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let docs = stmt
        .query_map(&param_refs[..], row_to_document)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut docs_with_tags = Vec::new();
    for doc in docs {
        let tag_names = tags::tag_names_for_document(conn, &doc.id)?;
        docs_with_tags.push(Document {
            tags: tag_names,
            ..doc
        });
    }

    Ok(docs_with_tags)
}

/// Increments a document's view counter.
pub fn increment_view_count(conn: &Connection, id: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE documents SET view_count = view_count + 1 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

/// Records that the document was run through an external model test:
/// bumps `test_count` and stamps `last_tested_at`. The invocation itself
/// happens outside this crate.
pub fn record_test(conn: &Connection, id: &str) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE documents SET test_count = test_count + 1, last_tested_at = ?1 WHERE id = ?2",
        rusqlite::params![now, id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!(
            "Document '{}' not found",
            id
        )));
    }
    Ok(())
}

/// Flags a document as deleted. The row and its versions stay in place.
///
/// # Errors
/// Returns `StoreError::NotFound` if the document does not exist or is
/// already soft-deleted.
pub fn soft_delete_document(conn: &Connection, id: &str) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE documents SET is_deleted = 1, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
        rusqlite::params![now, id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!(
            "Document '{}' not found",
            id
        )));
    }
    Ok(())
}

/// Clears a document's soft-delete flag.
///
/// # Errors
/// Returns `StoreError::NotFound` if the document does not exist at all.
pub fn restore_document(conn: &Connection, id: &str) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE documents SET is_deleted = 0, updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now, id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!(
            "Document '{}' not found",
            id
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
