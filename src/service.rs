//! Document coordinator: permission-checked workflows over the lower layers.
//!
//! Every operation here resolves the caller's effective permission first,
//! then sequences repo, version and tag calls. The ordering inside an edit
//! matters: the version snapshot is taken before the document row is
//! overwritten, so version N always holds the state the edit produced.

use crate::access;
use crate::db::StoreError;
use crate::models::{Collaboration, Document, Permission, Version};
use crate::repo;
use crate::tags;
use crate::versions;
use rusqlite::Connection;

/// A partial update to a document. `None` fields keep their current value;
/// `tag_ids: None` leaves the tag set alone, `Some(vec![])` clears it.
#[derive(Debug, Default, Clone)]
pub struct EditRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub description: Option<String>,
    pub tag_ids: Option<Vec<String>>,
    pub change_summary: Option<String>,
}

fn require(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
    required: Permission,
) -> Result<Permission, StoreError> {
    let effective = access::resolve_for(conn, document_id, user_id)?;
    if !access::has_permission(effective, required) {
        return Err(StoreError::Forbidden(format!(
            "User '{}' needs {} access to document '{}' (has {})",
            user_id, required, document_id, effective
        )));
    }
    Ok(effective)
}

/// Creates a document owned by `owner_id` and records version 1.
pub fn create_document(
    conn: &Connection,
    title: &str,
    content: &str,
    description: &str,
    owner_id: &str,
    tag_ids: &[String],
) -> Result<Document, StoreError> {
    repo::get_user(conn, owner_id)?;
    let doc = repo::create_document(conn, title, content, description, owner_id)?;

    versions::create_version(
        conn,
        &doc.id,
        &doc.title,
        &doc.content,
        &doc.description,
        "initial version",
        owner_id,
    )?;

    if !tag_ids.is_empty() {
        tags::apply_tag_set(conn, &doc.id, tag_ids)?;
    }

    repo::get_document(conn, &doc.id)
}

/// Applies an edit to a document, snapshotting a new version when the
/// content actually changes.
///
/// A no-op edit (all resolved fields equal to the current row) updates
/// nothing and creates no version; the returned document is unchanged.
/// Requires Write access.
pub fn apply_edit(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
    edit: &EditRequest,
) -> Result<Document, StoreError> {
    let current = repo::get_document(conn, document_id)?;
    require(conn, document_id, user_id, Permission::Write)?;

    // Title and content are trim-normalized before comparison; description
    // is taken verbatim.
    let title = edit.title.as_deref().unwrap_or(&current.title).trim();
    let content = edit.content.as_deref().unwrap_or(&current.content).trim();
    let description = edit
        .description
        .as_deref()
        .unwrap_or(&current.description);

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

    let changed = title != current.title
        || content != current.content
        || description != current.description;

    if changed {
        let summary = edit
            .change_summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("updated content");
        versions::create_version(
            conn,
            document_id,
            title,
            content,
            description,
            summary,
            user_id,
        )?;
        repo::update_document_fields(conn, document_id, title, content, description)?;
    }

    if let Some(ref tag_ids) = edit.tag_ids {
        tags::apply_tag_set(conn, document_id, tag_ids)?;
    }

    repo::get_document(conn, document_id)
}

/// Saves in-progress edits without creating a version. Draft state only:
/// the version history is untouched and tags are left alone.
/// Requires Write access.
pub fn autosave(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
    title: Option<&str>,
    content: Option<&str>,
) -> Result<(), StoreError> {
    repo::get_document(conn, document_id)?;
    require(conn, document_id, user_id, Permission::Write)?;
    repo::autosave_fields(conn, document_id, title, content)
}

/// Soft-deletes a document. Owner only; collaborators keep their grants
/// but the document disappears from reads until restored.
pub fn soft_delete(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<(), StoreError> {
    let doc = repo::get_document(conn, document_id)?;
    if doc.owner_id != user_id {
        return Err(StoreError::Forbidden(format!(
            "Only the owner can delete document '{}'",
            document_id
        )));
    }
    repo::soft_delete_document(conn, document_id)
}

/// Restores a soft-deleted document. Owner only.
pub fn restore(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<Document, StoreError> {
    let doc = repo::get_document_any(conn, document_id)?;
    if doc.owner_id != user_id {
        return Err(StoreError::Forbidden(format!(
            "Only the owner can restore document '{}'",
            document_id
        )));
    }
    if !doc.is_deleted {
        return Err(StoreError::Conflict(format!(
            "Document '{}' is not deleted",
            document_id
        )));
    }
    repo::restore_document(conn, document_id)?;
    repo::get_document(conn, document_id)
}

/// Rolls a document back to the content of an earlier version.
///
/// History is append-only: the rollback lands as a NEW version carrying the
/// old content, never by rewriting existing rows. Requires Write access.
pub fn rollback_to_version(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
    version_number: i64,
) -> Result<Document, StoreError> {
    repo::get_document(conn, document_id)?;
    require(conn, document_id, user_id, Permission::Write)?;

    let target = versions::get_by_number(conn, document_id, version_number)?;
    let summary = format!("rollback to version {}", version_number);
    versions::create_version(
        conn,
        document_id,
        &target.title,
        &target.content,
        &target.description,
        &summary,
        user_id,
    )?;
    repo::update_document_fields(
        conn,
        document_id,
        &target.title,
        &target.content,
        &target.description,
    )?;

    repo::get_document(conn, document_id)
}

/// Fetches a document for reading, bumping its view counter.
/// Requires Read access.
pub fn get_document(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<Document, StoreError> {
    repo::get_document(conn, document_id)?;
    require(conn, document_id, user_id, Permission::Read)?;
    repo::increment_view_count(conn, document_id)?;
    repo::get_document(conn, document_id)
}

/// Records a test run against the document. Requires Read access.
pub fn record_test(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<Document, StoreError> {
    repo::get_document(conn, document_id)?;
    require(conn, document_id, user_id, Permission::Read)?;
    repo::record_test(conn, document_id)?;
    repo::get_document(conn, document_id)
}

/// Lists the version history of a document, newest first.
/// Requires Read access.
pub fn list_versions(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<Vec<Version>, StoreError> {
    repo::get_document(conn, document_id)?;
    require(conn, document_id, user_id, Permission::Read)?;
    versions::list_versions(conn, document_id)
}

/// Shares a document with another user. Requires Admin access.
pub fn share(
    conn: &Connection,
    document_id: &str,
    acting_user_id: &str,
    target_user_id: &str,
    permission: Permission,
) -> Result<Collaboration, StoreError> {
    require(conn, document_id, acting_user_id, Permission::Admin)?;
    access::add_collaborator(conn, document_id, target_user_id, permission, acting_user_id)
}

/// Revokes a user's access to a document. Requires Admin access, except
/// that a collaborator may always remove themselves.
pub fn unshare(
    conn: &Connection,
    document_id: &str,
    acting_user_id: &str,
    target_user_id: &str,
) -> Result<(), StoreError> {
    if acting_user_id != target_user_id {
        require(conn, document_id, acting_user_id, Permission::Admin)?;
    }
    access::remove_collaborator(conn, document_id, target_user_id)
}

/// Changes a collaborator's permission level. Requires Admin access.
pub fn set_collaborator_permission(
    conn: &Connection,
    document_id: &str,
    acting_user_id: &str,
    target_user_id: &str,
    permission: Permission,
) -> Result<(), StoreError> {
    require(conn, document_id, acting_user_id, Permission::Admin)?;
    access::update_permission(conn, document_id, target_user_id, permission)
}

/// Lists the grants on a document. Requires Read access.
pub fn collaborators(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<Vec<Collaboration>, StoreError> {
    require(conn, document_id, user_id, Permission::Read)?;
    access::list_collaborators(conn, document_id)
}

// =============================================================================
// Tests
// =============================================================================
