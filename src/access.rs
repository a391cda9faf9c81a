//! Access control: effective-permission resolution and collaboration grants.
//!
//! Resolution is a pure read recomputed on every call; grants can change
//! between requests in the same session, so nothing here caches. Ownership
//! always outranks any stored grant: the owner of a document resolves to
//! Admin even if a collaboration row would say otherwise.

use crate::db::{is_unique_violation, StoreError};
use crate::models::{Collaboration, Permission};
use crate::repo;
use rusqlite::Connection;

fn row_to_collaboration(row: &rusqlite::Row) -> Result<Collaboration, rusqlite::Error> {
    let permission_str: String = row.get(3)?;
    let permission = Permission::from_str(&permission_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(3, "permission".to_string(), rusqlite::types::Type::Text)
    })?;
    Ok(Collaboration {
        id: row.get(0)?,
        document_id: row.get(1)?,
        user_id: row.get(2)?,
        permission,
        invited_by: row.get(4)?,
        accepted_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const COLLABORATION_SELECT: &str =
    "SELECT id, document_id, user_id, permission, invited_by, accepted_at, created_at, updated_at
     FROM collaborations";

/// Computes the effective permission from ownership and an optional grant.
///
/// The owner is always Admin regardless of any stored collaboration row for
/// the same user. Without a grant, a non-owner has no access.
pub fn resolve(
    owner_id: &str,
    user_id: &str,
    collaboration: Option<&Collaboration>,
) -> Permission {
    if user_id == owner_id {
        return Permission::Admin;
    }
    match collaboration {
        Some(collab) => collab.permission,
        None => Permission::None,
    }
}

/// True iff `effective` meets or exceeds `required` in the hierarchy
/// None < Read < Write < Admin.
pub fn has_permission(effective: Permission, required: Permission) -> bool {
    effective >= required
}

/// Resolves the effective permission of `user_id` on a document.
///
/// Loads the document regardless of its soft-delete flag (an owner must be
/// able to restore a deleted document) and the single collaboration row for
/// the pair, then applies [`resolve`].
///
/// # Errors
/// Returns `StoreError::NotFound` if the document does not exist at all.
pub fn resolve_for(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<Permission, StoreError> {
    let doc = repo::get_document_any(conn, document_id)?;
    let collab = get_collaboration(conn, document_id, user_id)?;
    Ok(resolve(&doc.owner_id, user_id, collab.as_ref()))
}

/// Returns the collaboration row for a (document, user) pair, if any.
/// At most one exists by constraint.
pub fn get_collaboration(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<Option<Collaboration>, StoreError> {
    let sql = format!(
        "{} WHERE document_id = ?1 AND user_id = ?2",
        COLLABORATION_SELECT
    );
    match conn.query_row(
        &sql,
        rusqlite::params![document_id, user_id],
        row_to_collaboration,
    ) {
        Ok(collab) => Ok(Some(collab)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Db(e)),
    }
}

/// Grants a user access to a document.
///
/// # Errors
/// - `StoreError::InvalidInput` if the grant targets the document's owner
///   (ownership already outranks any grant) or names `Permission::None`
/// - `StoreError::Conflict` if the user already has a grant on the document
pub fn add_collaborator(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
    permission: Permission,
    invited_by: &str,
) -> Result<Collaboration, StoreError> {
    if permission == Permission::None {
        return Err(StoreError::InvalidInput(
            "Cannot grant 'none' permission".to_string(),
        ));
    }

    let doc = repo::get_document_any(conn, document_id)?;
    if doc.owner_id == user_id {
        return Err(StoreError::InvalidInput(
            "The document owner cannot be added as a collaborator".to_string(),
        ));
    }
    // Fails fast with NotFound instead of a bare foreign-key error.
    repo::get_user(conn, user_id)?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO collaborations (id, document_id, user_id, permission, invited_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, document_id, user_id, permission.as_str(), invited_by, now, now],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::Conflict(format!(
                "User '{}' is already a collaborator on document '{}'",
                user_id, document_id
            ))
        } else {
            StoreError::Db(e)
        }
    })?;

    Ok(Collaboration {
        id,
        document_id: document_id.to_string(),
        user_id: user_id.to_string(),
        permission,
        invited_by: invited_by.to_string(),
        accepted_at: None,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Changes the permission level of an existing grant. Grants are never
/// auto-escalated; this is the only way a stored level moves.
///
/// # Errors
/// Returns `StoreError::NotFound` if no grant exists for the pair and
/// `StoreError::InvalidInput` for `Permission::None`.
pub fn update_permission(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
    permission: Permission,
) -> Result<(), StoreError> {
    if permission == Permission::None {
        return Err(StoreError::InvalidInput(
            "Cannot grant 'none' permission; remove the collaborator instead".to_string(),
        ));
    }

    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE collaborations SET permission = ?1, updated_at = ?2
         WHERE document_id = ?3 AND user_id = ?4",
        rusqlite::params![permission.as_str(), now, document_id, user_id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!(
            "No collaboration for user '{}' on document '{}'",
            user_id, document_id
        )));
    }
    Ok(())
}

/// Marks an invitation as accepted by stamping `accepted_at`.
///
/// # Errors
/// Returns `StoreError::NotFound` if no grant exists for the pair.
pub fn accept_invitation(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE collaborations SET accepted_at = ?1, updated_at = ?1
         WHERE document_id = ?2 AND user_id = ?3",
        rusqlite::params![now, document_id, user_id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!(
            "No collaboration for user '{}' on document '{}'",
            user_id, document_id
        )));
    }
    Ok(())
}

/// Removes a user's grant on a document.
///
/// # Errors
/// Returns `StoreError::NotFound` if no grant exists for the pair.
pub fn remove_collaborator(
    conn: &Connection,
    document_id: &str,
    user_id: &str,
) -> Result<(), StoreError> {
    let rows = conn.execute(
        "DELETE FROM collaborations WHERE document_id = ?1 AND user_id = ?2",
        rusqlite::params![document_id, user_id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!(
            "No collaboration for user '{}' on document '{}'",
            user_id, document_id
        )));
    }
    Ok(())
}

/// Lists all grants on a document, oldest first.
pub fn list_collaborators(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<Collaboration>, StoreError> {
    let sql = format!(
        "{} WHERE document_id = ?1 ORDER BY created_at",
        COLLABORATION_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let collabs = stmt
        .query_map([document_id], row_to_collaboration)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(collabs)
}

// =============================================================================
// Tests
// =============================================================================
