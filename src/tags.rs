//! Tag registry: tag identity, document↔tag associations, and usage counters.
//!
//! `use_count` is a reference count over live associations and feeds UI
//! affordances (popularity sort, delete guard), so it must never drift: it is
//! moved only inside the same transaction that inserts or deletes the
//! association row it accounts for, and never recomputed by a scan.
//!
//! Tags are a shared, lightweight namespace. Creation is create-or-get by
//! exact name, and deletion of an unused tag is open to any caller.

use crate::db::{is_busy, is_unique_violation, StoreError};
use crate::models::Tag;
use rusqlite::Connection;
use std::collections::HashSet;

/// Upper bound on attempts for the transactional association writers below.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Runs a write transaction, retrying on transient busy/locked failures.
///
/// Under WAL a read-then-write transaction that loses the write race fails
/// with a busy snapshot; like the version store's numbering race, the fix is
/// to rerun the whole transaction against fresh state. The final attempt's
/// error propagates unchanged.
fn with_write_retry<T>(
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    for _attempt in 1..MAX_WRITE_ATTEMPTS {
        match op() {
            Err(StoreError::Db(ref e)) if is_busy(e) => continue,
            other => return other,
        }
    }
    op()
}

fn row_to_tag(row: &rusqlite::Row) -> Result<Tag, rusqlite::Error> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        color: row.get(3)?,
        description: row.get(4)?,
        use_count: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const TAG_SELECT: &str =
    "SELECT id, name, category, color, description, use_count, created_by, created_at, updated_at
     FROM tags";

/// Returns the tag with the given name, creating it if absent.
///
/// The lookup is case-sensitive and exact. On a hit the stored row is
/// returned untouched: the category, color, and creator of this call are
/// ignored; first writer wins on those attributes. On a miss the tag is
/// created with `use_count = 0`.
///
/// Safe under concurrent callers: losing the insert race on the UNIQUE(name)
/// constraint falls back to re-reading the winner's row.
pub fn create_or_get(
    conn: &Connection,
    name: &str,
    category: &str,
    color: &str,
    created_by: Option<&str>,
) -> Result<Tag, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::InvalidInput(
            "Tag name must not be empty".to_string(),
        ));
    }

    if let Some(tag) = find_by_name(conn, name)? {
        return Ok(tag);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let insert = conn.execute(
        "INSERT INTO tags (id, name, category, color, description, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, '', ?5, ?6, ?7)",
        rusqlite::params![id, name, category, color, created_by, now, now],
    );

    match insert {
        Ok(_) => Ok(Tag {
            id,
            name: name.to_string(),
            category: category.to_string(),
            color: color.to_string(),
            description: String::new(),
            use_count: 0,
            created_by: created_by.map(|s| s.to_string()),
            created_at: now.clone(),
            updated_at: now,
        }),
        Err(e) if is_unique_violation(&e) => {
            // A concurrent caller created the same name between our lookup
            // and insert; their row wins.
            find_by_name(conn, name)?.ok_or(StoreError::Db(e))
        }
        Err(e) => Err(StoreError::Db(e)),
    }
}

fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Tag>, StoreError> {
    let sql = format!("{} WHERE name = ?1", TAG_SELECT);
    match conn.query_row(&sql, [name], row_to_tag) {
        Ok(tag) => Ok(Some(tag)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Db(e)),
    }
}

/// Retrieves a tag by ID.
///
/// # Errors
/// Returns `StoreError::NotFound` if no tag with the given ID exists.
pub fn get_tag(conn: &Connection, id: &str) -> Result<Tag, StoreError> {
    let sql = format!("{} WHERE id = ?1", TAG_SELECT);
    conn.query_row(&sql, [id], row_to_tag).map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            StoreError::NotFound(format!("Tag '{}' not found", id))
        }
        _ => StoreError::Db(e),
    })
}

/// Retrieves a tag by exact name.
///
/// # Errors
/// Returns `StoreError::NotFound` if no tag with the given name exists.
pub fn get_tag_by_name(conn: &Connection, name: &str) -> Result<Tag, StoreError> {
    find_by_name(conn, name)?
        .ok_or_else(|| StoreError::NotFound(format!("Tag '{}' not found", name)))
}

/// Lists all tags, optionally filtered by category, ordered by name.
pub fn list_tags(conn: &Connection, category: Option<&str>) -> Result<Vec<Tag>, StoreError> {
    let (sql, params): (String, Vec<&dyn rusqlite::ToSql>) = match category {
        Some(ref c) => (
            format!("{} WHERE category = ?1 ORDER BY name", TAG_SELECT),
            vec![c as &dyn rusqlite::ToSql],
        ),
        None => (format!("{} ORDER BY name", TAG_SELECT), vec![]),
    };

    let mut stmt = conn.prepare(&sql)?;
    let tags = stmt
        .query_map(&params[..], row_to_tag)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

/// Returns the most-used tags, `use_count` descending.
pub fn get_popular(conn: &Connection, limit: i64) -> Result<Vec<Tag>, StoreError> {
    let sql = format!("{} ORDER BY use_count DESC, name LIMIT ?1", TAG_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let tags = stmt
        .query_map([limit], row_to_tag)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

/// Attaches a tag to a document, incrementing the tag's `use_count`.
///
/// Returns `Ok(false)` without touching anything if the tag ID does not
/// resolve to an existing tag. Attaching an already-attached tag is a no-op
/// returning `Ok(true)`; the counter moves only when an association row is
/// actually inserted. Row insert and counter update commit together.
pub fn attach(conn: &Connection, document_id: &str, tag_id: &str) -> Result<bool, StoreError> {
    with_write_retry(|| {
        let tx = conn.unchecked_transaction()?;
        let attached = attach_in(&tx, document_id, tag_id)?;
        tx.commit()?;
        Ok(attached)
    })
}

/// Detaches a tag from a document, decrementing the tag's `use_count`.
///
/// Returns `Ok(false)` if no association existed. The decrement is floored
/// at 0 so a detach racing a concurrent detach can never drive the counter
/// negative. Row delete and counter update commit together.
pub fn detach(conn: &Connection, document_id: &str, tag_id: &str) -> Result<bool, StoreError> {
    with_write_retry(|| {
        let tx = conn.unchecked_transaction()?;
        let detached = detach_in(&tx, document_id, tag_id)?;
        tx.commit()?;
        Ok(detached)
    })
}

/// Replaces a document's tag set with `new_tag_ids`, applied as one unit.
///
/// Computes the symmetric difference against the stored set and performs all
/// resulting detaches and attaches in a single transaction, so a partial
/// application is never observable to other readers. Tag IDs that do not
/// resolve to an existing tag are skipped silently, matching `attach`.
pub fn apply_tag_set(
    conn: &Connection,
    document_id: &str,
    new_tag_ids: &[String],
) -> Result<(), StoreError> {
    with_write_retry(|| {
        let tx = conn.unchecked_transaction()?;

        let current: HashSet<String> = tag_ids_for_document(&tx, document_id)?
            .into_iter()
            .collect();
        let desired: HashSet<String> = new_tag_ids.iter().cloned().collect();

        for tag_id in current.difference(&desired) {
            detach_in(&tx, document_id, tag_id)?;
        }
        for tag_id in desired.difference(&current) {
            attach_in(&tx, document_id, tag_id)?;
        }

        tx.commit()?;
        Ok(())
    })
}

/// Deletes a tag. Rejected while the tag is still attached anywhere.
///
/// Deletion is intentionally not owner-scoped: tags are a shared namespace
/// and any caller may remove an unused one.
///
/// # Errors
/// Returns `StoreError::Conflict` if `use_count > 0` and
/// `StoreError::NotFound` if the tag does not exist.
pub fn delete(conn: &Connection, tag_id: &str) -> Result<(), StoreError> {
    let tag = get_tag(conn, tag_id)?;
    if tag.use_count > 0 {
        return Err(StoreError::Conflict(format!(
            "Tag '{}' is used by {} document(s) and cannot be deleted",
            tag.name, tag.use_count
        )));
    }

    conn.execute("DELETE FROM tags WHERE id = ?1", [tag_id])?;
    Ok(())
}

/// Returns the tag IDs attached to a document.
pub fn tag_ids_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<String>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT tag_id FROM document_tags WHERE document_id = ?1")?;
    let ids = stmt
        .query_map([document_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Returns the tag names attached to a document, sorted.
pub fn tag_names_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM tags t
         INNER JOIN document_tags dt ON t.id = dt.tag_id
         WHERE dt.document_id = ?1
         ORDER BY t.name",
    )?;
    let names = stmt
        .query_map([document_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

// Raw association ops. These run inside the caller's transaction; the public
// attach/detach wrappers and apply_tag_set supply it.

fn attach_in(conn: &Connection, document_id: &str, tag_id: &str) -> Result<bool, StoreError> {
    let tag_exists: bool = conn
        .query_row("SELECT 1 FROM tags WHERE id = ?1", [tag_id], |_| Ok(()))
        .map(|_| true)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(false),
            _ => Err(StoreError::Db(e)),
        })?;
    if !tag_exists {
        return Ok(false);
    }

    let now = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO document_tags (document_id, tag_id, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![document_id, tag_id, now],
    )?;

    if inserted == 1 {
        conn.execute(
            "UPDATE tags SET use_count = use_count + 1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, tag_id],
        )?;
    }

    Ok(true)
}

fn detach_in(conn: &Connection, document_id: &str, tag_id: &str) -> Result<bool, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM document_tags WHERE document_id = ?1 AND tag_id = ?2",
        rusqlite::params![document_id, tag_id],
    )?;
    if deleted == 0 {
        return Ok(false);
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE tags SET use_count = MAX(use_count - 1, 0), updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now, tag_id],
    )?;
    Ok(true)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use crate::repo;

    fn setup_test_db() -> Connection {
        let mut conn =
            Connection::open_in_memory().expect("Failed to create in-memory database");
        conn.pragma_update(None, "foreign_keys", "ON")
            .expect("Failed to enable foreign keys");
        run_migrations(&mut conn).expect("Failed to run migrations");
        conn
    }

    fn make_document(conn: &Connection) -> String {
        let user = repo::ensure_user(conn, "alice").unwrap();
        repo::create_document(conn, "Doc", "Content", "", &user.id)
            .unwrap()
            .id
    }

    #[test]
    fn create_or_get_creates_then_returns_existing() {
        let conn = setup_test_db();

        let first = create_or_get(&conn, "rust", "lang", "#DEA584", None)
            .expect("create should succeed");
        assert_eq!(first.use_count, 0);
        assert_eq!(first.category, "lang");

        // Second call with different attributes: first writer wins.
        let second = create_or_get(&conn, "rust", "other", "#FFFFFF", None)
            .expect("get should succeed");
        assert_eq!(second.id, first.id);
        assert_eq!(second.category, "lang");
        assert_eq!(second.color, "#DEA584");
    }

    #[test]
    fn create_or_get_is_case_sensitive() {
        let conn = setup_test_db();

        let lower = create_or_get(&conn, "urgent", "general", "#6B7280", None).unwrap();
        let upper = create_or_get(&conn, "Urgent", "general", "#6B7280", None).unwrap();
        assert_ne!(lower.id, upper.id);
    }

    #[test]
    fn create_or_get_rejects_empty_name() {
        let conn = setup_test_db();
        let err = create_or_get(&conn, "  ", "general", "#6B7280", None)
            .expect_err("blank name should fail");
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn attach_detach_lifecycle() {
        // Full lifecycle: attach, idempotent re-attach, detach, delete.
        let conn = setup_test_db();
        let doc_id = make_document(&conn);
        let tag = create_or_get(&conn, "urgent", "general", "#6B7280", None).unwrap();

        assert!(attach(&conn, &doc_id, &tag.id).unwrap());
        assert_eq!(get_tag(&conn, &tag.id).unwrap().use_count, 1);

        // Idempotent: second attach succeeds but does not double-count.
        assert!(attach(&conn, &doc_id, &tag.id).unwrap());
        assert_eq!(get_tag(&conn, &tag.id).unwrap().use_count, 1);

        assert!(detach(&conn, &doc_id, &tag.id).unwrap());
        assert_eq!(get_tag(&conn, &tag.id).unwrap().use_count, 0);

        delete(&conn, &tag.id).expect("unused tag should be deletable");
        assert!(matches!(
            get_tag(&conn, &tag.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn attach_missing_tag_returns_false() {
        let conn = setup_test_db();
        let doc_id = make_document(&conn);

        let attached = attach(&conn, &doc_id, "no-such-tag").expect("attach should not error");
        assert!(!attached);
    }

    #[test]
    fn detach_without_association_returns_false() {
        let conn = setup_test_db();
        let doc_id = make_document(&conn);
        let tag = create_or_get(&conn, "urgent", "general", "#6B7280", None).unwrap();

        let detached = detach(&conn, &doc_id, &tag.id).expect("detach should not error");
        assert!(!detached);
        assert_eq!(get_tag(&conn, &tag.id).unwrap().use_count, 0);
    }

    #[test]
    fn delete_used_tag_is_conflict() {
        let conn = setup_test_db();
        let doc_id = make_document(&conn);
        let tag = create_or_get(&conn, "urgent", "general", "#6B7280", None).unwrap();
        attach(&conn, &doc_id, &tag.id).unwrap();

        let err = delete(&conn, &tag.id).expect_err("used tag should not be deletable");
        assert!(matches!(err, StoreError::Conflict(_)));

        // After the last detach the same delete succeeds.
        detach(&conn, &doc_id, &tag.id).unwrap();
        delete(&conn, &tag.id).expect("now unused, delete should succeed");
    }

    #[test]
    fn apply_tag_set_computes_symmetric_difference() {
        let conn = setup_test_db();
        let doc_id = make_document(&conn);
        let a = create_or_get(&conn, "a", "general", "#6B7280", None).unwrap();
        let b = create_or_get(&conn, "b", "general", "#6B7280", None).unwrap();
        let c = create_or_get(&conn, "c", "general", "#6B7280", None).unwrap();

        apply_tag_set(&conn, &doc_id, &[a.id.clone(), b.id.clone()]).unwrap();
        assert_eq!(get_tag(&conn, &a.id).unwrap().use_count, 1);
        assert_eq!(get_tag(&conn, &b.id).unwrap().use_count, 1);

        // Replace {a, b} with {b, c}: a detached, b untouched, c attached.
        apply_tag_set(&conn, &doc_id, &[b.id.clone(), c.id.clone()]).unwrap();
        assert_eq!(get_tag(&conn, &a.id).unwrap().use_count, 0);
        assert_eq!(get_tag(&conn, &b.id).unwrap().use_count, 1);
        assert_eq!(get_tag(&conn, &c.id).unwrap().use_count, 1);

        let names = tag_names_for_document(&conn, &doc_id).unwrap();
        assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn apply_tag_set_empty_clears_all() {
        let conn = setup_test_db();
        let doc_id = make_document(&conn);
        let tag = create_or_get(&conn, "t", "general", "#6B7280", None).unwrap();
        apply_tag_set(&conn, &doc_id, &[tag.id.clone()]).unwrap();

        apply_tag_set(&conn, &doc_id, &[]).unwrap();
        assert_eq!(get_tag(&conn, &tag.id).unwrap().use_count, 0);
        assert!(tag_ids_for_document(&conn, &doc_id).unwrap().is_empty());
    }

    #[test]
    fn apply_tag_set_skips_unknown_ids() {
        let conn = setup_test_db();
        let doc_id = make_document(&conn);
        let tag = create_or_get(&conn, "t", "general", "#6B7280", None).unwrap();

        apply_tag_set(&conn, &doc_id, &[tag.id.clone(), "no-such-tag".to_string()]).unwrap();
        let ids = tag_ids_for_document(&conn, &doc_id).unwrap();
        assert_eq!(ids, vec![tag.id]);
    }

    #[test]
    fn use_count_tracks_associations_across_documents() {
        let conn = setup_test_db();
        let user = repo::ensure_user(&conn, "alice").unwrap();
        let d1 = repo::create_document(&conn, "D1", "C", "", &user.id).unwrap();
        let d2 = repo::create_document(&conn, "D2", "C", "", &user.id).unwrap();
        let tag = create_or_get(&conn, "shared", "general", "#6B7280", None).unwrap();

        attach(&conn, &d1.id, &tag.id).unwrap();
        attach(&conn, &d2.id, &tag.id).unwrap();
        assert_eq!(get_tag(&conn, &tag.id).unwrap().use_count, 2);

        detach(&conn, &d1.id, &tag.id).unwrap();
        assert_eq!(get_tag(&conn, &tag.id).unwrap().use_count, 1);

        // use_count always equals the number of live association rows.
        let live: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM document_tags WHERE tag_id = ?1",
                [&tag.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(get_tag(&conn, &tag.id).unwrap().use_count, live);
    }

    #[test]
    fn concurrent_attach_keeps_use_count_consistent() {
        // Several threads attach the same tag to different documents over
        // separate connections to a file-backed database; the counter must
        // end equal to the number of live association rows.
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("attach-race.db");

        let mut conn = crate::db::open_connection_at(&path).unwrap();
        run_migrations(&mut conn).unwrap();

        let user = repo::ensure_user(&conn, "alice").unwrap();
        let tag = create_or_get(&conn, "shared", "general", "#6B7280", None).unwrap();
        let doc_ids: Vec<String> = (0..4)
            .map(|i| {
                repo::create_document(&conn, &format!("D{}", i), "C", "", &user.id)
                    .unwrap()
                    .id
            })
            .collect();

        let mut handles = Vec::new();
        for doc_id in &doc_ids {
            let path = path.clone();
            let doc_id = doc_id.clone();
            let tag_id = tag.id.clone();
            handles.push(std::thread::spawn(move || {
                let conn = crate::db::open_connection_at(&path).unwrap();
                attach(&conn, &doc_id, &tag_id).unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.join().expect("attach thread should not panic"));
        }

        let live: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM document_tags WHERE tag_id = ?1",
                [&tag.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(live, 4);
        assert_eq!(get_tag(&conn, &tag.id).unwrap().use_count, live);
    }

    #[test]
    fn popular_orders_by_use_count() {
        let conn = setup_test_db();
        let user = repo::ensure_user(&conn, "alice").unwrap();
        let d1 = repo::create_document(&conn, "D1", "C", "", &user.id).unwrap();
        let d2 = repo::create_document(&conn, "D2", "C", "", &user.id).unwrap();

        let hot = create_or_get(&conn, "hot", "general", "#6B7280", None).unwrap();
        let cold = create_or_get(&conn, "cold", "general", "#6B7280", None).unwrap();
        attach(&conn, &d1.id, &hot.id).unwrap();
        attach(&conn, &d2.id, &hot.id).unwrap();
        attach(&conn, &d1.id, &cold.id).unwrap();

        let popular = get_popular(&conn, 10).unwrap();
        assert_eq!(popular[0].name, "hot");
        assert_eq!(popular[1].name, "cold");

        let top = get_popular(&conn, 1).unwrap();
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn list_tags_filters_by_category() {
        let conn = setup_test_db();
        create_or_get(&conn, "rust", "lang", "#DEA584", None).unwrap();
        create_or_get(&conn, "urgent", "general", "#6B7280", None).unwrap();

        let all = list_tags(&conn, None).unwrap();
        assert_eq!(all.len(), 2);

        let langs = list_tags(&conn, Some("lang")).unwrap();
        assert_eq!(langs.len(), 1);
        assert_eq!(langs[0].name, "rust");
    }
}
