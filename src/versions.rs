//! Version store: immutable snapshots with monotonic per-document numbering.
//!
//! Version numbers form a gapless sequence 1..N per document, with N mirrored
//! into `documents.version_count`. Assignment is optimistic: each attempt
//! reads the current maximum fresh (never a cached counter), inserts max + 1,
//! and relies on the UNIQUE(document_id, version_number) constraint to detect
//! a concurrent writer claiming the same number. The read and the insert are
//! not atomic as a unit; the bounded retry loop absorbs exactly that window.

use crate::db::{is_busy, is_unique_violation, StoreError};
use crate::models::{Version, VersionDiff};
use rusqlite::Connection;

/// Upper bound on version-number assignment attempts. Exhausting it surfaces
/// as `StoreError::RetryExhausted`, never a silent drop.
const MAX_ATTEMPTS: u32 = 3;

fn row_to_version(row: &rusqlite::Row) -> Result<Version, rusqlite::Error> {
    Ok(Version {
        id: row.get(0)?,
        document_id: row.get(1)?,
        version_number: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        description: row.get(5)?,
        change_summary: row.get(6)?,
        author_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const VERSION_SELECT: &str =
    "SELECT id, document_id, version_number, title, content, description, change_summary, \
     author_id, created_at FROM versions";

/// Creates the next version of a document.
///
/// Reads `MAX(version_number)` for the document, assigns max + 1 (1 when no
/// versions exist), inserts the snapshot, and updates the document's
/// denormalized `version_count`, all in one transaction per attempt. If the
/// insert loses the numbering race to a concurrent writer (uniqueness
/// violation), the whole read/assign/insert sequence is retried from scratch,
/// up to 3 attempts.
///
/// # Errors
/// - `StoreError::NotFound` if the document does not exist
/// - `StoreError::RetryExhausted` if all attempts lost the numbering race
/// - any other storage error propagates unchanged on the first occurrence
pub fn create_version(
    conn: &Connection,
    document_id: &str,
    title: &str,
    content: &str,
    description: &str,
    change_summary: &str,
    author_id: &str,
) -> Result<Version, StoreError> {
    for _attempt in 0..MAX_ATTEMPTS {
        match try_create_version(
            conn,
            document_id,
            title,
            content,
            description,
            change_summary,
            author_id,
        ) {
            Ok(version) => return Ok(version),
            Err(StoreError::Db(ref e)) if is_unique_violation(e) || is_busy(e) => {
                // Another writer claimed our number (or beat us to the write
                // lock); re-read and try again.
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::RetryExhausted {
        attempts: MAX_ATTEMPTS,
    })
}

/// One optimistic attempt: fresh max read, insert, counter update.
fn try_create_version(
    conn: &Connection,
    document_id: &str,
    title: &str,
    content: &str,
    description: &str,
    change_summary: &str,
    author_id: &str,
) -> Result<Version, StoreError> {
    let tx = conn.unchecked_transaction()?;

    let exists: bool = tx
        .query_row(
            "SELECT 1 FROM documents WHERE id = ?1",
            [document_id],
            |_| Ok(()),
        )
        .map(|_| true)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(false),
            _ => Err(StoreError::Db(e)),
        })?;
    if !exists {
        return Err(StoreError::NotFound(format!(
            "Document '{}' not found",
            document_id
        )));
    }

    // Fresh aggregate read; a cached counter would miss concurrent inserts.
    let max: Option<i64> = tx.query_row(
        "SELECT MAX(version_number) FROM versions WHERE document_id = ?1",
        [document_id],
        |row| row.get(0),
    )?;
    let next = max.unwrap_or(0) + 1;

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    tx.execute(
        "INSERT INTO versions (id, document_id, version_number, title, content, description,
                               change_summary, author_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            id,
            document_id,
            next,
            title,
            content,
            description,
            change_summary,
            author_id,
            now,
        ],
    )?;

    tx.execute(
        "UPDATE documents SET version_count = ?1 WHERE id = ?2",
        rusqlite::params![next, document_id],
    )?;

    tx.commit()?;

    Ok(Version {
        id,
        document_id: document_id.to_string(),
        version_number: next,
        title: title.to_string(),
        content: content.to_string(),
        description: description.to_string(),
        change_summary: change_summary.to_string(),
        author_id: author_id.to_string(),
        created_at: now,
    })
}

/// Returns the version with the highest number for a document.
///
/// # Errors
/// Returns `StoreError::NotFound` if the document has no versions.
pub fn get_latest(conn: &Connection, document_id: &str) -> Result<Version, StoreError> {
    let sql = format!(
        "{} WHERE document_id = ?1 ORDER BY version_number DESC LIMIT 1",
        VERSION_SELECT
    );
    conn.query_row(&sql, [document_id], row_to_version)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!(
                "Document '{}' has no versions",
                document_id
            )),
            _ => StoreError::Db(e),
        })
}

/// Returns a specific version by its number.
///
/// # Errors
/// Returns `StoreError::NotFound` if that number does not exist for the
/// document.
pub fn get_by_number(
    conn: &Connection,
    document_id: &str,
    version_number: i64,
) -> Result<Version, StoreError> {
    let sql = format!(
        "{} WHERE document_id = ?1 AND version_number = ?2",
        VERSION_SELECT
    );
    conn.query_row(
        &sql,
        rusqlite::params![document_id, version_number],
        row_to_version,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!(
            "Version {} of document '{}' not found",
            version_number, document_id
        )),
        _ => StoreError::Db(e),
    })
}

/// Lists all versions of a document, newest first.
pub fn list_versions(conn: &Connection, document_id: &str) -> Result<Vec<Version>, StoreError> {
    let sql = format!(
        "{} WHERE document_id = ?1 ORDER BY version_number DESC",
        VERSION_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let versions = stmt
        .query_map([document_id], row_to_version)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(versions)
}

/// Compares two versions of the same document. Pure read.
///
/// Produces a line-oriented diff of content from `from_number` to
/// `to_number`, plus flags for title and description changes.
pub fn compare_versions(
    conn: &Connection,
    document_id: &str,
    from_number: i64,
    to_number: i64,
) -> Result<VersionDiff, StoreError> {
    let from = get_by_number(conn, document_id, from_number)?;
    let to = get_by_number(conn, document_id, to_number)?;

    Ok(VersionDiff {
        from_version: from.version_number,
        to_version: to.version_number,
        title_changed: from.title != to.title,
        description_changed: from.description != to.description,
        content_diff: diff_lines(&from.content, &to.content),
    })
}

/// Inputs above this many lines on either side are summarized instead of
/// diffed: the LCS table is quadratic in line count and would otherwise
/// allocate without bound on large content.
const MAX_DIFF_LINES: usize = 2_000;

/// Line-oriented diff from `old` to `new`.
///
/// Standard LCS backtrack: unchanged lines are prefixed "  ", removals "- ",
/// additions "+ ". When either side exceeds [`MAX_DIFF_LINES`], the result
/// is a single summary line (or empty when the contents are identical).
pub fn diff_lines(old: &str, new: &str) -> Vec<String> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let n = old_lines.len();
    let m = new_lines.len();

    if n > MAX_DIFF_LINES || m > MAX_DIFF_LINES {
        if old == new {
            return Vec::new();
        }
        return vec![format!(
            "(content changed: {} -> {} lines, too large to diff)",
            n, m
        )];
    }

    // lcs[i][j] = LCS length of old_lines[i..] and new_lines[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old_lines[i] == new_lines[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old_lines[i] == new_lines[j] {
            out.push(format!("  {}", old_lines[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(format!("- {}", old_lines[i]));
            i += 1;
        } else {
            out.push(format!("+ {}", new_lines[j]));
            j += 1;
        }
    }
    while i < n {
        out.push(format!("- {}", old_lines[i]));
        i += 1;
    }
    while j < m {
        out.push(format!("+ {}", new_lines[j]));
        j += 1;
    }

    out
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

    fn make_document(conn: &Connection) -> (String, String) {
        let user = repo::ensure_user(conn, "alice").unwrap();
        let doc = repo::create_document(conn, "Doc", "Content", "", &user.id).unwrap();
        (doc.id, user.id)
    }

    #[test]
    fn first_version_is_number_one() {
        let conn = setup_test_db();
        let (doc_id, user_id) = make_document(&conn);

        let v = create_version(&conn, &doc_id, "Doc", "Content", "", "initial version", &user_id)
            .expect("create_version should succeed");
        assert_eq!(v.version_number, 1);

        let doc = repo::get_document(&conn, &doc_id).unwrap();
        assert_eq!(doc.version_count, 1);
    }

    #[test]
    fn version_numbers_are_gapless_and_increasing() {
        let conn = setup_test_db();
        let (doc_id, user_id) = make_document(&conn);

        for i in 1..=5 {
            let content = format!("revision {}", i);
            let v = create_version(&conn, &doc_id, "Doc", &content, "", "", &user_id).unwrap();
            assert_eq!(v.version_number, i);
        }

        let doc = repo::get_document(&conn, &doc_id).unwrap();
        assert_eq!(doc.version_count, 5);

        // The set of numbers must be exactly {1..version_count}.
        let mut numbers: Vec<i64> = list_versions(&conn, &doc_id)
            .unwrap()
            .iter()
            .map(|v| v.version_number)
            .collect();
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=doc.version_count).collect::<Vec<_>>());
    }

    #[test]
    fn create_version_unknown_document_is_not_found() {
        let conn = setup_test_db();
        let (_, user_id) = make_document(&conn);

        let err = create_version(&conn, "no-such-doc", "T", "C", "", "", &user_id)
            .expect_err("unknown document should fail");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn duplicate_number_insert_violates_uniqueness() {
        let conn = setup_test_db();
        let (doc_id, user_id) = make_document(&conn);
        create_version(&conn, &doc_id, "T", "C", "", "", &user_id).unwrap();

        // A direct insert under an already-claimed number must fail with the
        // uniqueness signal the retry loop keys on.
        let err = conn
            .execute(
                "INSERT INTO versions (id, document_id, version_number, title, content,
                                       description, change_summary, author_id, created_at)
                 VALUES ('dup', ?1, 1, 'T', 'C', '', '', ?2, '')",
                rusqlite::params![doc_id, user_id],
            )
            .expect_err("duplicate version_number should fail");
        assert!(crate::db::is_unique_violation(&err));
    }

    #[test]
    fn assignment_reads_max_fresh() {
        let conn = setup_test_db();
        let (doc_id, user_id) = make_document(&conn);
        create_version(&conn, &doc_id, "T", "C", "", "", &user_id).unwrap();

        // Simulate a concurrent writer that already claimed number 2 behind
        // the counter's back: the next create must read past it to 3.
        conn.execute(
            "INSERT INTO versions (id, document_id, version_number, title, content,
                                   description, change_summary, author_id, created_at)
             VALUES ('foreign', ?1, 2, 'T', 'C', '', '', ?2, '')",
            rusqlite::params![doc_id, user_id],
        )
        .unwrap();

        let v = create_version(&conn, &doc_id, "T", "C2", "", "", &user_id).unwrap();
        assert_eq!(v.version_number, 3);
    }

    #[test]
    fn concurrent_writers_never_duplicate_numbers() {
        // Two threads race create_version on separate connections to the
        // same file-backed database.
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("race.db");

        let mut conn = crate::db::open_connection_at(&path).unwrap();
        run_migrations(&mut conn).unwrap();
        let (doc_id, user_id) = make_document(&conn);
        create_version(&conn, &doc_id, "T", "v1", "", "", &user_id).unwrap();

        let mut handles = Vec::new();
        for t in 0..2 {
            let path = path.clone();
            let doc_id = doc_id.clone();
            let user_id = user_id.clone();
            handles.push(std::thread::spawn(move || {
                let conn = crate::db::open_connection_at(&path).unwrap();
                let content = format!("from thread {}", t);
                create_version(&conn, &doc_id, "T", &content, "", "", &user_id).unwrap()
            }));
        }

        for handle in handles {
            handle.join().expect("writer thread should not panic");
        }

        let mut numbers: Vec<i64> = list_versions(&conn, &doc_id)
            .unwrap()
            .iter()
            .map(|v| v.version_number)
            .collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3]);

        let doc = repo::get_document(&conn, &doc_id).unwrap();
        assert_eq!(doc.version_count, 3);
    }

    #[test]
    fn get_latest_and_by_number() {
        let conn = setup_test_db();
        let (doc_id, user_id) = make_document(&conn);
        create_version(&conn, &doc_id, "T", "first", "", "", &user_id).unwrap();
        create_version(&conn, &doc_id, "T", "second", "", "", &user_id).unwrap();

        let latest = get_latest(&conn, &doc_id).unwrap();
        assert_eq!(latest.version_number, 2);
        assert_eq!(latest.content, "second");

        let first = get_by_number(&conn, &doc_id, 1).unwrap();
        assert_eq!(first.content, "first");

        assert!(matches!(
            get_by_number(&conn, &doc_id, 99),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            get_latest(&conn, "no-such-doc"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn compare_versions_flags_and_diff() {
        let conn = setup_test_db();
        let (doc_id, user_id) = make_document(&conn);
        create_version(&conn, &doc_id, "Old title", "a\nb\nc", "", "", &user_id).unwrap();
        create_version(&conn, &doc_id, "New title", "a\nx\nc", "", "", &user_id).unwrap();

        let diff = compare_versions(&conn, &doc_id, 1, 2).unwrap();
        assert_eq!(diff.from_version, 1);
        assert_eq!(diff.to_version, 2);
        assert!(diff.title_changed);
        assert!(!diff.description_changed);
        assert_eq!(
            diff.content_diff,
            vec!["  a", "- b", "+ x", "  c"]
        );
    }

    #[test]
    fn diff_lines_identical_input() {
        let diff = diff_lines("a\nb", "a\nb");
        assert_eq!(diff, vec!["  a", "  b"]);
    }

    #[test]
    fn diff_lines_pure_insert_and_delete() {
        assert_eq!(diff_lines("", "a\nb"), vec!["+ a", "+ b"]);
        assert_eq!(diff_lines("a\nb", ""), vec!["- a", "- b"]);
    }

    #[test]
    fn diff_lines_tail_addition() {
        let diff = diff_lines("a", "a\nb\nc");
        assert_eq!(diff, vec!["  a", "+ b", "+ c"]);
    }

    #[test]
    fn diff_lines_summarizes_oversized_input() {
        let huge = "x\n".repeat(MAX_DIFF_LINES + 1);

        let diff = diff_lines(&huge, "x");
        assert_eq!(diff.len(), 1);
        assert!(diff[0].contains("too large to diff"));

        // Identical oversized content reports no changes, not a summary.
        assert!(diff_lines(&huge, &huge).is_empty());

        // At the bound the real diff still runs.
        let at_limit = "x\n".repeat(MAX_DIFF_LINES);
        let diff = diff_lines(&at_limit, &at_limit);
        assert_eq!(diff.len(), MAX_DIFF_LINES);
    }
}
