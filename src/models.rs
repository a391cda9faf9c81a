//! Core data structures for the prompt store.
//!
//! These structs are the shared language between the storage layer (SQL),
//! the service layer, and the CLI/output layer (serde_json). They are kept
//! simple: plain data, no business logic beyond the permission ordering.

use serde::Serialize;

/// A registered user. Authentication happens outside this crate; a user row
/// is the "resolved caller ID" the core operates on.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: String,
    pub updated_at: String,
}

/// The editable entity under version control. Mutable fields mirror the
/// latest version; the row is never physically deleted, only flagged.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub description: String,
    pub owner_id: String,
    pub is_deleted: bool,
    pub view_count: i64,
    pub test_count: i64,
    pub star_count: i64,
    /// Always equals the highest version_number for this document.
    pub version_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tested_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Tag names attached to this document (populated on read, not stored
    /// in the documents table).
    pub tags: Vec<String>,
}

/// An immutable snapshot of a document's content at a point in time.
/// Created once, never updated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Version {
    pub id: String,
    pub document_id: String,
    pub version_number: i64,
    pub title: String,
    pub content: String,
    pub description: String,
    pub change_summary: String,
    pub author_id: String,
    pub created_at: String,
}

/// A shared, reusable label attachable to many documents.
///
/// `use_count` is a reference count over live document associations; it is
/// only ever moved by the tag registry's attach/detach operations.
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub category: String,
    pub color: String,
    pub description: String,
    pub use_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A granted access level for a non-owner user on a specific document.
/// At most one row exists per (document, user) pair.
#[derive(Debug, Clone, Serialize)]
pub struct Collaboration {
    pub id: String,
    pub document_id: String,
    pub user_id: String,
    pub permission: Permission,
    pub invited_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Effective access level for a (user, document) pair.
///
/// Declaration order defines the permission hierarchy, so the derived `Ord`
/// gives `None < Read < Write < Admin` and rank checks are plain `>=`
/// comparisons. `None` is only ever an *effective* level; stored
/// collaboration rows hold read/write/admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    None,
    Read,
    Write,
    Admin,
}

impl Permission {
    /// Parse a stored permission string. Returns None for unrecognized
    /// values; "none" is intentionally not parseable (it is never stored).
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// The string stored in SQLite and displayed in output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of comparing two versions of the same document.
#[derive(Debug, Clone, Serialize)]
pub struct VersionDiff {
    pub from_version: i64,
    pub to_version: i64,
    pub title_changed: bool,
    pub description_changed: bool,
    /// Line-oriented diff of content: each entry is prefixed with "  "
    /// (unchanged), "- " (removed), or "+ " (added).
    pub content_diff: Vec<String>,
}
