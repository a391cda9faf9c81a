//! Output formatting for the prompt store CLI.
//!
//! Two modes:
//! - **JSON**: Compact machine-readable output (the default)
//! - **Pretty**: Human-readable formatted output (enabled via `--pretty`)
//!
//! JSON serializes the models directly through serde_json, so the wire shape
//! is stable. Pretty output favours labeled fields and one-line summaries.

use crate::models::{Collaboration, Document, Tag, Version, VersionDiff};
use serde::Serialize;

/// Output mode for CLI results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Compact JSON output (default).
    Json,
    /// Human-readable formatted output.
    Pretty,
}

/// Serialize a value to compact JSON and print to stdout.
///
/// # Panics
///
/// Panics if serialization fails, which should only happen if the type has a
/// broken `Serialize` implementation.
pub fn print_json<T: Serialize>(value: &T) {
    let json = serde_json::to_string(value).expect("failed to serialize to JSON");
    println!("{}", json);
}

/// Output dispatcher choosing between JSON serialization and a custom
/// pretty-print closure.
pub fn print<T: Serialize>(mode: OutputMode, value: &T, pretty_fn: impl FnOnce()) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Pretty => pretty_fn(),
    }
}

/// Print a document in human-readable format.
///
/// Format:
/// ```text
/// Title:    My Prompt
/// ID:       <uuid>
/// Owner:    <user_id>
/// Tags:     urgent, draft
/// Versions: 3
/// Views:    12   Tests: 2   Stars: 0
/// Created:  2026-01-15T10:30:00Z
/// Updated:  2026-01-15T11:00:00Z
///
/// <content>
/// ```
pub fn print_pretty_document(doc: &Document) {
    println!("Title:    {}", doc.title);
    println!("ID:       {}", doc.id);
    println!("Owner:    {}", doc.owner_id);

    if doc.description.is_empty() {
        println!("Desc:     (none)");
    } else {
        println!("Desc:     {}", doc.description);
    }

    if doc.tags.is_empty() {
        println!("Tags:     (none)");
    } else {
        println!("Tags:     {}", doc.tags.join(", "));
    }

    println!("Versions: {}", doc.version_count);
    println!(
        "Views:    {}   Tests: {}   Stars: {}",
        doc.view_count, doc.test_count, doc.star_count
    );
    if let Some(ref tested) = doc.last_tested_at {
        println!("Tested:   {}", tested);
    }
    if doc.is_deleted {
        println!("Deleted:  yes");
    }
    println!("Created:  {}", doc.created_at);
    println!("Updated:  {}", doc.updated_at);
    println!();
    println!("{}", doc.content);
}

/// Print a list of documents as a one-line-per-document summary.
///
/// Format: `<id> | v<count> | <title> | <owner_id>`
pub fn print_pretty_documents(docs: &[Document]) {
    if docs.is_empty() {
        println!("(no documents)");
        return;
    }

    for doc in docs {
        println!(
            "{} | v{} | {} | {}",
            doc.id, doc.version_count, doc.title, doc.owner_id
        );
    }
}

/// Print a version in human-readable format, including its full content.
pub fn print_pretty_version(version: &Version) {
    println!("Version: {}", version.version_number);
    println!("ID:      {}", version.id);
    println!("Doc:     {}", version.document_id);
    println!("Title:   {}", version.title);
    println!("Summary: {}", version.change_summary);
    println!("Author:  {}", version.author_id);
    println!("Created: {}", version.created_at);
    println!();
    println!("{}", version.content);
}

/// Print a version history as a one-line-per-version summary, newest first.
///
/// Format: `v<number> | <created_at> | <summary> | <author_id>`
pub fn print_pretty_versions(versions: &[Version]) {
    if versions.is_empty() {
        println!("(no versions)");
        return;
    }

    for version in versions {
        println!(
            "v{} | {} | {} | {}",
            version.version_number, version.created_at, version.change_summary, version.author_id
        );
    }
}

/// Print a version comparison: changed-field flags followed by a unified
/// line diff of the content.
pub fn print_pretty_diff(diff: &VersionDiff) {
    println!("Comparing v{} -> v{}", diff.from_version, diff.to_version);
    println!("Title changed:       {}", diff.title_changed);
    println!("Description changed: {}", diff.description_changed);
    println!();
    if diff.content_diff.is_empty() {
        println!("(content identical)");
    } else {
        for line in &diff.content_diff {
            println!("{}", line);
        }
    }
}

/// Print a tag in human-readable format.
///
/// Format: `<name> [<category>] <color> used:<use_count>`
pub fn print_pretty_tag(tag: &Tag) {
    println!(
        "{} [{}] {} used:{}",
        tag.name, tag.category, tag.color, tag.use_count
    );
}

/// Print a list of tags, one per line.
pub fn print_pretty_tags(tags: &[Tag]) {
    if tags.is_empty() {
        println!("(no tags)");
        return;
    }

    for tag in tags {
        print_pretty_tag(tag);
    }
}

/// Print the collaborators on a document.
///
/// Format: `<user_id> | <permission> | invited by <invited_by> | <accepted?>`
pub fn print_pretty_collaborations(collabs: &[Collaboration]) {
    if collabs.is_empty() {
        println!("(no collaborators)");
        return;
    }

    for collab in collabs {
        let accepted = match collab.accepted_at {
            Some(ref at) => at.as_str(),
            None => "pending",
        };
        println!(
            "{} | {} | invited by {} | {}",
            collab.user_id, collab.permission, collab.invited_by, accepted
        );
    }
}
