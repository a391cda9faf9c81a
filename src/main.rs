//! Prompt store CLI — a local, multi-user prompt versioning tool.
//!
//! This binary provides the `promptstore` command with subcommands for
//! managing documents, their version history, tags, and sharing. All output
//! is JSON by default with an optional `--pretty` flag for human readability.

use clap::{Parser, Subcommand};
use promptstore::models::Permission;
use promptstore::output::{self, OutputMode};
use promptstore::service::{self, EditRequest};
use promptstore::{access, db, repo, tags, versions};
use std::io::{self, Read as _};
use std::process;

/// Input validation for security hardening.
mod validation {
    use promptstore::db::StoreError;

    pub const MAX_USERNAME_LEN: usize = 128;
    pub const MAX_TITLE_LEN: usize = 500;
    pub const MAX_CONTENT_LEN: usize = 10_000_000; // 10 MB
    pub const MAX_DESCRIPTION_LEN: usize = 2000;
    pub const MAX_TAG_NAME_LEN: usize = 100;
    pub const MAX_TAGS_COUNT: usize = 50;
    pub const MAX_SUMMARY_LEN: usize = 500;

    pub fn validate_username(username: &str) -> Result<(), StoreError> {
        if username.is_empty() {
            return Err(StoreError::InvalidInput(
                "Username must not be empty".to_string(),
            ));
        }
        if username.len() > MAX_USERNAME_LEN {
            return Err(StoreError::InvalidInput(format!(
                "Username too long (max {} characters)",
                MAX_USERNAME_LEN
            )));
        }
        Ok(())
    }

    pub fn validate_title(title: &str) -> Result<(), StoreError> {
        if title.is_empty() {
            return Err(StoreError::InvalidInput(
                "Title must not be empty".to_string(),
            ));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(StoreError::InvalidInput(format!(
                "Title too long (max {} characters)",
                MAX_TITLE_LEN
            )));
        }
        Ok(())
    }

    pub fn validate_content(content: &str) -> Result<(), StoreError> {
        if content.len() > MAX_CONTENT_LEN {
            return Err(StoreError::InvalidInput(format!(
                "Content too long (max {} bytes)",
                MAX_CONTENT_LEN
            )));
        }
        Ok(())
    }

    pub fn validate_description(desc: &str) -> Result<(), StoreError> {
        if desc.len() > MAX_DESCRIPTION_LEN {
            return Err(StoreError::InvalidInput(format!(
                "Description too long (max {} characters)",
                MAX_DESCRIPTION_LEN
            )));
        }
        Ok(())
    }

    pub fn validate_tag_name(name: &str) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidInput(
                "Tag name must not be empty".to_string(),
            ));
        }
        if name.len() > MAX_TAG_NAME_LEN {
            return Err(StoreError::InvalidInput(format!(
                "Tag name too long (max {} characters)",
                MAX_TAG_NAME_LEN
            )));
        }
        Ok(())
    }

    pub fn validate_tag_count(tags: &[String]) -> Result<(), StoreError> {
        if tags.len() > MAX_TAGS_COUNT {
            return Err(StoreError::InvalidInput(format!(
                "Too many tags (max {})",
                MAX_TAGS_COUNT
            )));
        }
        Ok(())
    }

    pub fn validate_summary(summary: &str) -> Result<(), StoreError> {
        if summary.len() > MAX_SUMMARY_LEN {
            return Err(StoreError::InvalidInput(format!(
                "Change summary too long (max {} characters)",
                MAX_SUMMARY_LEN
            )));
        }
        Ok(())
    }
}

/// A local prompt store CLI.
///
/// Manages versioned prompt documents shared between users. All output is
/// JSON by default; use --pretty for human-readable format.
#[derive(Parser)]
#[command(name = "promptstore", version, about)]
struct Cli {
    /// Output in human-readable format instead of JSON.
    #[arg(long, global = true)]
    pretty: bool,

    /// The acting username (default: $PROMPTSTORE_USER or $USER).
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage prompt documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },
    /// Inspect a document's version history.
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },
    /// Manage tags.
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
    /// Share documents with other users.
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },
}

#[derive(Subcommand)]
enum DocAction {
    /// Create a new document (records version 1).
    Create {
        /// Document title.
        #[arg(long)]
        title: String,
        /// Prompt content. Omit to read from stdin.
        #[arg(long)]
        content: Option<String>,
        /// Read content from stdin.
        #[arg(long)]
        stdin: bool,
        /// Description of the document.
        #[arg(long, default_value = "")]
        description: String,
        /// Comma-separated tag names to attach (created if missing).
        #[arg(long)]
        tags: Option<String>,
    },
    /// Get a document by ID (counts as a view).
    Get {
        /// The document ID.
        id: String,
    },
    /// Edit a document, creating a new version if the content changed.
    Edit {
        /// The document ID.
        id: String,
        /// New title.
        #[arg(long)]
        title: Option<String>,
        /// New content.
        #[arg(long)]
        content: Option<String>,
        /// Read content from stdin.
        #[arg(long)]
        stdin: bool,
        /// New description.
        #[arg(long)]
        description: Option<String>,
        /// Comma-separated tag names. Replaces the full tag set.
        #[arg(long)]
        tags: Option<String>,
        /// Summary recorded on the new version.
        #[arg(long)]
        summary: Option<String>,
    },
    /// Save draft edits without creating a version.
    Autosave {
        /// The document ID.
        id: String,
        /// Draft title.
        #[arg(long)]
        title: Option<String>,
        /// Draft content.
        #[arg(long)]
        content: Option<String>,
        /// Read content from stdin.
        #[arg(long)]
        stdin: bool,
    },
    /// Soft-delete a document (owner only).
    Delete {
        /// The document ID.
        id: String,
    },
    /// Restore a soft-deleted document (owner only).
    Restore {
        /// The document ID.
        id: String,
    },
    /// Roll a document back to an earlier version's content.
    Rollback {
        /// The document ID.
        id: String,
        /// The version number to restore.
        version: i64,
    },
    /// List documents with optional filters.
    List {
        /// Only documents owned by the acting user.
        #[arg(long)]
        mine: bool,
        /// Substring match over title, content, and description.
        #[arg(long)]
        keyword: Option<String>,
        /// Filter by tag name.
        #[arg(long)]
        tag: Option<String>,
        /// Include soft-deleted documents.
        #[arg(long)]
        deleted: bool,
        /// Sort order (created, updated, stars).
        #[arg(long, default_value = "created")]
        sort: String,
    },
    /// Record a test run against a document.
    Test {
        /// The document ID.
        id: String,
    },
}

#[derive(Subcommand)]
enum VersionAction {
    /// List a document's versions, newest first.
    List {
        /// The document ID.
        document_id: String,
    },
    /// Get a single version with its full content.
    Get {
        /// The document ID.
        document_id: String,
        /// The version number.
        number: i64,
    },
    /// Compare two versions of a document.
    Diff {
        /// The document ID.
        document_id: String,
        /// The older version number.
        from: i64,
        /// The newer version number.
        to: i64,
    },
}

#[derive(Subcommand)]
enum TagAction {
    /// Create a tag (or return the existing one with the same name).
    Create {
        /// Tag name.
        name: String,
        /// Tag category.
        #[arg(long, default_value = "general")]
        category: String,
        /// Display color as a hex string.
        #[arg(long, default_value = "#6B7280")]
        color: String,
    },
    /// List tags, optionally by category.
    List {
        /// Filter by category.
        #[arg(long)]
        category: Option<String>,
    },
    /// List the most-used tags.
    Popular {
        /// Maximum number of tags to return.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Get a tag by name.
    Get {
        /// The tag name.
        name: String,
    },
    /// Delete an unused tag.
    Delete {
        /// The tag name.
        name: String,
    },
}

#[derive(Subcommand)]
enum ShareAction {
    /// Grant a user access to a document.
    Add {
        /// The document ID.
        document_id: String,
        /// Username of the user to share with.
        username: String,
        /// Permission level (read, write, admin).
        #[arg(long, default_value = "read")]
        permission: String,
    },
    /// Revoke a user's access to a document.
    Remove {
        /// The document ID.
        document_id: String,
        /// Username of the user to remove.
        username: String,
    },
    /// Change a collaborator's permission level.
    Set {
        /// The document ID.
        document_id: String,
        /// Username of the collaborator.
        username: String,
        /// New permission level (read, write, admin).
        permission: String,
    },
    /// List the collaborators on a document.
    List {
        /// The document ID.
        document_id: String,
    },
    /// Accept a pending invitation on a document.
    Accept {
        /// The document ID.
        document_id: String,
    },
}

/// Resolve the acting username from the CLI flag and env vars.
fn resolve_username(cli: &Cli) -> Result<String, db::StoreError> {
    cli.user
        .clone()
        .or_else(|| std::env::var("PROMPTSTORE_USER").ok())
        .or_else(|| std::env::var("USER").ok())
        .ok_or_else(|| {
            db::StoreError::InvalidInput(
                "No user identity. Pass --user or set $PROMPTSTORE_USER.".to_string(),
            )
        })
}

/// Read content from --content or --stdin.
fn read_content(content: &Option<String>, stdin: bool) -> Result<String, db::StoreError> {
    if stdin {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(db::StoreError::Io)?;
        Ok(buf)
    } else if let Some(c) = content {
        Ok(c.clone())
    } else {
        Ok(String::new())
    }
}

/// Split a comma-separated tag list into trimmed, non-empty names.
fn parse_tag_names(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolve tag names to IDs, creating missing tags with defaults.
fn resolve_tag_ids(
    conn: &rusqlite::Connection,
    names: &[String],
    created_by: &str,
) -> Result<Vec<String>, db::StoreError> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        validation::validate_tag_name(name)?;
        let tag = tags::create_or_get(conn, name, "general", "#6B7280", Some(created_by))?;
        ids.push(tag.id);
    }
    Ok(ids)
}

/// Parse a permission string, returning InvalidInput on failure.
fn parse_permission(s: &str) -> Result<Permission, db::StoreError> {
    Permission::from_str(s).ok_or_else(|| {
        db::StoreError::InvalidInput(format!(
            "Unknown permission '{}'. Valid levels: read, write, admin",
            s
        ))
    })
}

/// Parse a sort key string, returning InvalidInput on failure.
fn parse_sort(s: &str) -> Result<repo::DocumentSort, db::StoreError> {
    match s {
        "created" => Ok(repo::DocumentSort::CreatedAt),
        "updated" => Ok(repo::DocumentSort::UpdatedAt),
        "stars" => Ok(repo::DocumentSort::StarCount),
        _ => Err(db::StoreError::InvalidInput(format!(
            "Unknown sort key '{}'. Valid keys: created, updated, stars",
            s
        ))),
    }
}

fn run() -> Result<(), db::StoreError> {
    let cli = Cli::parse();
    let mode = if cli.pretty {
        OutputMode::Pretty
    } else {
        OutputMode::Json
    };

    // Open database and run migrations.
    let mut conn = db::open_connection()?;
    db::run_migrations(&mut conn)?;

    let username = resolve_username(&cli)?;
    validation::validate_username(&username)?;
    let user = repo::ensure_user(&conn, &username)?;

    match &cli.command {
        // =====================================================================
        // Document commands
        // =====================================================================
        Commands::Doc { action } => match action {
            DocAction::Create {
                title,
                content,
                stdin,
                description,
                tags: tag_arg,
            } => {
                validation::validate_title(title)?;
                validation::validate_description(description)?;
                let body = read_content(content, *stdin)?;
                validation::validate_content(&body)?;

                let names = tag_arg.as_deref().map(parse_tag_names).unwrap_or_default();
                validation::validate_tag_count(&names)?;
                let tag_ids = resolve_tag_ids(&conn, &names, &user.id)?;

                let doc =
                    service::create_document(&conn, title, &body, description, &user.id, &tag_ids)?;
                output::print(mode, &doc, || output::print_pretty_document(&doc));
            }
            DocAction::Get { id } => {
                let doc = service::get_document(&conn, id, &user.id)?;
                output::print(mode, &doc, || output::print_pretty_document(&doc));
            }
            DocAction::Edit {
                id,
                title,
                content,
                stdin,
                description,
                tags: tag_arg,
                summary,
            } => {
                if let Some(ref t) = title {
                    validation::validate_title(t)?;
                }
                if let Some(ref d) = description {
                    validation::validate_description(d)?;
                }
                if let Some(ref s) = summary {
                    validation::validate_summary(s)?;
                }
                let body = if *stdin {
                    Some(read_content(&None, true)?)
                } else {
                    content.clone()
                };
                if let Some(ref b) = body {
                    validation::validate_content(b)?;
                }

                let tag_ids = match tag_arg {
                    Some(arg) => {
                        let names = parse_tag_names(arg);
                        validation::validate_tag_count(&names)?;
                        Some(resolve_tag_ids(&conn, &names, &user.id)?)
                    }
                    None => None,
                };

                let edit = EditRequest {
                    title: title.clone(),
                    content: body,
                    description: description.clone(),
                    tag_ids,
                    change_summary: summary.clone(),
                };
                let doc = service::apply_edit(&conn, id, &user.id, &edit)?;
                output::print(mode, &doc, || output::print_pretty_document(&doc));
            }
            DocAction::Autosave {
                id,
                title,
                content,
                stdin,
            } => {
                if let Some(ref t) = title {
                    validation::validate_title(t)?;
                }
                let body = if *stdin {
                    Some(read_content(&None, true)?)
                } else {
                    content.clone()
                };
                if let Some(ref b) = body {
                    validation::validate_content(b)?;
                }
                if title.is_none() && body.is_none() {
                    return Err(db::StoreError::InvalidInput(
                        "Nothing to save. Pass --title, --content, or --stdin.".to_string(),
                    ));
                }
                service::autosave(&conn, id, &user.id, title.as_deref(), body.as_deref())?;
                let msg = serde_json::json!({"saved": id});
                output::print(mode, &msg, || println!("Saved draft of '{}'", id));
            }
            DocAction::Delete { id } => {
                service::soft_delete(&conn, id, &user.id)?;
                let msg = serde_json::json!({"deleted": id});
                output::print(mode, &msg, || println!("Deleted document '{}'", id));
            }
            DocAction::Restore { id } => {
                let doc = service::restore(&conn, id, &user.id)?;
                output::print(mode, &doc, || output::print_pretty_document(&doc));
            }
            DocAction::Rollback { id, version } => {
                let doc = service::rollback_to_version(&conn, id, &user.id, *version)?;
                output::print(mode, &doc, || output::print_pretty_document(&doc));
            }
            DocAction::List {
                mine,
                keyword,
                tag,
                deleted,
                sort,
            } => {
                let filters = repo::DocumentFilters {
                    owner_id: if *mine { Some(user.id.clone()) } else { None },
                    keyword: keyword.clone(),
                    tag: tag.clone(),
                    include_deleted: *deleted,
                    sort: parse_sort(sort)?,
                };
                let docs = repo::list_documents(&conn, &filters)?;
                output::print(mode, &docs, || output::print_pretty_documents(&docs));
            }
            DocAction::Test { id } => {
                let doc = service::record_test(&conn, id, &user.id)?;
                output::print(mode, &doc, || output::print_pretty_document(&doc));
            }
        },

        // =====================================================================
        // Version commands
        // =====================================================================
        Commands::Version { action } => match action {
            VersionAction::List { document_id } => {
                let history = service::list_versions(&conn, document_id, &user.id)?;
                output::print(mode, &history, || output::print_pretty_versions(&history));
            }
            VersionAction::Get {
                document_id,
                number,
            } => {
                service::list_versions(&conn, document_id, &user.id)?;
                let version = versions::get_by_number(&conn, document_id, *number)?;
                output::print(mode, &version, || output::print_pretty_version(&version));
            }
            VersionAction::Diff {
                document_id,
                from,
                to,
            } => {
                service::list_versions(&conn, document_id, &user.id)?;
                let diff = versions::compare_versions(&conn, document_id, *from, *to)?;
                output::print(mode, &diff, || output::print_pretty_diff(&diff));
            }
        },

        // =====================================================================
        // Tag commands
        // =====================================================================
        Commands::Tag { action } => match action {
            TagAction::Create {
                name,
                category,
                color,
            } => {
                validation::validate_tag_name(name)?;
                let tag = tags::create_or_get(&conn, name, category, color, Some(&user.id))?;
                output::print(mode, &tag, || output::print_pretty_tag(&tag));
            }
            TagAction::List { category } => {
                let all = tags::list_tags(&conn, category.as_deref())?;
                output::print(mode, &all, || output::print_pretty_tags(&all));
            }
            TagAction::Popular { limit } => {
                let popular = tags::get_popular(&conn, *limit)?;
                output::print(mode, &popular, || output::print_pretty_tags(&popular));
            }
            TagAction::Get { name } => {
                let tag = tags::get_tag_by_name(&conn, name)?;
                output::print(mode, &tag, || output::print_pretty_tag(&tag));
            }
            TagAction::Delete { name } => {
                let tag = tags::get_tag_by_name(&conn, name)?;
                tags::delete(&conn, &tag.id)?;
                let msg = serde_json::json!({"deleted": name});
                output::print(mode, &msg, || println!("Deleted tag '{}'", name));
            }
        },

        // =====================================================================
        // Sharing commands
        // =====================================================================
        Commands::Share { action } => match action {
            ShareAction::Add {
                document_id,
                username: target,
                permission,
            } => {
                let level = parse_permission(permission)?;
                let target_user = repo::get_user_by_username(&conn, target)?;
                let collab =
                    service::share(&conn, document_id, &user.id, &target_user.id, level)?;
                output::print(mode, &collab, || {
                    output::print_pretty_collaborations(std::slice::from_ref(&collab))
                });
            }
            ShareAction::Remove {
                document_id,
                username: target,
            } => {
                let target_user = repo::get_user_by_username(&conn, target)?;
                service::unshare(&conn, document_id, &user.id, &target_user.id)?;
                let msg = serde_json::json!({"removed": target});
                output::print(mode, &msg, || {
                    println!("Removed '{}' from document '{}'", target, document_id)
                });
            }
            ShareAction::Set {
                document_id,
                username: target,
                permission,
            } => {
                let level = parse_permission(permission)?;
                let target_user = repo::get_user_by_username(&conn, target)?;
                service::set_collaborator_permission(
                    &conn,
                    document_id,
                    &user.id,
                    &target_user.id,
                    level,
                )?;
                let msg = serde_json::json!({"updated": target, "permission": level});
                output::print(mode, &msg, || {
                    println!("Set '{}' to {} on document '{}'", target, level, document_id)
                });
            }
            ShareAction::List { document_id } => {
                let collabs = service::collaborators(&conn, document_id, &user.id)?;
                output::print(mode, &collabs, || {
                    output::print_pretty_collaborations(&collabs)
                });
            }
            ShareAction::Accept { document_id } => {
                access::accept_invitation(&conn, document_id, &user.id)?;
                let msg = serde_json::json!({"accepted": document_id});
                output::print(mode, &msg, || {
                    println!("Accepted invitation to document '{}'", document_id)
                });
            }
        },
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        // Output errors as JSON so callers can parse them.
        let error_json = serde_json::json!({
            "error": e.to_string()
        });
        eprintln!("{}", serde_json::to_string(&error_json).unwrap());
        process::exit(1);
    }
}
