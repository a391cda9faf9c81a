//! Core library for the prompt store: SQLite-backed prompt documents with
//! monotonic version history, reference-counted tags, and per-document
//! permission grants.
//!
//! The layers, bottom to top:
//! - [`db`]: connection setup, migrations, and the [`db::StoreError`] type
//! - [`models`]: plain data structs shared across layers
//! - [`repo`], [`tags`], [`versions`], [`access`]: plain SQL functions over
//!   `rusqlite::Connection`, one module per relation group
//! - [`service`]: permission-checked workflows composing the layers below
//! - [`output`]: JSON/pretty printing for the CLI in `main.rs`

pub mod access;
pub mod db;
pub mod models;
pub mod output;
pub mod repo;
pub mod service;
pub mod tags;
pub mod versions;
