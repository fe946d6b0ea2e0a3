//! # cursor-chat-export
//!
//! Browse and export [Cursor](https://cursor.com) AI chat history from a local web UI or the
//! command line.
//!
//! ## What it does
//!
//! Cursor keeps its AI conversations in SQLite key-value databases (`state.vscdb`), one
//! per workspace plus a global one. Over the years the editor has written chats in at
//! least six different shapes: legacy chat-panel tabs, composer indexes, prompt and
//! generation logs, and per-bubble rows in the global `cursorDiskKV` table. This crate
//! reads all of them, stitches the fragments back into sessions, guesses which project
//! each session belongs to, and serves the result as JSON or exports it as HTML, JSON
//! or Markdown.
//!
//! Every database is opened **read-only**, so your data is never modified.
//!
//! ## Usage
//!
//! ```sh
//! # Serve the API (and a frontend bundle, if you have one) on 127.0.0.1:5000
//! cursor-chat-export serve --frontend ./frontend/build
//!
//! # List sessions, newest first
//! cursor-chat-export list
//!
//! # Export one session as Markdown
//! cursor-chat-export export 3f2a9c1e ~/notes/cursor --format markdown
//! ```
//!
//! Preferences can be persisted in `~/.config/cursor-chat-export/config.toml`.
//!
//! ## Compatibility
//!
//! Tracks Cursor's internal (undocumented) storage layout. Unknown or malformed records
//! are skipped rather than treated as errors.
pub mod automation;
pub mod exporter;
pub mod extract;
pub mod format;
pub mod importer;
pub mod project;
pub mod server;
pub mod store;
pub mod utils;
pub mod workspace;
