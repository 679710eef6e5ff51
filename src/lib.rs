//! # nx_core
//!
//! Storage and retrieval engine for a personal collection of Markdown notes.
//! Notes are plain files with a YAML header; a separate, rebuildable index
//! answers full-text and metadata queries.
//!
//! ## Features
//!
//! - **Time-ordered ids**: 26-character ids that sort by creation time and
//!   can be abbreviated on the command line
//! - **Atomic storage**: every write goes through temp file, fsync and rename
//! - **Trash**: soft deletes are reversible until the trash is emptied
//! - **Fuzzy resolution**: find a note from an id prefix or a piece of its title
//! - **Pluggable search**: SQLite FTS5 when available, ripgrep otherwise
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nx_core::config::Config;
//! use nx_core::domain::Note;
//! use nx_core::search::{open_index, SearchQuery};
//! use nx_core::shelf::{FilesystemStore, NoteStore};
//! use nx_core::sync;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env();
//! let store = FilesystemStore::open(&config)?;
//! let index = open_index(&config)?;
//!
//! let mut note = Note::new("Project Plan", "# Project Plan\n\nShip the beta.");
//! note.metadata_mut().add_tag("work");
//! let outcome = sync::save_note(&store, index.as_ref(), &note)?;
//! if let Some(warning) = outcome.index_warning {
//!     eprintln!("{warning}");
//! }
//!
//! let id = store.resolve_single("project")?;
//! let hits = index.search(&SearchQuery::new("beta").with_tag("work"))?;
//! # let _ = (id, hits);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **[`domain`]**: ids, metadata and the note file format
//! - **[`atomic`]**: crash-safe file primitives
//! - **[`shelf`]**: the [`NoteStore`](shelf::NoteStore) contract and its filesystem implementation
//! - **[`search`]**: the [`Index`](search::Index) contract and both backends
//! - **[`sync`]**: keeps the store and the index in step
//! - **[`config`]** and **[`error`]**: ambient plumbing
//!
//! ## Error Handling
//!
//! All fallible operations return [`NxResult<T>`], wrapping [`NxError`].
//! The library logs through `tracing` and never installs a subscriber.

pub mod atomic;
pub mod config;
pub mod domain;
pub mod error;
pub mod search;
pub mod shelf;
pub mod sync;

/// Re-exports the most commonly used types for convenience.
pub use error::{NxError, NxResult};
