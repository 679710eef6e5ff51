//! Full-text and metadata search over notes.
//!
//! Two backends implement [`Index`]:
//!
//! - [`sqlite::SqliteIndex`] keeps an SQLite FTS5 database next to the notes
//!   and ranks matches with BM25.
//! - [`ripgrep::RipgrepIndex`] keeps metadata in memory and hands text
//!   matching to an external line-search tool.
//!
//! [`open_index`] picks one at startup. Callers hold the result as a
//! `Box<dyn Index>` and never need to know which one they got.
//!
//! # Usage
//!
//! ```rust,no_run
//! use nx_core::config::Config;
//! use nx_core::search::{open_index, SearchQuery};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let index = open_index(&Config::from_env())?;
//! for hit in index.search(&SearchQuery::new("release plan").with_tag("work"))? {
//!     println!("{} {:.2} {}", hit.id, hit.score, hit.title);
//! }
//! # Ok(())
//! # }
//! ```

pub mod query;
pub mod ripgrep;
pub mod snippet;
pub mod sqlite;

use std::fmt;

use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{Note, NoteId};
use crate::error::NxResult;

pub use query::{IndexStats, SearchQuery, SearchResult};
pub use ripgrep::RipgrepIndex;
pub use sqlite::SqliteIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Sqlite,
    Ripgrep,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexKind::Sqlite => "sqlite",
            IndexKind::Ripgrep => "ripgrep",
        })
    }
}

/// Searchable view of the note collection.
///
/// The index is derived data: it can always be rebuilt from the notes
/// directory, and a stale index is repaired by [`rebuild`](Index::rebuild).
pub trait Index: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// Inserts or replaces `note`.
    fn add_note(&self, note: &Note) -> NxResult<()>;

    fn update_note(&self, note: &Note) -> NxResult<()>;

    /// Removing an id that is not indexed is not an error.
    fn remove_note(&self, id: &NoteId) -> NxResult<()>;

    fn search(&self, query: &SearchQuery) -> NxResult<Vec<SearchResult>>;

    fn search_ids(&self, query: &SearchQuery) -> NxResult<Vec<NoteId>> {
        Ok(self.search(query)?.into_iter().map(|r| r.id).collect())
    }

    /// Size of the matching set, ignoring `offset` and `limit`.
    fn search_count(&self, query: &SearchQuery) -> NxResult<usize>;

    fn suggest_tags(&self, prefix: &str, limit: usize) -> NxResult<Vec<String>>;

    fn suggest_notebooks(&self, prefix: &str, limit: usize) -> NxResult<Vec<String>>;

    fn get_stats(&self) -> NxResult<IndexStats>;

    fn is_healthy(&self) -> NxResult<bool>;

    fn validate_index(&self) -> NxResult<()>;

    /// Re-derives the whole index from the notes directory.
    fn rebuild(&self) -> NxResult<()>;

    fn optimize(&self) -> NxResult<()>;

    fn vacuum(&self) -> NxResult<()>;

    fn begin_transaction(&self) -> NxResult<()>;

    fn commit_transaction(&self) -> NxResult<()>;

    fn rollback_transaction(&self) -> NxResult<()>;
}

/// Opens the preferred backend, falling back to the scan-based one.
///
/// A failure of the fallback is returned as is.
pub fn open_index(config: &Config) -> NxResult<Box<dyn Index>> {
    if config.prefer_sqlite {
        match SqliteIndex::open(&config.index_file, &config.notes_dir) {
            Ok(index) => {
                info!(path = %config.index_file.display(), "using sqlite index");
                return Ok(Box::new(index));
            }
            Err(e) => warn!(error = %e, "sqlite index unavailable, falling back to ripgrep"),
        }
    }

    let index = RipgrepIndex::initialize(&config.notes_dir, &config.search_tool)?;
    info!(notes = %config.notes_dir.display(), "using ripgrep index");
    Ok(Box::new(index))
}

/// Shared suggestion filter: case-sensitive prefix, sorted, truncated.
pub(crate) fn suggest<'a, I>(candidates: I, prefix: &str, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut found: Vec<String> = candidates
        .into_iter()
        .filter(|c| c.starts_with(prefix))
        .map(str::to_string)
        .collect();
    found.sort();
    found.dedup();
    found.truncate(limit);
    found
}
