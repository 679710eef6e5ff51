//! File-backed note storage.
//!
//! A [`Shelf`] is the on-disk layout: one directory of active notes, one
//! trash directory, each holding `<NoteId>.md` files. [`NoteStore`] is the
//! contract callers program against; [`store::FilesystemStore`] implements
//! it on top of a shelf. [`notebooks::NotebookManager`] groups notes by
//! notebook through any store.

pub mod cache;
pub mod notebooks;
pub mod query;
pub mod store;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::atomic;
use crate::config::Config;
use crate::domain::{Note, NoteId};
use crate::error::NxResult;

pub use notebooks::{NotebookInfo, NotebookManager, NotebookStats};
pub use query::{FuzzyMatch, NoteQuery, SortBy, SortOrder};
pub use store::FilesystemStore;

/// Directory layout of a note collection.
#[derive(Debug, Clone)]
pub struct Shelf {
    pub notes_dir: PathBuf,
    pub trash_dir: PathBuf,
}

impl Shelf {
    pub fn new(notes_dir: impl Into<PathBuf>, trash_dir: impl Into<PathBuf>) -> Self {
        Self {
            notes_dir: notes_dir.into(),
            trash_dir: trash_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.notes_dir, &config.trash_dir)
    }

    /// Creates both directories if they are missing.
    pub fn ensure_exists(&self) -> NxResult<()> {
        atomic::ensure_dir(&self.notes_dir)?;
        atomic::ensure_dir(&self.trash_dir)
    }

    /// Path of the active file for `id`.
    pub fn note_path(&self, id: &NoteId) -> PathBuf {
        self.notes_dir.join(file_name(id))
    }

    /// Path `id` occupies while soft-deleted.
    pub fn trash_path(&self, id: &NoteId) -> PathBuf {
        self.trash_dir.join(file_name(id))
    }

    /// Ids of the markdown files in `dir` whose stem is a valid [`NoteId`].
    ///
    /// A missing directory is treated as empty.
    pub(crate) fn ids_in(dir: &Path) -> NxResult<Vec<NoteId>> {
        let files = match atomic::list_markdown(dir) {
            Ok(files) => files,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(files.iter().filter_map(|path| id_from_path(path)).collect())
    }
}

pub(crate) fn file_name(id: &NoteId) -> String {
    format!("{id}.md")
}

pub(crate) fn id_from_path(path: &Path) -> Option<NoteId> {
    let stem = path.file_stem()?.to_str()?;
    NoteId::parse(stem).ok()
}

/// What happened to a note, as reported to change callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Store,
    Trash,
    Delete,
    Restore,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Store => "store",
            ChangeOp::Trash => "trash",
            ChangeOp::Delete => "delete",
            ChangeOp::Restore => "restore",
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoked after every successful mutation.
pub type ChangeCallback = Box<dyn Fn(&NoteId, ChangeOp) + Send + Sync>;

/// Durable storage of notes.
///
/// Every method takes `&self`; implementations synchronise internally so a
/// store can be shared between threads.
pub trait NoteStore: Send + Sync {
    /// Validates and atomically writes `note`, replacing any previous version.
    fn store(&self, note: &Note) -> NxResult<()>;

    /// Reads an active note. Trashed notes are not found.
    fn load(&self, id: &NoteId) -> NxResult<Note>;

    /// `soft` moves the note to the trash; otherwise the file is deleted
    /// from wherever it lives.
    fn remove(&self, id: &NoteId, soft: bool) -> NxResult<()>;

    fn exists(&self, id: &NoteId) -> NxResult<bool>;

    fn store_batch(&self, notes: &[Note]) -> NxResult<()> {
        notes.iter().try_for_each(|note| self.store(note))
    }

    /// Loads what it can; ids that fail to load are skipped.
    fn load_batch(&self, ids: &[NoteId]) -> NxResult<Vec<Note>> {
        Ok(ids.iter().filter_map(|id| self.load(id).ok()).collect())
    }

    fn list(&self, query: &NoteQuery) -> NxResult<Vec<NoteId>>;

    fn search(&self, query: &NoteQuery) -> NxResult<Vec<Note>> {
        let ids = self.list(query)?;
        self.load_batch(&ids)
    }

    fn count(&self, query: &NoteQuery) -> NxResult<usize>;

    fn fuzzy_resolve(&self, partial: &str, max_results: usize) -> NxResult<Vec<FuzzyMatch>>;

    /// Best single match for `partial`; ambiguity is not reported.
    fn resolve_single(&self, partial: &str) -> NxResult<NoteId>;

    fn get_all_tags(&self) -> NxResult<Vec<String>>;

    fn get_all_notebooks(&self) -> NxResult<Vec<String>>;

    fn get_backlinks(&self, target: &NoteId) -> NxResult<Vec<NoteId>>;

    fn list_trashed(&self) -> NxResult<Vec<NoteId>>;

    fn restore(&self, id: &NoteId) -> NxResult<()>;

    fn permanently_delete(&self, id: &NoteId) -> NxResult<()> {
        self.remove(id, false)
    }

    fn empty_trash(&self) -> NxResult<()>;

    fn total_notes(&self) -> NxResult<usize> {
        self.count(&NoteQuery::default())
    }

    /// Combined size in bytes of all active note files.
    fn total_size(&self) -> NxResult<u64>;

    /// Newest modification time among active note files.
    fn last_modified(&self) -> NxResult<Option<DateTime<Utc>>>;

    /// Drops and eagerly refills the metadata cache.
    fn rebuild(&self) -> NxResult<()>;

    fn vacuum(&self) -> NxResult<()>;

    /// Parses every active file, failing on the first bad one.
    fn validate(&self) -> NxResult<()>;

    fn set_change_callback(&self, callback: ChangeCallback);
}
