//! Notebook management on top of any [`NoteStore`].
//!
//! Notebooks have no storage of their own: a notebook exists while at least
//! one active note names it. [`NotebookManager::create`] makes an empty
//! notebook visible by storing a placeholder note titled
//! `.notebook_<name>`. Placeholders are left out of counts and statistics.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::domain::metadata::MAX_NOTEBOOK_LEN;
use crate::domain::{Note, NoteId};
use crate::error::{NxError, NxResult};
use crate::shelf::{NoteQuery, NoteStore};

/// Never removed by [`NotebookManager::cleanup_empty`].
pub const DEFAULT_NOTEBOOK: &str = "default";

/// How many tags [`NotebookInfo::top_tags`] keeps.
pub const TOP_TAGS_LIMIT: usize = 10;

const PLACEHOLDER_PREFIX: &str = ".notebook_";

const RESERVED_NAMES: &[&str] = &[".", "..", "tmp", "temp", "cache", "index"];

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9 _-]+$").expect("notebook name pattern is valid"));

/// Summary of one notebook.
///
/// Without statistics only `name` and `note_count` are filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotebookInfo {
    pub name: String,
    pub note_count: usize,
    /// Oldest creation time among the notebook's notes.
    pub created: Option<DateTime<Utc>>,
    /// Newest update time among the notebook's notes.
    pub last_modified: Option<DateTime<Utc>>,
    /// Most used tags, most frequent first, ties alphabetical.
    pub top_tags: Vec<String>,
    pub tag_counts: BTreeMap<String, usize>,
    /// Combined body size in bytes.
    pub total_size: usize,
    /// Notes updated within the last seven days.
    pub recent_notes: usize,
}

impl NotebookInfo {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Totals across every notebook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotebookStats {
    pub total_notebooks: usize,
    pub total_notes: usize,
    /// Notebook holding the most recently updated note.
    pub most_active_notebook: Option<String>,
    /// Notebook with the most notes.
    pub largest_notebook: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// True for the marker notes that keep empty notebooks alive.
pub fn is_placeholder(note: &Note) -> bool {
    note.title().starts_with(PLACEHOLDER_PREFIX)
}

/// Checks that `name` is usable as a notebook name.
pub fn validate_name(name: &str) -> NxResult<()> {
    if name.is_empty() {
        return Err(NxError::Validation("notebook name cannot be empty".into()));
    }
    if name.chars().count() > MAX_NOTEBOOK_LEN {
        return Err(NxError::Validation(format!(
            "notebook name too long (max {MAX_NOTEBOOK_LEN} characters)"
        )));
    }
    if !NAME_RE.is_match(name) {
        return Err(NxError::Validation(format!(
            "notebook name '{name}' may only contain letters, digits, spaces, hyphens and underscores"
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(NxError::Validation(format!(
            "'{name}' is a reserved notebook name"
        )));
    }
    Ok(())
}

/// Notebook operations expressed as note reads and writes.
pub struct NotebookManager<'a> {
    store: &'a dyn NoteStore,
}

impl<'a> NotebookManager<'a> {
    pub fn new(store: &'a dyn NoteStore) -> Self {
        Self { store }
    }

    pub fn exists(&self, name: &str) -> NxResult<bool> {
        Ok(self.store.get_all_notebooks()?.iter().any(|n| n == name))
    }

    /// Makes an empty notebook visible by storing its placeholder note.
    pub fn create(&self, name: &str) -> NxResult<()> {
        validate_name(name)?;
        if self.exists(name)? {
            return Err(NxError::Validation(format!(
                "notebook '{name}' already exists"
            )));
        }

        let mut placeholder = Note::new(
            format!("{PLACEHOLDER_PREFIX}{name}"),
            format!("# {name}\n\nNotebook created on {}\n", Utc::now().to_rfc2822()),
        );
        placeholder.metadata_mut().set_notebook(Some(name.to_string()));
        self.store.store(&placeholder)?;
        info!(notebook = name, "created notebook");
        Ok(())
    }

    /// Permanently deletes the notebook and every note in it.
    ///
    /// Without `force` a notebook that still holds notes is refused. Returns
    /// how many notes were removed, placeholders included.
    pub fn delete(&self, name: &str, force: bool) -> NxResult<usize> {
        self.require(name)?;
        let members = self.members(name)?;

        let user_notes = members.iter().filter(|n| !is_placeholder(n)).count();
        if user_notes > 0 && !force {
            return Err(NxError::Validation(format!(
                "notebook '{name}' contains {user_notes} notes; force the delete or move them first"
            )));
        }

        let mut removed = 0;
        for note in &members {
            match self.store.remove(&note.id(), false) {
                Ok(()) => removed += 1,
                Err(e) => warn!(notebook = name, note_id = %note.id(), error = %e, "failed to delete note"),
            }
        }
        info!(notebook = name, removed, "deleted notebook");
        Ok(removed)
    }

    /// Moves every note of `old_name` into the new, not yet existing,
    /// notebook `new_name`.
    pub fn rename(&self, old_name: &str, new_name: &str) -> NxResult<()> {
        validate_name(new_name)?;
        self.require(old_name)?;
        if self.exists(new_name)? {
            return Err(NxError::Validation(format!(
                "notebook '{new_name}' already exists"
            )));
        }

        for mut note in self.members(old_name)? {
            if is_placeholder(&note) {
                note.metadata_mut()
                    .set_title(format!("{PLACEHOLDER_PREFIX}{new_name}"));
            }
            self.reassign(&mut note, new_name)?;
        }
        info!(from = old_name, to = new_name, "renamed notebook");
        Ok(())
    }

    /// Moves the user notes of `from` into `to`, creating `to` if needed.
    ///
    /// The source placeholder is dropped, so `from` disappears once empty.
    /// Returns how many notes moved.
    pub fn move_all_notes(&self, from: &str, to: &str) -> NxResult<usize> {
        if from == to {
            return Err(NxError::Validation(format!(
                "cannot move notebook '{from}' into itself"
            )));
        }
        self.require(from)?;
        if !self.exists(to)? {
            self.create(to)?;
        }

        let mut moved = 0;
        for mut note in self.members(from)? {
            if is_placeholder(&note) {
                self.store.remove(&note.id(), false)?;
                continue;
            }
            self.reassign(&mut note, to)?;
            moved += 1;
        }
        info!(from, to, moved, "moved notes between notebooks");
        Ok(moved)
    }

    /// Ids of the user notes in `name`, newest first.
    pub fn notes_in(&self, name: &str) -> NxResult<Vec<NoteId>> {
        let mut ids: Vec<NoteId> = self
            .members(name)?
            .iter()
            .filter(|n| !is_placeholder(n))
            .map(Note::id)
            .collect();
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Every notebook sorted by name. `include_stats` fills in the fields
    /// that need the notes loaded.
    pub fn list(&self, include_stats: bool) -> NxResult<Vec<NotebookInfo>> {
        let mut infos = Vec::new();
        for name in self.store.get_all_notebooks()? {
            let info = if include_stats {
                self.stats_for(&name)?
            } else {
                self.basic_info(&name)?
            };
            infos.push(info);
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    pub fn info(&self, name: &str, include_stats: bool) -> NxResult<NotebookInfo> {
        self.require(name)?;
        if include_stats {
            self.stats_for(name)
        } else {
            self.basic_info(name)
        }
    }

    /// How often each tag is used by the user notes in `name`.
    pub fn tag_counts(&self, name: &str) -> NxResult<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for note in self.members(name)? {
            if is_placeholder(&note) {
                continue;
            }
            for tag in note.metadata().tags() {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    pub fn overall_stats(&self) -> NxResult<NotebookStats> {
        let notebooks = self.list(true)?;
        let mut stats = NotebookStats {
            total_notebooks: notebooks.len(),
            ..NotebookStats::default()
        };

        let mut most_notes = 0;
        for notebook in &notebooks {
            stats.total_notes += notebook.note_count;
            if notebook.note_count > most_notes {
                most_notes = notebook.note_count;
                stats.largest_notebook = Some(notebook.name.clone());
            }
            if notebook.last_modified > stats.last_activity {
                stats.last_activity = notebook.last_modified;
                stats.most_active_notebook = Some(notebook.name.clone());
            }
        }
        Ok(stats)
    }

    /// Deletes notebooks that hold nothing but their placeholder.
    /// [`DEFAULT_NOTEBOOK`] is kept. Returns how many were removed.
    pub fn cleanup_empty(&self) -> NxResult<usize> {
        let mut cleaned = 0;
        for name in self.store.get_all_notebooks()? {
            if name == DEFAULT_NOTEBOOK {
                continue;
            }
            if !self.notes_in(&name)?.is_empty() {
                continue;
            }
            match self.delete(&name, true) {
                Ok(_) => cleaned += 1,
                Err(e) => warn!(notebook = %name, error = %e, "failed to clean up notebook"),
            }
        }
        debug!(cleaned, "cleaned up empty notebooks");
        Ok(cleaned)
    }

    /// Problems found across all notebooks; empty when everything is fine.
    pub fn validate(&self) -> NxResult<Vec<String>> {
        let mut problems = Vec::new();
        for name in self.store.get_all_notebooks()? {
            if let Err(e) = validate_name(&name) {
                problems.push(format!("invalid notebook name '{name}': {e}"));
            }
            match self.notes_in(&name) {
                Ok(ids) if ids.is_empty() => problems.push(format!("empty notebook '{name}'")),
                Ok(_) => {}
                Err(e) => problems.push(format!("cannot read notebook '{name}': {e}")),
            }
        }
        Ok(problems)
    }

    fn require(&self, name: &str) -> NxResult<()> {
        if self.exists(name)? {
            Ok(())
        } else {
            Err(NxError::NotebookNotFound(name.to_string()))
        }
    }

    /// Every active note in `name`, placeholders included.
    fn members(&self, name: &str) -> NxResult<Vec<Note>> {
        self.store.search(&NoteQuery::new().with_notebook(name))
    }

    fn reassign(&self, note: &mut Note, notebook: &str) -> NxResult<()> {
        note.metadata_mut().set_notebook(Some(notebook.to_string()));
        note.metadata_mut().touch();
        self.store.store(note)
    }

    fn basic_info(&self, name: &str) -> NxResult<NotebookInfo> {
        let query = NoteQuery::new().with_notebook(name);
        let total = self.store.count(&query)?;
        let placeholders = self
            .store
            .count(&query.title_contains(PLACEHOLDER_PREFIX))?;
        Ok(NotebookInfo {
            note_count: total.saturating_sub(placeholders),
            ..NotebookInfo::named(name)
        })
    }

    fn stats_for(&self, name: &str) -> NxResult<NotebookInfo> {
        let week_ago = Utc::now() - Duration::days(7);
        let mut info = NotebookInfo::named(name);

        for note in self.members(name)? {
            if is_placeholder(&note) {
                continue;
            }
            let meta = note.metadata();
            info.note_count += 1;
            info.created = Some(info.created.map_or(meta.created(), |c| c.min(meta.created())));
            info.last_modified =
                Some(info.last_modified.map_or(meta.updated(), |m| m.max(meta.updated())));
            if meta.updated() > week_ago {
                info.recent_notes += 1;
            }
            info.total_size += note.content().len();
            for tag in meta.tags() {
                *info.tag_counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }

        info.top_tags = top_tags(&info.tag_counts, TOP_TAGS_LIMIT);
        Ok(info)
    }
}

fn top_tags(counts: &BTreeMap<String, usize>, limit: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, &usize)> = counts.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(limit).map(|(tag, _)| tag.clone()).collect()
}
