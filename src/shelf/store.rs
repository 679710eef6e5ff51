use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, trace, warn};

use crate::atomic;
use crate::config::Config;
use crate::domain::{Metadata, Note, NoteId};
use crate::error::{NxError, NxResult};
use crate::shelf::cache::MetadataCache;
use crate::shelf::query::{FuzzyMatch, NoteQuery, SortOrder, fuzzy_score};
use crate::shelf::{ChangeCallback, ChangeOp, NoteStore, Shelf, id_from_path};

/// [`NoteStore`] over a [`Shelf`] directory pair.
///
/// Keeps a metadata cache so listing and filtering don't have to parse every
/// file. The cache is refreshed from a full directory scan at most once per
/// TTL and patched in place by this store's own writes. Edits made by other
/// processes become visible after the next refresh.
///
/// A refresh holds the cache lock for the whole scan, so writes that land
/// while it runs are applied after it rather than overwritten by it.
pub struct FilesystemStore {
    shelf: Shelf,
    cache: Mutex<MetadataCache>,
    callback: RwLock<Option<SharedCallback>>,
    scans: AtomicUsize,
}

type SharedCallback = Arc<dyn Fn(&NoteId, ChangeOp) + Send + Sync>;

impl FilesystemStore {
    /// Opens the store described by `config`.
    ///
    /// With `auto_create_dirs` the layout is created as needed; otherwise a
    /// missing notes directory is an error.
    pub fn open(config: &Config) -> NxResult<Self> {
        let shelf = Shelf::from_config(config);
        if config.auto_create_dirs {
            shelf.ensure_exists()?;
        } else if !shelf.notes_dir.is_dir() {
            return Err(NxError::DirectoryNotFound(shelf.notes_dir));
        }
        Ok(Self::with_shelf(shelf, config.cache_ttl))
    }

    pub fn with_shelf(shelf: Shelf, cache_ttl: Duration) -> Self {
        debug!(notes = %shelf.notes_dir.display(), trash = %shelf.trash_dir.display(), "opened filesystem store");
        Self {
            shelf,
            cache: Mutex::new(MetadataCache::new(cache_ttl)),
            callback: RwLock::new(None),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn shelf(&self) -> &Shelf {
        &self.shelf
    }

    pub fn note_path(&self, id: &NoteId) -> PathBuf {
        self.shelf.note_path(id)
    }

    pub fn trash_path(&self, id: &NoteId) -> PathBuf {
        self.shelf.trash_path(id)
    }

    pub fn ensure_directories(&self) -> NxResult<()> {
        self.shelf.ensure_exists()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn invalidate_cache(&self, id: &NoteId) {
        self.cache.lock().remove(id);
    }

    /// Number of full directory scans the cache has performed.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    /// The callback runs outside the lock, so it may call back into the
    /// store or replace itself.
    fn notify(&self, id: &NoteId, op: ChangeOp) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(id, op);
        }
    }

    fn read_note(path: &Path) -> NxResult<Note> {
        let text = atomic::read_file(path)?;
        Note::from_file_format(&text)
    }

    /// Reads the file stored under `id`, rejecting a header that names a
    /// different note.
    fn read_checked(path: &Path, id: &NoteId) -> NxResult<Note> {
        let note = Self::read_note(path)?;
        if note.id() != *id {
            return Err(NxError::Parse(format!(
                "{} declares id {}",
                path.display(),
                note.id()
            )));
        }
        Ok(note)
    }

    /// Locks the cache, rescanning first if it has gone stale.
    fn fresh_cache(&self) -> NxResult<MutexGuard<'_, MetadataCache>> {
        let mut cache = self.cache.lock();
        if cache.is_stale() {
            self.scan_into(&mut cache)?;
        }
        Ok(cache)
    }

    /// Rescans the notes directory into `cache`. Unreadable files and files
    /// whose header id disagrees with their name are skipped.
    fn scan_into(&self, cache: &mut MetadataCache) -> NxResult<()> {
        let files = match atomic::list_markdown(&self.shelf.notes_dir) {
            Ok(files) => files,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut entries = HashMap::with_capacity(files.len());
        for path in &files {
            let Some(id) = id_from_path(path) else {
                trace!(path = %path.display(), "ignoring file without a note id name");
                continue;
            };
            match Self::read_checked(path, &id) {
                Ok(note) => {
                    entries.insert(id, note.resolved_metadata());
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable note"),
            }
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        debug!(count = entries.len(), "refreshed metadata cache");
        cache.replace_all(entries);
        Ok(())
    }

    /// Cached metadata for `id`, loading the note on a miss.
    fn metadata_for(&self, id: &NoteId) -> Option<Metadata> {
        if let Some(meta) = self.cache.lock().get(id) {
            return Some(meta.clone());
        }
        match self.load(id) {
            Ok(note) => Some(note.resolved_metadata()),
            Err(e) => {
                trace!(note_id = %id, error = %e, "skipping note without metadata");
                None
            }
        }
    }

    /// Ids matching `query`, sorted, before pagination.
    fn filtered(&self, query: &NoteQuery) -> NxResult<Vec<NoteId>> {
        let mut ids = Shelf::ids_in(&self.shelf.notes_dir)?;

        if query.is_id_only() {
            ids.sort();
            if query.sort_order == SortOrder::Descending {
                ids.reverse();
            }
            return Ok(ids);
        }

        let mut matched: Vec<Metadata> = Vec::new();
        for id in ids {
            let Some(meta) = self.metadata_for(&id) else {
                continue;
            };
            if !query.matches_metadata(&meta) {
                continue;
            }
            if let Some(text) = &query.content_contains {
                match self.load(&id) {
                    Ok(note) if note.content().contains(text.as_str()) => {}
                    _ => continue,
                }
            }
            matched.push(meta);
        }

        matched.sort_by(|a, b| query.compare(a, b));
        Ok(matched.iter().map(Metadata::id).collect())
    }
}

impl NoteStore for FilesystemStore {
    fn store(&self, note: &Note) -> NxResult<()> {
        note.validate()?;
        let text = note.to_file_format()?;
        let id = note.id();
        let path = self.note_path(&id);

        atomic::write_atomic(&path, text.as_bytes())?;

        // A fresh write supersedes any trashed copy of the same id.
        let trashed = self.trash_path(&id);
        if trashed.exists() {
            atomic::remove_file(&trashed)?;
            debug!(note_id = %id, "dropped superseded trash copy");
        }

        self.cache.lock().insert(note.resolved_metadata());
        debug!(note_id = %id, "stored note");
        self.notify(&id, ChangeOp::Store);
        Ok(())
    }

    fn load(&self, id: &NoteId) -> NxResult<Note> {
        let note = Self::read_checked(&self.note_path(id), id)?;
        self.cache.lock().insert(note.resolved_metadata());
        Ok(note)
    }

    fn remove(&self, id: &NoteId, soft: bool) -> NxResult<()> {
        let active = self.note_path(id);

        let op = if soft {
            if !active.exists() {
                return Err(NxError::NoteNotFound(id.to_string()));
            }
            atomic::move_file(&active, &self.trash_path(id))?;
            ChangeOp::Trash
        } else {
            let trashed = self.trash_path(id);
            let mut found = false;
            for path in [&active, &trashed] {
                if path.exists() {
                    atomic::remove_file(path)?;
                    found = true;
                }
            }
            if !found {
                return Err(NxError::NoteNotFound(id.to_string()));
            }
            ChangeOp::Delete
        };

        self.invalidate_cache(id);
        debug!(note_id = %id, op = %op, "removed note");
        self.notify(id, op);
        Ok(())
    }

    fn exists(&self, id: &NoteId) -> NxResult<bool> {
        Ok(self.note_path(id).is_file())
    }

    fn list(&self, query: &NoteQuery) -> NxResult<Vec<NoteId>> {
        let ids = self.filtered(query)?;
        Ok(query.paginate(ids))
    }

    fn count(&self, query: &NoteQuery) -> NxResult<usize> {
        Ok(self.filtered(query)?.len())
    }

    fn fuzzy_resolve(&self, partial: &str, max_results: usize) -> NxResult<Vec<FuzzyMatch>> {
        let partial = partial.trim();
        if partial.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let mut matches: Vec<FuzzyMatch> = Shelf::ids_in(&self.shelf.notes_dir)?
            .into_iter()
            .filter_map(|id| {
                let title = self
                    .metadata_for(&id)
                    .map(|m| m.title().to_string())
                    .unwrap_or_default();
                let score = fuzzy_score(partial, &id.to_string(), &title);
                (score > 0.0).then_some(FuzzyMatch {
                    id,
                    display_text: title,
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| b.id.cmp(&a.id)));
        matches.truncate(max_results);
        debug!(partial, count = matches.len(), "fuzzy resolved");
        Ok(matches)
    }

    fn resolve_single(&self, partial: &str) -> NxResult<NoteId> {
        self.fuzzy_resolve(partial, 1)?
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| NxError::NoteNotFound(partial.to_string()))
    }

    fn get_all_tags(&self) -> NxResult<Vec<String>> {
        let cache = self.fresh_cache()?;
        let tags: BTreeSet<&String> = cache.values().flat_map(|m| m.tags()).collect();
        Ok(tags.into_iter().cloned().collect())
    }

    fn get_all_notebooks(&self) -> NxResult<Vec<String>> {
        let cache = self.fresh_cache()?;
        let notebooks: BTreeSet<&str> = cache.values().filter_map(|m| m.notebook()).collect();
        Ok(notebooks.into_iter().map(str::to_string).collect())
    }

    fn get_backlinks(&self, target: &NoteId) -> NxResult<Vec<NoteId>> {
        let cache = self.fresh_cache()?;
        let mut ids: Vec<NoteId> = cache
            .values()
            .filter(|m| m.has_link(target))
            .map(Metadata::id)
            .collect();
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    fn list_trashed(&self) -> NxResult<Vec<NoteId>> {
        let mut ids = Shelf::ids_in(&self.shelf.trash_dir)?;
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    fn restore(&self, id: &NoteId) -> NxResult<()> {
        let trashed = self.trash_path(id);
        if !trashed.is_file() {
            return Err(NxError::NoteNotFound(id.to_string()));
        }

        let active = self.note_path(id);
        if active.exists() {
            return Err(NxError::Validation(format!(
                "cannot restore {id}: an active note with this id exists"
            )));
        }

        atomic::move_file(&trashed, &active)?;

        match Self::read_checked(&active, id) {
            Ok(note) => self.cache.lock().insert(note.resolved_metadata()),
            Err(e) => warn!(note_id = %id, error = %e, "restored note does not parse"),
        }

        debug!(note_id = %id, "restored note");
        self.notify(id, ChangeOp::Restore);
        Ok(())
    }

    fn empty_trash(&self) -> NxResult<()> {
        let ids = self.list_trashed()?;
        for id in &ids {
            self.permanently_delete(id)?;
        }
        info!(count = ids.len(), "emptied trash");
        Ok(())
    }

    fn total_size(&self) -> NxResult<u64> {
        let files = match atomic::list_markdown(&self.shelf.notes_dir) {
            Ok(files) => files,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };
        Ok(files
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|m| m.len())
            .sum())
    }

    fn last_modified(&self) -> NxResult<Option<DateTime<Utc>>> {
        let files = match atomic::list_markdown(&self.shelf.notes_dir) {
            Ok(files) => files,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(files
            .iter()
            .filter_map(|path| fs::metadata(path).and_then(|m| m.modified()).ok())
            .max()
            .map(DateTime::<Utc>::from))
    }

    fn rebuild(&self) -> NxResult<()> {
        let mut cache = self.cache.lock();
        cache.clear();
        self.scan_into(&mut cache)?;
        info!(count = cache.len(), "rebuilt store cache");
        Ok(())
    }

    fn vacuum(&self) -> NxResult<()> {
        self.ensure_directories()
    }

    fn validate(&self) -> NxResult<()> {
        for path in atomic::list_markdown(&self.shelf.notes_dir)? {
            match id_from_path(&path) {
                Some(id) => Self::read_checked(&path, &id)?,
                None => Self::read_note(&path)?,
            };
        }
        Ok(())
    }

    fn set_change_callback(&self, callback: ChangeCallback) {
        *self.callback.write() = Some(Arc::from(callback));
    }
}
