//! Scan-based index backend.
//!
//! Metadata lives in memory, rebuilt by walking the notes directory. Text
//! queries run the external search tool (ripgrep) over the files and only
//! the matching files are re-read.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_yaml::Value;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::domain::note::{derive_title, normalize_newlines, parse_time, split_front_matter};
use crate::domain::{Note, NoteId};
use crate::error::{NxError, NxResult};
use crate::search::query::{IndexStats, SearchQuery, SearchResult};
use crate::search::snippet::{extract_snippet, word_count};
use crate::search::{Index, IndexKind, suggest};
use crate::shelf;

/// What the index knows about one note file.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteMeta {
    pub id: NoteId,
    pub title: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub tags: Vec<String>,
    pub notebook: Option<String>,
    pub word_count: usize,
    pub path: PathBuf,
}

impl NoteMeta {
    fn from_note(note: &Note, path: PathBuf) -> Self {
        let meta = note.metadata();
        Self {
            id: note.id(),
            title: note.title(),
            created: meta.created(),
            modified: meta.updated(),
            tags: meta.tags().to_vec(),
            notebook: meta.notebook().map(str::to_string),
            word_count: word_count(note.content()),
            path,
        }
    }

    fn into_result(self, score: f64, snippet: String) -> SearchResult {
        SearchResult {
            id: self.id,
            title: self.title,
            snippet,
            score,
            modified: self.modified,
            tags: self.tags,
            notebook: self.notebook,
        }
    }
}

/// [`Index`] backed by an in-memory metadata map and an external search tool.
///
/// Transactions are accepted but do nothing: there is nothing to roll back
/// beyond what the store already guarantees per file.
pub struct RipgrepIndex {
    notes_dir: PathBuf,
    tool: PathBuf,
    cache: Mutex<HashMap<NoteId, NoteMeta>>,
    last_optimized: Mutex<Option<DateTime<Utc>>>,
}

impl RipgrepIndex {
    /// Resolves `tool` on `PATH` and scans `notes_dir`.
    ///
    /// A tool that cannot be found is an [`NxError::ExternalTool`] error.
    pub fn initialize(notes_dir: &Path, tool: &str) -> NxResult<Self> {
        let tool = which::which(tool)
            .map_err(|e| NxError::ExternalTool(format!("search tool '{tool}' not found: {e}")))?;

        if !notes_dir.is_dir() {
            return Err(NxError::DirectoryNotFound(notes_dir.to_path_buf()));
        }

        let index = Self {
            notes_dir: notes_dir.to_path_buf(),
            tool,
            cache: Mutex::new(HashMap::new()),
            last_optimized: Mutex::new(None),
        };
        index.rebuild()?;
        debug!(tool = %index.tool.display(), "ripgrep index ready");
        Ok(index)
    }

    pub fn notes_dir(&self) -> &Path {
        &self.notes_dir
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Reads every markdown file under the notes directory. Files that
    /// cannot be read or identified are skipped.
    fn scan(&self) -> HashMap<NoteId, NoteMeta> {
        WalkDir::new(&self.notes_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
            .filter_map(|e| match read_note_meta(e.path()) {
                Ok((meta, _)) => Some((meta.id, meta)),
                Err(err) => {
                    warn!(path = %e.path().display(), error = %err, "skipping unreadable note");
                    None
                }
            })
            .collect()
    }

    /// Files containing `text` literally, as reported by the search tool.
    fn run_tool(&self, text: &str) -> NxResult<Vec<PathBuf>> {
        let output = Command::new(&self.tool)
            .arg("--files-with-matches")
            .arg("--type")
            .arg("md")
            .arg("--max-count")
            .arg("1")
            .arg("--regexp")
            .arg(regex::escape(text))
            .arg(&self.notes_dir)
            .output()
            .map_err(|e| NxError::ExternalTool(format!("failed to run {}: {e}", self.tool.display())))?;

        match output.status.code() {
            Some(0) => {}
            // No matches.
            Some(1) => return Ok(Vec::new()),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(NxError::ExternalTool(format!(
                    "{} exited with {}: {}",
                    self.tool.display(),
                    output.status,
                    stderr.trim()
                )));
            }
        }

        let paths: Vec<PathBuf> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect();
        trace!(count = paths.len(), "search tool matched files");
        Ok(paths)
    }

    /// All hits for `query`, filtered and sorted but not paginated.
    fn matching(&self, query: &SearchQuery) -> NxResult<Vec<SearchResult>> {
        let now = Utc::now();

        let mut results: Vec<SearchResult> = if query.has_text() {
            let mut hits = Vec::new();
            for path in self.run_tool(&query.text)? {
                let (meta, body) = match read_note_meta(&path) {
                    Ok(hit) => hit,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable match");
                        continue;
                    }
                };
                if !query.matches_filters(&meta.tags, meta.notebook.as_deref(), meta.modified) {
                    continue;
                }
                let score = relevance(&meta, query, now);
                let snippet = if query.highlight {
                    extract_snippet(&body, &query.text, true)
                } else {
                    String::new()
                };
                hits.push(meta.into_result(score, snippet));
            }
            hits
        } else {
            self.cache
                .lock()
                .values()
                .filter(|m| query.matches_filters(&m.tags, m.notebook.as_deref(), m.modified))
                .cloned()
                .map(|m| m.into_result(1.0, String::new()))
                .collect()
        };

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| b.id.cmp(&a.id)));
        Ok(results)
    }
}

impl Index for RipgrepIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Ripgrep
    }

    fn add_note(&self, note: &Note) -> NxResult<()> {
        let path = self.notes_dir.join(shelf::file_name(&note.id()));
        self.cache.lock().insert(note.id(), NoteMeta::from_note(note, path));
        Ok(())
    }

    fn update_note(&self, note: &Note) -> NxResult<()> {
        self.add_note(note)
    }

    fn remove_note(&self, id: &NoteId) -> NxResult<()> {
        self.cache.lock().remove(id);
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> NxResult<Vec<SearchResult>> {
        let results = self.matching(query)?;
        Ok(results
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    fn search_count(&self, query: &SearchQuery) -> NxResult<usize> {
        Ok(self.matching(query)?.len())
    }

    fn suggest_tags(&self, prefix: &str, limit: usize) -> NxResult<Vec<String>> {
        let cache = self.cache.lock();
        let tags = cache.values().flat_map(|m| m.tags.iter().map(String::as_str));
        Ok(suggest(tags, prefix, limit))
    }

    fn suggest_notebooks(&self, prefix: &str, limit: usize) -> NxResult<Vec<String>> {
        let cache = self.cache.lock();
        let notebooks = cache.values().filter_map(|m| m.notebook.as_deref());
        Ok(suggest(notebooks, prefix, limit))
    }

    fn get_stats(&self) -> NxResult<IndexStats> {
        let (total_notes, total_words, last_updated) = {
            let cache = self.cache.lock();
            (
                cache.len(),
                cache.values().map(|m| m.word_count).sum::<usize>(),
                cache.values().map(|m| m.modified).max(),
            )
        };

        // The "index" is the notes directory itself.
        let index_size_bytes: u64 = WalkDir::new(&self.notes_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();

        Ok(IndexStats {
            total_notes,
            total_words,
            index_size_bytes,
            last_updated,
            last_optimized: *self.last_optimized.lock(),
        })
    }

    fn is_healthy(&self) -> NxResult<bool> {
        Ok(self.notes_dir.is_dir() && which::which(&self.tool).is_ok())
    }

    fn validate_index(&self) -> NxResult<()> {
        if !self.notes_dir.is_dir() {
            return Err(NxError::DirectoryNotFound(self.notes_dir.clone()));
        }
        which::which(&self.tool).map_err(|e| {
            NxError::ExternalTool(format!("search tool {} unavailable: {e}", self.tool.display()))
        })?;
        Ok(())
    }

    /// Builds a fresh map and swaps it in, so a failed scan never leaves a
    /// half-filled cache behind.
    fn rebuild(&self) -> NxResult<()> {
        if !self.notes_dir.is_dir() {
            return Err(NxError::DirectoryNotFound(self.notes_dir.clone()));
        }
        let fresh = self.scan();
        let count = fresh.len();
        *self.cache.lock() = fresh;
        info!(count, "rebuilt ripgrep index");
        Ok(())
    }

    fn optimize(&self) -> NxResult<()> {
        self.rebuild()?;
        *self.last_optimized.lock() = Some(Utc::now());
        Ok(())
    }

    fn vacuum(&self) -> NxResult<()> {
        Ok(())
    }

    fn begin_transaction(&self) -> NxResult<()> {
        Ok(())
    }

    fn commit_transaction(&self) -> NxResult<()> {
        Ok(())
    }

    fn rollback_transaction(&self) -> NxResult<()> {
        Ok(())
    }
}

/// Relevance of a text hit in `[0, 1]`.
///
/// Starts at 1.0, adds 0.5 for a title match, 0.2 per requested tag the note
/// has and up to 0.1 for notes modified in the last 30 days, then clamps.
pub fn relevance(meta: &NoteMeta, query: &SearchQuery, now: DateTime<Utc>) -> f64 {
    let mut score = 1.0;

    if !query.text.is_empty() && meta.title.to_lowercase().contains(&query.text.to_lowercase()) {
        score += 0.5;
    }

    score += 0.2 * query.tags.iter().filter(|t| meta.tags.contains(t)).count() as f64;

    let days = (now - meta.modified).num_days();
    if (0..30).contains(&days) {
        score += 0.1 * (30 - days) as f64 / 30.0;
    }

    score.min(1.0)
}

/// Reads a note file leniently, returning its metadata and body.
///
/// Headers may be missing or partial. The id comes from the file name, or
/// the header when the name is not an id; without either the file is
/// rejected. Missing dates fall back to the file's modification time.
pub(crate) fn read_note_meta(path: &Path) -> NxResult<(NoteMeta, String)> {
    let raw = crate::atomic::read_file(path)?;
    let text = normalize_newlines(&raw);

    let mtime = fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let (header, body) = split_front_matter(&text).unwrap_or(("", &*text));
    let header: Value = if header.trim().is_empty() {
        Value::Null
    } else {
        serde_yaml::from_str(header).unwrap_or_else(|e| {
            debug!(path = %path.display(), error = %e, "ignoring malformed header");
            Value::Null
        })
    };

    let id = shelf::id_from_path(path)
        .or_else(|| header_str(&header, "id").and_then(|s| NoteId::parse(s).ok()))
        .ok_or_else(|| NxError::Parse(format!("{}: no note id", path.display())))?;

    let title = header_str(&header, "title")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| derive_title(body))
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let created = header_time(&header, &["created"]).unwrap_or(mtime);
    let modified = header_time(&header, &["updated", "modified"]).unwrap_or(mtime);

    let meta = NoteMeta {
        id,
        title,
        created,
        modified,
        tags: header_tags(&header),
        notebook: header_str(&header, "notebook")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        word_count: word_count(body),
        path: path.to_path_buf(),
    };

    Ok((meta, body.to_string()))
}

fn header_str<'a>(header: &'a Value, key: &str) -> Option<&'a str> {
    header.get(key)?.as_str()
}

fn header_time(header: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .find_map(|k| header_str(header, k))
        .and_then(|s| parse_time(s).ok())
}

/// Accepts a YAML list or a comma-separated string.
fn header_tags(header: &Value) -> Vec<String> {
    let mut tags: Vec<String> = match header.get("tags") {
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s
            .trim_matches(|c| c == '[' || c == ']')
            .split(',')
            .map(|t| t.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .collect(),
        _ => Vec::new(),
    };
    tags.retain(|t| !t.is_empty());
    tags
}
