//! SQLite FTS5 index backend.
//!
//! The public API is blocking. The index owns a current-thread tokio runtime
//! and drives its single sqlx connection with `block_on`, so it must not be
//! called from inside another async runtime.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{ConnectOptions, QueryBuilder, Row, Sqlite, SqliteConnection};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::atomic;
use crate::domain::{Note, NoteId};
use crate::error::{NxError, NxResult};
use crate::search::query::{IndexStats, SearchQuery, SearchResult};
use crate::search::snippet::{MARK_CLOSE, MARK_OPEN, word_count};
use crate::search::{Index, IndexKind};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        created INTEGER NOT NULL,
        modified INTEGER NOT NULL,
        notebook TEXT,
        content_length INTEGER NOT NULL DEFAULT 0,
        word_count INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS note_tags (
        note_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (note_id, tag)
    )",
    "CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
        id UNINDEXED,
        title,
        content,
        tags,
        notebook
    )",
    "CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created)",
    "CREATE INDEX IF NOT EXISTS idx_notes_modified ON notes(modified)",
    "CREATE INDEX IF NOT EXISTS idx_notes_notebook ON notes(notebook)",
    "CREATE INDEX IF NOT EXISTS idx_note_tags_tag ON note_tags(tag)",
];

/// Tokens of context on each side of a snippet match.
const SNIPPET_TOKENS: u32 = 32;

struct Db {
    conn: SqliteConnection,
    in_transaction: bool,
}

/// [`Index`] stored in an SQLite database with an FTS5 table.
pub struct SqliteIndex {
    path: PathBuf,
    notes_dir: PathBuf,
    runtime: Runtime,
    db: Mutex<Db>,
    last_optimized: Mutex<Option<DateTime<Utc>>>,
}

impl SqliteIndex {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// Fails if the SQLite build lacks FTS5, which lets the caller fall back
    /// to another backend.
    pub fn open(path: &Path, notes_dir: &Path) -> NxResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            atomic::ensure_dir(parent)?;
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let conn = runtime.block_on(async {
            let mut conn = options.connect().await?;
            for stmt in SCHEMA {
                sqlx::query(stmt).execute(&mut conn).await?;
            }
            Ok::<_, sqlx::Error>(conn)
        })?;

        info!(path = %path.display(), "opened sqlite index");

        Ok(Self {
            path: path.to_path_buf(),
            notes_dir: notes_dir.to_path_buf(),
            runtime,
            db: Mutex::new(Db {
                conn,
                in_transaction: false,
            }),
            last_optimized: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs one statement that needs no binds.
    fn execute(&self, sql: &str) -> NxResult<()> {
        let mut db = self.db.lock();
        self.runtime
            .block_on(sqlx::query(sql).execute(&mut db.conn))?;
        Ok(())
    }

    /// One page of hits for `query`, best first.
    fn select(&self, query: &SearchQuery) -> NxResult<Vec<SearchResult>> {
        let mut qb = select_builder(query);
        qb.push(" LIMIT ")
            .push_bind(query.limit as i64)
            .push(" OFFSET ")
            .push_bind(query.offset as i64);

        let mut db = self.db.lock();
        let rows = self
            .runtime
            .block_on(qb.build().fetch_all(&mut db.conn))?;
        drop(db);

        rows.iter().map(|row| result_from_row(row, query.has_text())).collect()
    }

    fn suggest(&self, sql: &str, prefix: &str, limit: usize) -> NxResult<Vec<String>> {
        let mut db = self.db.lock();
        let rows = self.runtime.block_on(
            sqlx::query(sql)
                .bind(prefix.chars().count() as i64)
                .bind(prefix)
                .bind(limit as i64)
                .fetch_all(&mut db.conn),
        )?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(NxError::from))
            .collect()
    }
}

impl Index for SqliteIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Sqlite
    }

    fn add_note(&self, note: &Note) -> NxResult<()> {
        let row = NoteRow::from_note(note);
        let mut db = self.db.lock();
        let conn = &mut db.conn;

        self.runtime.block_on(async {
            sqlx::query("SAVEPOINT note_write").execute(&mut *conn).await?;
            match write_note(conn, &row).await {
                Ok(()) => {
                    sqlx::query("RELEASE note_write").execute(&mut *conn).await?;
                    Ok::<(), NxError>(())
                }
                Err(e) => {
                    let _ = sqlx::query("ROLLBACK TO note_write").execute(&mut *conn).await;
                    let _ = sqlx::query("RELEASE note_write").execute(&mut *conn).await;
                    Err(NxError::from(e))
                }
            }
        })?;

        debug!(note_id = %row.id, "indexed note");
        Ok(())
    }

    fn update_note(&self, note: &Note) -> NxResult<()> {
        self.add_note(note)
    }

    fn remove_note(&self, id: &NoteId) -> NxResult<()> {
        let id = id.to_string();
        let mut db = self.db.lock();
        let conn = &mut db.conn;

        self.runtime.block_on(async {
            delete_note(conn, &id).await?;
            Ok::<_, sqlx::Error>(())
        })?;
        debug!(note_id = %id, "removed note from index");
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> NxResult<Vec<SearchResult>> {
        self.select(query)
    }

    fn search_count(&self, query: &SearchQuery) -> NxResult<usize> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM ");
        push_from_where(&mut qb, query);

        let mut db = self.db.lock();
        let count: i64 = self
            .runtime
            .block_on(qb.build_query_scalar().fetch_one(&mut db.conn))?;
        Ok(count.max(0) as usize)
    }

    fn suggest_tags(&self, prefix: &str, limit: usize) -> NxResult<Vec<String>> {
        self.suggest(
            "SELECT DISTINCT tag FROM note_tags
             WHERE substr(tag, 1, ?) = ?
             ORDER BY tag LIMIT ?",
            prefix,
            limit,
        )
    }

    fn suggest_notebooks(&self, prefix: &str, limit: usize) -> NxResult<Vec<String>> {
        self.suggest(
            "SELECT DISTINCT notebook FROM notes
             WHERE notebook IS NOT NULL AND substr(notebook, 1, ?) = ?
             ORDER BY notebook LIMIT ?",
            prefix,
            limit,
        )
    }

    fn get_stats(&self) -> NxResult<IndexStats> {
        let mut db = self.db.lock();
        let row = self.runtime.block_on(
            sqlx::query(
                "SELECT COUNT(*), COALESCE(SUM(word_count), 0), MAX(modified) FROM notes",
            )
            .fetch_one(&mut db.conn),
        )?;
        drop(db);

        let total_notes: i64 = row.try_get(0)?;
        let total_words: i64 = row.try_get(1)?;
        let last_updated: Option<i64> = row.try_get(2)?;

        Ok(IndexStats {
            total_notes: total_notes.max(0) as usize,
            total_words: total_words.max(0) as usize,
            index_size_bytes: fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
            last_updated: last_updated.and_then(DateTime::from_timestamp_millis),
            last_optimized: *self.last_optimized.lock(),
        })
    }

    fn is_healthy(&self) -> NxResult<bool> {
        let mut db = self.db.lock();
        let ok = self
            .runtime
            .block_on(sqlx::query("SELECT 1").execute(&mut db.conn))
            .is_ok();
        Ok(ok)
    }

    fn validate_index(&self) -> NxResult<()> {
        let mut db = self.db.lock();
        let verdict: String = self.runtime.block_on(
            sqlx::query_scalar("PRAGMA integrity_check").fetch_one(&mut db.conn),
        )?;

        if verdict != "ok" {
            return Err(NxError::System(format!("index integrity check failed: {verdict}")));
        }
        Ok(())
    }

    /// Clears the tables and re-adds every parseable note file.
    fn rebuild(&self) -> NxResult<()> {
        let files = match atomic::list_markdown(&self.notes_dir) {
            Ok(files) => files,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut rows = Vec::with_capacity(files.len());
        for path in &files {
            match atomic::read_file(path).and_then(|text| Note::from_file_format(&text)) {
                Ok(note) => rows.push(NoteRow::from_note(&note)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable note"),
            }
        }

        let mut db = self.db.lock();
        let conn = &mut db.conn;
        self.runtime.block_on(async {
            sqlx::query("SAVEPOINT rebuild").execute(&mut *conn).await?;
            let filled = async {
                sqlx::query("DELETE FROM notes").execute(&mut *conn).await?;
                sqlx::query("DELETE FROM note_tags").execute(&mut *conn).await?;
                sqlx::query("DELETE FROM notes_fts").execute(&mut *conn).await?;
                for row in &rows {
                    write_note(conn, row).await?;
                }
                Ok::<_, sqlx::Error>(())
            }
            .await;

            match filled {
                Ok(()) => {
                    sqlx::query("RELEASE rebuild").execute(&mut *conn).await?;
                    Ok::<(), NxError>(())
                }
                Err(e) => {
                    let _ = sqlx::query("ROLLBACK TO rebuild").execute(&mut *conn).await;
                    let _ = sqlx::query("RELEASE rebuild").execute(&mut *conn).await;
                    Err(NxError::from(e))
                }
            }
        })?;

        info!(count = rows.len(), "rebuilt sqlite index");
        Ok(())
    }

    fn optimize(&self) -> NxResult<()> {
        self.execute("INSERT INTO notes_fts(notes_fts) VALUES('optimize')")?;
        *self.last_optimized.lock() = Some(Utc::now());
        debug!("optimized sqlite index");
        Ok(())
    }

    fn vacuum(&self) -> NxResult<()> {
        if self.db.lock().in_transaction {
            return Err(NxError::Validation("cannot vacuum inside a transaction".into()));
        }
        self.execute("VACUUM")
    }

    fn begin_transaction(&self) -> NxResult<()> {
        let mut db = self.db.lock();
        if db.in_transaction {
            return Err(NxError::Validation("transaction already active".into()));
        }
        self.runtime
            .block_on(sqlx::query("BEGIN IMMEDIATE").execute(&mut db.conn))?;
        db.in_transaction = true;
        Ok(())
    }

    fn commit_transaction(&self) -> NxResult<()> {
        let mut db = self.db.lock();
        if !db.in_transaction {
            return Err(NxError::Validation("no active transaction".into()));
        }
        self.runtime
            .block_on(sqlx::query("COMMIT").execute(&mut db.conn))?;
        db.in_transaction = false;
        Ok(())
    }

    fn rollback_transaction(&self) -> NxResult<()> {
        let mut db = self.db.lock();
        if !db.in_transaction {
            return Err(NxError::Validation("no active transaction".into()));
        }
        let res = self
            .runtime
            .block_on(sqlx::query("ROLLBACK").execute(&mut db.conn));
        db.in_transaction = false;
        res?;
        Ok(())
    }
}

impl Drop for SqliteIndex {
    fn drop(&mut self) {
        let db = self.db.get_mut();
        if db.in_transaction {
            warn!("sqlite index dropped with an open transaction, rolling back");
            let _ = self
                .runtime
                .block_on(sqlx::query("ROLLBACK").execute(&mut db.conn));
        }
    }
}

/// Column values for one note.
struct NoteRow {
    id: String,
    title: String,
    content: String,
    created: i64,
    modified: i64,
    tags: Vec<String>,
    notebook: Option<String>,
    word_count: i64,
}

impl NoteRow {
    fn from_note(note: &Note) -> Self {
        let meta = note.metadata();
        Self {
            id: note.id().to_string(),
            title: note.title(),
            content: note.content().to_string(),
            created: meta.created().timestamp_millis(),
            modified: meta.updated().timestamp_millis(),
            tags: meta.tags().to_vec(),
            notebook: meta.notebook().map(str::to_string),
            word_count: word_count(note.content()) as i64,
        }
    }
}

async fn delete_note(conn: &mut SqliteConnection, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM notes WHERE id = ?").bind(id).execute(&mut *conn).await?;
    sqlx::query("DELETE FROM note_tags WHERE note_id = ?").bind(id).execute(&mut *conn).await?;
    sqlx::query("DELETE FROM notes_fts WHERE id = ?").bind(id).execute(&mut *conn).await?;
    Ok(())
}

/// Replaces every row belonging to `row.id`. FTS5 has no upsert, so the old
/// rows are deleted first.
async fn write_note(conn: &mut SqliteConnection, row: &NoteRow) -> Result<(), sqlx::Error> {
    delete_note(conn, &row.id).await?;

    sqlx::query(
        "INSERT INTO notes (id, title, created, modified, notebook, content_length, word_count)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.title)
    .bind(row.created)
    .bind(row.modified)
    .bind(&row.notebook)
    .bind(row.content.len() as i64)
    .bind(row.word_count)
    .execute(&mut *conn)
    .await?;

    for tag in &row.tags {
        sqlx::query("INSERT OR IGNORE INTO note_tags (note_id, tag) VALUES (?, ?)")
            .bind(&row.id)
            .bind(tag)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query("INSERT INTO notes_fts (id, title, content, tags, notebook) VALUES (?, ?, ?, ?, ?)")
        .bind(&row.id)
        .bind(&row.title)
        .bind(&row.content)
        .bind(row.tags.join(" "))
        .bind(row.notebook.as_deref().unwrap_or(""))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// User text as a single FTS5 phrase, so operators and quotes match literally.
pub(crate) fn fts_phrase(text: &str) -> String {
    format!("\"{}\"", text.trim().replace('"', "\"\""))
}

fn select_builder(query: &SearchQuery) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(
        "SELECT n.id, n.title, n.modified, n.notebook, \
         (SELECT group_concat(t.tag, ' ') FROM note_tags t WHERE t.note_id = n.id) AS tags",
    );

    if query.has_text() {
        qb.push(", bm25(notes_fts) AS rank");
        if query.highlight {
            qb.push(format!(
                ", snippet(notes_fts, 2, '{MARK_OPEN}', '{MARK_CLOSE}', '...', {SNIPPET_TOKENS}) AS snip"
            ));
        } else {
            qb.push(", '' AS snip");
        }
    } else {
        qb.push(", 0.0 AS rank, '' AS snip");
    }

    qb.push(" FROM ");
    push_from_where(&mut qb, query);

    if query.has_text() {
        qb.push(" ORDER BY rank, n.id DESC");
    } else {
        qb.push(" ORDER BY n.id DESC");
    }
    qb
}

/// Table list and WHERE clause shared by searches and counts.
fn push_from_where(qb: &mut QueryBuilder<'static, Sqlite>, query: &SearchQuery) {
    if query.has_text() {
        qb.push("notes_fts JOIN notes n ON n.id = notes_fts.id WHERE notes_fts MATCH ")
            .push_bind(fts_phrase(&query.text));
    } else {
        qb.push("notes n WHERE 1 = 1");
    }

    for tag in &query.tags {
        qb.push(" AND EXISTS (SELECT 1 FROM note_tags t WHERE t.note_id = n.id AND t.tag = ")
            .push_bind(tag.clone())
            .push(")");
    }
    if let Some(notebook) = &query.notebook {
        qb.push(" AND n.notebook = ").push_bind(notebook.clone());
    }
    if let Some(since) = query.since {
        qb.push(" AND n.modified >= ").push_bind(since.timestamp_millis());
    }
    if let Some(until) = query.until {
        qb.push(" AND n.modified <= ").push_bind(until.timestamp_millis());
    }
}

fn result_from_row(row: &SqliteRow, ranked: bool) -> NxResult<SearchResult> {
    let id: String = row.try_get("id")?;
    let modified: i64 = row.try_get("modified")?;
    let tags: Option<String> = row.try_get("tags")?;
    let rank: f64 = row.try_get("rank")?;

    let mut tags: Vec<String> = tags
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    tags.sort();

    Ok(SearchResult {
        id: NoteId::parse(&id)?,
        title: row.try_get("title")?,
        snippet: row.try_get::<Option<String>, _>("snip")?.unwrap_or_default(),
        score: if ranked { normalize_rank(rank) } else { 1.0 },
        modified: DateTime::from_timestamp_millis(modified).unwrap_or_default(),
        tags,
        notebook: row.try_get("notebook")?,
    })
}

/// Maps a BM25 rank (more negative is better) into `[0, 1)`.
fn normalize_rank(rank: f64) -> f64 {
    let strength = (-rank).max(0.0);
    strength / (1.0 + strength)
}
