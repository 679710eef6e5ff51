use chrono::{DateTime, Utc};

use crate::domain::NoteId;

/// Default page size for index searches.
pub const DEFAULT_LIMIT: usize = 50;

/// A search against an [`Index`](crate::search::Index).
///
/// `text` is matched literally. Empty text turns the search into a pure
/// metadata listing. `tags` must all be present; `since`/`until` bound the
/// note's last modification time.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub tags: Vec<String>,
    pub notebook: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
    /// Produce a highlighted snippet for each text match.
    pub highlight: bool,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            tags: Vec::new(),
            notebook: None,
            since: None,
            until: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
            highlight: true,
        }
    }
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_notebook(mut self, notebook: impl Into<String>) -> Self {
        self.notebook = Some(notebook.into());
        self
    }

    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.until = Some(at);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn highlight(mut self, on: bool) -> Self {
        self.highlight = on;
        self
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Tag, notebook and date predicates.
    pub fn matches_filters(
        &self,
        tags: &[String],
        notebook: Option<&str>,
        modified: DateTime<Utc>,
    ) -> bool {
        if !self.tags.iter().all(|t| tags.contains(t)) {
            return false;
        }
        if let Some(nb) = &self.notebook {
            if notebook != Some(nb.as_str()) {
                return false;
            }
        }
        if self.since.is_some_and(|since| modified < since) {
            return false;
        }
        if self.until.is_some_and(|until| modified > until) {
            return false;
        }
        true
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: NoteId,
    pub title: String,
    /// Excerpt around the match, empty when not requested or not available.
    pub snippet: String,
    /// Relevance in `[0, 1]`, higher is better.
    pub score: f64,
    pub modified: DateTime<Utc>,
    pub tags: Vec<String>,
    pub notebook: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub total_notes: usize,
    pub total_words: usize,
    pub index_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_optimized: Option<DateTime<Utc>>,
}
