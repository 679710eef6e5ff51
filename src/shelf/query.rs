use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::domain::{Metadata, NoteId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Creation order, which is id order.
    #[default]
    Created,
    Updated,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Filters, ordering and pagination for listing notes.
///
/// Every set filter must match. `tags` uses AND semantics: a note must carry
/// all of them. Dates bound the creation time, inclusive on both ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteQuery {
    pub tags: Vec<String>,
    pub notebook: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub title_contains: Option<String>,
    pub content_contains: Option<String>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl NoteQuery {
    pub fn new() -> Self {
        Self::default()
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

    pub fn title_contains(mut self, text: impl Into<String>) -> Self {
        self.title_contains = Some(text.into());
        self
    }

    pub fn content_contains(mut self, text: impl Into<String>) -> Self {
        self.content_contains = Some(text.into());
        self
    }

    pub fn sorted(mut self, by: SortBy, order: SortOrder) -> Self {
        self.sort_by = by;
        self.sort_order = order;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// True when listing needs nothing beyond the file names.
    pub(crate) fn is_id_only(&self) -> bool {
        self.tags.is_empty()
            && self.notebook.is_none()
            && self.since.is_none()
            && self.until.is_none()
            && self.title_contains.is_none()
            && self.content_contains.is_none()
            && self.sort_by == SortBy::Created
    }

    /// Checks every filter except `content_contains`, which needs the body.
    ///
    /// `metadata` is expected to carry the resolved title.
    pub fn matches_metadata(&self, metadata: &Metadata) -> bool {
        if let Some(notebook) = &self.notebook {
            if metadata.notebook() != Some(notebook.as_str()) {
                return false;
            }
        }

        if !self.tags.iter().all(|tag| metadata.has_tag(tag)) {
            return false;
        }

        if self.since.is_some_and(|since| metadata.created() < since) {
            return false;
        }
        if self.until.is_some_and(|until| metadata.created() > until) {
            return false;
        }

        if let Some(text) = &self.title_contains {
            if !metadata.title().contains(text.as_str()) {
                return false;
            }
        }

        true
    }

    pub(crate) fn compare(&self, a: &Metadata, b: &Metadata) -> Ordering {
        let ord = match self.sort_by {
            SortBy::Created => a.id().cmp(&b.id()),
            SortBy::Updated => a.updated().cmp(&b.updated()),
            SortBy::Title => a.title().to_lowercase().cmp(&b.title().to_lowercase()),
        }
        .then_with(|| a.id().cmp(&b.id()));

        match self.sort_order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    }

    pub(crate) fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// Candidate produced by fuzzy id resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    pub id: NoteId,
    pub display_text: String,
    pub score: f64,
}

/// Scores how well `partial` identifies a note.
///
/// 1.0 for an id prefix, 0.8 for a case-insensitive title substring, 0.5 for
/// an id substring, otherwise 0. Ids parse case-insensitively, so the id
/// comparisons ignore ASCII case too.
pub fn fuzzy_score(partial: &str, id: &str, title: &str) -> f64 {
    let upper = partial.to_ascii_uppercase();
    if id.starts_with(&upper) {
        return 1.0;
    }
    if title.to_lowercase().contains(&partial.to_lowercase()) {
        return 0.8;
    }
    if id.contains(&upper) {
        return 0.5;
    }
    0.0
}
