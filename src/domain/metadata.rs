use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::note_id::NoteId;
use crate::error::NxError;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_TAG_LEN: usize = 50;
pub const MAX_NOTEBOOK_LEN: usize = 50;
pub const MAX_FIELD_KEY_LEN: usize = 50;
pub const MAX_FIELD_VALUE_LEN: usize = 1000;

/// Header keys owned by the note format; custom fields may not shadow them.
pub const RESERVED_FIELDS: &[&str] = &[
    "id", "title", "created", "updated", "modified", "tags", "notebook", "links",
];

/// Structured header of a note.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    id: NoteId,
    title: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    tags: Vec<String>,
    notebook: Option<String>,
    links: Vec<NoteId>,
    custom_fields: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(id: NoteId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            created: now,
            updated: now,
            tags: Vec::new(),
            notebook: None,
            links: Vec::new(),
            custom_fields: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> NoteId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn notebook(&self) -> Option<&str> {
        self.notebook.as_deref()
    }

    pub fn links(&self) -> &[NoteId] {
        &self.links
    }

    pub fn custom_fields(&self) -> &BTreeMap<String, String> {
        &self.custom_fields
    }

    pub fn custom_field(&self, key: &str) -> Option<&str> {
        self.custom_fields.get(key).map(String::as_str)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// True if this note links to `target`; drives backlink lookups.
    pub fn has_link(&self, target: &NoteId) -> bool {
        self.links.contains(target)
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn set_created(&mut self, at: DateTime<Utc>) {
        self.created = at;
    }

    pub fn set_updated(&mut self, at: DateTime<Utc>) {
        self.updated = at;
    }

    /// Replaces the tag set; the stored list ends up sorted and deduplicated.
    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self.tags.sort();
        self.tags.dedup();
        self.touch();
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.has_tag(&tag) {
            self.tags.push(tag);
            self.tags.sort();
            self.touch();
        }
    }

    pub fn remove_tag(&mut self, tag: &str) {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        if self.tags.len() != before {
            self.touch();
        }
    }

    /// An empty name clears the notebook.
    pub fn set_notebook(&mut self, notebook: Option<String>) {
        self.notebook = notebook.filter(|n| !n.is_empty());
        self.touch();
    }

    pub fn set_links<I>(&mut self, links: I)
    where
        I: IntoIterator<Item = NoteId>,
    {
        self.links = links.into_iter().collect();
        self.links.sort();
        self.links.dedup();
    }

    pub fn add_link(&mut self, target: NoteId) {
        if !self.has_link(&target) {
            self.links.push(target);
            self.links.sort();
        }
    }

    pub fn set_custom_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom_fields.insert(key.into(), value.into());
        self.touch();
    }

    pub fn remove_custom_field(&mut self, key: &str) {
        if self.custom_fields.remove(key).is_some() {
            self.touch();
        }
    }

    /// Sets the title without bumping `updated`; used when a derived title is
    /// written back into the header.
    pub(crate) fn fill_title(&mut self, title: String) {
        self.title = title;
    }

    /// Marks the metadata as modified now.
    pub fn touch(&mut self) {
        self.updated = Utc::now();
    }

    /// Checks field limits. The title is checked by [`Note::validate`], which
    /// knows about titles derived from the body.
    ///
    /// [`Note::validate`]: crate::domain::Note::validate
    pub fn validate(&self) -> Result<(), NxError> {
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(NxError::Validation(format!(
                "title too long (max {MAX_TITLE_LEN} characters)"
            )));
        }

        for tag in &self.tags {
            if tag.is_empty() {
                return Err(NxError::Validation("tag cannot be empty".into()));
            }
            if tag.chars().count() > MAX_TAG_LEN {
                return Err(NxError::Validation(format!(
                    "tag too long (max {MAX_TAG_LEN} characters): {tag}"
                )));
            }
            if tag.chars().any(char::is_whitespace) {
                return Err(NxError::Validation(format!("tag cannot contain spaces: {tag}")));
            }
        }

        if let Some(notebook) = &self.notebook {
            if notebook.chars().count() > MAX_NOTEBOOK_LEN {
                return Err(NxError::Validation(format!(
                    "notebook name too long (max {MAX_NOTEBOOK_LEN} characters)"
                )));
            }
        }

        for (key, value) in &self.custom_fields {
            if key.is_empty() {
                return Err(NxError::Validation("custom field key cannot be empty".into()));
            }
            if RESERVED_FIELDS.contains(&key.as_str()) {
                return Err(NxError::Validation(format!(
                    "custom field '{key}' shadows a reserved header key"
                )));
            }
            if key.chars().count() > MAX_FIELD_KEY_LEN {
                return Err(NxError::Validation(format!(
                    "custom field key too long (max {MAX_FIELD_KEY_LEN} characters): {key}"
                )));
            }
            if value.chars().count() > MAX_FIELD_VALUE_LEN {
                return Err(NxError::Validation(format!(
                    "custom field '{key}' too long (max {MAX_FIELD_VALUE_LEN} characters)"
                )));
            }
        }

        Ok(())
    }
}
