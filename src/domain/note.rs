use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::domain::metadata::{MAX_TITLE_LEN, Metadata};
use crate::domain::note_id::NoteId;
use crate::error::NxError;

/// Bodies larger than this are rejected by [`Note::validate`].
pub const MAX_CONTENT_LEN: usize = 10 * 1024 * 1024;

const UNTITLED: &str = "Untitled";

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]]*\]\(([0-9A-HJKMNP-TV-Z]{26})\)").expect("link pattern is valid")
});

/// A note: metadata header plus Markdown body.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    metadata: Metadata,
    content: String,
}

/// On-disk shape of the header block.
#[derive(Debug, Serialize, Deserialize)]
struct FrontMatter {
    id: NoteId,
    #[serde(default)]
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<String>,
    #[serde(default, alias = "modified", skip_serializing_if = "Option::is_none")]
    updated: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notebook: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    links: Vec<NoteId>,
    #[serde(flatten)]
    custom: BTreeMap<String, serde_yaml::Value>,
}

impl Note {
    /// Creates a brand-new note with a freshly generated id.
    ///
    /// An empty `title` means "derive it from the first line of `content`".
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Note {
        Note {
            metadata: Metadata::new(NoteId::generate(), title),
            content: content.into(),
        }
    }

    pub fn with_metadata(metadata: Metadata, content: impl Into<String>) -> Note {
        Note {
            metadata,
            content: content.into(),
        }
    }

    pub fn id(&self) -> NoteId {
        self.metadata.id()
    }

    /// The stored title, or one derived from the body when none is stored.
    pub fn title(&self) -> String {
        let stored = self.metadata.title().trim();
        if !stored.is_empty() {
            return stored.to_string();
        }
        derive_title(&self.content).unwrap_or_else(|| UNTITLED.to_string())
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn notebook(&self) -> Option<&str> {
        self.metadata.notebook()
    }

    /// Metadata with the effective title filled in, as cached by the store.
    pub fn resolved_metadata(&self) -> Metadata {
        let mut metadata = self.metadata.clone();
        metadata.fill_title(self.title());
        metadata
    }

    /// Returns an in-memory copy of this note with new content.
    ///
    /// Nothing touches disk until the copy is handed to a store.
    pub fn with_content(&self, content: impl Into<String>) -> Note {
        let mut note = self.clone();
        note.set_content(content);
        note
    }

    /// Returns an in-memory copy of this note with a new title.
    pub fn with_title(&self, title: impl Into<String>) -> Note {
        let mut note = self.clone();
        note.metadata.set_title(title);
        note
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.metadata.touch();
    }

    pub fn append_content(&mut self, extra: &str) {
        if !self.content.is_empty() && !self.content.ends_with('\n') {
            self.content.push('\n');
        }
        self.content.push_str(extra);
        self.metadata.touch();
    }

    /// Ids referenced by `[text](<id>)` links in the body, sorted and unique.
    pub fn extract_links(&self) -> Vec<NoteId> {
        let mut links: Vec<NoteId> = LINK_RE
            .captures_iter(&self.content)
            .filter_map(|caps| NoteId::parse(&caps[1]).ok())
            .collect();
        links.sort();
        links.dedup();
        links
    }

    /// Stores the body's links in the metadata so backlinks can find them.
    pub fn refresh_links(&mut self) {
        let links = self.extract_links();
        self.metadata.set_links(links);
    }

    pub fn contains_text(&self, text: &str, case_sensitive: bool) -> bool {
        let title = self.title();
        if case_sensitive {
            return self.content.contains(text) || title.contains(text);
        }
        let needle = text.to_lowercase();
        self.content.to_lowercase().contains(&needle) || title.to_lowercase().contains(&needle)
    }

    pub fn validate(&self) -> Result<(), NxError> {
        self.metadata.validate()?;

        if self.title().chars().count() > MAX_TITLE_LEN {
            return Err(NxError::Validation(format!(
                "title too long (max {MAX_TITLE_LEN} characters)"
            )));
        }

        if self.content.len() > MAX_CONTENT_LEN {
            return Err(NxError::Validation("content too large (max 10MB)".into()));
        }

        Ok(())
    }

    /// Serializes to `---` delimited YAML header, a blank line, then the body.
    pub fn to_file_format(&self) -> Result<String, NxError> {
        let meta = &self.metadata;
        let header = FrontMatter {
            id: meta.id(),
            title: self.title(),
            created: Some(format_time(meta.created())),
            updated: Some(format_time(meta.updated())),
            tags: meta.tags().to_vec(),
            notebook: meta.notebook().map(str::to_string),
            links: meta.links().to_vec(),
            custom: meta
                .custom_fields()
                .iter()
                .map(|(k, v)| (k.clone(), serde_yaml::Value::String(v.clone())))
                .collect(),
        };

        let yaml = serde_yaml::to_string(&header)
            .map_err(|e| NxError::Parse(format!("failed to serialize header: {e}")))?;

        Ok(format!("---\n{yaml}---\n\n{}", self.content))
    }

    pub fn from_file_format(text: &str) -> Result<Note, NxError> {
        let text = normalize_newlines(text);
        let (header, body) = split_front_matter(&text)
            .ok_or_else(|| NxError::Parse("missing front matter delimiters".into()))?;

        let fm: FrontMatter = serde_yaml::from_str(header)
            .map_err(|e| NxError::Parse(format!("invalid front matter: {e}")))?;

        let mut metadata = Metadata::new(fm.id, fm.title);
        metadata.set_tags(fm.tags);
        metadata.set_notebook(fm.notebook);
        metadata.set_links(fm.links);
        for (key, value) in fm.custom {
            metadata.set_custom_field(key, yaml_scalar_to_string(&value));
        }

        let now = Utc::now();
        let created = fm.created.as_deref().map(parse_time).transpose()?;
        let updated = fm.updated.as_deref().map(parse_time).transpose()?;
        metadata.set_created(created.unwrap_or(now));
        metadata.set_updated(updated.or(created).unwrap_or(now));

        let note = Note::with_metadata(metadata, body);
        note.validate()?;
        Ok(note)
    }
}

/// Splits `text` into its header block and body.
///
/// Expects the text to open with a `---` line; the header ends at the next
/// line that is exactly `---`. One blank separator line after it is dropped.
pub(crate) fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text.strip_prefix("---\n")?;

    let (header, body) = if let Some(body) = rest.strip_prefix("---\n") {
        ("", body)
    } else if rest == "---" {
        ("", "")
    } else if let Some(pos) = rest.find("\n---\n") {
        (&rest[..pos + 1], &rest[pos + 5..])
    } else {
        (rest.strip_suffix("\n---")?, "")
    };

    Some((header, body.strip_prefix('\n').unwrap_or(body)))
}

/// First non-blank body line with Markdown heading markers removed.
pub(crate) fn derive_title(content: &str) -> Option<String> {
    let line = content.lines().map(str::trim).find(|l| !l.is_empty())?;
    let stripped = line.trim_start_matches('#').trim();
    if stripped.is_empty() {
        return None;
    }
    Some(stripped.chars().take(MAX_TITLE_LEN).collect())
}

pub(crate) fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if text.contains("\r\n") {
        Cow::Owned(text.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

pub(crate) fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

pub(crate) fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_time(text: &str) -> Result<DateTime<Utc>, NxError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| NxError::Parse(format!("invalid timestamp '{text}': {e}")))
}
