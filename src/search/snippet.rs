//! Excerpts around text matches.

use regex::{Regex, RegexBuilder};

/// Width of a snippet window, in characters.
pub const SNIPPET_LEN: usize = 200;

/// Width of the leading excerpt used when the text no longer matches.
pub const FALLBACK_LEN: usize = 150;

pub const MARK_OPEN: &str = "<mark>";
pub const MARK_CLOSE: &str = "</mark>";

const ELLIPSIS: &str = "...";

/// Case-insensitive literal matcher for `query`. `None` for empty input.
pub fn literal_matcher(query: &str) -> Option<Regex> {
    if query.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Excerpt of `text` around the first case-insensitive occurrence of `query`.
///
/// The window starts half a snippet before the match. With `highlight`
/// every occurrence inside the window is wrapped in `<mark>` tags. Cut ends
/// get an ellipsis. If nothing matches the first [`FALLBACK_LEN`] characters
/// are returned.
pub fn extract_snippet(text: &str, query: &str, highlight: bool) -> String {
    let Some(matcher) = literal_matcher(query) else {
        return leading_excerpt(text);
    };
    let Some(found) = matcher.find(text) else {
        return leading_excerpt(text);
    };

    let match_char = text[..found.start()].chars().count();
    let start_char = match_char.saturating_sub(SNIPPET_LEN / 2);
    let start = byte_offset(text, start_char);
    let end = byte_offset(text, start_char + SNIPPET_LEN);
    let window = &text[start..end];

    let mut snippet = String::with_capacity(window.len() + 16);
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    if highlight {
        snippet.push_str(&matcher.replace_all(window, format!("{MARK_OPEN}$0{MARK_CLOSE}")));
    } else {
        snippet.push_str(window);
    }
    if end < text.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn leading_excerpt(text: &str) -> String {
    let end = byte_offset(text, FALLBACK_LEN);
    if end < text.len() {
        format!("{}{ELLIPSIS}", &text[..end])
    } else {
        text.to_string()
    }
}

/// Byte index of the `n`th character, clamped to the end of `text`.
fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map_or(text.len(), |(i, _)| i)
}
