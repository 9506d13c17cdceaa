//! Char-safe text helpers

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

pub struct TextUtils;

impl TextUtils {
    /// Collapse all whitespace runs (newlines included) into single spaces and trim.
    pub fn compact_line(text: &str) -> Cow<'_, str> {
        let trimmed = text.trim();
        if trimmed.contains(|c: char| c.is_whitespace() && c != ' ') || trimmed.contains("  ") {
            Cow::Owned(WHITESPACE_REGEX.replace_all(trimmed, " ").into_owned())
        } else {
            Cow::Borrowed(trimmed)
        }
    }

    /// Keep at most `max_chars` characters, appending an ellipsis when cut.
    pub fn clip(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            None => Cow::Borrowed(text),
            Some((byte_idx, _)) => Cow::Owned(format!("{}…", &text[..byte_idx])),
        }
    }

    /// Hard cut at `max_chars` characters, no marker.
    pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            None => text,
            Some((byte_idx, _)) => &text[..byte_idx],
        }
    }

    pub fn char_len(text: &str) -> usize {
        text.chars().count()
    }
}
