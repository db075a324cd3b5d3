//! Response parsing: pull a JSON object out of free-form model text.
//!
//! Models wrap JSON in Markdown code fences, prepend a sentence of chatter,
//! or append an explanation. Parsing tries, in order:
//!
//! 1. the text with a fence wrapping the whole reply removed,
//! 2. the span from the first `{` to the last `}` of the full reply.
//!
//! A fence that only covers part of the reply is left alone; it may be an
//! example inside the model's commentary rather than the payload.
//!
//! Anything else is a [`ParseError`] carrying a truncated snippet.

use crate::error::ParseError;
use crate::record::PropertyRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

/// A fence, with or without a language tag, spanning the entire text.
static RE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?```\z").unwrap()
});

/// Parse pass-1 output into a full [`PropertyRecord`].
pub fn parse_record(text: &str) -> Result<PropertyRecord, ParseError> {
    parse_json(text)
}

/// Parse pass-2 output into a bare JSON object.
pub fn parse_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    parse_json(text)
}

fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let body = strip_fence(text);

    if let Ok(v) = serde_json::from_str::<T>(body) {
        return Ok(v);
    }

    if let Some(span) = brace_span(text) {
        match serde_json::from_str::<T>(span) {
            Ok(v) => {
                debug!("Recovered JSON from brace span ({} of {} chars)", span.len(), text.len());
                return Ok(v);
            }
            Err(e) => debug!("Brace span is not valid JSON: {}", e),
        }
    }

    Err(ParseError::from_text(text))
}

/// Return the inside of a fence that wraps the whole text, or the trimmed
/// text unchanged.
pub fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match RE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => trimmed,
    }
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
