//! Best-effort parsing of `Key: Value` metadata lines returned by the
//! completion model.
//!
//! The model is asked for five labelled fields but is free to answer however
//! it likes, so the result is an open mapping with accessors for the
//! well-known keys. Lines that cannot be read are kept in
//! [`ParsedMetadata::rejected`] instead of disappearing silently.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Keys the metadata prompt asks for. Always present in the stored object.
pub const WELL_KNOWN_KEYS: [&str; 5] = [
    "title",
    "author",
    "publication_date",
    "publication_name",
    "keywords",
];

/// A parsed metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    List(Vec<String>),
}

impl MetadataValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            MetadataValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            MetadataValue::List(items) => Some(items),
            MetadataValue::Text(_) => None,
        }
    }
}

/// Result of [`parse_metadata`]: the fields that could be read, plus every
/// non-blank line that could not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMetadata {
    pub fields: BTreeMap<String, MetadataValue>,
    pub rejected: Vec<String>,
}

impl ParsedMetadata {
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.fields.get(key)
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title").and_then(MetadataValue::as_text)
    }

    pub fn author(&self) -> Option<&str> {
        self.get("author").and_then(MetadataValue::as_text)
    }

    pub fn publication_date(&self) -> Option<&str> {
        self.get("publication_date").and_then(MetadataValue::as_text)
    }

    pub fn publication_name(&self) -> Option<&str> {
        self.get("publication_name").and_then(MetadataValue::as_text)
    }

    pub fn keywords(&self) -> Option<&[String]> {
        self.get("keywords").and_then(MetadataValue::as_list)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON object stored on the record. The well-known keys are always
    /// present (`null` when not extracted); extra keys are kept as-is.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        for key in WELL_KNOWN_KEYS {
            obj.insert(key.to_string(), Value::Null);
        }
        for (key, value) in &self.fields {
            let v = match value {
                MetadataValue::Text(s) => Value::String(s.clone()),
                MetadataValue::List(items) => {
                    Value::Array(items.iter().cloned().map(Value::String).collect())
                }
            };
            obj.insert(key.clone(), v);
        }
        Value::Object(obj)
    }
}

/// Normalise a label: trim, drop list and emphasis markers, lowercase,
/// spaces to underscores. `"**Publication Date**"` → `publication_date`.
fn normalize_key(raw: &str) -> String {
    let key = raw
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '*' || c.is_whitespace());
    key.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Drop `*` emphasis markers around a value: `**Foo**` → `Foo`.
fn strip_emphasis(raw: &str) -> &str {
    raw.trim().trim_matches('*').trim()
}

/// Parse a line-oriented `Key: Value` response.
///
/// Each line is split at its first colon. `keywords` is split on commas
/// into a trimmed list with empty entries dropped; every other value is
/// kept as trimmed text. Lines without a colon, or whose key normalises to
/// nothing, are recorded in `rejected`. Blank lines are ignored. A later
/// line with the same key replaces an earlier one.
///
/// Never fails.
pub fn parse_metadata(text: &str) -> ParsedMetadata {
    let mut parsed = ParsedMetadata::default();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((raw_key, raw_value)) = trimmed.split_once(':') else {
            parsed.rejected.push(trimmed.to_string());
            continue;
        };

        let key = normalize_key(raw_key);
        if key.is_empty() {
            parsed.rejected.push(trimmed.to_string());
            continue;
        }

        let value = strip_emphasis(raw_value);
        let value = if key == "keywords" {
            MetadataValue::List(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|kw| !kw.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        } else {
            MetadataValue::Text(value.to_string())
        };
        parsed.fields.insert(key, value);
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_reference_example() {
        let parsed = parse_metadata("Title: Foo\nAuthor: Bar\nKeywords: a, b, c\nNotALine");
        assert_eq!(parsed.title(), Some("Foo"));
        assert_eq!(parsed.author(), Some("Bar"));
        assert_eq!(
            parsed.keywords(),
            Some(&["a".to_string(), "b".to_string(), "c".to_string()][..])
        );
        assert_eq!(parsed.fields.len(), 3);
        assert_eq!(parsed.rejected, vec!["NotALine".to_string()]);
    }

    #[test]
    fn normalises_keys_and_markers() {
        let text = "- **Publication Date:** 2024-03-01\n\
                    * Publication Name: The Economist\n\
                    **Title**: Chips and States\n\
                    Author: **Ann Lee**\n\
                    Keywords: *chips, states*";
        let parsed = parse_metadata(text);
        assert_eq!(parsed.publication_date(), Some("2024-03-01"));
        assert_eq!(parsed.publication_name(), Some("The Economist"));
        assert_eq!(parsed.title(), Some("Chips and States"));
        assert_eq!(parsed.author(), Some("Ann Lee"));
        assert_eq!(
            parsed.keywords(),
            Some(&["chips".to_string(), "states".to_string()][..])
        );
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn splits_only_at_first_colon() {
        let parsed = parse_metadata("Title: Ratio: 3:1");
        assert_eq!(parsed.title(), Some("Ratio: 3:1"));
    }

    #[test]
    fn keywords_drop_empty_entries() {
        let parsed = parse_metadata("Keywords: rust, , async,");
        assert_eq!(
            parsed.keywords(),
            Some(&["rust".to_string(), "async".to_string()][..])
        );
    }

    #[test]
    fn unusable_response_degrades_to_empty() {
        let parsed = parse_metadata("I could not find any metadata.\n\n");
        assert!(parsed.is_empty());
        assert_eq!(parsed.rejected.len(), 1);

        let parsed = parse_metadata("");
        assert!(parsed.is_empty());
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn colon_without_key_is_rejected() {
        let parsed = parse_metadata(": orphan value\n**: also orphan");
        assert!(parsed.is_empty());
        assert_eq!(parsed.rejected.len(), 2);
    }

    #[test]
    fn stored_value_has_all_well_known_keys() {
        let parsed = parse_metadata("Title: Foo\nLanguage: English");
        assert_eq!(
            parsed.to_value(),
            json!({
                "title": "Foo",
                "author": null,
                "publication_date": null,
                "publication_name": null,
                "keywords": null,
                "language": "English",
            })
        );
    }
}
