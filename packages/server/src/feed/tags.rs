//! Hashtag sanitizing.

use std::collections::HashSet;

const MAX_TAGS: usize = 20;
const MAX_TAG_LEN: usize = 32;

fn clean(tag: &str) -> Option<String> {
    let tag: String = tag
        .trim()
        .trim_start_matches('#')
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .flat_map(char::to_lowercase)
        .take(MAX_TAG_LEN)
        .collect();
    (!tag.is_empty()).then_some(tag)
}

/// Lowercase, strip `#` and punctuation, drop duplicates, keep order.
pub fn sanitize<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter_map(clean)
        .filter(|t| seen.insert(t.clone()))
        .take(MAX_TAGS)
        .collect()
}

/// Parse the `tags` form field: a JSON array or a comma/space separated list.
pub fn parse_field(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
            return sanitize(list.iter().map(String::as_str));
        }
    }
    sanitize(raw.split(|c: char| c == ',' || c.is_whitespace()))
}
