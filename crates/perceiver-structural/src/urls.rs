//! Restores real URLs into extracted data.
//!
//! Extraction prompts only show accessibility node ids for links, so URL-typed fields come back
//! holding ids. [`inject_urls`] swaps those ids for the URLs recorded in
//! [`TreeResult::id_to_url`](crate::model::TreeResult).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Location of a URL field. `*` matches every element of a list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPath {
    pub segments: Vec<String>,
}

impl UrlPath {
    /// Parses a dotted path such as `items.*.link`.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

impl fmt::Display for UrlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Replaces ids found at `paths` with their URL. Values without a known id are left alone.
pub fn inject_urls(value: &mut Value, paths: &[UrlPath], id_to_url: &HashMap<String, String>) {
    if id_to_url.is_empty() {
        return;
    }
    for path in paths {
        if !path.segments.is_empty() {
            inject_at(value, &path.segments, id_to_url);
        }
    }
}

fn inject_at(value: &mut Value, segments: &[String], id_to_url: &HashMap<String, String>) {
    let Some((key, rest)) = segments.split_first() else {
        return;
    };

    if key == "*" {
        if let Value::Array(items) = value {
            for item in items {
                inject_at(item, rest, id_to_url);
            }
        }
        return;
    }

    let Some(field) = value.as_object_mut().and_then(|map| map.get_mut(key)) else {
        return;
    };
    if !rest.is_empty() {
        inject_at(field, rest, id_to_url);
        return;
    }

    let id = match field {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => return,
    };
    if let Some(url) = id_to_url.get(&id) {
        *field = Value::String(url.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping() -> HashMap<String, String> {
        HashMap::from([
            ("12".to_string(), "https://example.com/a".to_string()),
            ("15".to_string(), "https://example.com/b".to_string()),
        ])
    }

    #[test]
    fn replaces_ids_through_list_wildcards() {
        let mut data = json!({
            "title": "Links",
            "items": [
                { "name": "A", "link": 12 },
                { "name": "B", "link": "15" },
                { "name": "C", "link": 99 },
                { "name": "D", "link": null }
            ],
            "homepage": "12"
        });

        inject_urls(
            &mut data,
            &[UrlPath::parse("items.*.link"), UrlPath::parse("homepage")],
            &mapping(),
        );

        assert_eq!(data["items"][0]["link"], "https://example.com/a");
        assert_eq!(data["items"][1]["link"], "https://example.com/b");
        assert_eq!(data["items"][2]["link"], 99);
        assert_eq!(data["items"][3]["link"], Value::Null);
        assert_eq!(data["homepage"], "https://example.com/a");
        assert_eq!(data["title"], "Links");
    }

    #[test]
    fn mismatched_shapes_are_ignored() {
        let mut data = json!({ "items": { "link": 12 }, "other": [12] });
        let before = data.clone();

        inject_urls(
            &mut data,
            &[UrlPath::parse("items.*.link"), UrlPath::parse("missing.link"), UrlPath::parse("")],
            &mapping(),
        );

        assert_eq!(data, before);
        assert_eq!(UrlPath::parse("a..b").to_string(), "a.b");
    }
}
