//! Cache key definitions.
//!
//! A [`CacheKey`] is one or two segments: a base `[user:{id}:]model:operation`
//! segment and, when structured arguments are present, their serialization.
//! Identical inputs always produce identical keys.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value as JsonValue;

/// Top-level argument holding the row selector.
pub const SELECTOR_FIELD: &str = "where";
const ID_FIELD: &str = "id";

/// Lowercased model segment shared by keys and tags.
pub fn model_segment(model: &str) -> String {
    model.to_lowercase()
}

/// Collection-level tag: `model:list`.
pub fn list_tag(model: &str) -> String {
    format!("{}:list", model_segment(model))
}

/// Entity-level tag: `model:id`.
pub fn entity_tag(model: &str, id: &str) -> String {
    format!("{}:{id}", model_segment(model))
}

/// Drop repeated tags, keeping first occurrences in order.
pub fn dedup_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter().filter(|tag| seen.insert(tag.clone())).collect()
}

/// Key a cached read result is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    /// Derive the key for `(model, operation, args, caller)`.
    ///
    /// Arguments that are not an object or array contribute no segment.
    pub fn generate(
        model: &str,
        operation: &str,
        args: Option<&JsonValue>,
        caller_id: Option<&str>,
    ) -> Self {
        let prefix = caller_id
            .map(|id| format!("user:{id}:"))
            .unwrap_or_default();
        let base = format!("{prefix}{}:{operation}", model_segment(model));

        match args {
            Some(args @ (JsonValue::Object(_) | JsonValue::Array(_))) => {
                Self(vec![base, args.to_string()])
            }
            _ => Self(vec![base]),
        }
    }

    pub fn base(&self) -> &str {
        &self.0[0]
    }

    pub fn args_segment(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn into_segments(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Row id named by the top-level selector, if any.
///
/// Only `where.id` is consulted: strings are used as-is and numbers are
/// stringified. Any other shape yields `None`.
pub fn id_from_args(args: Option<&JsonValue>) -> Option<String> {
    match args?.get(SELECTOR_FIELD)?.get(ID_FIELD)? {
        JsonValue::String(id) => Some(id.clone()),
        JsonValue::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_without_args_is_base_only() {
        let key = CacheKey::generate("User", "findMany", None, None);
        assert_eq!(key.segments(), ["user:findMany"]);
        assert_eq!(key.args_segment(), None);
    }

    #[test]
    fn scalar_args_are_not_serialized() {
        let key = CacheKey::generate("User", "count", Some(&json!(5)), None);
        assert_eq!(key.segments(), ["user:count"]);

        let key = CacheKey::generate("User", "count", Some(&JsonValue::Null), None);
        assert_eq!(key.segments(), ["user:count"]);
    }

    #[test]
    fn structured_args_add_a_segment() {
        let args = json!({ "where": { "id": "1" } });
        let key = CacheKey::generate("User", "findMany", Some(&args), None);

        assert_eq!(key.base(), "user:findMany");
        let segment = key.args_segment().expect("args segment");
        assert!(segment.contains("where"));
        assert!(segment.contains("id"));
    }

    #[test]
    fn caller_prefix_precedes_model() {
        let key = CacheKey::generate("User", "findMany", None, Some("user-123"));
        assert_eq!(key.segments(), ["user:user-123:user:findMany"]);
    }

    #[test]
    fn identical_inputs_yield_identical_keys() {
        let args = json!({ "where": { "active": true }, "take": 10 });
        let first = CacheKey::generate("Post", "findMany", Some(&args), Some("u1"));
        let second = CacheKey::generate("Post", "findMany", Some(&args.clone()), Some("u1"));
        assert_eq!(first, second);
    }

    #[test]
    fn callers_are_isolated() {
        let args = json!({ "where": { "active": true } });
        let one = CacheKey::generate("Post", "findMany", Some(&args), Some("user-1"));
        let two = CacheKey::generate("Post", "findMany", Some(&args), Some("user-2"));

        assert_ne!(one, two);
        assert!(!one.to_string().contains("user-2"));
        assert!(!two.to_string().contains("user-1"));
    }

    #[test]
    fn id_extraction_reads_selector_only() {
        assert_eq!(
            id_from_args(Some(&json!({ "where": { "id": "abc" } }))).as_deref(),
            Some("abc")
        );
        assert_eq!(
            id_from_args(Some(&json!({ "where": { "id": 7 } }))).as_deref(),
            Some("7")
        );
        assert_eq!(id_from_args(Some(&json!({ "id": "abc" }))), None);
        assert_eq!(
            id_from_args(Some(&json!({ "where": { "id": { "in": [1, 2] } } }))),
            None
        );
        assert_eq!(id_from_args(Some(&json!("where"))), None);
        assert_eq!(id_from_args(None), None);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let tags = ["post:list", "user:list", "post:list"].map(String::from);
        assert_eq!(dedup_tags(tags), ["post:list", "user:list"]);
    }

    #[test]
    fn tags_lowercase_model_segment() {
        assert_eq!(list_tag("BlogPost"), "blogpost:list");
        assert_eq!(entity_tag("BlogPost", "Ab1"), "blogpost:Ab1");
    }
}
