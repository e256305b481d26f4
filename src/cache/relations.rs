//! Relation-aware tag widening.
//!
//! Reads widen only along the relations the query actually asks for
//! (`include` / `select`). Writes widen along every relation edge of the
//! mutated model, since their effect on joined reads is not predictable
//! from the mutation arguments.

use std::collections::HashSet;

use serde_json::Value as JsonValue;

use super::keys::list_tag;
use super::policy::PolicyResolver;

const INCLUDE: &str = "include";
const SELECT: &str = "select";
const COUNT: &str = "_count";

/// Computes related-model tags against a resolved policy.
#[derive(Clone, Copy)]
pub struct RelationExpander<'a> {
    policy: &'a PolicyResolver,
}

impl<'a> RelationExpander<'a> {
    pub fn new(policy: &'a PolicyResolver) -> Self {
        Self { policy }
    }

    /// Non-excluded models reached by the query's relation shape, in
    /// first-seen order. Malformed arguments contribute nothing.
    pub fn related_models_for_read(&self, model: &str, args: Option<&JsonValue>) -> Vec<String> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        if let Some(args) = args {
            self.walk(model, args, &mut found, &mut seen);
        }
        found
    }

    /// List tags of the models a read pulls in.
    pub fn read_tags(&self, model: &str, args: Option<&JsonValue>) -> Vec<String> {
        self.related_models_for_read(model, args)
            .iter()
            .map(|related| list_tag(related))
            .collect()
    }

    /// Every non-excluded model `model` points at, in field declaration
    /// order. Self-references are left out; the own list tag covers them.
    pub fn related_models_for_write(&self, model: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.policy
            .schema()
            .fields_of(model)
            .values()
            .filter_map(|field| field.related_model())
            .filter(|related| *related != model && !self.policy.is_excluded(related))
            .filter(|related| seen.insert(*related))
            .map(str::to_string)
            .collect()
    }

    /// List tags to invalidate after `model` is mutated.
    pub fn write_tags(&self, model: &str) -> Vec<String> {
        self.related_models_for_write(model)
            .iter()
            .map(|related| list_tag(related))
            .collect()
    }

    fn walk(
        &self,
        model: &str,
        args: &JsonValue,
        found: &mut Vec<String>,
        seen: &mut HashSet<String>,
    ) {
        let fields = self.policy.schema().fields_of(model);

        for (key, wanted) in shape_entries(args) {
            if key == COUNT {
                self.walk_count(model, wanted, found, seen);
                continue;
            }
            let Some(related) = fields.get(key).and_then(|field| field.related_model()) else {
                continue;
            };

            self.record(related, found, seen);
            if wanted.is_object() {
                self.walk(related, wanted, found, seen);
            }
        }
    }

    /// `_count: true` counts every relation; `_count: { select: {...} }`
    /// counts the named ones.
    fn walk_count(
        &self,
        model: &str,
        wanted: &JsonValue,
        found: &mut Vec<String>,
        seen: &mut HashSet<String>,
    ) {
        let fields = self.policy.schema().fields_of(model);
        match wanted {
            JsonValue::Object(_) => {
                let named = wanted
                    .get(SELECT)
                    .and_then(JsonValue::as_object)
                    .into_iter()
                    .flatten()
                    .filter(|(_, value)| is_truthy(value));
                for (key, _) in named {
                    if let Some(related) = fields.get(key).and_then(|field| field.related_model()) {
                        self.record(related, found, seen);
                    }
                }
            }
            flag if is_truthy(flag) => {
                for related in fields.values().filter_map(|field| field.related_model()) {
                    self.record(related, found, seen);
                }
            }
            _ => {}
        }
    }

    fn record(&self, related: &str, found: &mut Vec<String>, seen: &mut HashSet<String>) {
        if !self.policy.is_excluded(related) && seen.insert(related.to_string()) {
            found.push(related.to_string());
        }
    }
}

/// Relation entries requested by `args`: truthy `include` entries and
/// structured `select` entries.
fn shape_entries(args: &JsonValue) -> impl Iterator<Item = (&str, &JsonValue)> {
    let included = args
        .get(INCLUDE)
        .and_then(JsonValue::as_object)
        .into_iter()
        .flatten()
        .filter(|(_, value)| is_truthy(value));
    let selected = args
        .get(SELECT)
        .and_then(JsonValue::as_object)
        .into_iter()
        .flatten()
        .filter(|(_, value)| value.is_object());

    included
        .chain(selected)
        .map(|(key, value)| (key.as_str(), value))
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        JsonValue::String(text) => !text.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::cache::config::CacheOptions;
    use crate::schema::{ModelDescriptor, ScalarKind, Schema};

    fn resolver(options: CacheOptions) -> PolicyResolver {
        let schema = Schema::new([
            ModelDescriptor::new("User")
                .scalar("id", ScalarKind::String)
                .relation_many("posts", "Post")
                .relation_many("comments", "Comment")
                .relation("manager", "User"),
            ModelDescriptor::new("Post")
                .scalar("id", ScalarKind::String)
                .relation("author", "User")
                .relation_many("comments", "Comment")
                .relation_many("audits", "Audit"),
            ModelDescriptor::new("Comment")
                .relation("post", "Post")
                .relation("author", "User"),
            ModelDescriptor::new("Audit").exclude(),
        ])
        .expect("valid schema");
        PolicyResolver::new(Arc::new(schema), options)
    }

    #[test]
    fn include_widens_read() {
        let policy = resolver(CacheOptions::default());
        let expander = RelationExpander::new(&policy);

        let args = json!({ "include": { "author": true } });
        assert_eq!(expander.read_tags("Post", Some(&args)), ["user:list"]);
        assert!(expander.read_tags("Post", Some(&json!({}))).is_empty());
        assert!(expander.read_tags("Post", None).is_empty());
    }

    #[test]
    fn falsy_include_and_boolean_select_are_ignored() {
        let policy = resolver(CacheOptions::default());
        let expander = RelationExpander::new(&policy);

        let args = json!({
            "include": { "author": false, "comments": 0 },
            "select": { "author": true, "id": true },
        });
        assert!(expander.read_tags("Post", Some(&args)).is_empty());
    }

    #[test]
    fn structured_select_and_nested_include_widen() {
        let policy = resolver(CacheOptions::default());
        let expander = RelationExpander::new(&policy);

        let args = json!({
            "select": {
                "id": true,
                "comments": { "include": { "author": true } },
            },
        });
        assert_eq!(
            expander.related_models_for_read("Post", Some(&args)),
            ["Comment", "User"]
        );
    }

    #[test]
    fn count_widens_over_relations() {
        let policy = resolver(CacheOptions::default());
        let expander = RelationExpander::new(&policy);

        let named = json!({ "include": { "_count": { "select": { "comments": true } } } });
        assert_eq!(expander.read_tags("Post", Some(&named)), ["comment:list"]);

        let all = json!({ "select": { "_count": true } });
        assert_eq!(
            expander.related_models_for_read("Post", Some(&all)),
            Vec::<String>::new(),
            "boolean select entries do not widen"
        );

        let all = json!({ "include": { "_count": true } });
        assert_eq!(
            expander.related_models_for_read("Post", Some(&all)),
            ["User", "Comment"]
        );
    }

    #[test]
    fn excluded_models_are_skipped_on_read() {
        let policy = resolver(CacheOptions::default().exclude_model("User"));
        let expander = RelationExpander::new(&policy);

        let args = json!({
            "include": { "author": { "include": { "comments": true } }, "audits": true },
        });
        assert_eq!(expander.read_tags("Post", Some(&args)), ["comment:list"]);
    }

    #[test]
    fn unknown_fields_and_malformed_args_degrade() {
        let policy = resolver(CacheOptions::default());
        let expander = RelationExpander::new(&policy);

        let unknown = json!({ "include": { "nope": true } });
        assert!(expander.read_tags("Post", Some(&unknown)).is_empty());
        assert!(expander.read_tags("Post", Some(&json!({ "include": [1, 2] }))).is_empty());
        assert!(expander.read_tags("Post", Some(&json!("include"))).is_empty());
        assert!(expander.read_tags("Ghost", Some(&json!({ "include": { "a": true } }))).is_empty());
    }

    #[test]
    fn duplicate_relations_are_reported_once() {
        let policy = resolver(CacheOptions::default());
        let expander = RelationExpander::new(&policy);

        let args = json!({
            "include": { "posts": true },
            "select": { "posts": { "select": { "id": true } } },
        });
        assert_eq!(expander.read_tags("User", Some(&args)), ["post:list"]);
    }

    #[test]
    fn write_widening_is_unconditional() {
        let policy = resolver(CacheOptions::default());
        let expander = RelationExpander::new(&policy);

        assert_eq!(expander.write_tags("User"), ["post:list", "comment:list"]);
        assert_eq!(expander.write_tags("Post"), ["user:list", "comment:list"]);
        assert!(expander.write_tags("Ghost").is_empty());
    }

    #[test]
    fn excluded_models_are_skipped_on_write() {
        let policy = resolver(CacheOptions::default().exclude_model("Comment"));
        let expander = RelationExpander::new(&policy);

        assert_eq!(expander.related_models_for_write("Post"), ["User"]);
    }
}
