//! Bidirectional tag registry.
//!
//! Tracks which cache keys carry which tags, so a tag invalidation can find
//! every affected entry and an evicted entry can be unlinked from its tags.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

#[derive(Default)]
struct Links {
    tag_to_keys: HashMap<String, HashSet<CacheKey>>,
    key_to_tags: HashMap<CacheKey, HashSet<String>>,
}

/// Maps tag -> keys and key -> tags.
///
/// Both directions live behind one lock so they never disagree.
#[derive(Default)]
pub struct TagRegistry {
    links: RwLock<Links>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `key` to `tags`, replacing any tags it carried before.
    pub fn register<I, S>(&self, key: &CacheKey, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: HashSet<String> = tags.into_iter().map(Into::into).collect();
        let mut links = rw_write(&self.links, "cache::registry", "register");
        unlink(&mut links, key);

        for tag in &tags {
            links
                .tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        links.key_to_tags.insert(key.clone(), tags);
    }

    pub fn keys_for_tag(&self, tag: &str) -> HashSet<CacheKey> {
        rw_read(&self.links, "cache::registry", "keys_for_tag")
            .tag_to_keys
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tags_for_key(&self, key: &CacheKey) -> HashSet<String> {
        rw_read(&self.links, "cache::registry", "tags_for_key")
            .key_to_tags
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Unlink a key from all of its tags.
    pub fn unregister(&self, key: &CacheKey) {
        let mut links = rw_write(&self.links, "cache::registry", "unregister");
        unlink(&mut links, key);
    }

    /// Drop a tag and return the keys that carried it.
    ///
    /// Keys keep their other tags; callers decide what happens to the entries.
    pub fn take_tag(&self, tag: &str) -> HashSet<CacheKey> {
        let mut links = rw_write(&self.links, "cache::registry", "take_tag");
        let keys = links.tag_to_keys.remove(tag).unwrap_or_default();
        for key in &keys {
            if let Some(tags) = links.key_to_tags.get_mut(key) {
                tags.remove(tag);
            }
        }
        keys
    }

    pub fn clear(&self) {
        let mut links = rw_write(&self.links, "cache::registry", "clear");
        links.tag_to_keys.clear();
        links.key_to_tags.clear();
    }

    pub fn tag_count(&self) -> usize {
        rw_read(&self.links, "cache::registry", "tag_count")
            .tag_to_keys
            .len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.links, "cache::registry", "key_count")
            .key_to_tags
            .len()
    }
}

fn unlink(links: &mut Links, key: &CacheKey) {
    let Some(tags) = links.key_to_tags.remove(key) else {
        return;
    };
    for tag in tags {
        if let Some(keys) = links.tag_to_keys.get_mut(&tag) {
            keys.remove(key);
            if keys.is_empty() {
                links.tag_to_keys.remove(&tag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(op: &str) -> CacheKey {
        CacheKey::generate("Post", op, None, None)
    }

    #[test]
    fn register_and_lookup() {
        let registry = TagRegistry::new();
        registry.register(&key("findMany"), ["post:list", "user:list"]);
        registry.register(&key("count"), ["post:list"]);

        assert_eq!(registry.keys_for_tag("post:list").len(), 2);
        assert_eq!(registry.keys_for_tag("user:list").len(), 1);
        assert!(registry.tags_for_key(&key("count")).contains("post:list"));
        assert_eq!(registry.tag_count(), 2);
        assert_eq!(registry.key_count(), 2);
    }

    #[test]
    fn re_register_replaces_tags() {
        let registry = TagRegistry::new();
        registry.register(&key("findMany"), ["post:list", "post:1"]);
        registry.register(&key("findMany"), ["post:list"]);

        assert!(registry.keys_for_tag("post:1").is_empty());
        assert_eq!(registry.tag_count(), 1);
    }

    #[test]
    fn unregister_cleans_empty_tags() {
        let registry = TagRegistry::new();
        registry.register(&key("findMany"), ["post:list"]);
        registry.unregister(&key("findMany"));

        assert_eq!(registry.tag_count(), 0);
        assert_eq!(registry.key_count(), 0);
    }

    #[test]
    fn take_tag_returns_carriers_and_keeps_other_tags() {
        let registry = TagRegistry::new();
        registry.register(&key("findMany"), ["post:list", "user:list"]);

        let taken = registry.take_tag("post:list");
        assert!(taken.contains(&key("findMany")));
        assert!(registry.keys_for_tag("post:list").is_empty());
        assert!(registry.tags_for_key(&key("findMany")).contains("user:list"));

        registry.clear();
        assert_eq!(registry.key_count(), 0);
    }
}
