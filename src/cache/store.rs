//! Cache store seam and the in-process adapter.
//!
//! The layer talks to any store through [`CacheStore::get_or_compute`]. The
//! bundled [`MemoryStore`] keeps frozen values in a map, indexes them by tag
//! through a [`TagRegistry`], and answers both invalidation primitives.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use super::invalidation::{InvalidationError, RevalidateWindow, TagInvalidator};
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::registry::TagRegistry;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store is unavailable in this context")]
    Unavailable,
    #[error("cache store backend failed: {0}")]
    Backend(String),
    #[error("value computation was aborted")]
    ComputeAborted,
}

/// Per-entry options handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub ttl_seconds: u32,
    pub tags: Vec<String>,
}

/// Computes the frozen value for a missing key.
pub type ComputeFuture<'a> = BoxFuture<'a, Result<JsonValue, StoreError>>;

/// External cache store addressed by key and tags.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Return the value under `key`, running `compute` and storing its
    /// result first when absent. A failed computation stores nothing.
    async fn get_or_compute<'a>(
        &'a self,
        key: &'a CacheKey,
        options: &'a StoreOptions,
        compute: ComputeFuture<'a>,
    ) -> Result<JsonValue, StoreError>;
}

struct Entry {
    value: JsonValue,
    expires_at: Instant,
    stale: bool,
}

impl Entry {
    fn is_fresh(&self, now: Instant) -> bool {
        !self.stale && now < self.expires_at
    }
}

/// In-process store for tests and single-process hosts.
///
/// Expiry is checked on read; there is no background eviction. A read that
/// misses drops the expired or stale entry under its key before recomputing,
/// and [`MemoryStore::purge_expired`] sweeps keys that are never read again.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    registry: TagRegistry,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fresh value is held under `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        rw_read(&self.entries, SOURCE, "contains")
            .get(key)
            .is_some_and(|entry| entry.is_fresh(Instant::now()))
    }

    /// Fresh value under `key`, if any.
    pub fn peek(&self, key: &CacheKey) -> Option<JsonValue> {
        let now = Instant::now();
        rw_read(&self.entries, SOURCE, "peek")
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
        self.registry.clear();
    }

    /// Drop every expired entry and its tag links. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "purge_expired");
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
            self.registry.unregister(key);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "Expired entries purged");
        }
        expired.len()
    }

    fn discard_unfresh(&self, key: &CacheKey) {
        let mut entries = rw_write(&self.entries, SOURCE, "discard_unfresh");
        if entries
            .get(key)
            .is_some_and(|entry| !entry.is_fresh(Instant::now()))
        {
            entries.remove(key);
            self.registry.unregister(key);
        }
    }

    fn insert(&self, key: &CacheKey, options: &StoreOptions, value: JsonValue) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + Duration::from_secs(u64::from(options.ttl_seconds)),
            stale: false,
        };
        rw_write(&self.entries, SOURCE, "insert").insert(key.clone(), entry);
        self.registry.register(key, options.tags.iter().cloned());
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_or_compute<'a>(
        &'a self,
        key: &'a CacheKey,
        options: &'a StoreOptions,
        compute: ComputeFuture<'a>,
    ) -> Result<JsonValue, StoreError> {
        if let Some(value) = self.peek(key) {
            return Ok(value);
        }
        self.discard_unfresh(key);

        let value = compute.await?;
        self.insert(key, options, value.clone());
        Ok(value)
    }
}

#[async_trait]
impl TagInvalidator for MemoryStore {
    async fn invalidate_immediate(&self, tag: &str) -> Result<(), InvalidationError> {
        let keys = self.registry.take_tag(tag);
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_immediate");
        for key in &keys {
            entries.remove(key);
            self.registry.unregister(key);
        }
        debug!(tag, removed = keys.len(), "Tag invalidated");
        Ok(())
    }

    async fn invalidate_eventually(
        &self,
        tag: &str,
        window: RevalidateWindow,
    ) -> Result<(), InvalidationError> {
        let keys = self.registry.keys_for_tag(tag);
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_eventually");
        for key in &keys {
            if let Some(entry) = entries.get_mut(key) {
                entry.stale = true;
            }
        }
        debug!(tag, marked = keys.len(), window = %window, "Tag marked stale");
        Ok(())
    }
}
