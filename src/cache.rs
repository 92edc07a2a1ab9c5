//! Reference-counted content cache.
//!
//! [`ContentCache`] maps a deterministic [`CacheKey`] to a payload shared by
//! any number of independent consumers. The first consumer inserts with
//! [`ContentCache::set`] (refcount 1), later ones call
//! [`ContentCache::add_ref`], and every consumer calls
//! [`ContentCache::release`] exactly once when done. The entry is evicted when
//! its refcount reaches zero.
//!
//! The cache is an explicit value owned by whoever coordinates its consumers
//! (the plugin keeps one per payload kind in a resource), never a global. It
//! does no locking: all calls must come from the owning thread.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::mesher::GeometryStyle;

/// Deterministic cache key.
///
/// Keys are built from length-prefixed components so that two different
/// inputs can never render to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key of the raw pixel entry for a single heightmap source.
    pub fn heightmap(source: &str) -> Self {
        Self(format!("heightmap:{}:{source}", source.len()))
    }

    /// Key of a built geometry.
    ///
    /// Identical `(sources, max_height, style)` tuples give identical keys.
    /// `max_height` is keyed by its bit pattern, with `-0.0` folded into `0.0`.
    pub fn geometry<S: AsRef<str>>(sources: &[S], max_height: f32, style: GeometryStyle) -> Self {
        let max_height = if max_height == 0.0 { 0.0 } else { max_height };
        let mut key = format!("geometry:{style}:{:08x}", max_height.to_bits());
        for source in sources {
            let source = source.as_ref();
            key.push_str(&format!("|{}:{source}", source.len()));
        }
        Self(key)
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct CacheEntry<T> {
    payload: T,
    ref_count: u32,
}

/// Refcounted store of shared payloads.
///
/// Payloads that own external resources are handed back by
/// [`release`](Self::release) on eviction so the caller can dispose of them;
/// dropping the returned value is enough for plain data.
#[derive(Debug)]
pub struct ContentCache<T> {
    entries: HashMap<CacheKey, CacheEntry<T>>,
}

impl<T> Default for ContentCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ContentCache<T> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Whether `key` has a live entry.
    pub fn has(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Borrows the payload for `key`.
    pub fn get(&self, key: &CacheKey) -> Result<&T> {
        self.entries
            .get(key)
            .map(|entry| &entry.payload)
            .ok_or_else(|| Error::CacheMiss { key: key.clone() })
    }

    /// Mutable access for the single writer that inserted the entry.
    pub(crate) fn get_mut(&mut self, key: &CacheKey) -> Result<&mut T> {
        self.entries
            .get_mut(key)
            .map(|entry| &mut entry.payload)
            .ok_or_else(|| Error::CacheMiss { key: key.clone() })
    }

    /// Inserts `payload` under `key` with a refcount of 1.
    ///
    /// Fails with [`Error::KeyCollision`] if the key is present; callers check
    /// [`has`](Self::has) first and use [`add_ref`](Self::add_ref) instead.
    pub fn set(&mut self, key: CacheKey, payload: T) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(Error::KeyCollision { key });
        }
        tracing::debug!(%key, "cache insert");
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                ref_count: 1,
            },
        );
        Ok(())
    }

    /// Adds a consumer to `key`, returning the new refcount.
    pub fn add_ref(&mut self, key: &CacheKey) -> Result<u32> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| Error::CacheMiss { key: key.clone() })?;
        entry.ref_count += 1;
        tracing::debug!(%key, ref_count = entry.ref_count, "cache add ref");
        Ok(entry.ref_count)
    }

    /// Drops one consumer of `key`.
    ///
    /// Returns the evicted payload when this was the last reference, `None`
    /// otherwise. Releasing an evicted key (a double release) fails with
    /// [`Error::CacheMiss`].
    pub fn release(&mut self, key: &CacheKey) -> Result<Option<T>> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| Error::CacheMiss { key: key.clone() })?;
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            tracing::debug!(%key, ref_count = entry.ref_count, "cache release");
            return Ok(None);
        }
        tracing::debug!(%key, "cache evict");
        Ok(self.entries.remove(key).map(|entry| entry.payload))
    }

    /// Removes `key` regardless of its refcount.
    ///
    /// Used when every holder is being told at once that the entry is void,
    /// such as a failed decode.
    pub(crate) fn remove(&mut self, key: &CacheKey) -> Option<T> {
        self.entries.remove(key).map(|entry| entry.payload)
    }

    /// Current refcount of `key`, or `None` if absent.
    pub fn ref_count(&self, key: &CacheKey) -> Option<u32> {
        self.entries.get(key).map(|entry| entry.ref_count)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
