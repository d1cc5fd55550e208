use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::{BlobObject, BlobStore, StoreError};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Country segment every missing per-country object falls back to.
const FALLBACK_COUNTRY: &str = "US";

type CacheKey = (String, String);

struct CacheEntry {
    object: BlobObject,
    fetched_at: Instant,
}

/// TTL memoization over a [`BlobStore`].
///
/// Expired entries are evicted lazily on lookup; there is no background sweep.
/// The table lock is never held across an await, so concurrent pipelines may
/// fetch the same object twice on a cold cache. That costs a redundant read,
/// never a wrong answer.
pub struct ObjectCache<S> {
    store: S,
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl<S: BlobStore> ObjectCache<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch an object, serving fresh cache entries without touching the store.
    ///
    /// A missing per-country object is retried once under the `US` country
    /// segment. If that is missing too, the empty placeholder is returned:
    /// absent country data is normal, not a fault.
    pub async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, StoreError> {
        match self.get_or_fetch(bucket, key).await {
            Ok(object) => Ok(object),
            Err(StoreError::NotFound { .. }) => {
                let Some(fallback) = fallback_key(key) else {
                    debug!(bucket, key, "object not found, no fallback available");
                    return Ok(BlobObject::empty());
                };
                debug!(bucket, key, fallback = %fallback, "object not found, trying fallback key");
                match self.get_or_fetch(bucket, &fallback).await {
                    Ok(object) => Ok(object),
                    Err(StoreError::NotFound { .. }) => {
                        debug!(bucket, key, "fallback object not found either");
                        Ok(BlobObject::empty())
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn get_or_fetch(&self, bucket: &str, key: &str) -> Result<BlobObject, StoreError> {
        let cache_key = (bucket.to_string(), key.to_string());
        if let Some(object) = self.lookup(&cache_key) {
            debug!(bucket, key, "cache hit");
            return Ok(object);
        }

        let object = self.store.get(bucket, key).await?;
        self.insert(cache_key, object.clone());
        Ok(object)
    }

    fn lookup(&self, cache_key: &CacheKey) -> Option<BlobObject> {
        {
            let entries = self.entries.read().ok()?;
            let entry = entries.get(cache_key)?;
            if entry.fetched_at.elapsed() < self.ttl {
                return Some(entry.object.clone());
            }
        }
        if let Ok(mut entries) = self.entries.write() {
            // Re-check under the write lock: another pipeline may have refreshed it.
            if entries
                .get(cache_key)
                .is_some_and(|e| e.fetched_at.elapsed() >= self.ttl)
            {
                entries.remove(cache_key);
            }
        }
        None
    }

    fn insert(&self, cache_key: CacheKey, object: BlobObject) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(
                    cache_key,
                    CacheEntry {
                        object,
                        fetched_at: Instant::now(),
                    },
                );
            }
            Err(e) => {
                warn!(bucket = %cache_key.0, key = %cache_key.1, error = %e, "cache write failed, serving uncached object");
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

/// Rewrite the first two-letter upper-case directory segment (e.g. `FR`, `EU`) to `US`.
///
/// Returns `None` when the key has no such segment or it is already `US`.
pub fn fallback_key(key: &str) -> Option<String> {
    let segments: Vec<&str> = key.split('/').collect();
    let dirs = segments.len().saturating_sub(1);
    let idx = segments[..dirs]
        .iter()
        .position(|s| s.len() == 2 && s.bytes().all(|b| b.is_ascii_uppercase()))?;
    if segments[idx] == FALLBACK_COUNTRY {
        return None;
    }
    let mut rewritten = segments;
    rewritten[idx] = FALLBACK_COUNTRY;
    Some(rewritten.join("/"))
}
