use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use quorum_models::ProviderSignal;
use serde::{Deserialize, Serialize};

/// Content-addressed key for one provider call.
///
/// Hex blake3 of `provider_id`, a NUL separator, and the normalized request,
/// so identical prompts sent to different providers never collide.
pub fn cache_key(provider_id: &str, normalized_request: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(provider_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(normalized_request.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Collapse every whitespace run into one space and trim the ends.
pub fn normalize_request(request: &str) -> String {
    request.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub size: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// TTL-bound memo of provider signals, safe for concurrent use from parallel
/// provider calls.
///
/// Concurrent misses for the same key share a single in-flight fetch. Failed
/// fetches are never stored.
pub struct ResponseCache {
    inner: Cache<String, ProviderSignal>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &str) -> Option<ProviderSignal> {
        let found = self.inner.get(key).await;
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub async fn insert(&self, key: String, signal: ProviderSignal) {
        self.inner.insert(key, signal).await;
    }

    /// Return the cached signal for `key`, or run `fetch` and cache its success.
    ///
    /// Callers that arrive while another caller's fetch for the same key is in
    /// flight wait for it and receive its result (or a clone of its error).
    pub async fn get_or_fetch<F, E>(&self, key: String, fetch: F) -> Result<ProviderSignal, E>
    where
        F: Future<Output = Result<ProviderSignal, E>>,
        E: Clone + Send + Sync + 'static,
    {
        match self.inner.entry(key).or_try_insert_with(fetch).await {
            Ok(entry) => {
                if entry.is_fresh() {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(entry.into_value())
            }
            Err(shared) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err((*shared).clone())
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            size: self.inner.entry_count(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}
