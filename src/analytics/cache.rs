//! Session-scoped query result cache.
//!
//! Whole results are memoized by exact [`Query`] identity. There is no TTL
//! and no partial invalidation: entries live until [`QueryCache::clear`] or
//! until the owning session drops the cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::types::{Query, QuerySource};

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheStats {
    /// Current stats as `(hits, misses)`.
    pub fn get(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Hit rate in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        let (hits, misses) = self.get();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Memoizes query results for one authenticated session.
///
/// The lock is never held while a query executes, so misses on different
/// queries run concurrently. Two racing misses on the same query may both
/// execute; the later insert wins and both callers receive an equal result.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: RwLock<FxHashMap<Query, Arc<QuerySource>>>,
    stats: CacheStats,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stored result without computing.
    pub fn get(&self, query: &Query) -> Option<Arc<QuerySource>> {
        self.entries.read().get(query).cloned()
    }

    /// Return the stored result for `query`, or run `compute` and store its
    /// result. Errors from `compute` are returned as-is and never stored, so
    /// the next call retries.
    pub fn get_or_compute<E, F>(&self, query: &Query, compute: F) -> Result<Arc<QuerySource>, E>
    where
        F: FnOnce(&Query) -> Result<QuerySource, E>,
    {
        if let Some(hit) = self.get(query) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(target: "evdash::cache", query = %query, "cache hit");
            return Ok(hit);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "evdash::cache", query = %query, "cache miss, executing");

        let result = Arc::new(compute(query)?);
        self.entries.write().insert(query.clone(), Arc::clone(&result));
        Ok(result)
    }

    /// Drop every entry unconditionally.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        let dropped = entries.len();
        entries.clear();
        tracing::debug!(target: "evdash::cache", dropped, "cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Log cache statistics at debug level.
    pub fn log_stats(&self) {
        let (hits, misses) = self.stats.get();
        tracing::debug!(
            target: "evdash::cache",
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", self.stats.hit_rate() * 100.0),
            cached_count = self.len(),
            "Query cache statistics"
        );
    }
}

// -------------------------------------------------------------------------
// Unit Tests
// -------------------------------------------------------------------------
