//! Parse cache to avoid re-parsing repeated expressions
//!
//! Hosts tend to evaluate the same formula many times with different names.
//! This module keeps an LRU cache of parsed trees keyed by source text, so
//! only the first evaluation pays for lexing and parsing.
//!
//! # Configuration
//!
//! Cache size can be configured via the `SANDEVAL_CACHE_SIZE` environment variable:
//!
//! ```bash
//! # Larger cache for a service with many distinct formulas
//! export SANDEVAL_CACHE_SIZE=5000
//! ```

use crate::ast::Expression;
use crate::error::ParseError;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Environment variable overriding the default capacity
pub const CACHE_SIZE_ENV: &str = "SANDEVAL_CACHE_SIZE";

/// Capacity used when the environment does not say otherwise
pub const DEFAULT_CAPACITY: usize = 1000;

/// Cache metrics for observability
///
/// Tracks cache hits, misses, and evictions to help tune cache size.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheMetrics {
    /// Hit rate from 0.0 to 1.0; 0.0 before the first request
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache metrics at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheMetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Thread-safe LRU cache of parsed expressions
///
/// Entries are `Arc<Expression>`, so a hit is a reference count bump.
///
/// # Example
///
/// ```
/// use sandeval::cache::ExpressionCache;
/// use std::sync::Arc;
///
/// let cache = ExpressionCache::new(100);
/// let first = cache.get_or_parse("1 + x", sandeval::token_parser::parse).unwrap();
/// let second = cache.get_or_parse("1 + x", sandeval::token_parser::parse).unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
#[derive(Clone)]
pub struct ExpressionCache {
    cache: Arc<Mutex<LruCache<String, Arc<Expression>>>>,
    metrics: Arc<CacheMetrics>,
    capacity: usize,
}

impl ExpressionCache {
    /// Create a cache holding up to `capacity` trees (a capacity of 0 is raised to 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            metrics: Arc::new(CacheMetrics::default()),
            capacity: capacity.get(),
        }
    }

    /// Capacity from `SANDEVAL_CACHE_SIZE`, or 1000 entries
    pub fn with_default_capacity() -> Self {
        let capacity = std::env::var(CACHE_SIZE_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CAPACITY);

        Self::new(capacity)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<Expression>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached tree for `source`, parsing it with `parse_fn` on a miss.
    ///
    /// Parse failures are not cached.
    pub fn get_or_parse<F>(&self, source: &str, parse_fn: F) -> Result<Arc<Expression>, ParseError>
    where
        F: FnOnce(&str) -> Result<Expression, ParseError>,
    {
        if let Some(cached) = self.lock().get(source) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            trace!(source, "parse cache hit");
            return Ok(Arc::clone(cached));
        }

        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        trace!(source, "parse cache miss");
        let expr = Arc::new(parse_fn(source)?);

        let mut cache = self.lock();
        if let Some((evicted, _)) = cache.push(source.to_string(), Arc::clone(&expr)) {
            if evicted != source {
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(expr)
    }

    /// Cached tree for `source`, without parsing
    pub fn get(&self, source: &str) -> Option<Arc<Expression>> {
        self.lock().get(source).cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ExpressionCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
