use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::StoreResult;

use super::store::MemoryStore;
use super::types::{FilterOperator, Query, QueryFilter, QueryType};

const CACHE_CAPACITY: usize = 1000;
const WARMUP_DEADLINE: Duration = Duration::from_secs(30);

/// One entry in the warm cache
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached payload
    pub data: serde_json::Value,
    /// When the entry was written; TTL is measured from here
    pub timestamp: DateTime<Utc>,
    /// Reads served from this entry
    pub hit_count: u64,
}

/// A named query the warmer pre-executes each round
#[derive(Debug, Clone)]
pub struct WarmupQuery {
    /// Cache key suffix and log label
    pub name: &'static str,
    /// 1-10, 10 highest
    pub priority: u8,
    kind: WarmupKind,
}

#[derive(Debug, Clone, Copy)]
enum WarmupKind {
    SimilarTrades,
    FailurePatterns,
    SuccessfulParameters,
    MemoryStats,
}

/// Cache counters
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    /// Reads served from a live entry
    pub hits: u64,
    /// Reads that found nothing or a stale entry
    pub misses: u64,
    /// Time of the last warm-up round
    pub last_update_at: Option<DateTime<Utc>>,
}

/// Pre-executes hot memory queries on a timer and serves them from a
/// TTL-bounded LRU cache.
///
/// Each round runs the configured queries concurrently under a shared 30 s
/// deadline; queries that miss the deadline are abandoned individually and
/// the round keeps whichever results arrived.
pub struct CacheWarmer {
    store: Arc<dyn MemoryStore>,
    cache: Mutex<LruCache<String, CacheEntry>>,
    interval: Duration,
    cache_ttl: Duration,
    queries: Vec<WarmupQuery>,
    metrics: Mutex<CacheMetrics>,
}

impl CacheWarmer {
    /// Create a warmer over the given store with the default query set.
    pub fn new(store: Arc<dyn MemoryStore>, interval: Duration, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
            interval,
            cache_ttl,
            queries: default_warmup_queries(),
            metrics: Mutex::new(CacheMetrics::default()),
        }
    }

    /// Run one warm-up immediately, then keep warming every `interval`
    /// until `stop` is signaled.
    pub async fn start(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        info!("cache warmer starting");
        self.warmup().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick already consumed by the eager run

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!("cache warmer stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.warmup().await;
                }
            }
        }
    }

    /// Execute every warm-up query concurrently and cache the results.
    pub async fn warmup(&self) {
        let started = std::time::Instant::now();
        let mut handles = Vec::with_capacity(self.queries.len());

        for query in &self.queries {
            let store = Arc::clone(&self.store);
            let query = query.clone();
            handles.push(tokio::spawn(async move {
                let result =
                    tokio::time::timeout(WARMUP_DEADLINE, run_warmup_query(&*store, query.kind))
                        .await;
                (query.name, result)
            }));
        }

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for handle in handles {
            match handle.await {
                Ok((name, Ok(Ok(value)))) => {
                    self.set(&format!("warmup_{}", name), value);
                    succeeded += 1;
                }
                Ok((name, Ok(Err(e)))) => {
                    warn!(query = name, error = %e, "warm-up query failed");
                    failed += 1;
                }
                Ok((name, Err(_))) => {
                    warn!(query = name, "warm-up query missed its deadline");
                    failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "warm-up task panicked");
                    failed += 1;
                }
            }
        }

        self.metrics.lock().unwrap().last_update_at = Some(Utc::now());
        info!(
            succeeded,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "warm-up round completed"
        );
    }

    /// Read a cached value, enforcing the TTL. A stale entry is evicted
    /// and reported as a miss.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut cache = self.cache.lock().unwrap();

        let Some(entry) = cache.get_mut(key) else {
            drop(cache);
            self.metrics.lock().unwrap().misses += 1;
            return None;
        };

        let age = Utc::now() - entry.timestamp;
        if age.to_std().unwrap_or(Duration::ZERO) > self.cache_ttl {
            cache.pop(key);
            drop(cache);
            self.metrics.lock().unwrap().misses += 1;
            debug!(key, "evicted stale cache entry");
            return None;
        }

        entry.hit_count += 1;
        let data = entry.data.clone();
        drop(cache);
        self.metrics.lock().unwrap().hits += 1;
        Some(data)
    }

    /// Write a value into the cache with a fresh TTL.
    pub fn set(&self, key: &str, data: serde_json::Value) {
        self.cache.lock().unwrap().put(
            key.to_string(),
            CacheEntry {
                data,
                timestamp: Utc::now(),
                hit_count: 0,
            },
        );
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// `hits / (hits + misses)`, 0 before any read.
    pub fn hit_rate(&self) -> f64 {
        let metrics = self.metrics.lock().unwrap();
        let total = metrics.hits + metrics.misses;
        if total == 0 {
            return 0.0;
        }
        metrics.hits as f64 / total as f64
    }
}

fn default_warmup_queries() -> Vec<WarmupQuery> {
    vec![
        WarmupQuery {
            name: "similar_trades",
            priority: 10,
            kind: WarmupKind::SimilarTrades,
        },
        WarmupQuery {
            name: "failure_patterns",
            priority: 9,
            kind: WarmupKind::FailurePatterns,
        },
        WarmupQuery {
            name: "successful_parameters",
            priority: 8,
            kind: WarmupKind::SuccessfulParameters,
        },
        WarmupQuery {
            name: "memory_stats",
            priority: 7,
            kind: WarmupKind::MemoryStats,
        },
    ]
}

async fn run_warmup_query(
    store: &dyn MemoryStore,
    kind: WarmupKind,
) -> StoreResult<serde_json::Value> {
    match kind {
        WarmupKind::SimilarTrades => {
            let memories = store.search(Query::semantic(5, 0.7)).await?;
            Ok(serde_json::to_value(memories)?)
        }
        WarmupKind::FailurePatterns => {
            let query = Query {
                query_type: QueryType::GraphQuery,
                filters: vec![
                    QueryFilter::new("type", FilterOperator::Eq, serde_json::json!("reflection")),
                    QueryFilter::new(
                        "severity",
                        FilterOperator::In,
                        serde_json::json!(["high", "critical"]),
                    ),
                ],
                limit: 3,
                ..Default::default()
            };
            let memories = store.search(query).await?;
            Ok(serde_json::to_value(memories)?)
        }
        WarmupKind::SuccessfulParameters => {
            let query = Query::direct(
                vec![
                    QueryFilter::new("type", FilterOperator::Eq, serde_json::json!("outcome")),
                    QueryFilter::new("status", FilterOperator::Eq, serde_json::json!("evaluated")),
                ],
                3,
            );
            let memories = store.search(query).await?;
            Ok(serde_json::to_value(memories)?)
        }
        WarmupKind::MemoryStats => {
            let stats = store.get_stats().await?;
            Ok(serde_json::to_value(stats)?)
        }
    }
}
