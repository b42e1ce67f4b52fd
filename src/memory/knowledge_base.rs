use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::StoreResult;

use super::store::MemoryStore;
use super::types::{FilterOperator, Memory, MemoryType, Query, QueryFilter};

const QUALITY_THRESHOLD: f64 = 0.8;
const SYNC_LIMIT: usize = 10_000;
const SYNC_INTERVAL: Duration = Duration::from_secs(30 * 60);
const COLD_START_CAP: usize = 5;

/// Cache of global high-quality reference memories.
///
/// Periodically pulls every evaluated memory with `quality_score >= 0.8`
/// from the store (full re-pull, no incremental path) and serves it from
/// memory, indexed by type. Used to give cold-start traders usable
/// references before they have history of their own.
pub struct GlobalKnowledgeBase {
    store: Arc<dyn MemoryStore>,
    state: RwLock<KbState>,
    metrics: RwLock<KbMetrics>,
}

#[derive(Default)]
struct KbState {
    references: Vec<Memory>,
    type_indexes: HashMap<String, Vec<Memory>>,
    last_sync_at: Option<DateTime<Utc>>,
}

/// Knowledge-base statistics
#[derive(Debug, Clone, Default)]
pub struct KbMetrics {
    /// Cached reference count
    pub total_references: u64,
    /// References per memory type
    pub by_type: HashMap<String, u64>,
    /// References bucketed by quality: excellent (>0.9), good (0.8-0.9), fair
    pub quality_distribution: HashMap<String, u64>,
    /// Time of last successful sync
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Count of failed syncs
    pub sync_errors: u64,
}

impl GlobalKnowledgeBase {
    /// Create a knowledge base over the given store. Call [`Self::sync`]
    /// or [`Self::start_sync_loop`] to populate it.
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            state: RwLock::new(KbState::default()),
            metrics: RwLock::new(KbMetrics::default()),
        }
    }

    /// Pull high-quality evaluated memories and rebuild the indexes.
    ///
    /// Failures are counted in metrics; the previous cache stays intact.
    pub async fn sync(&self) -> StoreResult<usize> {
        let query = Query::graph(
            vec![
                QueryFilter::new(
                    "quality_score",
                    FilterOperator::Gte,
                    serde_json::json!(QUALITY_THRESHOLD),
                ),
                QueryFilter::new("status", FilterOperator::Eq, serde_json::json!("evaluated")),
            ],
            SYNC_LIMIT,
        );

        let memories = match self.store.search(query).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "knowledge base sync failed");
                self.metrics.write().await.sync_errors += 1;
                return Err(e);
            }
        };

        let count = memories.len();
        let now = Utc::now();

        {
            let mut state = self.state.write().await;
            state.type_indexes = build_type_indexes(&memories);
            state.references = memories.clone();
            state.last_sync_at = Some(now);
        }

        {
            let mut metrics = self.metrics.write().await;
            metrics.total_references = count as u64;
            metrics.by_type.clear();
            metrics.quality_distribution.clear();
            for m in &memories {
                *metrics
                    .by_type
                    .entry(m.memory_type.as_str().to_string())
                    .or_insert(0) += 1;
                let bucket = if m.quality_score >= 0.9 {
                    "excellent"
                } else if m.quality_score >= QUALITY_THRESHOLD {
                    "good"
                } else {
                    "fair"
                };
                *metrics
                    .quality_distribution
                    .entry(bucket.to_string())
                    .or_insert(0) += 1;
            }
            metrics.last_sync_at = Some(now);
        }

        info!(references = count, "knowledge base synced");
        Ok(count)
    }

    /// Run [`Self::sync`] every 30 minutes until `stop` is signaled.
    ///
    /// A failed sync is logged and counted, never fatal to the loop.
    pub async fn start_sync_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(SYNC_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately.
        ticker.tick().await;
        if self.sync().await.is_err() {
            warn!("initial knowledge base sync failed");
        }

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!("knowledge base sync loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if self.sync().await.is_err() {
                        warn!("periodic knowledge base sync failed");
                    }
                }
            }
        }
    }

    /// References of the given type, falling back to global top quality
    /// when the type has no entries.
    pub async fn get_for_type(&self, memory_type: MemoryType, limit: usize) -> Vec<Memory> {
        let state = self.state.read().await;
        match state.type_indexes.get(memory_type.as_str()) {
            Some(memories) if !memories.is_empty() => {
                memories.iter().take(limit).cloned().collect()
            }
            _ => {
                debug!(memory_type = %memory_type, "no typed references, falling back to top quality");
                top_quality(&state.references, limit)
            }
        }
    }

    /// The `limit` highest-quality references across all types.
    pub async fn get_top_quality(&self, limit: usize) -> Vec<Memory> {
        let state = self.state.read().await;
        top_quality(&state.references, limit)
    }

    /// Cold-start references for a trader with no usable history.
    /// Capped at five entries regardless of `limit`.
    pub async fn get_for_cold_start(&self, limit: usize) -> Vec<Memory> {
        let state = self.state.read().await;
        if state.references.is_empty() {
            warn!("cold start requested but knowledge base is empty");
            return Vec::new();
        }
        top_quality(&state.references, limit.min(COLD_START_CAP))
    }

    /// References similar to the given context, keyed by its `trade_type`.
    pub async fn search_similar_in_kb(
        &self,
        context: &HashMap<String, serde_json::Value>,
        limit: usize,
    ) -> Vec<Memory> {
        let trade_type = context
            .get("trade_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        let state = self.state.read().await;
        match state.type_indexes.get(trade_type) {
            Some(memories) if !memories.is_empty() => {
                memories.iter().take(limit).cloned().collect()
            }
            _ => top_quality(&state.references, limit),
        }
    }

    /// Time of the last successful sync, if any.
    pub async fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_sync_at
    }

    /// Statistics snapshot.
    pub async fn metrics(&self) -> KbMetrics {
        self.metrics.read().await.clone()
    }
}

fn build_type_indexes(memories: &[Memory]) -> HashMap<String, Vec<Memory>> {
    let mut indexes: HashMap<String, Vec<Memory>> = HashMap::new();
    for m in memories {
        indexes
            .entry(m.memory_type.as_str().to_string())
            .or_default()
            .push(m.clone());
    }
    for bucket in indexes.values_mut() {
        bucket.sort_by(|a, b| {
            b.quality_score
                .partial_cmp(&a.quality_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    indexes
}

fn top_quality(references: &[Memory], limit: usize) -> Vec<Memory> {
    let mut sorted = references.to_vec();
    sorted.sort_by(|a, b| {
        b.quality_score
            .partial_cmp(&a.quality_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted.truncate(limit);
    sorted
}

/// Serves hard-coded conservative references when the knowledge base has
/// nothing, so a brand-new trader always gets usable references.
pub struct ColdStartFallback {
    kb: Arc<GlobalKnowledgeBase>,
    defaults: Vec<Memory>,
}

impl ColdStartFallback {
    /// Wrap a knowledge base with built-in conservative defaults.
    pub fn new(kb: Arc<GlobalKnowledgeBase>) -> Self {
        let mut kelly = Memory::new(
            "Kelly-capped sizing: never risk more than a 25% Kelly fraction per position, with a hard stop-loss",
            MemoryType::Decision,
        )
        .with_metadata("kelly_fraction", serde_json::json!(0.25))
        .with_metadata("stop_loss", serde_json::json!(0.05))
        .with_metadata("risk_reward", serde_json::json!(2.0));
        kelly.id = "default_1".to_string();
        kelly.quality_score = 0.92;

        let mut trend = Memory::new(
            "Trend following: trade with the prevailing direction, entering at support and resistance levels",
            MemoryType::Decision,
        )
        .with_metadata("strategy", serde_json::json!("trend_following"))
        .with_metadata("timeframe", serde_json::json!("4h"));
        trend.id = "default_2".to_string();
        trend.quality_score = 0.88;

        Self {
            kb,
            defaults: vec![kelly, trend],
        }
    }

    /// Cold-start references from the knowledge base, or the built-in
    /// defaults when the KB is empty.
    pub async fn get_fallback_references(&self) -> Vec<Memory> {
        let references = self.kb.get_for_cold_start(3).await;
        if references.is_empty() {
            warn!(
                defaults = self.defaults.len(),
                "knowledge base empty, serving built-in references"
            );
            return self.defaults.clone();
        }
        references
    }
}
