use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::memory::{
    CacheWarmer, ContextCompressor, GlobalKnowledgeBase, MemoryStore, Query, RiskAwareFormatter,
    StageManager,
};

/// Fallback recommendation when no reference survives filtering.
const INSUFFICIENT_DATA: &str = "insufficient data, wait";

/// A memory-backed trading recommendation with provenance flags
#[derive(Debug, Clone)]
pub struct MemoryRecommendation {
    /// Content of the best surviving reference, or the wait fallback
    pub recommendation: String,
    /// Quality of the chosen reference, or 0.3 for the fallback
    pub confidence: f64,
    /// Ids of the memories behind the recommendation
    pub source_memories: Vec<String>,
    /// Whether the warm cache held stage references this cycle
    pub cache_hit: bool,
    /// Whether the compressor ran
    pub used_compressor: bool,
    /// Whether store failure forced the knowledge-base fallback
    pub used_kb_fallback: bool,
    /// References removed by the risk filter
    pub filtered_count: usize,
}

/// Composer metrics
#[derive(Debug, Clone, Default)]
pub struct V2Metrics {
    /// Recommendations produced
    pub decisions_generated: u64,
    /// Memories retrieved across all calls
    pub memories_used: u64,
    /// Compression passes run
    pub compressions_run: u64,
    /// Times the knowledge-base fallback was taken
    pub fallbacks_used: u64,
    /// Rolling mean preparation latency
    pub average_prep_time: Duration,
}

/// The memory-augmented decision path: composes the store, compressor,
/// knowledge base, risk filter and stage manager into one call.
///
/// Store failures never fail the call; they degrade to cold-start
/// references from the knowledge base.
pub struct MemoryAugmentedDecision {
    store: Arc<dyn MemoryStore>,
    compressor: Arc<ContextCompressor>,
    kb: Arc<GlobalKnowledgeBase>,
    risk_formatter: Arc<RiskAwareFormatter>,
    stage_manager: Arc<StageManager>,
    cache_warmer: Arc<CacheWarmer>,
    metrics: Mutex<V2Metrics>,
}

impl MemoryAugmentedDecision {
    /// Wire the composer over its collaborators.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        compressor: Arc<ContextCompressor>,
        kb: Arc<GlobalKnowledgeBase>,
        risk_formatter: Arc<RiskAwareFormatter>,
        stage_manager: Arc<StageManager>,
        cache_warmer: Arc<CacheWarmer>,
    ) -> Self {
        Self {
            store,
            compressor,
            kb,
            risk_formatter,
            stage_manager,
            cache_warmer,
            metrics: Mutex::new(V2Metrics::default()),
        }
    }

    /// Produce one recommendation for the given retrieval query.
    pub async fn generate(&self, query: Query) -> MemoryRecommendation {
        let started = Instant::now();

        // The warm cache is consulted for observability only; a hit never
        // short-circuits retrieval.
        let cache_hit = self.cache_warmer.get("warmup_similar_trades").is_some();

        let mut used_kb_fallback = false;
        let memories = match self.store.search(query).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "memory search failed, falling back to knowledge base");
                used_kb_fallback = true;
                self.kb.get_for_cold_start(5).await
            }
        };
        let retrieved = memories.len();

        let compressed = self.compressor.compress(memories);
        let stage = self.stage_manager.current_stage();
        let filtered = self
            .risk_formatter
            .filter_memories(compressed.memories, stage);

        let recommendation = match filtered.memories.first() {
            Some(best) => MemoryRecommendation {
                recommendation: best.content.clone(),
                confidence: best.quality_score,
                source_memories: vec![best.id.clone()],
                cache_hit,
                used_compressor: true,
                used_kb_fallback,
                filtered_count: filtered.removed_count,
            },
            None => MemoryRecommendation {
                recommendation: INSUFFICIENT_DATA.to_string(),
                confidence: 0.3,
                source_memories: Vec::new(),
                cache_hit,
                used_compressor: true,
                used_kb_fallback,
                filtered_count: filtered.removed_count,
            },
        };

        debug!(
            stage = %stage,
            retrieved,
            kept = filtered.memories.len(),
            fallback = used_kb_fallback,
            "memory-augmented recommendation generated"
        );

        self.record_metrics(retrieved, used_kb_fallback, started.elapsed());
        recommendation
    }

    fn record_metrics(&self, memories_used: usize, fallback: bool, elapsed: Duration) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.decisions_generated += 1;
        metrics.memories_used += memories_used as u64;
        metrics.compressions_run += 1;
        if fallback {
            metrics.fallbacks_used += 1;
        }

        let n = metrics.decisions_generated as u32;
        metrics.average_prep_time =
            (metrics.average_prep_time * (n - 1) + elapsed) / n;
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> V2Metrics {
        self.metrics.lock().unwrap().clone()
    }
}
