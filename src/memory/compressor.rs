use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::types::Memory;

const DEFAULT_MAX_MEMORIES: usize = 20;
const DEFAULT_DEDUP_CAPACITY: usize = 5000;
const JACCARD_THRESHOLD: f64 = 0.85;

/// Compresses retrieved memories to a token budget.
///
/// Ranks by composite relevance, drops near-duplicates, then keeps the best
/// memories until the token budget or the count cap is reached. The token
/// estimate is a fixed contract: roughly 4 ASCII characters or 0.77 CJK
/// characters per token; changing it changes compression behavior.
pub struct ContextCompressor {
    max_tokens: usize,
    max_memories: usize,
    deduplicator: Deduplicator,
    metrics: Mutex<CompressionMetrics>,
}

/// Output of one compression run
#[derive(Debug, Clone)]
pub struct CompressionResult {
    /// Memories kept, in relevance order
    pub memories: Vec<Memory>,
    /// Estimated tokens across the input
    pub input_tokens: usize,
    /// Estimated tokens across the kept memories
    pub output_tokens: usize,
    /// `output_tokens / input_tokens`, 0 when the input is empty
    pub compress_ratio: f64,
    /// Memories dropped for exceeding the budget or count cap
    pub removed_count: usize,
    /// Memories dropped as near-duplicates
    pub deduplicated_count: usize,
    /// When the run happened
    pub timestamp: DateTime<Utc>,
}

/// Aggregate compression statistics
#[derive(Debug, Clone, Default)]
pub struct CompressionMetrics {
    /// Total compression runs
    pub compression_runs: u64,
    /// Mean estimated input tokens per run
    pub avg_input_tokens: f64,
    /// Mean estimated output tokens per run
    pub avg_output_tokens: f64,
    /// Mean compression ratio per run
    pub avg_compression_ratio: f64,
    /// Total memories removed over budget across runs
    pub total_removed: u64,
    /// Time of the last run
    pub last_compression_at: Option<DateTime<Utc>>,
}

impl ContextCompressor {
    /// Create a compressor with the given token budget.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            max_memories: DEFAULT_MAX_MEMORIES,
            deduplicator: Deduplicator::new(DEFAULT_DEDUP_CAPACITY),
            metrics: Mutex::new(CompressionMetrics::default()),
        }
    }

    /// Override the maximum number of kept memories.
    pub fn with_max_memories(mut self, max_memories: usize) -> Self {
        self.max_memories = max_memories;
        self
    }

    /// Compress a retrieval result down to the configured budget.
    pub fn compress(&self, memories: Vec<Memory>) -> CompressionResult {
        let mut result = CompressionResult {
            memories: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            compress_ratio: 0.0,
            removed_count: 0,
            deduplicated_count: 0,
            timestamp: Utc::now(),
        };

        if memories.is_empty() {
            self.record_metrics(&result);
            return result;
        }

        for memory in &memories {
            result.input_tokens += estimate_tokens(&memory.content);
            for value in memory.metadata.values() {
                if let Some(text) = value.as_str() {
                    result.input_tokens += estimate_tokens(text);
                }
            }
        }

        let sorted = sort_by_relevance(memories);

        let mut current_tokens = 0usize;
        for memory in sorted {
            if self.deduplicator.is_duplicate(&memory.content) {
                result.deduplicated_count += 1;
                debug!(id = memory.id_prefix(), "dropped near-duplicate memory");
                continue;
            }

            let tokens = estimate_tokens(&memory.content);
            if current_tokens + tokens > self.max_tokens
                || result.memories.len() >= self.max_memories
            {
                result.removed_count += 1;
                debug!(id = memory.id_prefix(), tokens, "dropped memory over budget");
                continue;
            }

            self.deduplicator.add(&memory.content);
            current_tokens += tokens;
            result.output_tokens += tokens;
            result.memories.push(memory);
        }

        if result.input_tokens > 0 {
            result.compress_ratio = result.output_tokens as f64 / result.input_tokens as f64;
        }

        debug!(
            kept = result.memories.len(),
            deduplicated = result.deduplicated_count,
            removed = result.removed_count,
            input_tokens = result.input_tokens,
            output_tokens = result.output_tokens,
            "compression completed"
        );

        self.record_metrics(&result);
        result
    }

    fn record_metrics(&self, result: &CompressionResult) {
        let mut metrics = self.metrics.lock().unwrap();
        let prior_runs = metrics.compression_runs as f64;
        let runs = prior_runs + 1.0;

        metrics.avg_input_tokens =
            (metrics.avg_input_tokens * prior_runs + result.input_tokens as f64) / runs;
        metrics.avg_output_tokens =
            (metrics.avg_output_tokens * prior_runs + result.output_tokens as f64) / runs;
        metrics.avg_compression_ratio =
            (metrics.avg_compression_ratio * prior_runs + result.compress_ratio) / runs;

        metrics.compression_runs += 1;
        metrics.total_removed += result.removed_count as u64;
        metrics.last_compression_at = Some(result.timestamp);
    }

    /// Snapshot of compression statistics.
    pub fn metrics(&self) -> CompressionMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Forget all previously seen content.
    pub fn clear_dedup_state(&self) {
        self.deduplicator.clear();
    }
}

fn sort_by_relevance(memories: Vec<Memory>) -> Vec<Memory> {
    let mut sorted = memories;
    sorted.sort_by(|a, b| {
        let score_a = a.quality_score * 0.5 + a.similarity * 0.5;
        let score_b = b.quality_score * 0.5 + b.similarity * 0.5;
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
    sorted
}

/// Estimate the token count of a string.
///
/// CJK codepoints count as 1.3 tokens, ASCII letters as 0.25; any non-empty
/// string is at least one token.
pub fn estimate_tokens(s: &str) -> usize {
    if s.is_empty() {
        return 0;
    }

    let mut cjk = 0usize;
    let mut ascii_letters = 0usize;
    for ch in s.chars() {
        if ('\u{4E00}'..='\u{9FFF}').contains(&ch) {
            cjk += 1;
        } else if ch.is_ascii_alphabetic() {
            ascii_letters += 1;
        }
    }

    let tokens = (cjk as f64 * 1.3 + ascii_letters as f64 / 4.0) as usize;
    tokens.max(1)
}

/// Bounded set of normalized content used to reject near-duplicates.
///
/// Holds at most `capacity` entries; on overflow the oldest entry is
/// evicted in insertion order.
struct Deduplicator {
    inner: Mutex<DedupState>,
    capacity: usize,
}

struct DedupState {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl Deduplicator {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(DedupState {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    fn is_duplicate(&self, content: &str) -> bool {
        let normalized = normalize(content);
        let state = self.inner.lock().unwrap();

        if state.seen.contains(&normalized) {
            return true;
        }

        state
            .seen
            .iter()
            .any(|seen| jaccard_similarity(&normalized, seen) > JACCARD_THRESHOLD)
    }

    fn add(&self, content: &str) {
        let normalized = normalize(content);
        let mut state = self.inner.lock().unwrap();

        if state.seen.contains(&normalized) {
            return;
        }

        if state.seen.len() >= self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.seen.remove(&oldest);
            }
        }

        state.seen.insert(normalized.clone());
        state.order.push_back(normalized);
    }

    fn clear(&self) {
        let mut state = self.inner.lock().unwrap();
        state.seen.clear();
        state.order.clear();
    }
}

fn normalize(content: &str) -> String {
    content.trim().to_lowercase()
}

/// Word-level Jaccard similarity between two strings.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.len() + words_b.len() - intersection;

    if union == 0 {
        return 0.0;
    }

    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;

    fn memory(content: &str, quality: f64, similarity: f64) -> Memory {
        let mut m = Memory::new(content, MemoryType::Decision);
        m.quality_score = quality;
        m.similarity = similarity;
        m
    }

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short_rounds_up_to_one() {
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("!!"), 1);
    }

    #[test]
    fn test_estimate_tokens_ascii() {
        // 40 letters / 4 = 10 tokens
        let s = "a".repeat(40);
        assert_eq!(estimate_tokens(&s), 10);
    }

    #[test]
    fn test_estimate_tokens_cjk() {
        // 10 CJK chars * 1.3 = 13 tokens
        let s = "\u{4E00}".repeat(10);
        assert_eq!(estimate_tokens(&s), 13);
    }

    #[test]
    fn test_estimate_tokens_mixed() {
        // 8 letters / 4 = 2, plus 2 CJK * 1.3 = 2.6 -> total 4.6 -> 4
        let s = format!("breakout{}", "\u{4E2D}\u{6587}");
        assert_eq!(estimate_tokens(&s), 4);
    }

    #[test]
    fn test_jaccard_similarity() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        let sim = jaccard_similarity("a b c d", "a b c e");
        assert!((sim - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_compress_empty_input() {
        let compressor = ContextCompressor::new(700);
        let result = compressor.compress(vec![]);
        assert!(result.memories.is_empty());
        assert_eq!(result.compress_ratio, 0.0);
        assert_eq!(result.input_tokens, 0);
    }

    #[test]
    fn test_compress_orders_by_composite_score() {
        let compressor = ContextCompressor::new(10_000);
        let low = memory("low score entry about scalping and fees", 0.2, 0.2);
        let high = memory("high score entry about breakout continuation", 0.9, 0.9);

        let result = compressor.compress(vec![low, high]);
        assert_eq!(result.memories.len(), 2);
        assert!(result.memories[0].content.contains("high score"));
    }

    #[test]
    fn test_compress_respects_token_budget() {
        // Each memory is 10 tokens (40 ASCII letters); budget fits only two.
        let compressor = ContextCompressor::new(25);
        let memories: Vec<Memory> = (0..4)
            .map(|i| {
                let filler: String =
                    (0..40).map(|j| (b'a' + ((i * 7 + j) % 26) as u8) as char).collect();
                memory(&filler, 0.9 - i as f64 * 0.1, 0.9)
            })
            .collect();

        let result = compressor.compress(memories);
        assert!(result.output_tokens <= 25);
        assert_eq!(result.memories.len(), 2);
        assert_eq!(result.removed_count, 2);
    }

    #[test]
    fn test_compress_respects_memory_cap() {
        let compressor = ContextCompressor::new(100_000).with_max_memories(3);
        let memories: Vec<Memory> = (0..6)
            .map(|i| {
                let filler: String =
                    (0..30).map(|j| (b'a' + ((i * 11 + j) % 26) as u8) as char).collect();
                memory(&filler, 0.9, 0.9)
            })
            .collect();

        let result = compressor.compress(memories);
        assert_eq!(result.memories.len(), 3);
        assert_eq!(result.removed_count, 3);
    }

    #[test]
    fn test_compress_drops_exact_duplicates() {
        let compressor = ContextCompressor::new(10_000);
        let a = memory("BTC rejected at resistance, short worked", 0.9, 0.9);
        let b = memory("BTC rejected at resistance, short worked", 0.8, 0.8);

        let result = compressor.compress(vec![a, b]);
        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.deduplicated_count, 1);
    }

    #[test]
    fn test_compress_drops_near_duplicates() {
        let compressor = ContextCompressor::new(10_000);
        let a = memory(
            "went long btc after a clean retest of the broken resistance zone with strong volume confirmation and funding staying flat today",
            0.9,
            0.9,
        );
        // One word differs out of twenty-one; Jaccard 20/22, above 0.85.
        let b = memory(
            "went long btc after a clean retest of the broken resistance zone with strong volume confirmation and funding staying flat yesterday",
            0.8,
            0.8,
        );

        let result = compressor.compress(vec![a, b]);
        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.deduplicated_count, 1);
    }

    #[test]
    fn test_compress_ratio() {
        let compressor = ContextCompressor::new(10);
        // 40 letters = 10 tokens kept, second memory dropped.
        let a = memory(&"a".repeat(40), 0.9, 0.9);
        let b = memory(&"b".repeat(40), 0.5, 0.5);

        let result = compressor.compress(vec![a, b]);
        assert_eq!(result.input_tokens, 20);
        assert_eq!(result.output_tokens, 10);
        assert!((result.compress_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_accumulate() {
        let compressor = ContextCompressor::new(1000);
        compressor.compress(vec![memory("first entry with several words", 0.9, 0.9)]);
        compressor.compress(vec![memory("second entry with other words", 0.9, 0.9)]);

        let metrics = compressor.metrics();
        assert_eq!(metrics.compression_runs, 2);
        assert!(metrics.last_compression_at.is_some());
    }

    #[test]
    fn test_dedup_lru_eviction() {
        let dedup = Deduplicator::new(2);
        dedup.add("first unique entry");
        dedup.add("second unique entry");
        dedup.add("third unique entry"); // evicts the first

        assert!(!dedup.is_duplicate("first unique entry words differ enough"));
        assert!(dedup.is_duplicate("second unique entry"));
        assert!(dedup.is_duplicate("third unique entry"));
    }
}
