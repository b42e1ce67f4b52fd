use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{debug, info};

use super::types::{Memory, MemoryType};

const MIN_TRADES_FOR_PROMOTION: u64 = 50;
const DEFAULT_KELLY: f64 = 0.10;
const DEFAULT_POSITION_SHARE: f64 = 0.10;
const DEFAULT_WIN_RATE: f64 = 0.55;

/// Learner stage of the trading account.
///
/// Stages gate how aggressive the retrieved references may be; the stage is
/// monotonically non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnerStage {
    /// New account: tightest caps, highest quality bar
    Infant,
    /// Proven basic consistency
    Child,
    /// Established track record
    Mature,
}

impl LearnerStage {
    /// String form used in logs and stats.
    pub fn as_str(&self) -> &'static str {
        match self {
            LearnerStage::Infant => "infant",
            LearnerStage::Child => "child",
            LearnerStage::Mature => "mature",
        }
    }
}

impl std::fmt::Display for LearnerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-stage risk caps and admission rules
#[derive(Debug, Clone)]
pub struct StageRule {
    /// Stage the rule applies to
    pub stage: LearnerStage,
    /// Maximum Kelly fraction a reference may suggest
    pub max_kelly_fraction: f64,
    /// Maximum position share (of equity) a reference may suggest
    pub max_position_share: f64,
    /// Minimum quality score a reference must carry
    pub min_quality: f64,
    /// Memory types admissible at this stage
    pub allowed_types: &'static [MemoryType],
    /// Strategy labels admissible at this stage
    pub allowed_strategies: &'static [&'static str],
}

/// The fixed caps table, one rule per stage.
pub fn rule_for(stage: LearnerStage) -> StageRule {
    match stage {
        LearnerStage::Infant => StageRule {
            stage,
            max_kelly_fraction: 0.05,
            max_position_share: 0.05,
            min_quality: 0.95,
            allowed_types: &[MemoryType::Decision, MemoryType::Outcome],
            allowed_strategies: &["conservative", "trend_following"],
        },
        LearnerStage::Child => StageRule {
            stage,
            max_kelly_fraction: 0.25,
            max_position_share: 0.15,
            min_quality: 0.80,
            allowed_types: &[
                MemoryType::Decision,
                MemoryType::Outcome,
                MemoryType::Reflection,
            ],
            allowed_strategies: &["conservative", "trend_following", "mean_reversion"],
        },
        LearnerStage::Mature => StageRule {
            stage,
            max_kelly_fraction: 0.50,
            max_position_share: 0.40,
            min_quality: 0.70,
            allowed_types: &[
                MemoryType::Decision,
                MemoryType::Outcome,
                MemoryType::Reflection,
                MemoryType::Pattern,
            ],
            allowed_strategies: &[
                "conservative",
                "trend_following",
                "mean_reversion",
                "breakout",
            ],
        },
    }
}

/// One rejected memory with the rule it broke
#[derive(Debug, Clone)]
pub struct RiskViolation {
    /// Id of the rejected memory
    pub memory_id: String,
    /// Human-readable rejection reason
    pub reason: String,
    /// Severity weight used in the safety score
    pub risk_score: f64,
    /// The cap that was exceeded, when numeric
    pub max_allowed: f64,
    /// The offending value, when numeric
    pub actual: f64,
}

/// Output of one filtering pass
#[derive(Debug, Clone)]
pub struct FilteredResult {
    /// Memories that passed every check
    pub memories: Vec<Memory>,
    /// Count of rejected memories
    pub removed_count: usize,
    /// Details per rejection
    pub violations: Vec<RiskViolation>,
    /// Stage the pass ran under
    pub stage: LearnerStage,
    /// 0.95 with no violations, else `1 - 0.5 * mean(risk_score)`
    pub safety_score: f64,
    /// When the pass ran
    pub timestamp: DateTime<Utc>,
}

/// Cumulative filtering statistics
#[derive(Debug, Clone, Default)]
pub struct RiskMetrics {
    /// Number of filter passes
    pub filter_runs: u64,
    /// Memories rejected across all passes
    pub filtered_out: u64,
    /// Memories kept across all passes
    pub kept_count: u64,
    /// Total violations recorded
    pub risk_violations: u64,
    /// Time of the last pass
    pub last_filter_at: Option<DateTime<Utc>>,
}

/// Filters retrieved memories by the learner stage's risk caps.
///
/// Prevents aggressive references (high Kelly, oversized positions, exotic
/// memory types) from reaching an account that has not earned them.
pub struct RiskAwareFormatter {
    metrics: RwLock<RiskMetrics>,
}

impl Default for RiskAwareFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskAwareFormatter {
    /// Create a formatter.
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(RiskMetrics::default()),
        }
    }

    /// Apply the stage's rule to each memory.
    ///
    /// A memory is rejected when its type is not allowed, its quality score
    /// is below the floor, or its extracted Kelly fraction or position share
    /// exceeds the stage cap.
    pub fn filter_memories(&self, memories: Vec<Memory>, stage: LearnerStage) -> FilteredResult {
        let rule = rule_for(stage);
        let mut result = FilteredResult {
            memories: Vec::new(),
            removed_count: 0,
            violations: Vec::new(),
            stage,
            safety_score: 0.95,
            timestamp: Utc::now(),
        };

        if memories.is_empty() {
            self.record_metrics(&result);
            return result;
        }

        debug!(
            stage = %stage,
            max_kelly = rule.max_kelly_fraction,
            "filtering memories by stage"
        );

        for memory in memories {
            if !rule.allowed_types.contains(&memory.memory_type) {
                result.violations.push(RiskViolation {
                    memory_id: memory.id.clone(),
                    reason: format!(
                        "type {} not allowed at stage {}",
                        memory.memory_type, stage
                    ),
                    risk_score: 0.3,
                    max_allowed: 0.0,
                    actual: 0.0,
                });
                result.removed_count += 1;
                continue;
            }

            if memory.quality_score < rule.min_quality {
                result.violations.push(RiskViolation {
                    memory_id: memory.id.clone(),
                    reason: format!(
                        "quality {:.2} below required {:.2}",
                        memory.quality_score, rule.min_quality
                    ),
                    risk_score: 0.5,
                    max_allowed: rule.min_quality,
                    actual: memory.quality_score,
                });
                result.removed_count += 1;
                continue;
            }

            let kelly = extract_kelly_fraction(&memory);
            if kelly > rule.max_kelly_fraction {
                result.violations.push(RiskViolation {
                    memory_id: memory.id.clone(),
                    reason: format!(
                        "kelly {:.1}% exceeds cap {:.1}%",
                        kelly * 100.0,
                        rule.max_kelly_fraction * 100.0
                    ),
                    risk_score: 0.8,
                    max_allowed: rule.max_kelly_fraction,
                    actual: kelly,
                });
                result.removed_count += 1;
                continue;
            }

            let position = extract_position_share(&memory);
            if position > rule.max_position_share {
                result.violations.push(RiskViolation {
                    memory_id: memory.id.clone(),
                    reason: format!(
                        "position {:.1}% exceeds cap {:.1}%",
                        position * 100.0,
                        rule.max_position_share * 100.0
                    ),
                    risk_score: 0.7,
                    max_allowed: rule.max_position_share,
                    actual: position,
                });
                result.removed_count += 1;
                continue;
            }

            result.memories.push(memory);
        }

        if !result.violations.is_empty() {
            let total: f64 = result.violations.iter().map(|v| v.risk_score).sum();
            let mean = total / result.violations.len() as f64;
            result.safety_score = 1.0 - mean * 0.5;
        }

        debug!(
            kept = result.memories.len(),
            removed = result.removed_count,
            safety_score = result.safety_score,
            "stage filtering completed"
        );

        self.record_metrics(&result);
        result
    }

    fn record_metrics(&self, result: &FilteredResult) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.filter_runs += 1;
        metrics.filtered_out += result.removed_count as u64;
        metrics.kept_count += result.memories.len() as u64;
        metrics.risk_violations += result.violations.len() as u64;
        metrics.last_filter_at = Some(result.timestamp);
    }

    /// Statistics snapshot.
    pub fn metrics(&self) -> RiskMetrics {
        self.metrics.read().unwrap().clone()
    }
}

/// Extract the suggested Kelly fraction from memory metadata.
///
/// Falls back to deriving it from `risk_reward` and `win_rate`
/// (`(wr * rr - (1 - wr)) / rr`, win rate defaulting to 0.55), then to a
/// 10% default.
pub fn extract_kelly_fraction(memory: &Memory) -> f64 {
    if let Some(kelly) = memory.metadata_f64("kelly_fraction") {
        return kelly;
    }

    if let Some(risk_reward) = memory.metadata_f64("risk_reward") {
        let win_rate = memory.metadata_f64("win_rate").unwrap_or(DEFAULT_WIN_RATE);
        return (win_rate * risk_reward - (1.0 - win_rate)) / risk_reward;
    }

    DEFAULT_KELLY
}

/// Extract the suggested position share from memory metadata, defaulting
/// to 10%.
pub fn extract_position_share(memory: &Memory) -> f64 {
    memory
        .metadata_f64("position_size")
        .unwrap_or(DEFAULT_POSITION_SHARE)
}

/// Snapshot of the stage manager's counters
#[derive(Debug, Clone)]
pub struct StageStats {
    /// Current stage
    pub stage: LearnerStage,
    /// Trades recorded in the current stage
    pub total_trades: u64,
    /// Winning trades in the current stage
    pub successful: u64,
    /// Win rate in the current stage
    pub win_rate: f64,
    /// When the current stage began
    pub staged_at: DateTime<Utc>,
}

struct StageState {
    stage: LearnerStage,
    staged_at: DateTime<Utc>,
    success_count: u64,
    total_trades: u64,
}

/// Tracks realized trades and promotes the learner stage.
///
/// Promotion needs at least 50 trades in the current stage; infant to child
/// additionally needs a win rate above 70% and 14 days in stage, child to
/// mature above 60% and 28 days. There is no demotion.
pub struct StageManager {
    state: RwLock<StageState>,
}

impl Default for StageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StageManager {
    /// Create a manager starting at the infant stage.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StageState {
                stage: LearnerStage::Infant,
                staged_at: Utc::now(),
                success_count: 0,
                total_trades: 0,
            }),
        }
    }

    /// Record a realized trade and run the promotion check.
    pub fn record_trade(&self, successful: bool) {
        let mut state = self.state.write().unwrap();
        state.total_trades += 1;
        if successful {
            state.success_count += 1;
        }
        Self::check_promotion(&mut state);
    }

    fn check_promotion(state: &mut StageState) {
        if state.total_trades < MIN_TRADES_FOR_PROMOTION {
            return;
        }

        let win_rate = state.success_count as f64 / state.total_trades as f64;
        let in_stage = Utc::now() - state.staged_at;

        let promoted = match state.stage {
            LearnerStage::Infant if win_rate > 0.70 && in_stage > Duration::days(14) => {
                Some(LearnerStage::Child)
            }
            LearnerStage::Child if win_rate > 0.60 && in_stage > Duration::days(28) => {
                Some(LearnerStage::Mature)
            }
            _ => None,
        };

        if let Some(next) = promoted {
            info!(
                from = %state.stage,
                to = %next,
                win_rate = %format!("{:.1}%", win_rate * 100.0),
                "learner stage promoted"
            );
            state.stage = next;
            state.staged_at = Utc::now();
            state.success_count = 0;
            state.total_trades = 0;
        }
    }

    /// Current stage.
    pub fn current_stage(&self) -> LearnerStage {
        self.state.read().unwrap().stage
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> StageStats {
        let state = self.state.read().unwrap();
        let win_rate = if state.total_trades > 0 {
            state.success_count as f64 / state.total_trades as f64
        } else {
            0.0
        };
        StageStats {
            stage: state.stage,
            total_trades: state.total_trades,
            successful: state.success_count,
            win_rate,
            staged_at: state.staged_at,
        }
    }

    #[cfg(test)]
    fn backdate_stage(&self, days: i64) {
        let mut state = self.state.write().unwrap();
        state.staged_at = Utc::now() - Duration::days(days);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryStatus;

    fn evaluated_memory(memory_type: MemoryType, quality: f64) -> Memory {
        let mut m = Memory::new("reference entry", memory_type);
        m.status = MemoryStatus::Evaluated;
        m.quality_score = quality;
        m
    }

    #[test]
    fn test_infant_rejects_reflection_type() {
        let formatter = RiskAwareFormatter::new();
        let memory = evaluated_memory(MemoryType::Reflection, 0.99);

        let result = formatter.filter_memories(vec![memory], LearnerStage::Infant);
        assert!(result.memories.is_empty());
        assert_eq!(result.removed_count, 1);
        assert_eq!(result.violations[0].risk_score, 0.3);
    }

    #[test]
    fn test_quality_floor_per_stage() {
        let formatter = RiskAwareFormatter::new();

        let m = evaluated_memory(MemoryType::Decision, 0.90)
            .with_metadata("kelly_fraction", serde_json::json!(0.03))
            .with_metadata("position_size", serde_json::json!(0.03));
        // 0.90 fails the infant floor of 0.95 but passes child's 0.80.
        let result = formatter.filter_memories(vec![m.clone()], LearnerStage::Infant);
        assert!(result.memories.is_empty());
        assert_eq!(result.violations[0].max_allowed, 0.95);

        let result = formatter.filter_memories(vec![m], LearnerStage::Child);
        assert_eq!(result.memories.len(), 1);
    }

    #[test]
    fn test_kelly_cap_rejection() {
        let formatter = RiskAwareFormatter::new();
        let m = evaluated_memory(MemoryType::Decision, 0.99)
            .with_metadata("kelly_fraction", serde_json::json!(0.30))
            .with_metadata("position_size", serde_json::json!(0.03));

        let result = formatter.filter_memories(vec![m.clone()], LearnerStage::Child);
        assert!(result.memories.is_empty());
        assert_eq!(result.violations[0].risk_score, 0.8);
        assert_eq!(result.violations[0].max_allowed, 0.25);

        let result = formatter.filter_memories(vec![m], LearnerStage::Mature);
        assert_eq!(result.memories.len(), 1);
    }

    #[test]
    fn test_position_cap_rejection() {
        let formatter = RiskAwareFormatter::new();
        let m = evaluated_memory(MemoryType::Decision, 0.99)
            .with_metadata("kelly_fraction", serde_json::json!(0.03))
            .with_metadata("position_size", serde_json::json!(0.20));

        let result = formatter.filter_memories(vec![m], LearnerStage::Child);
        assert!(result.memories.is_empty());
        assert_eq!(result.violations[0].risk_score, 0.7);
    }

    #[test]
    fn test_kelly_derived_from_risk_reward() {
        // (0.55 * 2 - 0.45) / 2 = 0.325
        let m = evaluated_memory(MemoryType::Decision, 0.99)
            .with_metadata("risk_reward", serde_json::json!(2.0));
        let kelly = extract_kelly_fraction(&m);
        assert!((kelly - 0.325).abs() < 1e-9);

        // Explicit win rate overrides the 0.55 default.
        let m = evaluated_memory(MemoryType::Decision, 0.99)
            .with_metadata("risk_reward", serde_json::json!(3.0))
            .with_metadata("win_rate", serde_json::json!(0.7));
        let kelly = extract_kelly_fraction(&m);
        assert!((kelly - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_kelly_defaults_without_metadata() {
        let m = evaluated_memory(MemoryType::Decision, 0.99);
        assert_eq!(extract_kelly_fraction(&m), 0.10);
        assert_eq!(extract_position_share(&m), 0.10);
    }

    #[test]
    fn test_safety_score_no_violations() {
        let formatter = RiskAwareFormatter::new();
        let m = evaluated_memory(MemoryType::Decision, 0.99)
            .with_metadata("kelly_fraction", serde_json::json!(0.02))
            .with_metadata("position_size", serde_json::json!(0.02));

        let result = formatter.filter_memories(vec![m], LearnerStage::Infant);
        assert_eq!(result.safety_score, 0.95);
    }

    #[test]
    fn test_safety_score_with_violations() {
        let formatter = RiskAwareFormatter::new();
        // One kelly violation (0.8): safety = 1 - 0.5 * 0.8 = 0.6
        let m = evaluated_memory(MemoryType::Decision, 0.99)
            .with_metadata("kelly_fraction", serde_json::json!(0.90));

        let result = formatter.filter_memories(vec![m], LearnerStage::Mature);
        assert!((result.safety_score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_filter_invariant_holds_for_kept_memories() {
        let formatter = RiskAwareFormatter::new();
        let stage = LearnerStage::Child;
        let rule = rule_for(stage);

        let memories: Vec<Memory> = (0..20)
            .map(|i| {
                let memory_type = match i % 4 {
                    0 => MemoryType::Decision,
                    1 => MemoryType::Outcome,
                    2 => MemoryType::Reflection,
                    _ => MemoryType::Pattern,
                };
                evaluated_memory(memory_type, 0.5 + (i as f64) * 0.025)
                    .with_metadata("kelly_fraction", serde_json::json!(i as f64 * 0.03))
                    .with_metadata("position_size", serde_json::json!(i as f64 * 0.02))
            })
            .collect();

        let result = formatter.filter_memories(memories, stage);
        for kept in &result.memories {
            assert!(rule.allowed_types.contains(&kept.memory_type));
            assert!(kept.quality_score >= rule.min_quality);
            assert!(extract_kelly_fraction(kept) <= rule.max_kelly_fraction);
            assert!(extract_position_share(kept) <= rule.max_position_share);
        }
    }

    #[test]
    fn test_metrics_accumulate() {
        let formatter = RiskAwareFormatter::new();
        let m = evaluated_memory(MemoryType::Pattern, 0.99);
        formatter.filter_memories(vec![m], LearnerStage::Infant);

        let metrics = formatter.metrics();
        assert_eq!(metrics.filter_runs, 1);
        assert_eq!(metrics.filtered_out, 1);
        assert_eq!(metrics.risk_violations, 1);
    }

    #[test]
    fn test_stage_starts_at_infant() {
        let manager = StageManager::new();
        assert_eq!(manager.current_stage(), LearnerStage::Infant);
    }

    #[test]
    fn test_no_promotion_before_fifty_trades() {
        let manager = StageManager::new();
        manager.backdate_stage(30);
        for _ in 0..49 {
            manager.record_trade(true);
        }
        assert_eq!(manager.current_stage(), LearnerStage::Infant);
    }

    #[test]
    fn test_no_promotion_before_time_in_stage() {
        let manager = StageManager::new();
        for _ in 0..60 {
            manager.record_trade(true);
        }
        // Win rate is 100% but the stage is brand new.
        assert_eq!(manager.current_stage(), LearnerStage::Infant);
    }

    #[test]
    fn test_infant_promotes_to_child() {
        let manager = StageManager::new();
        manager.backdate_stage(15);
        // 40 wins of 50 trades = 80% win rate.
        for i in 0..50 {
            manager.record_trade(i % 5 != 0);
        }
        assert_eq!(manager.current_stage(), LearnerStage::Child);

        // Counters reset on promotion.
        let stats = manager.stats();
        assert_eq!(stats.total_trades, 0);
    }

    #[test]
    fn test_infant_low_win_rate_stays() {
        let manager = StageManager::new();
        manager.backdate_stage(15);
        // 60% win rate is below the 70% bar.
        for i in 0..50 {
            manager.record_trade(i % 5 < 3);
        }
        assert_eq!(manager.current_stage(), LearnerStage::Infant);
    }

    #[test]
    fn test_child_promotes_to_mature() {
        let manager = StageManager::new();
        manager.backdate_stage(15);
        for _ in 0..50 {
            manager.record_trade(true);
        }
        assert_eq!(manager.current_stage(), LearnerStage::Child);

        manager.backdate_stage(29);
        // 65% win rate over 60 trades clears the 60% bar.
        for i in 0..60 {
            manager.record_trade(i % 20 < 13);
        }
        assert_eq!(manager.current_stage(), LearnerStage::Mature);
    }

    #[test]
    fn test_stats_snapshot() {
        let manager = StageManager::new();
        manager.record_trade(true);
        manager.record_trade(false);

        let stats = manager.stats();
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.successful, 1);
        assert!((stats.win_rate - 0.5).abs() < 1e-9);
    }
}
