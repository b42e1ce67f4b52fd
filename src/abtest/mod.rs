//! A/B testing of decision variants: traffic splitting, per-variant trade
//! accounting, and a two-sample significance test.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};

/// Configuration of one A/B test
#[derive(Debug, Clone)]
pub struct AbTestConfig {
    /// Test name for logs and reports
    pub name: String,
    /// Intended test duration
    pub duration: Duration,
    /// Target sample count per variant
    pub sample_size: usize,
    /// Variant name to traffic ratio; ratios must each be in (0,1] and sum to 1
    pub traffic_split: HashMap<String, f64>,
    /// Threshold reported as the placeholder p-value
    pub significance_level: f64,
}

/// One realized trade attributed to a variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Trade id
    pub trade_id: String,
    /// Variant that produced the trade
    pub variant: String,
    /// When the trade closed
    pub timestamp: DateTime<Utc>,
    /// Entry price
    pub entry_price: f64,
    /// Exit price
    pub exit_price: f64,
    /// Quantity traded
    pub quantity: f64,
    /// Realized profit and loss
    pub pnl: f64,
}

/// Accumulated results for one variant
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Variant name
    pub variant: String,
    /// Trades recorded
    pub sample_count: u64,
    /// Share of trades with positive PnL
    pub win_rate: f64,
    /// Total PnL
    pub pnl: f64,
    /// Sharpe ratio over per-trade PnL
    pub sharpe_ratio: f64,
    /// Maximum drawdown over cumulative PnL
    pub max_drawdown: f64,
    /// Mean PnL per trade
    pub avg_return_per_trade: f64,
    /// Every recorded trade
    pub trades: Vec<TradeRecord>,
    /// When the variant started collecting
    pub start_time: DateTime<Utc>,
    /// When the test was completed
    pub end_time: Option<DateTime<Utc>>,
    /// Marked at completion when the variant beat the control
    pub is_winner: bool,
    /// Whether the win cleared the significance test
    pub significantly_better: bool,
}

impl TestResult {
    fn new(variant: String) -> Self {
        Self {
            variant,
            sample_count: 0,
            win_rate: 0.0,
            pnl: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            avg_return_per_trade: 0.0,
            trades: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            is_winner: false,
            significantly_better: false,
        }
    }
}

/// Outcome of the two-sample test between the first two variants
#[derive(Debug, Clone)]
pub struct StatisticalTest {
    /// First variant compared
    pub variant_1: String,
    /// Second variant compared
    pub variant_2: String,
    /// `mean(variant_2) - mean(variant_1)`
    pub mean_difference: f64,
    /// `mean_difference / standard_error`
    pub t_statistic: f64,
    /// `|t| > 1.96` at 95% confidence
    pub is_significant: bool,
    /// Constant 0.05 placeholder; derive real p-values from the t-statistic
    pub p_value: f64,
}

/// Splits traffic between decision variants and scores their results.
pub struct AbTestFramework {
    test_id: String,
    start_time: DateTime<Utc>,
    config: AbTestConfig,
    results: RwLock<HashMap<String, TestResult>>,
}

impl AbTestFramework {
    /// Create a framework for the given test.
    pub fn new(test_id: impl Into<String>, config: AbTestConfig) -> Self {
        Self {
            test_id: test_id.into(),
            start_time: Utc::now(),
            config,
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Validate the traffic split and register each variant.
    ///
    /// Every ratio must lie in (0,1] and the ratios must sum to 1.
    pub fn initialize_variants(&self) -> ConfigResult<()> {
        info!(test = %self.config.name, "initializing A/B test");

        let mut total = 0.0;
        for (variant, ratio) in &self.config.traffic_split {
            if *ratio <= 0.0 || *ratio > 1.0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("traffic_split.{}", variant),
                    message: format!("ratio {:.2} outside (0,1]", ratio),
                });
            }
            total += ratio;
        }
        if (total - 1.0).abs() > 1e-9 {
            return Err(ConfigError::InvalidValue {
                key: "traffic_split".to_string(),
                message: format!("ratios sum to {:.4}, expected 1", total),
            });
        }

        let mut results = self.results.write().unwrap();
        for (variant, ratio) in &self.config.traffic_split {
            results.insert(variant.clone(), TestResult::new(variant.clone()));
            info!(variant = %variant, traffic = %format!("{:.1}%", ratio * 100.0), "variant registered");
        }

        Ok(())
    }

    /// Append a trade to its variant and refresh the running stats.
    pub fn record_trade(&self, trade: TradeRecord) {
        let mut results = self.results.write().unwrap();
        let Some(result) = results.get_mut(&trade.variant) else {
            warn!(variant = %trade.variant, "trade for unregistered variant dropped");
            return;
        };

        result.pnl += trade.pnl;
        result.trades.push(trade);
        result.sample_count += 1;

        let wins = result.trades.iter().filter(|t| t.pnl > 0.0).count();
        result.win_rate = wins as f64 / result.sample_count as f64;
        result.avg_return_per_trade = result.pnl / result.sample_count as f64;

        debug!(
            variant = %result.variant,
            samples = result.sample_count,
            pnl = result.pnl,
            win_rate = %format!("{:.1}%", result.win_rate * 100.0),
            "trade recorded"
        );
    }

    /// Recompute Sharpe ratio and max drawdown for every variant.
    pub fn calculate_metrics(&self) {
        let mut results = self.results.write().unwrap();
        for result in results.values_mut() {
            if result.trades.is_empty() {
                continue;
            }
            let pnls: Vec<f64> = result.trades.iter().map(|t| t.pnl).collect();
            result.sharpe_ratio = sharpe_ratio(&pnls);
            result.max_drawdown = max_drawdown(&pnls);
        }
    }

    /// Two-sample t-test between the first two registered variants.
    ///
    /// Returns `None` with fewer than two variants or when either has no
    /// trades.
    pub fn statistical_test(&self) -> Option<StatisticalTest> {
        let results = self.results.read().unwrap();

        let mut variants: Vec<&String> = results.keys().collect();
        variants.sort();
        if variants.len() < 2 {
            warn!("statistical test needs at least two variants");
            return None;
        }

        let first = &results[variants[0]];
        let second = &results[variants[1]];
        if first.trades.is_empty() || second.trades.is_empty() {
            warn!("statistical test needs samples in both variants");
            return None;
        }

        let pnls_1: Vec<f64> = first.trades.iter().map(|t| t.pnl).collect();
        let pnls_2: Vec<f64> = second.trades.iter().map(|t| t.pnl).collect();

        let mean_difference = mean(&pnls_2) - mean(&pnls_1);
        let standard_error = standard_error(&pnls_1, &pnls_2);
        let t_statistic = if standard_error > 0.0 {
            mean_difference / standard_error
        } else {
            0.0
        };

        Some(StatisticalTest {
            variant_1: first.variant.clone(),
            variant_2: second.variant.clone(),
            mean_difference,
            t_statistic,
            is_significant: t_statistic.abs() > 1.96,
            p_value: 0.05,
        })
    }

    /// Finalize all variants, mark winners, and return the results.
    pub fn complete_test(&self) -> (Option<StatisticalTest>, Vec<TestResult>) {
        self.calculate_metrics();
        let test = self.statistical_test();

        let mut results = self.results.write().unwrap();
        let now = Utc::now();
        if let Some(test) = &test {
            if test.mean_difference > 0.0 {
                if let Some(winner) = results.get_mut(&test.variant_2) {
                    winner.is_winner = true;
                    winner.significantly_better = test.is_significant;
                }
            }
        }
        for result in results.values_mut() {
            result.end_time = Some(now);
        }

        let mut finalized: Vec<TestResult> = results.values().cloned().collect();
        finalized.sort_by(|a, b| a.variant.cmp(&b.variant));

        info!(
            test_id = %self.test_id,
            elapsed_secs = (now - self.start_time).num_seconds(),
            variants = finalized.len(),
            "A/B test completed"
        );

        (test, finalized)
    }

    /// Result snapshot for one variant.
    pub fn result_for(&self, variant: &str) -> Option<TestResult> {
        self.results.read().unwrap().get(variant).cloned()
    }
}

/// Pick a variant by cumulative sampling over the split map.
pub fn select_variant(traffic_split: &HashMap<String, f64>) -> String {
    let roll: f64 = rand::thread_rng().gen();

    let mut cumulative = 0.0;
    for (variant, ratio) in traffic_split {
        cumulative += ratio;
        if roll <= cumulative {
            return variant.clone();
        }
    }

    traffic_split
        .keys()
        .next()
        .cloned()
        .unwrap_or_else(|| "baseline".to_string())
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64
}

/// Sharpe ratio over per-trade returns with a zero risk-free rate.
/// Zero when the deviation is zero or there are fewer than two samples.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std_dev = sample_variance(returns).sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }
    mean(returns) / std_dev
}

/// Maximum drawdown over the cumulative sum of returns, as a fraction of
/// the running peak.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = 0.0;
    let mut max_dd = 0.0;

    for r in returns {
        cumulative += r;
        if cumulative > peak {
            peak = cumulative;
        }
        if peak > 0.0 {
            let dd = (peak - cumulative) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}

fn standard_error(sample_1: &[f64], sample_2: &[f64]) -> f64 {
    let n1 = sample_1.len() as f64;
    let n2 = sample_2.len() as f64;
    if n1 + n2 <= 2.0 {
        return 0.0;
    }
    (sample_variance(sample_1) / n1 + sample_variance(sample_2) / n2).sqrt()
}
