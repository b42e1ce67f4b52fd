use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trading action proposed by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Open a long position
    OpenLong,
    /// Open a short position
    OpenShort,
    /// Close an existing long
    CloseLong,
    /// Close an existing short
    CloseShort,
    /// Keep current positions as they are
    Hold,
    /// Stay out of the market
    Wait,
}

impl Action {
    /// String form matching the wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::OpenLong => "open_long",
            Action::OpenShort => "open_short",
            Action::CloseLong => "close_long",
            Action::CloseShort => "close_short",
            Action::Hold => "hold",
            Action::Wait => "wait",
        }
    }

    /// Whether the action opens a position.
    pub fn is_open(&self) -> bool {
        matches!(self, Action::OpenLong | Action::OpenShort)
    }

    /// Whether the action closes a position.
    pub fn is_close(&self) -> bool {
        matches!(self, Action::CloseLong | Action::CloseShort)
    }

    /// The close action whose cooldown gates this open (`open_long` is
    /// blocked only by a recent `close_long`, never by a `close_short`).
    pub fn cooldown_counterpart(&self) -> Option<Action> {
        match self {
            Action::OpenLong => Some(Action::CloseLong),
            Action::OpenShort => Some(Action::CloseShort),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One trading action proposal.
///
/// Opens carry full sizing and protective levels; closes only need the
/// symbol, action and reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Trading pair, e.g. `BTCUSDT`
    pub symbol: String,
    /// Proposed action
    pub action: Action,
    /// Leverage multiplier (opens only)
    #[serde(default)]
    pub leverage: f64,
    /// Notional position value in USD (opens only)
    #[serde(default)]
    pub position_size_usd: f64,
    /// Stop-loss price (opens only)
    #[serde(default)]
    pub stop_loss: f64,
    /// Take-profit price (opens only)
    #[serde(default)]
    pub take_profit: f64,
    /// Model confidence 0-100
    #[serde(default)]
    pub confidence: u8,
    /// Maximum dollar risk (opens only)
    #[serde(default)]
    pub risk_usd: f64,
    /// The model's stated rationale
    #[serde(default)]
    pub reasoning: String,
}

/// The pipeline's unit of output: verbatim prompts, the model's free-text
/// reasoning, and the surviving decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullDecision {
    /// System prompt exactly as sent, kept for audit
    pub system_prompt: String,
    /// User prompt exactly as sent, kept for audit
    pub user_prompt: String,
    /// Free-text reasoning preceding the JSON array
    pub cot_trace: String,
    /// Decisions that survived validation and deduplication
    pub decisions: Vec<Decision>,
    /// When the cycle completed
    pub timestamp: DateTime<Utc>,
}

/// Live position state read back from the trader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    /// Trading pair
    pub symbol: String,
    /// `long` or `short`
    pub side: PositionSide,
    /// Average entry price
    pub entry_price: f64,
    /// Current mark price
    pub mark_price: f64,
    /// Position quantity in base units
    pub quantity: f64,
    /// Leverage multiplier
    pub leverage: u32,
    /// Unrealized profit as a percentage
    pub unrealized_pnl_pct: f64,
    /// Liquidation price
    pub liquidation_price: f64,
    /// Margin locked by this position
    pub margin_used: f64,
    /// Last position update, unix milliseconds
    pub update_time_ms: i64,
}

/// Direction of a held position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    /// Long exposure
    Long,
    /// Short exposure
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Account snapshot fed into each cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Net account value in USD
    pub total_equity: f64,
    /// Free balance in USD
    pub available_balance: f64,
    /// Absolute total profit and loss
    pub total_pnl: f64,
    /// Total profit and loss as a percentage
    pub total_pnl_pct: f64,
    /// Margin currently locked
    pub margin_used: f64,
    /// Margin utilization as a percentage
    pub margin_used_pct: f64,
    /// Number of open positions
    pub position_count: usize,
}

/// Where a candidate symbol came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Scored by the AI-500 ranking
    Ai500,
    /// Flagged by open-interest growth
    OiTop,
}

/// A candidate symbol from the coin pool, pre-ranked upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateCoin {
    /// Trading pair
    pub symbol: String,
    /// Signals that nominated it
    pub sources: Vec<SourceTag>,
}

/// Open-interest growth figures for a symbol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OiTopData {
    /// Rank by open-interest growth
    pub rank: u32,
    /// One-hour open-interest change as a percentage
    pub oi_delta_percent: f64,
    /// One-hour open-interest change in USD
    pub oi_delta_value: f64,
    /// Price change over the same window
    pub price_delta_percent: f64,
    /// Net long exposure
    pub net_long: f64,
    /// Net short exposure
    pub net_short: f64,
}

/// Per-symbol indicator snapshot the engine formats into the prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketData {
    /// Last traded price
    pub current_price: f64,
    /// One-hour price change as a percentage
    pub price_change_1h: f64,
    /// Four-hour price change as a percentage
    pub price_change_4h: f64,
    /// Current MACD value
    pub current_macd: f64,
    /// Current 7-period RSI
    pub current_rsi7: f64,
    /// Latest open interest in base units, when available
    pub open_interest_latest: Option<f64>,
    /// Funding rate, when available
    pub funding_rate: Option<f64>,
}

/// Historical performance summary injected into the user prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Total closed trades
    pub total_trades: u32,
    /// Win rate as a percentage
    pub win_rate: f64,
    /// Sharpe ratio
    pub sharpe_ratio: f64,
    /// Maximum drawdown as a percentage
    pub max_drawdown_percent: f64,
    /// Current consecutive losses
    pub consecutive_losses: u32,
    /// Worst consecutive-loss streak seen
    pub max_consecutive_losses: u32,
    /// Return volatility as a percentage
    pub volatility: f64,
    /// Recency-weighted win rate as a percentage
    pub weighted_win_rate: f64,
    /// Gross profit over gross loss
    pub profit_factor: f64,
    /// Mean percentage gain per winning trade
    pub average_profit_per_win: f64,
    /// Mean percentage loss per losing trade
    pub average_loss_per_loss: f64,
    /// Realized risk-reward ratio
    pub risk_reward_ratio: f64,
    /// Best-performing pair
    pub best_performing_pair: String,
    /// Worst-performing pair
    pub worst_performing_pair: String,
    /// Hour of day (0-23) with the best results
    pub best_trading_hour: i32,
}

/// The inputs one decision cycle consumes.
///
/// Each cycle owns a fresh instance; shared services (caches, breaker,
/// metrics, stage manager) live outside it.
#[derive(Debug, Clone)]
pub struct Context {
    /// Wall-clock time of the cycle
    pub current_time: DateTime<Utc>,
    /// Monotonic cycle counter
    pub call_count: u64,
    /// Minutes since the trader started
    pub runtime_minutes: u64,
    /// Account snapshot
    pub account: AccountInfo,
    /// Currently held positions
    pub positions: Vec<PositionInfo>,
    /// Candidate symbols, pre-ranked upstream
    pub candidate_coins: Vec<CandidateCoin>,
    /// Indicator snapshots per symbol, populated by the engine
    pub market_data: HashMap<String, MarketData>,
    /// Open-interest growth data per symbol
    pub oi_top_data: HashMap<String, OiTopData>,
    /// Historical performance, when available
    pub performance: Option<PerformanceSummary>,
    /// Leverage cap for BTC and ETH
    pub btc_eth_leverage: u32,
    /// Leverage cap for everything else
    pub altcoin_leverage: u32,
    /// `"SYMBOL|close_long"` / `"SYMBOL|close_short"` to unix ms of the
    /// last close, for the per-direction cooldown
    pub last_close_time: HashMap<String, i64>,
    /// Post-close cooldown in minutes (0 means the 15-minute default)
    pub cooldown_minutes: u32,
    /// Free-form extensions such as the news block
    pub extensions: HashMap<String, serde_json::Value>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            current_time: Utc::now(),
            call_count: 0,
            runtime_minutes: 0,
            account: AccountInfo::default(),
            positions: Vec::new(),
            candidate_coins: Vec::new(),
            market_data: HashMap::new(),
            oi_top_data: HashMap::new(),
            performance: None,
            btc_eth_leverage: 10,
            altcoin_leverage: 5,
            last_close_time: HashMap::new(),
            cooldown_minutes: 15,
            extensions: HashMap::new(),
        }
    }
}

impl Context {
    /// Effective cooldown: the configured minutes, or 15 when unset.
    pub fn effective_cooldown_minutes(&self) -> u32 {
        if self.cooldown_minutes == 0 {
            15
        } else {
            self.cooldown_minutes
        }
    }

    /// Attach an extension value.
    pub fn set_extension(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extensions.insert(key.into(), value);
    }

    /// Read an extension value.
    pub fn get_extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }
}

/// Source of per-symbol market data. Fetchers live outside the core; the
/// engine only depends on this capability.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch the indicator snapshot for a symbol; `None` when unavailable.
    async fn get(&self, symbol: &str) -> Option<MarketData>;
}

/// Static provider over a prebuilt map, for tests and replay.
#[derive(Default)]
pub struct StaticMarketData {
    data: HashMap<String, MarketData>,
}

impl StaticMarketData {
    /// Build a provider from `(symbol, data)` pairs.
    pub fn new(entries: Vec<(String, MarketData)>) -> Self {
        Self {
            data: entries.into_iter().collect(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for StaticMarketData {
    async fn get(&self, symbol: &str) -> Option<MarketData> {
        self.data.get(symbol).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serde_round_trip() {
        for action in [
            Action::OpenLong,
            Action::OpenShort,
            Action::CloseLong,
            Action::CloseShort,
            Action::Hold,
            Action::Wait,
        ] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
            let back: Action = serde_json::from_str(&json).unwrap();
            assert_eq!(back, action);
        }
    }

    #[test]
    fn test_action_classification() {
        assert!(Action::OpenLong.is_open());
        assert!(Action::CloseShort.is_close());
        assert!(!Action::Hold.is_open());
        assert!(!Action::Wait.is_close());
    }

    #[test]
    fn test_cooldown_counterpart_is_direction_keyed() {
        assert_eq!(
            Action::OpenLong.cooldown_counterpart(),
            Some(Action::CloseLong)
        );
        assert_eq!(
            Action::OpenShort.cooldown_counterpart(),
            Some(Action::CloseShort)
        );
        assert_eq!(Action::Hold.cooldown_counterpart(), None);
    }

    #[test]
    fn test_close_decision_parses_without_sizing_fields() {
        let json = r#"{"symbol": "ETHUSDT", "action": "close_long", "reasoning": "take profit"}"#;
        let decision: Decision = serde_json::from_str(json).unwrap();
        assert_eq!(decision.action, Action::CloseLong);
        assert_eq!(decision.leverage, 0.0);
        assert_eq!(decision.confidence, 0);
    }

    #[test]
    fn test_open_decision_parses_full_fields() {
        let json = r#"{
            "symbol": "BTCUSDT", "action": "open_short", "leverage": 10,
            "position_size_usd": 5000, "stop_loss": 97000, "take_profit": 91000,
            "confidence": 85, "risk_usd": 300, "reasoning": "downtrend"
        }"#;
        let decision: Decision = serde_json::from_str(json).unwrap();
        assert_eq!(decision.action, Action::OpenShort);
        assert_eq!(decision.leverage, 10.0);
        assert_eq!(decision.confidence, 85);
    }

    #[test]
    fn test_effective_cooldown_defaults_to_fifteen() {
        let mut ctx = Context::default();
        ctx.cooldown_minutes = 0;
        assert_eq!(ctx.effective_cooldown_minutes(), 15);
        ctx.cooldown_minutes = 30;
        assert_eq!(ctx.effective_cooldown_minutes(), 30);
    }

    #[test]
    fn test_context_extensions() {
        let mut ctx = Context::default();
        ctx.set_extension("news", serde_json::json!({"enabled": true}));
        assert!(ctx.get_extension("news").is_some());
        assert!(ctx.get_extension("social").is_none());
    }

    #[tokio::test]
    async fn test_static_market_data_provider() {
        let provider = StaticMarketData::new(vec![(
            "BTCUSDT".to_string(),
            MarketData {
                current_price: 95_000.0,
                ..Default::default()
            },
        )]);
        assert!(provider.get("BTCUSDT").await.is_some());
        assert!(provider.get("DOGEUSDT").await.is_none());
    }
}
