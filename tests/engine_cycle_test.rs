//! End-to-end decision cycle tests with a mocked model: prompt assembly,
//! parsing, per-decision validation and the dedup gate acting together.

use std::sync::Arc;

use nofx_core::decision::{
    AccountInfo, Action, CandidateCoin, Context, DecisionEngine, MarketData, PositionInfo,
    PositionSide, SourceTag, StaticMarketData,
};
use nofx_core::error::DecisionError;
use nofx_core::model::{LanguageModel, MockModel};
use nofx_core::resilience::CircuitBreaker;

fn context_with_equity(equity: f64) -> Context {
    Context {
        account: AccountInfo {
            total_equity: equity,
            available_balance: equity * 0.9,
            ..Default::default()
        },
        candidate_coins: vec![CandidateCoin {
            symbol: "BTCUSDT".to_string(),
            sources: vec![SourceTag::Ai500],
        }],
        btc_eth_leverage: 10,
        altcoin_leverage: 5,
        ..Default::default()
    }
}

fn btc_provider() -> Arc<StaticMarketData> {
    Arc::new(StaticMarketData::new(vec![(
        "BTCUSDT".to_string(),
        MarketData {
            current_price: 95_000.0,
            price_change_1h: 0.5,
            price_change_4h: 1.2,
            current_macd: 50.0,
            current_rsi7: 55.0,
            open_interest_latest: Some(10_000.0),
            funding_rate: Some(0.0001),
        },
    )]))
}

fn engine_for(mock: &Arc<MockModel>) -> DecisionEngine {
    DecisionEngine::new(
        Arc::clone(mock) as Arc<dyn LanguageModel>,
        Arc::new(CircuitBreaker::with_defaults()),
    )
}

#[tokio::test]
async fn leverage_above_the_cap_is_rejected_and_at_the_cap_accepted() {
    // Equity 1000, btc_eth_leverage 10: leverage 15 fails, leverage 10
    // with a 10000 USDT position passes.
    let response = r#"leverage test
[
  {"symbol": "BTCUSDT", "action": "open_long", "leverage": 15, "position_size_usd": 10000, "stop_loss": 90000, "take_profit": 120000, "confidence": 90, "risk_usd": 300, "reasoning": "over-levered"},
  {"symbol": "BTCUSDT", "action": "open_short", "leverage": 10, "position_size_usd": 10000, "stop_loss": 120000, "take_profit": 90000, "confidence": 80, "risk_usd": 300, "reasoning": "within caps"}
]"#;
    let mock = Arc::new(MockModel::new());
    mock.set_response(response);
    let engine = engine_for(&mock);

    let mut ctx = context_with_equity(1000.0);
    let full = engine
        .full_decision(&mut ctx, btc_provider())
        .await
        .unwrap();

    assert_eq!(full.decisions.len(), 1);
    assert_eq!(full.decisions[0].action, Action::OpenShort);
    assert_eq!(full.decisions[0].leverage, 10.0);
}

#[tokio::test]
async fn cooldown_and_position_conflicts_apply_through_the_engine() {
    let response = r#"conflict test
[
  {"symbol": "BTCUSDT", "action": "open_long", "leverage": 10, "position_size_usd": 5000, "stop_loss": 90000, "take_profit": 120000, "confidence": 90, "risk_usd": 200, "reasoning": "held already"},
  {"symbol": "SOLUSDT", "action": "open_short", "leverage": 5, "position_size_usd": 1000, "stop_loss": 260, "take_profit": 200, "confidence": 85, "risk_usd": 50, "reasoning": "cooling down"}
]"#;
    let mock = Arc::new(MockModel::new());
    mock.set_response(response);
    let engine = engine_for(&mock);

    let mut ctx = context_with_equity(1000.0);
    ctx.positions.push(PositionInfo {
        symbol: "BTCUSDT".to_string(),
        side: PositionSide::Long,
        entry_price: 90_000.0,
        mark_price: 95_000.0,
        quantity: 0.1,
        leverage: 10,
        unrealized_pnl_pct: 5.5,
        liquidation_price: 82_000.0,
        margin_used: 900.0,
        update_time_ms: ctx.current_time.timestamp_millis() - 40 * 60_000,
    });
    ctx.candidate_coins.push(CandidateCoin {
        symbol: "SOLUSDT".to_string(),
        sources: vec![SourceTag::OiTop],
    });
    ctx.last_close_time.insert(
        "SOLUSDT|close_short".to_string(),
        ctx.current_time.timestamp_millis() - 5 * 60_000,
    );

    let provider = Arc::new(StaticMarketData::new(vec![
        (
            "BTCUSDT".to_string(),
            MarketData {
                current_price: 95_000.0,
                open_interest_latest: Some(10_000.0),
                ..Default::default()
            },
        ),
        (
            "SOLUSDT".to_string(),
            MarketData {
                current_price: 230.0,
                open_interest_latest: Some(1_000_000.0),
                ..Default::default()
            },
        ),
    ]));

    let full = engine.full_decision(&mut ctx, provider).await.unwrap();

    // The BTC open hits the held position, the SOL short hits its
    // direction's cooldown: nothing survives.
    assert!(full.decisions.is_empty());
    assert!(!full.cot_trace.is_empty());
}

#[tokio::test]
async fn prompts_are_recorded_verbatim_and_contain_the_cycle_data() {
    let mock = Arc::new(MockModel::new());
    mock.set_response("nothing actionable\n[]");
    let engine = engine_for(&mock);

    let mut ctx = context_with_equity(2500.0);
    ctx.call_count = 17;
    ctx.runtime_minutes = 340;

    let full = engine
        .full_decision(&mut ctx, btc_provider())
        .await
        .unwrap();

    let (system_sent, user_sent) = mock.last_prompts().unwrap();
    assert_eq!(full.system_prompt, system_sent);
    assert_eq!(full.user_prompt, user_sent);

    // System prompt carries the equity-parameterized sizing bands.
    assert!(full.system_prompt.contains("BTC/ETH 12500-25000 USDT (10x leverage)"));
    // User prompt carries the cycle header and candidate data.
    assert!(full.user_prompt.contains("Cycle: #17"));
    assert!(full.user_prompt.contains("Runtime: 340 minutes"));
    assert!(full.user_prompt.contains("BTC: 95000.00"));
}

#[tokio::test]
async fn breaker_open_blocks_the_cycle() {
    let mock = Arc::new(MockModel::new());
    mock.set_error(500, "upstream exploded");
    let breaker = Arc::new(CircuitBreaker::new(1, 2, std::time::Duration::from_secs(300)));
    let engine = DecisionEngine::new(
        Arc::clone(&mock) as Arc<dyn LanguageModel>,
        Arc::clone(&breaker),
    );

    // First cycle fails and trips the single-failure breaker.
    let mut ctx = context_with_equity(1000.0);
    let err = engine
        .full_decision(&mut ctx, btc_provider())
        .await
        .unwrap_err();
    assert!(matches!(err, DecisionError::ModelCall(_)));
    assert!(breaker.is_open());

    // Second cycle is rejected without reaching the model.
    let calls_before = mock.call_count();
    let mut ctx = context_with_equity(1000.0);
    let err = engine
        .full_decision(&mut ctx, btc_provider())
        .await
        .unwrap_err();
    assert!(matches!(err, DecisionError::CircuitOpen { .. }));
    assert_eq!(mock.call_count(), calls_before);
}
