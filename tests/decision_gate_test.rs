//! Integration tests for the validation and deduplication gate.
//!
//! Pins the concrete scenarios the gate must satisfy: confidence-based
//! deduplication, open/close conflict resolution, cooldown blocking, and
//! the per-direction cooldown asymmetry.

use std::collections::HashMap;

use chrono::Utc;

use nofx_core::decision::{
    validate_and_deduplicate, Action, Decision, PositionInfo, PositionSide,
};

fn open(symbol: &str, action: Action, confidence: u8) -> Decision {
    Decision {
        symbol: symbol.to_string(),
        action,
        leverage: 5.0,
        position_size_usd: 1000.0,
        stop_loss: 90.0,
        take_profit: 130.0,
        confidence,
        risk_usd: 50.0,
        reasoning: "integration".to_string(),
    }
}

fn close(symbol: &str, action: Action, confidence: u8) -> Decision {
    Decision {
        symbol: symbol.to_string(),
        action,
        leverage: 0.0,
        position_size_usd: 0.0,
        stop_loss: 0.0,
        take_profit: 0.0,
        confidence,
        risk_usd: 0.0,
        reasoning: "integration".to_string(),
    }
}

fn position(symbol: &str, side: PositionSide) -> PositionInfo {
    PositionInfo {
        symbol: symbol.to_string(),
        side,
        entry_price: 100.0,
        mark_price: 101.0,
        quantity: 1.0,
        leverage: 5,
        unrealized_pnl_pct: 1.0,
        liquidation_price: 80.0,
        margin_used: 20.0,
        update_time_ms: 0,
    }
}

#[tokio::test]
async fn dedup_by_confidence_keeps_the_stronger_decision() {
    let decisions = vec![
        open("BTCUSDT", Action::OpenLong, 80),
        open("BTCUSDT", Action::OpenLong, 60),
    ];

    let (kept, filtered) = validate_and_deduplicate(
        decisions,
        &[],
        &HashMap::new(),
        15,
        Utc::now().timestamp_millis(),
    );

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].symbol, "BTCUSDT");
    assert_eq!(kept[0].action, Action::OpenLong);
    assert_eq!(kept[0].confidence, 80);
    assert_eq!(filtered, 1);
}

#[tokio::test]
async fn open_close_conflict_resolves_to_the_close() {
    let decisions = vec![
        open("ETHUSDT", Action::OpenLong, 90),
        close("ETHUSDT", Action::CloseLong, 70),
    ];
    let positions = vec![position("ETHUSDT", PositionSide::Long)];

    let (kept, filtered) = validate_and_deduplicate(
        decisions,
        &positions,
        &HashMap::new(),
        15,
        Utc::now().timestamp_millis(),
    );

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].action, Action::CloseLong);
    assert_eq!(filtered, 1);
}

#[tokio::test]
async fn cooldown_blocks_reentry_within_the_window() {
    let now = Utc::now().timestamp_millis();
    let mut last_close = HashMap::new();
    last_close.insert("SOLUSDT|close_short".to_string(), now - 5 * 60_000);

    let (kept, filtered) = validate_and_deduplicate(
        vec![open("SOLUSDT", Action::OpenShort, 90)],
        &[],
        &last_close,
        15,
        now,
    );

    assert!(kept.is_empty());
    assert_eq!(filtered, 1);
}

#[tokio::test]
async fn cooldown_is_keyed_per_direction() {
    // The cooldown key is (symbol, closed direction): a recent close_long
    // blocks open_long but leaves open_short free, and vice versa. This
    // asymmetry is intentional behavior to preserve.
    let now = Utc::now().timestamp_millis();
    let mut last_close = HashMap::new();
    last_close.insert("SOLUSDT|close_long".to_string(), now - 5 * 60_000);

    let (kept, filtered) = validate_and_deduplicate(
        vec![open("SOLUSDT", Action::OpenLong, 90)],
        &[],
        &last_close,
        15,
        now,
    );
    assert!(kept.is_empty());
    assert_eq!(filtered, 1);

    let (kept, filtered) = validate_and_deduplicate(
        vec![open("SOLUSDT", Action::OpenShort, 90)],
        &[],
        &last_close,
        15,
        now,
    );
    assert_eq!(kept.len(), 1);
    assert_eq!(filtered, 0);
}

#[tokio::test]
async fn opens_on_held_symbols_are_rejected_regardless_of_side() {
    let positions = vec![
        position("BTCUSDT", PositionSide::Long),
        position("ETHUSDT", PositionSide::Short),
    ];

    let decisions = vec![
        open("BTCUSDT", Action::OpenLong, 90),
        open("BTCUSDT", Action::OpenShort, 85),
        open("ETHUSDT", Action::OpenLong, 80),
    ];

    let (kept, filtered) = validate_and_deduplicate(
        decisions,
        &positions,
        &HashMap::new(),
        15,
        Utc::now().timestamp_millis(),
    );

    assert!(kept.is_empty());
    assert_eq!(filtered, 3);
}

#[tokio::test]
async fn gate_output_invariants_hold_for_a_noisy_batch() {
    let now = Utc::now().timestamp_millis();
    let positions = vec![position("ETHUSDT", PositionSide::Long)];
    let mut last_close = HashMap::new();
    last_close.insert("SOLUSDT|close_long".to_string(), now - 2 * 60_000);

    let decisions = vec![
        open("BTCUSDT", Action::OpenLong, 75),
        open("BTCUSDT", Action::OpenLong, 92),
        open("BTCUSDT", Action::OpenShort, 40),
        open("ETHUSDT", Action::OpenShort, 88),
        close("ETHUSDT", Action::CloseLong, 65),
        open("SOLUSDT", Action::OpenLong, 99),
        close("ADAUSDT", Action::CloseShort, 55),
        close("BTCUSDT", Action::Hold, 0),
    ];

    let (kept, filtered) = validate_and_deduplicate(decisions, &positions, &last_close, 15, now);
    assert!(filtered > 0);

    let mut open_count: HashMap<&str, u32> = HashMap::new();
    let mut close_count: HashMap<&str, u32> = HashMap::new();
    let held = ["ETHUSDT"];

    for decision in &kept {
        if decision.action.is_open() {
            *open_count.entry(decision.symbol.as_str()).or_insert(0) += 1;
            // No open targets a held symbol.
            assert!(!held.contains(&decision.symbol.as_str()));
            // No open inside its direction's cooldown window.
            let key = format!(
                "{}|{}",
                decision.symbol,
                decision.action.cooldown_counterpart().unwrap().as_str()
            );
            if let Some(close_time) = last_close.get(&key) {
                assert!(now - close_time >= 15 * 60_000);
            }
        } else if decision.action.is_close() {
            *close_count.entry(decision.symbol.as_str()).or_insert(0) += 1;
        }
    }

    for (symbol, count) in &open_count {
        assert_eq!(*count, 1, "more than one open for {}", symbol);
        assert!(
            !close_count.contains_key(symbol),
            "{} has both an open and a close",
            symbol
        );
    }
    for count in close_count.values() {
        assert_eq!(*count, 1);
    }

    // The ETH close survives; the ADA close (no position) does not.
    assert!(kept
        .iter()
        .any(|d| d.symbol == "ETHUSDT" && d.action == Action::CloseLong));
    assert!(!kept.iter().any(|d| d.symbol == "ADAUSDT"));
}

#[tokio::test]
async fn empty_batch_passes_through() {
    let (kept, filtered) = validate_and_deduplicate(
        Vec::new(),
        &[],
        &HashMap::new(),
        15,
        Utc::now().timestamp_millis(),
    );
    assert!(kept.is_empty());
    assert_eq!(filtered, 0);
}
