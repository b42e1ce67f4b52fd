use std::collections::HashMap;

use tracing::info;

use super::types::{Action, Decision, PositionInfo, PositionSide};

/// Deduplicate and sanity-check a decision batch against live positions
/// and the per-direction cooldown map.
///
/// Rules, applied in order:
/// 1. Per `(symbol, action)`, keep only the highest-confidence decision.
/// 2. When a symbol carries both an open and a close, drop the opens.
/// 3. Drop opens on symbols that already have a live position, either side.
/// 4. Drop opens still inside the post-close cooldown for their direction.
/// 5. Drop closes with no matching position.
///
/// Every rejection is logged with its symbol, action and reason. Returns
/// the surviving decisions in input order plus the filtered count.
pub fn validate_and_deduplicate(
    decisions: Vec<Decision>,
    positions: &[PositionInfo],
    last_close_time: &HashMap<String, i64>,
    cooldown_minutes: u32,
    now_ms: i64,
) -> (Vec<Decision>, usize) {
    if decisions.is_empty() {
        return (decisions, 0);
    }

    let mut filtered_count = 0usize;

    let held: HashMap<&str, PositionSide> = positions
        .iter()
        .map(|p| (p.symbol.as_str(), p.side))
        .collect();

    // Step 1: collapse duplicates per (symbol, action) by confidence,
    // preserving first-seen order.
    let mut kept: Vec<Decision> = Vec::with_capacity(decisions.len());
    let mut index_by_key: HashMap<(String, Action), usize> = HashMap::new();
    for decision in decisions {
        let key = (decision.symbol.clone(), decision.action);
        match index_by_key.get(&key) {
            Some(&index) => {
                filtered_count += 1;
                if decision.confidence > kept[index].confidence {
                    log_rejection(&kept[index], "duplicate with lower confidence");
                    kept[index] = decision;
                } else {
                    log_rejection(&decision, "duplicate with lower confidence");
                }
            }
            None => {
                index_by_key.insert(key, kept.len());
                kept.push(decision);
            }
        }
    }

    // Step 2: open/close conflicts on one symbol resolve in favor of the
    // close.
    let mut has_close: HashMap<String, bool> = HashMap::new();
    for decision in &kept {
        if decision.action.is_close() {
            has_close.insert(decision.symbol.clone(), true);
        }
    }
    kept.retain(|decision| {
        if decision.action.is_open() && has_close.contains_key(&decision.symbol) {
            filtered_count += 1;
            log_rejection(decision, "open conflicts with close on the same symbol");
            return false;
        }
        true
    });

    // Opposing directions on one symbol (open_long vs open_short, or
    // close_long vs close_short): keep the higher-confidence one.
    let mut best_open: HashMap<String, (usize, u8)> = HashMap::new();
    let mut best_close: HashMap<String, (usize, u8)> = HashMap::new();
    for (index, decision) in kept.iter().enumerate() {
        let best = if decision.action.is_open() {
            &mut best_open
        } else if decision.action.is_close() {
            &mut best_close
        } else {
            continue;
        };
        match best.get(&decision.symbol) {
            Some(&(_, confidence)) if confidence >= decision.confidence => {}
            _ => {
                best.insert(decision.symbol.clone(), (index, decision.confidence));
            }
        }
    }
    {
        let mut index = 0;
        kept.retain(|decision| {
            let keep = if decision.action.is_open() {
                best_open.get(&decision.symbol).map(|&(best, _)| best) == Some(index)
            } else if decision.action.is_close() {
                best_close.get(&decision.symbol).map(|&(best, _)| best) == Some(index)
            } else {
                true
            };
            if !keep {
                filtered_count += 1;
                log_rejection(decision, "opposing direction with lower confidence");
            }
            index += 1;
            keep
        });
    }

    // Steps 3-5: position conflicts, cooldowns, closes without positions.
    let cooldown_ms = i64::from(cooldown_minutes) * 60_000;
    kept.retain(|decision| {
        match decision.action {
            Action::OpenLong | Action::OpenShort => {
                if let Some(side) = held.get(decision.symbol.as_str()) {
                    filtered_count += 1;
                    log_rejection(
                        decision,
                        &format!("already holding a {} position", side),
                    );
                    return false;
                }

                if let Some(counterpart) = decision.action.cooldown_counterpart() {
                    let key = format!("{}|{}", decision.symbol, counterpart.as_str());
                    if let Some(&close_time) = last_close_time.get(&key) {
                        let since = now_ms - close_time;
                        if since < cooldown_ms {
                            filtered_count += 1;
                            log_rejection(
                                decision,
                                &format!(
                                    "cooldown: closed {} min ago, must wait {} min",
                                    since / 60_000,
                                    cooldown_minutes
                                ),
                            );
                            return false;
                        }
                    }
                }
                true
            }
            Action::CloseLong | Action::CloseShort => {
                if !held.contains_key(decision.symbol.as_str()) {
                    filtered_count += 1;
                    log_rejection(decision, "no position to close");
                    return false;
                }
                true
            }
            Action::Hold | Action::Wait => true,
        }
    });

    (kept, filtered_count)
}

fn log_rejection(decision: &Decision, reason: &str) {
    info!(
        symbol = %decision.symbol,
        action = %decision.action,
        reason,
        "decision filtered"
    );
}
