use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{DecisionError, DecisionResult};
use crate::model::LanguageModel;
use crate::resilience::{CircuitBreaker, CircuitCallError};

use super::gate::validate_and_deduplicate;
use super::prompts::{build_system_prompt_with_custom, build_user_prompt};
use super::types::{Action, Context, Decision, FullDecision, MarketDataProvider};

/// Liquidity floor: non-held symbols below this open-interest notional
/// are not traded, long or short.
const MIN_OI_NOTIONAL_USD: f64 = 15_000_000.0;

/// Risk-reward floor every open must clear.
const MIN_RISK_REWARD: f64 = 3.0;

/// The decision engine: one call runs a full cycle from market-data prep
/// through prompt assembly, the model call, parsing, validation and the
/// deduplication gate.
///
/// The engine issues at most one in-flight model call per cycle; cycle
/// frequency is externally driven.
pub struct DecisionEngine {
    model: Arc<dyn LanguageModel>,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
}

impl DecisionEngine {
    /// Create an engine over a model and its breaker.
    pub fn new(model: Arc<dyn LanguageModel>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            model,
            breaker,
            max_retries: 1,
        }
    }

    /// Retry transient model errors up to `max_retries` attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Run one cycle with the default template and no user override.
    pub async fn full_decision(
        &self,
        ctx: &mut Context,
        provider: Arc<dyn MarketDataProvider>,
    ) -> DecisionResult<FullDecision> {
        self.full_decision_with_custom_prompt(ctx, provider, "", false, "")
            .await
    }

    /// Run one cycle with a named template and an optional per-user
    /// override prompt that either appends to or replaces the base.
    pub async fn full_decision_with_custom_prompt(
        &self,
        ctx: &mut Context,
        provider: Arc<dyn MarketDataProvider>,
        custom_prompt: &str,
        override_base: bool,
        template_name: &str,
    ) -> DecisionResult<FullDecision> {
        self.prepare_market_data(ctx, provider).await;
        if ctx.market_data.is_empty() {
            return Err(DecisionError::NoMarketData);
        }

        let system_prompt = build_system_prompt_with_custom(
            ctx.account.total_equity,
            ctx.btc_eth_leverage,
            ctx.altcoin_leverage,
            custom_prompt,
            override_base,
            template_name,
        );
        let user_prompt = build_user_prompt(ctx);

        let response = self.call_model(&system_prompt, &user_prompt).await?;

        let cot_trace = extract_cot_trace(&response);
        let decisions = match extract_decisions(&response) {
            Ok(decisions) => decisions,
            Err(message) => {
                warn!(error = %message, "failed to parse model decisions, returning CoT only");
                return Ok(FullDecision {
                    system_prompt,
                    user_prompt,
                    cot_trace,
                    decisions: Vec::new(),
                    timestamp: Utc::now(),
                });
            }
        };

        // Per-decision hard validation; a bad decision is dropped, never
        // the batch.
        let mut valid = Vec::with_capacity(decisions.len());
        for decision in decisions {
            match validate_decision(
                &decision,
                ctx.account.total_equity,
                ctx.btc_eth_leverage,
                ctx.altcoin_leverage,
            ) {
                Ok(()) => valid.push(decision),
                Err(reason) => {
                    warn!(
                        symbol = %decision.symbol,
                        action = %decision.action,
                        reason = %reason,
                        "decision rejected by validation"
                    );
                }
            }
        }

        let before = valid.len();
        let (survivors, filtered) = validate_and_deduplicate(
            valid,
            &ctx.positions,
            &ctx.last_close_time,
            ctx.effective_cooldown_minutes(),
            ctx.current_time.timestamp_millis(),
        );
        if filtered > 0 {
            info!(
                input = before,
                output = survivors.len(),
                filtered,
                "decision gate completed"
            );
        }

        Ok(FullDecision {
            system_prompt,
            user_prompt,
            cot_trace,
            decisions: survivors,
            timestamp: Utc::now(),
        })
    }

    /// Populate the context's market data: the union of held symbols and
    /// every candidate, fetched concurrently. Non-held symbols below the
    /// 15M USD open-interest notional floor are dropped; held symbols are
    /// always kept because they still need a close decision.
    async fn prepare_market_data(&self, ctx: &mut Context, provider: Arc<dyn MarketDataProvider>) {
        let held: HashSet<String> = ctx.positions.iter().map(|p| p.symbol.clone()).collect();

        let mut symbols: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for position in &ctx.positions {
            if seen.insert(position.symbol.clone()) {
                symbols.push(position.symbol.clone());
            }
        }
        for coin in &ctx.candidate_coins {
            if seen.insert(coin.symbol.clone()) {
                symbols.push(coin.symbol.clone());
            }
        }

        let mut handles = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move {
                let data = provider.get(&symbol).await;
                (symbol, data)
            }));
        }

        ctx.market_data.clear();
        for handle in handles {
            let Ok((symbol, Some(data))) = handle.await else {
                continue;
            };

            if !held.contains(&symbol) {
                if let Some(oi) = data.open_interest_latest {
                    if data.current_price > 0.0 {
                        let notional = oi * data.current_price;
                        if notional < MIN_OI_NOTIONAL_USD {
                            debug!(
                                symbol = %symbol,
                                notional_musd = notional / 1_000_000.0,
                                "symbol below liquidity floor, skipped"
                            );
                            continue;
                        }
                    }
                }
            }

            ctx.market_data.insert(symbol, data);
        }
    }

    async fn call_model(&self, system_prompt: &str, user_prompt: &str) -> DecisionResult<String> {
        let result = self
            .breaker
            .wrapped_call(
                || self.model.call(system_prompt, user_prompt),
                self.max_retries,
            )
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(CircuitCallError::Open { remaining_secs }) => {
                Err(DecisionError::CircuitOpen { remaining_secs })
            }
            Err(CircuitCallError::Inner(e)) => {
                if e.message.to_lowercase().contains("insufficient balance") {
                    warn!(
                        provider = %self.model.info().provider,
                        "AI provider balance exhausted; check the account or switch models"
                    );
                    return Err(DecisionError::InsufficientBalance { message: e.message });
                }
                Err(DecisionError::ModelCall(e))
            }
        }
    }
}

/// The free text preceding the first `[` of the model response. When no
/// array is present the whole response is the trace.
pub fn extract_cot_trace(response: &str) -> String {
    match response.find('[') {
        Some(start) if start > 0 => response[..start].trim().to_string(),
        Some(_) => String::new(),
        None => response.trim().to_string(),
    }
}

/// The JSON decision array embedded in the model response.
///
/// Finds the first `[`, matches its closing bracket by depth, normalizes
/// typographic quotes, and parses. The engine never assumes the whole
/// response is strict JSON.
pub fn extract_decisions(response: &str) -> Result<Vec<Decision>, String> {
    let start = response
        .find('[')
        .ok_or_else(|| "no JSON array start found".to_string())?;
    let end = find_matching_bracket(response, start)
        .ok_or_else(|| "no matching JSON array end found".to_string())?;

    let json = normalize_quotes(response[start..=end].trim());

    serde_json::from_str::<Vec<Decision>>(&json)
        .map_err(|e| format!("JSON parse failed: {} in {}", e, json))
}

/// Replace typographic quotes (often introduced by IME auto-conversion)
/// with their ASCII forms.
fn normalize_quotes(json: &str) -> String {
    json.replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

fn find_matching_bracket(s: &str, start: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.get(start) != Some(&b'[') {
        return None;
    }

    let mut depth = 0i32;
    for (offset, byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Hard validation of a single decision against the account's sizing and
/// leverage rules.
///
/// Opens must respect the per-class leverage cap and position-value
/// ceiling (10x equity for BTC/ETH, 1.5x for altcoins, 1% tolerance),
/// carry positive protective levels with the right directional ordering,
/// and clear a 3:1 risk-reward ratio computed from a synthetic entry 20%
/// of the way from stop to take-profit.
pub fn validate_decision(
    decision: &Decision,
    account_equity: f64,
    btc_eth_leverage: u32,
    altcoin_leverage: u32,
) -> Result<(), String> {
    if !decision.action.is_open() {
        return Ok(());
    }

    let is_majors = decision.symbol == "BTCUSDT" || decision.symbol == "ETHUSDT";
    let max_leverage = if is_majors {
        f64::from(btc_eth_leverage)
    } else {
        f64::from(altcoin_leverage)
    };
    let max_position_value = if is_majors {
        account_equity * 10.0
    } else {
        account_equity * 1.5
    };

    if decision.leverage <= 0.0 || decision.leverage > max_leverage {
        return Err(format!(
            "leverage must be in (0, {:.0}] for {}: {:.1}",
            max_leverage, decision.symbol, decision.leverage
        ));
    }
    if decision.position_size_usd <= 0.0 {
        return Err(format!(
            "position size must be positive: {:.2}",
            decision.position_size_usd
        ));
    }
    let tolerance = max_position_value * 0.01;
    if decision.position_size_usd > max_position_value + tolerance {
        return Err(format!(
            "position value {:.0} exceeds the {:.0} USDT ceiling for {}",
            decision.position_size_usd, max_position_value, decision.symbol
        ));
    }
    if decision.stop_loss <= 0.0 || decision.take_profit <= 0.0 {
        return Err("stop loss and take profit must be positive".to_string());
    }

    match decision.action {
        Action::OpenLong if decision.stop_loss >= decision.take_profit => {
            return Err("long requires stop loss below take profit".to_string());
        }
        Action::OpenShort if decision.stop_loss <= decision.take_profit => {
            return Err("short requires stop loss above take profit".to_string());
        }
        _ => {}
    }

    // Synthetic entry 20% of the way from stop toward take-profit; a
    // validation heuristic, not a fill price.
    let (entry, risk_pct, reward_pct) = if decision.action == Action::OpenLong {
        let entry = decision.stop_loss + (decision.take_profit - decision.stop_loss) * 0.2;
        (
            entry,
            (entry - decision.stop_loss) / entry * 100.0,
            (decision.take_profit - entry) / entry * 100.0,
        )
    } else {
        let entry = decision.stop_loss - (decision.stop_loss - decision.take_profit) * 0.2;
        (
            entry,
            (decision.stop_loss - entry) / entry * 100.0,
            (entry - decision.take_profit) / entry * 100.0,
        )
    };

    let risk_reward = if risk_pct > 0.0 {
        reward_pct / risk_pct
    } else {
        0.0
    };
    if risk_reward < MIN_RISK_REWARD {
        return Err(format!(
            "risk-reward {:.2}:1 below the {:.1}:1 floor [risk {:.2}% reward {:.2}% entry {:.2}]",
            risk_reward, MIN_RISK_REWARD, risk_pct, reward_pct, entry
        ));
    }

    Ok(())
}
