use std::fmt::Write as _;

use super::news::news_from_context;
use super::types::{Context, MarketData, SourceTag};

/// Core strategy text for the default template.
pub const DEFAULT_TEMPLATE: &str = "\
You are a professional cryptocurrency futures trading AI. You analyze \
technical indicators, open interest, funding and news sentiment across \
candidate symbols, then produce a small set of high-conviction decisions. \
Quality beats quantity: most cycles the correct output is to wait. Only \
act when trend, momentum and risk-reward all line up.";

/// Stricter variant for cautious accounts.
pub const CONSERVATIVE_TEMPLATE: &str = "\
You are a risk-first cryptocurrency futures trading AI. Capital \
preservation outranks returns: prefer BTC and ETH, skip illiquid \
altcoins, take only setups with overwhelming confluence, and cut losers \
immediately. When in doubt, wait.";

/// Higher-turnover variant for accounts that accept more variance.
pub const AGGRESSIVE_TEMPLATE: &str = "\
You are a momentum-driven cryptocurrency futures trading AI. You hunt \
breakouts and open-interest surges early, accept more frequent small \
losses in exchange for outsized winners, and size up when conviction and \
market regime agree. Risk controls are still binding.";

/// Look up a system-prompt template body by name. Unknown names fall back
/// to the default template.
pub fn get_template(name: &str) -> &'static str {
    match name {
        "" | "default" => DEFAULT_TEMPLATE,
        "conservative" => CONSERVATIVE_TEMPLATE,
        "aggressive" => AGGRESSIVE_TEMPLATE,
        _ => {
            tracing::warn!(template = name, "unknown prompt template, using default");
            DEFAULT_TEMPLATE
        }
    }
}

/// Build the full system prompt: template body plus the dynamic hard
/// constraints parameterized by account equity and leverage caps.
pub fn build_system_prompt(
    account_equity: f64,
    btc_eth_leverage: u32,
    altcoin_leverage: u32,
    template_name: &str,
) -> String {
    let mut sb = String::new();

    sb.push_str(get_template(template_name));
    sb.push_str("\n\n");

    sb.push_str("# Hard constraints (risk control)\n\n");
    sb.push_str("1. Risk-reward ratio: must be >= 1:3 (risk 1% to make 3%+)\n");
    sb.push_str("2. Concurrent positions: at most 3 symbols (quality over quantity)\n");
    let _ = writeln!(
        sb,
        "3. Per-symbol sizing: altcoins {:.0}-{:.0} USDT ({}x leverage) | BTC/ETH {:.0}-{:.0} USDT ({}x leverage)",
        account_equity * 0.8,
        account_equity * 1.5,
        altcoin_leverage,
        account_equity * 5.0,
        account_equity * 10.0,
        btc_eth_leverage,
    );
    sb.push_str("4. Margin: total utilization <= 90%\n\n");

    sb.push_str("## Position conflict prevention (critical)\n\n");
    sb.push_str("No duplicate opens:\n");
    sb.push_str("- A symbol already held long must not receive another open_long\n");
    sb.push_str("- A symbol already held short must not receive another open_short\n");
    sb.push_str(
        "- To flip direction, close first; open in a later cycle\n\n",
    );
    sb.push_str("No churning:\n");
    sb.push_str(
        "- A symbol closed within the last 15 minutes must not be reopened\n",
    );
    sb.push_str("- Aim to hold each position for 30-60 minutes or longer\n");
    sb.push_str(
        "- If you flip a symbol's direction within 3 cycles, your entry standards are too loose\n\n",
    );
    sb.push_str("Decision deduplication:\n");
    sb.push_str("- The JSON array must not mention the same symbol twice\n");
    sb.push_str("- If it would, keep only the highest-confidence entry\n");
    sb.push_str(
        "- When open and close conflict on one symbol, the close wins\n\n",
    );

    sb.push_str("# Output format\n\n");
    sb.push_str("Step 1: chain of thought (plain text)\n");
    sb.push_str("Briefly explain your analysis.\n\n");
    sb.push_str("Step 2: JSON decision array\n\n");
    sb.push_str("```json\n[\n");
    let _ = writeln!(
        sb,
        "  {{\"symbol\": \"BTCUSDT\", \"action\": \"open_short\", \"leverage\": {}, \"position_size_usd\": {:.0}, \"stop_loss\": 97000, \"take_profit\": 91000, \"confidence\": 85, \"risk_usd\": 300, \"reasoning\": \"downtrend + MACD cross\"}},",
        btc_eth_leverage,
        account_equity * 5.0,
    );
    sb.push_str("  {\"symbol\": \"ETHUSDT\", \"action\": \"close_long\", \"reasoning\": \"take profit\"}\n");
    sb.push_str("]\n```\n\n");
    sb.push_str("Field notes:\n");
    sb.push_str("- `action`: open_long | open_short | close_long | close_short | hold | wait\n");
    sb.push_str("- `confidence`: 0-100 (opens should be >= 75)\n");
    sb.push_str(
        "- Opens require: leverage, position_size_usd, stop_loss, take_profit, confidence, risk_usd, reasoning\n\n",
    );

    sb
}

/// Build the system prompt honoring a per-user override: a custom prompt
/// either fully replaces the base or is appended as a personalization
/// section that cannot relax the base risk rules.
pub fn build_system_prompt_with_custom(
    account_equity: f64,
    btc_eth_leverage: u32,
    altcoin_leverage: u32,
    custom_prompt: &str,
    override_base: bool,
    template_name: &str,
) -> String {
    if override_base && !custom_prompt.is_empty() {
        return custom_prompt.to_string();
    }

    let base = build_system_prompt(
        account_equity,
        btc_eth_leverage,
        altcoin_leverage,
        template_name,
    );
    if custom_prompt.is_empty() {
        return base;
    }

    let mut sb = base;
    sb.push_str("\n\n# Personal trading strategy\n\n");
    sb.push_str(custom_prompt);
    sb.push_str(
        "\n\nNote: the personal strategy supplements the base rules and must not violate the base risk controls.\n",
    );
    sb
}

/// Build the user prompt: the cycle's dynamic data, formatted for the
/// model.
pub fn build_user_prompt(ctx: &Context) -> String {
    let mut sb = String::new();

    let _ = writeln!(
        sb,
        "Time: {} | Cycle: #{} | Runtime: {} minutes\n",
        ctx.current_time.format("%Y-%m-%d %H:%M:%S UTC"),
        ctx.call_count,
        ctx.runtime_minutes,
    );

    if let Some(btc) = ctx.market_data.get("BTCUSDT") {
        let _ = writeln!(
            sb,
            "BTC: {:.2} (1h: {:+.2}%, 4h: {:+.2}%) | MACD: {:.4} | RSI: {:.2}\n",
            btc.current_price,
            btc.price_change_1h,
            btc.price_change_4h,
            btc.current_macd,
            btc.current_rsi7,
        );
    }

    let balance_pct = if ctx.account.total_equity > 0.0 {
        ctx.account.available_balance / ctx.account.total_equity * 100.0
    } else {
        0.0
    };
    let _ = writeln!(
        sb,
        "Account: equity {:.2} | balance {:.2} ({:.1}%) | PnL {:+.2}% | margin {:.1}% | positions {}\n",
        ctx.account.total_equity,
        ctx.account.available_balance,
        balance_pct,
        ctx.account.total_pnl_pct,
        ctx.account.margin_used_pct,
        ctx.account.position_count,
    );

    if ctx.positions.is_empty() {
        sb.push_str("Current positions: none\n\n");
    } else {
        sb.push_str("## Current positions\n");
        for (index, position) in ctx.positions.iter().enumerate() {
            let holding = if position.update_time_ms > 0 {
                let minutes =
                    (ctx.current_time.timestamp_millis() - position.update_time_ms) / 60_000;
                if minutes < 60 {
                    format!(" | held {} min", minutes)
                } else {
                    format!(" | held {}h {}min", minutes / 60, minutes % 60)
                }
            } else {
                String::new()
            };

            let _ = writeln!(
                sb,
                "{}. {} {} | entry {:.4} mark {:.4} | PnL {:+.2}% | {}x | margin {:.0} | liq {:.4}{}\n",
                index + 1,
                position.symbol,
                position.side.to_string().to_uppercase(),
                position.entry_price,
                position.mark_price,
                position.unrealized_pnl_pct,
                position.leverage,
                position.margin_used,
                position.liquidation_price,
                holding,
            );

            if let Some(data) = ctx.market_data.get(&position.symbol) {
                sb.push_str(&format_market_data(data));
                sb.push('\n');
            }
        }
    }

    append_cooldown_section(&mut sb, ctx);

    let _ = writeln!(sb, "## Candidate symbols ({})\n", ctx.market_data.len());
    let mut displayed = 0;
    for coin in &ctx.candidate_coins {
        let Some(data) = ctx.market_data.get(&coin.symbol) else {
            continue;
        };
        displayed += 1;

        let source_tag = if coin.sources.len() > 1 {
            " (AI500 + OI_Top dual signal)"
        } else if coin.sources.first() == Some(&SourceTag::OiTop) {
            " (OI_Top open-interest growth)"
        } else {
            ""
        };

        let _ = writeln!(sb, "### {}. {}{}\n", displayed, coin.symbol, source_tag);
        sb.push_str(&format_market_data(data));
        sb.push('\n');
    }
    sb.push('\n');

    append_performance_section(&mut sb, ctx);
    append_news_section(&mut sb, ctx);

    sb.push_str("---\n\n");
    sb.push_str("Now analyze and output your decisions (chain of thought + JSON).\n");

    sb
}

/// Render one symbol's indicator snapshot.
pub fn format_market_data(data: &MarketData) -> String {
    let mut sb = String::new();
    let _ = writeln!(
        sb,
        "price {:.4} | 1h {:+.2}% | 4h {:+.2}% | MACD {:.4} | RSI7 {:.2}",
        data.current_price,
        data.price_change_1h,
        data.price_change_4h,
        data.current_macd,
        data.current_rsi7,
    );
    if let Some(oi) = data.open_interest_latest {
        let _ = writeln!(
            sb,
            "open interest {:.0} ({:.1}M USD notional)",
            oi,
            oi * data.current_price / 1_000_000.0,
        );
    }
    if let Some(funding) = data.funding_rate {
        let _ = writeln!(sb, "funding {:+.4}%", funding * 100.0);
    }
    sb
}

fn append_cooldown_section(sb: &mut String, ctx: &Context) {
    if ctx.last_close_time.is_empty() {
        return;
    }

    let now_ms = ctx.current_time.timestamp_millis();
    let cooldown_ms = i64::from(ctx.effective_cooldown_minutes()) * 60_000;

    let mut locked: Vec<(String, i64)> = Vec::new();
    for (key, close_time) in &ctx.last_close_time {
        let since = now_ms - close_time;
        if since < cooldown_ms && key.contains("|close_") {
            if let Some((symbol, _)) = key.split_once('|') {
                locked.push((symbol.to_string(), (cooldown_ms - since) / 60_000));
            }
        }
    }

    if locked.is_empty() {
        return;
    }
    locked.sort();
    locked.dedup();

    sb.push_str("## Cooldown symbols (no immediate re-entry)\n\n");
    for (symbol, minutes_remaining) in locked {
        let _ = writeln!(sb, "- {}: cooling down ({} min left)", symbol, minutes_remaining);
    }
    sb.push('\n');
}

fn append_performance_section(sb: &mut String, ctx: &Context) {
    let Some(perf) = &ctx.performance else {
        return;
    };
    if perf.total_trades == 0 {
        return;
    }

    sb.push_str("## Historical performance\n\n");
    let _ = writeln!(sb, "Trades: {} total", perf.total_trades);
    let _ = writeln!(
        sb,
        "Win rate: {:.1}% | Risk-reward: {:.2}:1\n",
        perf.win_rate, perf.risk_reward_ratio,
    );
    let _ = writeln!(
        sb,
        "Average returns: {:+.2}% per win | {:+.2}% per loss",
        perf.average_profit_per_win, perf.average_loss_per_loss,
    );
    let _ = writeln!(
        sb,
        "Risk: max drawdown {:.2}% | volatility {:.2}% | consecutive losses {} (worst {})\n",
        perf.max_drawdown_percent,
        perf.volatility,
        perf.consecutive_losses,
        perf.max_consecutive_losses,
    );
    let _ = writeln!(
        sb,
        "Sharpe: {:.2} | Profit factor: {:.2}\n",
        perf.sharpe_ratio, perf.profit_factor,
    );

    if (0..24).contains(&perf.best_trading_hour) {
        let _ = writeln!(
            sb,
            "Best trading window: {:02}:00 - {:02}:00 UTC",
            perf.best_trading_hour,
            (perf.best_trading_hour + 1) % 24,
        );
    }
    if !perf.best_performing_pair.is_empty() {
        let _ = write!(sb, "Best pair: {} | ", perf.best_performing_pair);
    }
    if !perf.worst_performing_pair.is_empty() {
        let _ = writeln!(sb, "Worst pair: {}\n", perf.worst_performing_pair);
    }
    if perf.weighted_win_rate > 0.0 {
        let _ = writeln!(
            sb,
            "Recency-weighted win rate: {:.1}% (recent results matter most)\n",
            perf.weighted_win_rate,
        );
    }

    sb.push_str("### Advice from the numbers:\n");
    if perf.sharpe_ratio > 1.0 {
        sb.push_str("- Strong record (Sharpe > 1): leverage or sizing may be increased\n");
    } else if perf.sharpe_ratio < 0.0 {
        sb.push_str(
            "- Weak record (Sharpe < 0): reduce leverage and take only high-probability setups\n",
        );
    }
    if perf.max_drawdown_percent > 20.0 {
        sb.push_str("- Max drawdown above 20%: tighten risk control\n");
    }
    if perf.consecutive_losses >= 3 {
        sb.push_str("- Consecutive losses detected: pause or switch strategy\n");
    }
    if perf.risk_reward_ratio >= 3.0 {
        sb.push_str("- Risk-reward at or above 3:1: keep the current approach\n");
    }
    sb.push('\n');
}

fn append_news_section(sb: &mut String, ctx: &Context) {
    let Some(news) = news_from_context(ctx) else {
        return;
    };
    if !news.has_content() {
        return;
    }

    sb.push_str("## Market news and sentiment\n\n");

    let label = if news.sentiment_avg > 0.2 {
        "positive"
    } else if news.sentiment_avg < -0.2 {
        "negative"
    } else {
        "neutral"
    };
    let _ = writeln!(
        sb,
        "Overall sentiment: {} (average {:+.2}, range -1.0 to +1.0)\n",
        label, news.sentiment_avg,
    );

    sb.push_str("Latest headlines (top 5):\n\n");
    for (index, article) in news.articles.iter().take(5).enumerate() {
        let article_label = if article.sentiment > 0.0 {
            "positive"
        } else if article.sentiment < 0.0 {
            "negative"
        } else {
            "neutral"
        };
        let symbol_tag = article
            .symbol
            .as_deref()
            .map(|s| format!(" [symbol: {}]", s))
            .unwrap_or_default();
        let _ = writeln!(
            sb,
            "{}. [{}] {}{}",
            index + 1,
            article_label,
            article.headline,
            symbol_tag,
        );
    }
    sb.push('\n');

    sb.push_str("### How sentiment should shape the decision:\n");
    if news.sentiment_avg > 0.3 {
        sb.push_str("- Strongly positive: larger sizing and leverage are acceptable\n");
    } else if news.sentiment_avg > 0.1 {
        sb.push_str("- Mildly positive: modest size increases, keep risk controls\n");
    } else if news.sentiment_avg < -0.3 {
        sb.push_str("- Strongly negative: cut leverage and size, prioritize stops\n");
    } else if news.sentiment_avg < -0.1 {
        sb.push_str("- Mildly negative: stay cautious, manage risk first\n");
    } else {
        sb.push_str("- Neutral: decide on technicals and the historical record\n");
    }
    sb.push('\n');
}
