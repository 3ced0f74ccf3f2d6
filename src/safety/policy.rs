//! Pure evaluation of one proposed trade against the configured limits

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::common::types::Side;
use crate::config::types::SafetyLimits;
use crate::engine::state::EngineState;

/// A trade after normalization, which is what the limits talk about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedTrade {
    pub asset: String,
    pub side: Side,
    /// Quote value of the trade
    pub usd_amount: Decimal,
}

/// Which rule rejected a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyRule {
    Blacklist,
    Whitelist,
    MaxTradeSize,
    DailyTradeCount,
    DailyVolume,
    MaxSellPercent,
    Cooldown,
}

/// Outcome of a safety evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub passed: bool,
    pub rule: Option<SafetyRule>,
    pub reason: String,
}

impl SafetyCheck {
    fn pass() -> Self {
        Self {
            passed: true,
            rule: None,
            reason: "All safety checks passed".to_string(),
        }
    }

    fn reject(rule: SafetyRule, reason: String) -> Self {
        Self {
            passed: false,
            rule: Some(rule),
            reason,
        }
    }
}

/// Evaluate `trade` against `limits` given the engine's current counters
///
/// Checks run in a fixed order and the first failure wins. `position_value`
/// is the USD value of the current holding; when it is unknown the sell
/// percentage check is skipped.
pub fn evaluate(
    trade: &ProposedTrade,
    state: &EngineState,
    limits: &SafetyLimits,
    position_value: Option<Decimal>,
    now: DateTime<Utc>,
) -> SafetyCheck {
    let asset = trade.asset.as_str();
    let amount = trade.usd_amount;

    if limits.is_blacklisted(asset) {
        return SafetyCheck::reject(SafetyRule::Blacklist, format!("{} is blacklisted", asset));
    }

    if limits.is_outside_whitelist(asset) {
        return SafetyCheck::reject(
            SafetyRule::Whitelist,
            format!("{} is not in whitelist", asset),
        );
    }

    if amount > limits.max_trade_usd {
        return SafetyCheck::reject(
            SafetyRule::MaxTradeSize,
            format!(
                "Trade amount ${} exceeds max ${} per trade",
                amount.round_dp(2),
                limits.max_trade_usd
            ),
        );
    }

    if state.daily_trade_count >= limits.max_trades_per_day {
        return SafetyCheck::reject(
            SafetyRule::DailyTradeCount,
            format!(
                "Daily trade limit reached ({}/{})",
                state.daily_trade_count, limits.max_trades_per_day
            ),
        );
    }

    if state.daily_volume + amount > limits.max_daily_volume_usd {
        let remaining = (limits.max_daily_volume_usd - state.daily_volume).max(Decimal::ZERO);
        return SafetyCheck::reject(
            SafetyRule::DailyVolume,
            format!(
                "Trade would exceed daily volume limit of ${}; remaining budget ${}",
                limits.max_daily_volume_usd,
                remaining.round_dp(2)
            ),
        );
    }

    if trade.side == Side::Sell {
        if let Some(total) = position_value.filter(|v| *v > Decimal::ZERO) {
            let sell_percent = amount / total * dec!(100);
            if sell_percent > limits.max_sell_percent {
                return SafetyCheck::reject(
                    SafetyRule::MaxSellPercent,
                    format!(
                        "Sell of {}% of position exceeds max {}%",
                        sell_percent.round_dp(1),
                        limits.max_sell_percent
                    ),
                );
            }
        }
    }

    if let Some(remaining) = state.cooldown_remaining(asset, limits.cooldown_seconds, now) {
        return SafetyCheck::reject(
            SafetyRule::Cooldown,
            format!("{} in cooldown, {}s remaining", asset, remaining),
        );
    }

    SafetyCheck::pass()
}
