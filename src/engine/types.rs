//! Records produced by the execution engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::types::{IntentOrigin, OrderFill, OrderQuote, Side, TradeIntent};
use crate::config::types::ExecutionMode;
use crate::safety::SafetyCheck;

/// Error text used when the operator declines a confirm-mode trade
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Outcome of attempting to execute one trade intent
///
/// Append-only audit unit; the engine never changes a record after handing it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub side: Side,
    pub order_type: String,
    pub origin: IntentOrigin,
    pub reason: String,
    pub mode: ExecutionMode,
    /// Asset units, unknown when no price was available
    pub requested_amount: Option<Decimal>,
    /// Quote value, unknown when no price was available
    pub requested_usd: Option<Decimal>,
    pub executed: bool,
    pub order_id: Option<String>,
    pub fill_price: Option<Decimal>,
    pub fill_amount: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub error: Option<String>,
}

impl TradeRecord {
    fn base(intent: &TradeIntent, mode: ExecutionMode, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            asset: intent.asset().to_string(),
            side: intent.side(),
            order_type: "market".to_string(),
            origin: intent.origin(),
            reason: intent.reason().to_string(),
            mode,
            requested_amount: None,
            requested_usd: None,
            executed: false,
            order_id: None,
            fill_price: None,
            fill_amount: None,
            fees: None,
            error: None,
        }
    }

    /// A record for an intent rejected before it could be priced
    pub fn unpriced(
        intent: &TradeIntent,
        mode: ExecutionMode,
        timestamp: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::base(intent, mode, timestamp)
        }
    }

    /// A record for an intent that was priced but not executed
    pub fn failed(
        intent: &TradeIntent,
        mode: ExecutionMode,
        timestamp: DateTime<Utc>,
        order: &NormalizedOrder,
        error: impl Into<String>,
    ) -> Self {
        Self {
            requested_amount: Some(order.asset_amount),
            requested_usd: Some(order.usd_amount),
            error: Some(error.into()),
            ..Self::base(intent, mode, timestamp)
        }
    }

    /// A record for a filled order
    pub fn filled(
        intent: &TradeIntent,
        mode: ExecutionMode,
        timestamp: DateTime<Utc>,
        order: &NormalizedOrder,
        fill: &OrderFill,
    ) -> Self {
        Self {
            requested_amount: Some(order.asset_amount),
            requested_usd: Some(order.usd_amount),
            executed: true,
            order_id: Some(fill.order_id.clone()),
            fill_price: Some(fill.filled_price),
            fill_amount: Some(fill.filled_amount),
            fees: Some(fill.fees),
            ..Self::base(intent, mode, timestamp)
        }
    }
}

/// A trade intent expressed in both units at a given price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub price: Decimal,
    pub asset_amount: Decimal,
    pub usd_amount: Decimal,
}

/// Result of a dry-run through price lookup, normalization and safety checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub asset: String,
    pub side: Side,
    pub mode: ExecutionMode,
    pub reason: String,
    /// None when no price was available
    pub order: Option<NormalizedOrder>,
    pub estimated_fee: Option<Decimal>,
    /// Quote plus fee for buys, proceeds minus fee for sells
    pub estimated_net_usd: Option<Decimal>,
    pub safety: Option<SafetyCheck>,
    /// Exchange-side quote when the exchange offers one
    pub exchange_quote: Option<OrderQuote>,
    pub error: Option<String>,
}

impl PreviewResult {
    /// True when the trade would be dispatched if executed now
    pub fn would_execute(&self) -> bool {
        self.error.is_none() && self.safety.as_ref().map(|s| s.passed).unwrap_or(false)
    }
}

impl std::fmt::Display for PreviewResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Trade preview ({} mode)", self.mode)?;
        writeln!(f, "  {} {}", self.side, self.asset)?;
        writeln!(f, "  Reason:      {}", self.reason)?;
        if let Some(order) = &self.order {
            writeln!(f, "  Price:       ${}", order.price)?;
            writeln!(f, "  Amount:      {} {}", order.asset_amount.round_dp(8), self.asset)?;
            writeln!(f, "  Value:       ${}", order.usd_amount.round_dp(2))?;
        }
        if let Some(fee) = self.estimated_fee {
            writeln!(f, "  Est. fee:    ${}", fee.round_dp(2))?;
        }
        if let Some(net) = self.estimated_net_usd {
            writeln!(f, "  Net cash:    ${}", net.round_dp(2))?;
        }
        if let Some(quote) = &self.exchange_quote {
            writeln!(
                f,
                "  Exchange:    {} @ ${} (fees ${})",
                quote.expected_amount, quote.expected_price, quote.expected_fees
            )?;
        }
        if let Some(safety) = &self.safety {
            let verdict = if safety.passed { "PASS" } else { "FAIL" };
            writeln!(f, "  Safety:      {} - {}", verdict, safety.reason)?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "  Error:       {}", error)?;
        }
        Ok(())
    }
}
