//! Unified types shared by the planner, scheduler, engine and exchange clients

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// How much to trade: an amount of the quote currency (USD) or of the asset itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "lowercase")]
pub enum OrderAmount {
    /// Amount in USD
    Quote(Decimal),
    /// Amount in units of the asset
    Base(Decimal),
}

impl OrderAmount {
    /// Raw number regardless of unit
    pub fn value(&self) -> Decimal {
        match self {
            OrderAmount::Quote(v) | OrderAmount::Base(v) => *v,
        }
    }
}

/// Component that produced a trade intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentOrigin {
    Rebalance,
    RecurringPurchase,
    Manual,
}

impl std::fmt::Display for IntentOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentOrigin::Rebalance => write!(f, "rebalance"),
            IntentOrigin::RecurringPurchase => write!(f, "recurring_purchase"),
            IntentOrigin::Manual => write!(f, "manual"),
        }
    }
}

/// An unexecuted buy/sell request
///
/// Created by the planner or scheduler and consumed once by the engine.
/// Fields are read-only after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    side: Side,
    asset: String,
    amount: OrderAmount,
    origin: IntentOrigin,
    reason: String,
}

impl TradeIntent {
    pub fn new(
        side: Side,
        asset: impl AsRef<str>,
        amount: OrderAmount,
        origin: IntentOrigin,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            side,
            asset: normalize_asset(asset.as_ref()),
            amount,
            origin,
            reason: reason.into(),
        }
    }

    /// Quote-denominated buy (the usual shape for purchases)
    pub fn buy_usd(asset: impl AsRef<str>, usd: Decimal, origin: IntentOrigin, reason: impl Into<String>) -> Self {
        Self::new(Side::Buy, asset, OrderAmount::Quote(usd), origin, reason)
    }

    /// Quote-denominated sell
    pub fn sell_usd(asset: impl AsRef<str>, usd: Decimal, origin: IntentOrigin, reason: impl Into<String>) -> Self {
        Self::new(Side::Sell, asset, OrderAmount::Quote(usd), origin, reason)
    }

    /// Asset-denominated sell
    pub fn sell_units(asset: impl AsRef<str>, units: Decimal, origin: IntentOrigin, reason: impl Into<String>) -> Self {
        Self::new(Side::Sell, asset, OrderAmount::Base(units), origin, reason)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn amount(&self) -> OrderAmount {
        self.amount
    }

    pub fn origin(&self) -> IntentOrigin {
        self.origin
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Market order sent to an exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub asset: String,
    pub side: Side,
    /// BUY orders carry a quote amount, SELL orders a base amount
    pub amount: OrderAmount,
}

/// Successful fill reported by an exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub filled_amount: Decimal,
    pub filled_price: Decimal,
    pub fees: Decimal,
}

/// Non-committing price quote for a prospective order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderQuote {
    pub asset: String,
    pub side: Side,
    pub expected_price: Decimal,
    pub expected_amount: Decimal,
    pub expected_fees: Decimal,
}

/// Canonical asset symbol form used as map key everywhere
pub fn normalize_asset(asset: &str) -> String {
    asset.trim().to_ascii_uppercase()
}
