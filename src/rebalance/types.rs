use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::common::types::{normalize_asset, TradeIntent};
use crate::exchange::QUOTE_CURRENCY;

/// USD value of every holding at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    holdings: BTreeMap<String, Decimal>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl PortfolioSnapshot {
    /// Build from (asset, USD value) pairs; repeated assets are summed
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: AsRef<str>,
    {
        let mut holdings = BTreeMap::new();
        for (asset, value) in values {
            *holdings.entry(normalize_asset(asset.as_ref())).or_insert(Decimal::ZERO) += value;
        }
        Self {
            holdings,
            taken_at: None,
        }
    }

    /// Value quantities at the given prices
    ///
    /// Cash and zero balances are left out. Assets without a price are valued
    /// at zero and logged.
    pub fn from_balances(
        balances: &HashMap<String, Decimal>,
        prices: &HashMap<String, Decimal>,
    ) -> Self {
        let mut holdings = BTreeMap::new();
        for (asset, quantity) in balances {
            let asset = normalize_asset(asset);
            if asset == QUOTE_CURRENCY || *quantity <= Decimal::ZERO {
                continue;
            }
            let value = match prices.get(&asset) {
                Some(price) => *quantity * *price,
                None => {
                    warn!("No price for held asset {}, valuing at zero", asset);
                    Decimal::ZERO
                }
            };
            holdings.insert(asset, value);
        }
        Self {
            holdings,
            taken_at: None,
        }
    }

    pub fn at(mut self, taken_at: DateTime<Utc>) -> Self {
        self.taken_at = Some(taken_at);
        self
    }

    pub fn value_of(&self, asset: &str) -> Decimal {
        self.holdings.get(asset).copied().unwrap_or_default()
    }

    pub fn holdings(&self) -> &BTreeMap<String, Decimal> {
        &self.holdings
    }

    pub fn total_value(&self) -> Decimal {
        self.holdings.values().copied().sum()
    }
}

/// What the planner wants to do with one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AllocationAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for AllocationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationAction::Buy => write!(f, "BUY"),
            AllocationAction::Sell => write!(f, "SELL"),
            AllocationAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Drift of one asset from its target weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStatus {
    pub asset: String,
    pub current_value: Decimal,
    pub current_percent: Decimal,
    pub target_percent: Decimal,
    /// current_percent - target_percent, in percentage points
    pub deviation: Decimal,
    pub target_value: Decimal,
    /// current_value - target_value
    pub value_diff: Decimal,
    pub action: AllocationAction,
    /// USD to trade, zero for HOLD
    pub trade_amount: Decimal,
}

/// Full output of one planning pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub statuses: Vec<AllocationStatus>,
    /// SELLs first, then BUYs, each by descending size
    pub intents: Vec<TradeIntent>,
    pub total_sells: Decimal,
    pub total_buys: Decimal,
    /// Sell proceeds plus external cash
    pub available_cash: Decimal,
    /// Factor applied to buys; 1 when no scaling was needed
    pub scale_factor: Decimal,
}

impl RebalancePlan {
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

impl std::fmt::Display for RebalancePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:<8} {:>12} {:>9} {:>9} {:>9} {:>6} {:>12}",
            "ASSET", "VALUE", "CURRENT%", "TARGET%", "DRIFT", "ACTION", "AMOUNT"
        )?;
        for s in &self.statuses {
            writeln!(
                f,
                "{:<8} {:>12} {:>9} {:>9} {:>9} {:>6} {:>12}",
                s.asset,
                s.current_value.round_dp(2),
                s.current_percent.round_dp(2),
                s.target_percent.round_dp(2),
                s.deviation.round_dp(2),
                s.action,
                s.trade_amount.round_dp(2)
            )?;
        }
        writeln!(
            f,
            "sells ${}  buys ${}  available ${}  scale {}",
            self.total_sells.round_dp(2),
            self.total_buys.round_dp(2),
            self.available_cash.round_dp(2),
            self.scale_factor.round_dp(4)
        )
    }
}
