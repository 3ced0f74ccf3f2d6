//! Capability traits consumed by the trading core

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::errors::{PortfolioError, Result};
use super::types::{MarketOrder, OrderFill, OrderQuote, Side, TradeIntent};
use crate::engine::types::TradeRecord;

/// Trait for exchange clients (Coinbase, Kraken, simulated venues, ...)
///
/// The three required methods are everything the engine and scheduler need.
/// The optional capabilities default to `PortfolioError::Unsupported` so a
/// wrapper that cannot provide them says so explicitly.
///
/// Every method may suspend on network I/O. A call that has been awaited is
/// never cancelled by the core; a timeout is reported as an ordinary error.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Current spot price of `asset` in USD
    async fn get_spot_price(&self, asset: &str) -> Result<Decimal>;

    /// Place a market order
    ///
    /// A non-success response must come back as
    /// `Err(PortfolioError::ExchangeRejected)`, transport problems as
    /// `Err(PortfolioError::Transport)` or `Err(PortfolioError::Timeout)`.
    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill>;

    /// Highest price of `asset` over the trailing `days` days
    async fn get_trailing_high(&self, asset: &str, days: u32) -> Result<Decimal>;

    /// Non-committing quote for a prospective order
    async fn get_quote(&self, asset: &str, side: Side, _quote_usd: Decimal) -> Result<OrderQuote> {
        Err(PortfolioError::Unsupported(format!(
            "{} does not provide quotes ({} {})",
            self.name(),
            side,
            asset
        )))
    }

    /// Current holdings keyed by asset symbol, in asset units
    async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        Err(PortfolioError::Unsupported(format!(
            "{} does not provide balances",
            self.name()
        )))
    }

    /// Human-readable name for logs
    fn name(&self) -> &str {
        "exchange"
    }
}

/// Anything that turns a trade intent into a trade record
///
/// Implemented by the engine itself and by the queued engine handle, so the
/// scheduler and runner never care which single-writer discipline is in use.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(&self, intent: TradeIntent) -> TradeRecord;
}
