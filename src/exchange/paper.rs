//! In-memory simulated exchange

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::common::errors::{PortfolioError, Result};
use crate::common::traits::ExchangeClient;
use crate::common::types::{
    normalize_asset, MarketOrder, OrderAmount, OrderFill, OrderQuote, Side,
};
use crate::config::types::PaperConfig;

/// Symbol under which cash is held
pub const QUOTE_CURRENCY: &str = "USD";

#[derive(Debug, Default)]
struct Book {
    prices: HashMap<String, Decimal>,
    trailing_highs: HashMap<String, Decimal>,
    balances: HashMap<String, Decimal>,
    orders: Vec<MarketOrder>,
    failures: VecDeque<PortfolioError>,
    next_order_id: u64,
}

/// A simulated venue with settable prices and balances
///
/// Fills market orders instantly at the set price and keeps balances in step.
/// When a `USD` balance is present, buys are limited by it. Failures can be
/// queued with [`PaperExchange::fail_next_order`].
#[derive(Debug)]
pub struct PaperExchange {
    book: Mutex<Book>,
    taker_fee_percent: Decimal,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(Book::default()),
            taker_fee_percent: dec!(0.6),
        }
    }

    /// Seed prices, trailing highs and balances from configuration
    pub fn from_config(config: &PaperConfig) -> Self {
        let exchange = Self::new();
        for (asset, price) in &config.prices {
            exchange.set_price(asset, *price);
        }
        for (asset, high) in &config.trailing_highs {
            exchange.set_trailing_high(asset, *high);
        }
        for (asset, quantity) in &config.balances {
            exchange.set_balance(asset, *quantity);
        }
        exchange
    }

    pub fn with_fee_percent(mut self, taker_fee_percent: Decimal) -> Self {
        self.taker_fee_percent = taker_fee_percent;
        self
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        // every mutation leaves the book consistent, so a poisoned lock is usable
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_price(&self, asset: &str, price: Decimal) {
        self.book().prices.insert(normalize_asset(asset), price);
    }

    pub fn remove_price(&self, asset: &str) {
        self.book().prices.remove(&normalize_asset(asset));
    }

    pub fn set_trailing_high(&self, asset: &str, high: Decimal) {
        self.book().trailing_highs.insert(normalize_asset(asset), high);
    }

    pub fn set_balance(&self, asset: &str, quantity: Decimal) {
        self.book().balances.insert(normalize_asset(asset), quantity);
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.book()
            .balances
            .get(&normalize_asset(asset))
            .copied()
            .unwrap_or_default()
    }

    /// Orders received so far, oldest first
    pub fn orders(&self) -> Vec<MarketOrder> {
        self.book().orders.clone()
    }

    /// Make the next order fail with `error`
    pub fn fail_next_order(&self, error: PortfolioError) {
        self.book().failures.push_back(error);
    }

    fn price_of(book: &Book, asset: &str) -> Result<Decimal> {
        book.prices
            .get(asset)
            .copied()
            .ok_or_else(|| PortfolioError::PriceUnavailable(asset.to_string()))
    }

    fn fee(&self, usd: Decimal) -> Decimal {
        (usd * self.taker_fee_percent / dec!(100)).round_dp(8)
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn get_spot_price(&self, asset: &str) -> Result<Decimal> {
        let book = self.book();
        Self::price_of(&book, &normalize_asset(asset))
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill> {
        let asset = normalize_asset(&order.asset);
        let mut book = self.book();
        book.orders.push(order.clone());

        if let Some(error) = book.failures.pop_front() {
            return Err(error);
        }

        let price = Self::price_of(&book, &asset)
            .map_err(|_| PortfolioError::ExchangeRejected(format!("no market for {}", asset)))?;

        let (quantity, usd) = match order.amount {
            OrderAmount::Quote(usd) => ((usd / price).round_dp(8), usd),
            OrderAmount::Base(quantity) => (quantity, quantity * price),
        };
        if quantity <= Decimal::ZERO {
            return Err(PortfolioError::ExchangeRejected("order size must be positive".into()));
        }
        let fees = self.fee(usd);

        match order.side {
            Side::Buy => {
                if let Some(cash) = book.balances.get(QUOTE_CURRENCY).copied() {
                    if cash < usd + fees {
                        return Err(PortfolioError::ExchangeRejected(format!(
                            "insufficient funds: need ${}, have ${}",
                            (usd + fees).round_dp(2),
                            cash.round_dp(2)
                        )));
                    }
                    book.balances.insert(QUOTE_CURRENCY.to_string(), cash - usd - fees);
                }
                *book.balances.entry(asset.clone()).or_default() += quantity;
            }
            Side::Sell => {
                let held = book.balances.get(&asset).copied().unwrap_or_default();
                if held < quantity {
                    return Err(PortfolioError::ExchangeRejected(format!(
                        "insufficient {} balance: need {}, have {}",
                        asset, quantity, held
                    )));
                }
                book.balances.insert(asset.clone(), held - quantity);
                if let Some(cash) = book.balances.get_mut(QUOTE_CURRENCY) {
                    *cash += usd - fees;
                }
            }
        }

        book.next_order_id += 1;
        let order_id = format!("sim-{}", book.next_order_id);
        debug!("Simulated {} {} {} @ {} as {}", order.side, quantity, asset, price, order_id);

        Ok(OrderFill {
            order_id,
            filled_amount: quantity,
            filled_price: price,
            fees,
        })
    }

    async fn get_trailing_high(&self, asset: &str, days: u32) -> Result<Decimal> {
        let asset = normalize_asset(asset);
        self.book()
            .trailing_highs
            .get(&asset)
            .copied()
            .ok_or_else(|| {
                PortfolioError::PriceUnavailable(format!("{} ({}-day high)", asset, days))
            })
    }

    async fn get_quote(&self, asset: &str, side: Side, quote_usd: Decimal) -> Result<OrderQuote> {
        let asset = normalize_asset(asset);
        let price = Self::price_of(&self.book(), &asset)?;
        Ok(OrderQuote {
            asset,
            side,
            expected_price: price,
            expected_amount: (quote_usd / price).round_dp(8),
            expected_fees: self.fee(quote_usd),
        })
    }

    async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        Ok(self.book().balances.clone())
    }

    fn name(&self) -> &str {
        "paper"
    }
}
