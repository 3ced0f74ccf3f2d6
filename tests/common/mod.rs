//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use portfolio_guard::common::types::{MarketOrder, OrderFill};
use portfolio_guard::{
    ExchangeClient, ExecutionEngine, ExecutionMode, ManualClock, MemoryAuditSink, PaperExchange,
    Result, SafetyLimits,
};

// Exchange offering only the required capabilities
mock! {
    pub Exchange {}

    #[async_trait]
    impl ExchangeClient for Exchange {
        async fn get_spot_price(&self, asset: &str) -> Result<Decimal>;
        async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill>;
        async fn get_trailing_high(&self, asset: &str, days: u32) -> Result<Decimal>;
    }
}

/// Paper exchange whose price and trailing-high lookups answer late
pub struct SlowExchange {
    pub inner: Arc<PaperExchange>,
    pub price_delay: Duration,
    pub high_delay: Duration,
}

impl SlowExchange {
    pub fn new(inner: Arc<PaperExchange>) -> Self {
        Self {
            inner,
            price_delay: Duration::ZERO,
            high_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl ExchangeClient for SlowExchange {
    async fn get_spot_price(&self, asset: &str) -> Result<Decimal> {
        tokio::time::sleep(self.price_delay).await;
        self.inner.get_spot_price(asset).await
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill> {
        self.inner.place_market_order(order).await
    }

    async fn get_trailing_high(&self, asset: &str, days: u32) -> Result<Decimal> {
        tokio::time::sleep(self.high_delay).await;
        self.inner.get_trailing_high(asset, days).await
    }

    async fn get_balances(&self) -> Result<std::collections::HashMap<String, Decimal>> {
        self.inner.get_balances().await
    }
}

/// Monday 2024-06-03 10:00 UTC
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Paper exchange with BTC/ETH/SOL prices and a cash balance
pub fn seeded_exchange() -> Arc<PaperExchange> {
    let exchange = PaperExchange::new();
    exchange.set_price("BTC", dec!(60000));
    exchange.set_price("ETH", dec!(3000));
    exchange.set_price("SOL", dec!(150));
    exchange.set_balance("USD", dec!(10000));
    Arc::new(exchange)
}

/// Generous limits with the cooldown switched off
pub fn relaxed_limits() -> SafetyLimits {
    SafetyLimits {
        max_trade_usd: dec!(1000),
        max_trades_per_day: 100,
        max_daily_volume_usd: dec!(100000),
        max_sell_percent: dec!(100),
        cooldown_seconds: 0,
        ..Default::default()
    }
}

/// Engine on a manual clock with an in-memory audit trail
pub struct TestEngine {
    pub engine: Arc<ExecutionEngine>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<MemoryAuditSink>,
}

pub fn test_engine(
    exchange: Arc<dyn ExchangeClient>,
    limits: SafetyLimits,
    mode: ExecutionMode,
) -> TestEngine {
    let clock = Arc::new(ManualClock::new(start()));
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = ExecutionEngine::new(exchange, limits, mode)
        .with_clock(clock.clone())
        .with_audit_sink(audit.clone());
    TestEngine {
        engine: Arc::new(engine),
        clock,
        audit,
    }
}

/// Complete configuration exercising every section
pub const SAMPLE_CONFIG: &str = r#"
[engine]
mode = "paper"
taker_fee_pct = 0.6

[safety]
max_trade_usd = 250
max_trades_per_day = 20
max_daily_volume_usd = 1000
max_sell_percent = 50
cooldown_seconds = 60
blacklist = ["DOGE"]

[rebalance]
drift_threshold = 5
min_trade_usd = 5
max_trade_pct = 50

[rebalance.target_allocations]
BTC = 50
ETH = 50

[dca]
near_high_pct = 95

[[dca.plans]]
asset = "BTC"
usd_amount = 25
cadence = "weekly"
hour = 9
day_of_week = 0
skip_if_near_high_days = 7

[[dca.plans]]
asset = "ETH"
usd_amount = 10
cadence = "daily"
hour = 12

[paper.prices]
BTC = 100
ETH = 10

[paper.trailing_highs]
BTC = 150

[paper.balances]
BTC = 0.7
ETH = 3
USD = 500

[settings]
tick_interval_seconds = 30
unattended = true
"#;
