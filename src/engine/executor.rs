//! Mode-dispatched order execution guarded by the safety policy

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::audit::{AuditSink, JsonlAuditSink, MemoryAuditSink};
use super::confirm::{Confirmer, StdinConfirmer};
use super::fees::FeeSchedule;
use super::state::EngineState;
use super::types::{NormalizedOrder, PreviewResult, TradeRecord, CANCELLED_BY_USER};
use crate::common::clock::{Clock, SystemClock};
use crate::common::errors::{PortfolioError, Result};
use crate::common::traits::{ExchangeClient, TradeExecutor};
use crate::common::types::{MarketOrder, OrderAmount, OrderFill, OrderQuote, Side, TradeIntent};
use crate::config::types::{AppConfig, ExecutionMode, SafetyLimits};
use crate::safety::{self, ProposedTrade, SafetyCheck};

/// Decimal places kept for asset quantities
const ASSET_DP: u32 = 8;

/// The single place where trades are checked, dispatched and counted
///
/// `execute` holds the state lock from the daily reset until the counters are
/// updated, so concurrent callers are serialized and two intents can never both
/// pass a limit check against the same stale counters.
pub struct ExecutionEngine {
    exchange: Arc<dyn ExchangeClient>,
    limits: SafetyLimits,
    mode: ExecutionMode,
    fees: FeeSchedule,
    audit: Arc<dyn AuditSink>,
    confirmer: Option<Arc<dyn Confirmer>>,
    clock: Arc<dyn Clock>,
    /// Upper bound for read-only exchange calls; orders are never timed out here
    lookup_timeout: Option<Duration>,
    state: Mutex<EngineState>,
    paper_sequence: AtomicU64,
}

impl ExecutionEngine {
    /// Create an engine with an in-memory audit sink and the system clock
    pub fn new(exchange: Arc<dyn ExchangeClient>, limits: SafetyLimits, mode: ExecutionMode) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let today = clock.now().date_naive();
        Self {
            exchange,
            limits,
            mode,
            fees: FeeSchedule::default(),
            audit: Arc::new(MemoryAuditSink::new()),
            confirmer: None,
            clock,
            lookup_timeout: None,
            state: Mutex::new(EngineState::new(today)),
            paper_sequence: AtomicU64::new(0),
        }
    }

    /// Build an engine from application configuration
    ///
    /// Confirm mode gets a stdin confirmer; the audit sink is a JSON-lines file
    /// when `engine.audit_log_path` is set.
    pub fn from_config(config: &AppConfig, exchange: Arc<dyn ExchangeClient>) -> Result<Self> {
        config.validate()?;

        let mut engine = Self::new(exchange, config.safety.clone(), config.engine.mode)
            .with_fees(FeeSchedule::new(config.engine.taker_fee_pct))
            .with_lookup_timeout(Duration::from_secs(config.settings.request_timeout_seconds));

        if let Some(path) = &config.engine.audit_log_path {
            engine = engine.with_audit_sink(Arc::new(JsonlAuditSink::open(path)?));
        }
        if config.engine.mode == ExecutionMode::Confirm {
            engine = engine.with_confirmer(Arc::new(StdinConfirmer));
        }
        Ok(engine)
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// Replace the clock; the daily reset date restarts from the new clock's today
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.state = Mutex::new(EngineState::new(clock.now().date_naive()));
        self.clock = clock;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Copy of the counters as they would look to a call made right now
    pub async fn state_snapshot(&self) -> EngineState {
        let mut state = self.state.lock().await.clone();
        state.roll_day(self.clock.now().date_naive());
        state
    }

    /// USD still available under the daily volume limit
    pub async fn remaining_daily_budget(&self) -> Decimal {
        let state = self.state_snapshot().await;
        (self.limits.max_daily_volume_usd - state.daily_volume).max(Decimal::ZERO)
    }

    /// Check, dispatch and record one trade intent
    ///
    /// Never returns an error: every failure path ends in a `TradeRecord` with
    /// `executed == false` and a reason. Failed exchange calls are not retried.
    #[instrument(skip(self, intent), fields(asset = %intent.asset(), side = %intent.side(), mode = %self.mode))]
    pub async fn execute(&self, intent: TradeIntent) -> TradeRecord {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        if state.roll_day(now.date_naive()) {
            info!("New trading day {}, daily counters reset", state.daily_reset_date);
        }

        let order = match self.price_order(&intent).await {
            Ok(order) => order,
            Err(e) => {
                warn!("Not trading {}: {}", intent.asset(), e);
                return self.finish(TradeRecord::unpriced(&intent, self.mode, now, e.to_string()));
            }
        };

        let position_value = self.position_value(&intent, order.price).await;
        let check = self.check(&intent, &order, &state, position_value, now);
        if !check.passed {
            warn!("Safety check failed for {} {}: {}", intent.side(), intent.asset(), check.reason);
            return self.finish(TradeRecord::failed(&intent, self.mode, now, &order, check.reason));
        }

        let fill = match self.mode {
            ExecutionMode::Paper => Ok(self.simulate_fill(&order, now)),
            ExecutionMode::Live => self.dispatch(&intent, &order).await,
            ExecutionMode::Confirm => {
                let preview = self.build_preview(&intent, Ok(order), Some(check), None);
                let approved = match &self.confirmer {
                    Some(confirmer) => confirmer.confirm(&preview).await,
                    None => {
                        error!("Confirm mode without a confirmer, refusing to trade");
                        false
                    }
                };
                if !approved {
                    info!("{} {} declined", intent.side(), intent.asset());
                    return self.finish(TradeRecord::failed(
                        &intent,
                        self.mode,
                        self.clock.now(),
                        &order,
                        CANCELLED_BY_USER,
                    ));
                }
                self.dispatch(&intent, &order).await
            }
        };

        let executed_at = self.clock.now();
        match fill {
            Ok(fill) => {
                state.record_trade(intent.asset(), order.usd_amount, executed_at);
                info!(
                    order_id = %fill.order_id,
                    "Executed {} {} {} @ ${} (${}), daily {}/{} trades, ${} volume",
                    intent.side(),
                    fill.filled_amount,
                    intent.asset(),
                    fill.filled_price,
                    order.usd_amount.round_dp(2),
                    state.daily_trade_count,
                    self.limits.max_trades_per_day,
                    state.daily_volume.round_dp(2)
                );
                self.finish(TradeRecord::filled(&intent, self.mode, executed_at, &order, &fill))
            }
            Err(e) => {
                if e.is_exchange_failure() {
                    error!("Order for {} {} failed: {}", intent.side(), intent.asset(), e);
                } else {
                    warn!("Order for {} {} not placed: {}", intent.side(), intent.asset(), e);
                }
                self.finish(TradeRecord::failed(&intent, self.mode, executed_at, &order, e.to_string()))
            }
        }
    }

    /// Run the price lookup and safety checks without trading
    ///
    /// Never changes engine state and never places an order. When the exchange
    /// offers quotes, one is attached.
    #[instrument(skip(self, intent), fields(asset = %intent.asset(), side = %intent.side()))]
    pub async fn preview(&self, intent: &TradeIntent) -> PreviewResult {
        let priced = self.price_order(intent).await;
        let check = match &priced {
            Ok(order) => {
                let position_value = self.position_value(intent, order.price).await;
                let state = self.state_snapshot().await;
                Some(self.check(intent, order, &state, position_value, self.clock.now()))
            }
            Err(_) => None,
        };
        let quote = match &priced {
            Ok(order) => self.exchange_quote(intent, order).await,
            Err(_) => None,
        };
        self.build_preview(intent, priced, check, quote)
    }

    fn build_preview(
        &self,
        intent: &TradeIntent,
        priced: Result<NormalizedOrder>,
        safety: Option<SafetyCheck>,
        exchange_quote: Option<OrderQuote>,
    ) -> PreviewResult {
        let (order, error) = match priced {
            Ok(order) => (Some(order), None),
            Err(e) => (None, Some(e.to_string())),
        };
        PreviewResult {
            asset: intent.asset().to_string(),
            side: intent.side(),
            mode: self.mode,
            reason: intent.reason().to_string(),
            estimated_fee: order.map(|o| self.fees.fee(o.usd_amount)),
            estimated_net_usd: order.map(|o| self.fees.net_cash(intent.side(), o.usd_amount)),
            order,
            safety,
            exchange_quote,
            error,
        }
    }

    fn check(
        &self,
        intent: &TradeIntent,
        order: &NormalizedOrder,
        state: &EngineState,
        position_value: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> SafetyCheck {
        let trade = ProposedTrade {
            asset: intent.asset().to_string(),
            side: intent.side(),
            usd_amount: order.usd_amount,
        };
        safety::evaluate(&trade, state, &self.limits, position_value, now)
    }

    /// Resolve the spot price and express the intent in both units
    async fn price_order(&self, intent: &TradeIntent) -> Result<NormalizedOrder> {
        if intent.amount().value() <= Decimal::ZERO {
            return Err(PortfolioError::InvalidIntent(format!(
                "invalid trade amount {}",
                intent.amount().value()
            )));
        }

        let price = match self.lookup(self.exchange.get_spot_price(intent.asset())).await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(price) => {
                debug!("Ignoring non-positive price {} for {}", price, intent.asset());
                return Err(PortfolioError::PriceUnavailable(intent.asset().to_string()));
            }
            Err(e) => {
                debug!("Price lookup for {} failed: {}", intent.asset(), e);
                return Err(PortfolioError::PriceUnavailable(intent.asset().to_string()));
            }
        };

        Ok(normalize(intent.amount(), price))
    }

    /// USD value of the current holding, for sells only
    async fn position_value(&self, intent: &TradeIntent, price: Decimal) -> Option<Decimal> {
        if intent.side() != Side::Sell {
            return None;
        }
        match self.lookup(self.exchange.get_balances()).await {
            Ok(balances) => balances
                .get(intent.asset())
                .map(|quantity| *quantity * price),
            Err(PortfolioError::Unsupported(_)) => None,
            Err(e) => {
                warn!("Balance lookup failed, skipping sell-percent check: {}", e);
                None
            }
        }
    }

    async fn exchange_quote(&self, intent: &TradeIntent, order: &NormalizedOrder) -> Option<OrderQuote> {
        match self
            .lookup(self.exchange.get_quote(intent.asset(), intent.side(), order.usd_amount))
            .await
        {
            Ok(quote) => Some(quote),
            Err(PortfolioError::Unsupported(msg)) => {
                debug!("{}", msg);
                None
            }
            Err(e) => {
                warn!("Quote for {} failed: {}", intent.asset(), e);
                None
            }
        }
    }

    /// Apply the lookup timeout to a read-only exchange call
    async fn lookup<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match self.lookup_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await?,
            None => call.await,
        }
    }

    /// Send the order to the exchange exactly once
    async fn dispatch(&self, intent: &TradeIntent, order: &NormalizedOrder) -> Result<OrderFill> {
        let amount = match intent.side() {
            Side::Buy => OrderAmount::Quote(order.usd_amount),
            Side::Sell => OrderAmount::Base(order.asset_amount),
        };
        let market_order = MarketOrder {
            asset: intent.asset().to_string(),
            side: intent.side(),
            amount,
        };
        debug!("Dispatching {:?} to {}", market_order, self.exchange.name());
        self.exchange.place_market_order(&market_order).await
    }

    fn simulate_fill(&self, order: &NormalizedOrder, now: DateTime<Utc>) -> OrderFill {
        let seq = self.paper_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        OrderFill {
            order_id: format!("paper-{}-{}", now.timestamp_millis(), seq),
            filled_amount: order.asset_amount,
            filled_price: order.price,
            fees: self.fees.fee(order.usd_amount),
        }
    }

    /// Append to the audit sink; a failing sink never changes the outcome
    /// Audited record for an intent that never reached `execute`
    ///
    /// Leaves engine state alone, so it is safe to call from outside the
    /// single writer.
    pub(crate) fn reject_unqueued(&self, intent: &TradeIntent, reason: impl Into<String>) -> TradeRecord {
        self.finish(TradeRecord::unpriced(intent, self.mode, self.clock.now(), reason))
    }

    fn finish(&self, record: TradeRecord) -> TradeRecord {
        if let Err(e) = self.audit.append(&record) {
            error!("Failed to append trade record to audit sink: {}", e);
        }
        record
    }
}

#[async_trait]
impl TradeExecutor for ExecutionEngine {
    async fn execute(&self, intent: TradeIntent) -> TradeRecord {
        ExecutionEngine::execute(self, intent).await
    }
}

/// Express an amount in both asset units and USD at `price`
pub fn normalize(amount: OrderAmount, price: Decimal) -> NormalizedOrder {
    match amount {
        OrderAmount::Quote(usd) => NormalizedOrder {
            price,
            asset_amount: (usd / price).round_dp(ASSET_DP),
            usd_amount: usd,
        },
        OrderAmount::Base(units) => NormalizedOrder {
            price,
            asset_amount: units,
            usd_amount: units * price,
        },
    }
}
