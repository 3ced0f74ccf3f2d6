//! Cycle driver tying the scheduler and planner to one executor
//!
//! One [`PortfolioRunner::run_cycle`] call runs due recurring purchases first,
//! then a rebalance pass when one is configured and its interval has elapsed.
//! Everything funnels into the same [`TradeExecutor`], so the engine's daily
//! limits and cooldowns apply across both sources.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::common::errors::Result;
use crate::common::traits::{ExchangeClient, TradeExecutor};
use crate::common::types::normalize_asset;
use crate::config::types::AppConfig;
use crate::dca::{JsonFileScheduleStore, MemoryScheduleStore, RecurringPurchaseScheduler, ScheduleStore, TickOutcome};
use crate::engine::types::TradeRecord;
use crate::exchange::QUOTE_CURRENCY;
use crate::rebalance::{PortfolioSnapshot, RebalancePlan, RebalancePlanner};

/// Everything one cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub purchases: Vec<TickOutcome>,
    /// Present when a rebalance pass ran
    pub plan: Option<RebalancePlan>,
    /// One record per executed plan intent, in plan order
    pub rebalance_records: Vec<TradeRecord>,
    /// Why a due rebalance pass could not run
    pub rebalance_error: Option<String>,
    /// Set when recurring purchase schedules could not be saved
    pub persist_error: Option<String>,
}

impl CycleReport {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            purchases: Vec::new(),
            plan: None,
            rebalance_records: Vec::new(),
            rebalance_error: None,
            persist_error: None,
        }
    }

    /// Every trade record produced this cycle
    pub fn records(&self) -> impl Iterator<Item = &TradeRecord> {
        self.purchases
            .iter()
            .filter_map(TickOutcome::record)
            .chain(self.rebalance_records.iter())
    }

    pub fn executed_count(&self) -> usize {
        self.records().filter(|r| r.executed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.records().filter(|r| !r.executed).count()
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Cycle at {}: {} executed, {} not executed",
            self.at,
            self.executed_count(),
            self.failed_count()
        )?;
        for outcome in &self.purchases {
            match outcome {
                TickOutcome::NotDue { asset, wait } => {
                    writeln!(f, "  DCA {:<6} not due ({}m)", asset, wait.num_minutes())?
                }
                TickOutcome::SkippedNearHigh {
                    asset, price, high, ..
                } => writeln!(f, "  DCA {:<6} skipped near high (${} vs ${})", asset, price, high)?,
                TickOutcome::Executed { record, .. } => {
                    writeln!(f, "  DCA {:<6} bought {}", record.asset, record.fill_amount.unwrap_or_default())?
                }
                TickOutcome::Failed { record, .. } => writeln!(
                    f,
                    "  DCA {:<6} failed: {}",
                    record.asset,
                    record.error.as_deref().unwrap_or("-")
                )?,
            }
        }
        for record in &self.rebalance_records {
            let status = if record.executed {
                "ok".to_string()
            } else {
                record.error.clone().unwrap_or_default()
            };
            writeln!(
                f,
                "  REB {} {:<6} ${} {}",
                record.side,
                record.asset,
                record.requested_usd.unwrap_or_default().round_dp(2),
                status
            )?;
        }
        if let Some(error) = &self.rebalance_error {
            writeln!(f, "  REB skipped: {}", error)?;
        }
        if let Some(error) = &self.persist_error {
            writeln!(f, "  DCA schedules not saved: {}", error)?;
        }
        Ok(())
    }
}

/// Drives recurring purchases and rebalancing against one executor
pub struct PortfolioRunner {
    scheduler: RecurringPurchaseScheduler,
    planner: Option<RebalancePlanner>,
    rebalance_interval: Duration,
    last_rebalance: Option<DateTime<Utc>>,
    exchange: Arc<dyn ExchangeClient>,
    executor: Arc<dyn TradeExecutor>,
    lookup_timeout: Option<std::time::Duration>,
}

impl PortfolioRunner {
    pub fn new(
        scheduler: RecurringPurchaseScheduler,
        planner: Option<RebalancePlanner>,
        exchange: Arc<dyn ExchangeClient>,
        executor: Arc<dyn TradeExecutor>,
    ) -> Self {
        Self {
            scheduler,
            planner,
            rebalance_interval: Duration::days(1),
            last_rebalance: None,
            exchange,
            executor,
            lookup_timeout: None,
        }
    }

    /// Build scheduler and planner from configuration
    ///
    /// Schedules are persisted to `dca.state_path` when set, in memory otherwise.
    pub fn from_config(
        config: &AppConfig,
        exchange: Arc<dyn ExchangeClient>,
        executor: Arc<dyn TradeExecutor>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn ScheduleStore> = match &config.dca.state_path {
            Some(path) => Arc::new(JsonFileScheduleStore::new(path)),
            None => Arc::new(MemoryScheduleStore::new()),
        };
        let scheduler = RecurringPurchaseScheduler::load(&config.dca, store, now)?;

        let planner = if config.rebalance.is_enabled() {
            Some(RebalancePlanner::new(config.rebalance.clone())?)
        } else {
            None
        };

        let interval = i64::try_from(config.rebalance.interval_seconds).unwrap_or(i64::MAX);
        Ok(Self::new(scheduler, planner, exchange, executor)
            .with_rebalance_interval(Duration::seconds(interval))
            .with_lookup_timeout(std::time::Duration::from_secs(config.settings.request_timeout_seconds)))
    }

    pub fn with_rebalance_interval(mut self, interval: Duration) -> Self {
        self.rebalance_interval = interval;
        self
    }

    /// Bound balance, price and trailing-high lookups
    pub fn with_lookup_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self.scheduler.set_lookup_timeout(timeout);
        self
    }

    pub fn scheduler(&self) -> &RecurringPurchaseScheduler {
        &self.scheduler
    }

    pub fn planner(&self) -> Option<&RebalancePlanner> {
        self.planner.as_ref()
    }

    pub fn last_rebalance(&self) -> Option<DateTime<Utc>> {
        self.last_rebalance
    }

    pub fn is_rebalance_due(&self, now: DateTime<Utc>) -> bool {
        self.planner.is_some()
            && self
                .last_rebalance
                .map_or(true, |last| now - last >= self.rebalance_interval)
    }

    /// One full cycle: due purchases, then a rebalance pass when due
    ///
    /// Nothing here aborts the cycle. A schedule save failure and a rebalance
    /// pass that cannot read balances are both reported on the cycle.
    #[instrument(skip(self))]
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::new(now);
        let tick = self
            .scheduler
            .tick(now, self.exchange.as_ref(), self.executor.as_ref())
            .await;
        report.purchases = tick.outcomes;
        report.persist_error = tick.persist_error.map(|e| e.to_string());

        if self.is_rebalance_due(now) {
            match self.plan_now(now).await {
                Ok(plan) => {
                    info!(
                        "Rebalance plan: {} trades, sells ${} buys ${}",
                        plan.intents.len(),
                        plan.total_sells.round_dp(2),
                        plan.total_buys.round_dp(2)
                    );
                    for intent in plan.intents.iter().cloned() {
                        report.rebalance_records.push(self.executor.execute(intent).await);
                    }
                    self.last_rebalance = Some(now);
                    report.plan = Some(plan);
                }
                Err(e) => {
                    warn!("Rebalance skipped: {}", e);
                    report.rebalance_error = Some(e.to_string());
                }
            }
        }

        report
    }

    /// Current rebalance plan without executing anything
    pub async fn plan_now(&self, now: DateTime<Utc>) -> Result<RebalancePlan> {
        let snapshot = self.snapshot(now).await?;
        match &self.planner {
            Some(planner) => Ok(planner.plan_detailed(&snapshot, Decimal::ZERO)),
            None => Ok(RebalancePlan {
                statuses: Vec::new(),
                intents: Vec::new(),
                total_sells: Decimal::ZERO,
                total_buys: Decimal::ZERO,
                available_cash: Decimal::ZERO,
                scale_factor: Decimal::ONE,
            }),
        }
    }

    /// Value current holdings at spot prices
    ///
    /// Assets whose price cannot be fetched are valued at zero.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<PortfolioSnapshot> {
        let balances = self.lookup(self.exchange.get_balances()).await?;

        let mut prices = HashMap::new();
        for (asset, quantity) in &balances {
            let asset = normalize_asset(asset);
            if asset == QUOTE_CURRENCY || *quantity <= Decimal::ZERO {
                continue;
            }
            match self.lookup(self.exchange.get_spot_price(&asset)).await {
                Ok(price) => {
                    prices.insert(asset, price);
                }
                Err(e) => warn!("Price lookup for {} failed: {}", asset, e),
            }
        }

        Ok(PortfolioSnapshot::from_balances(&balances, &prices).at(now))
    }

    async fn lookup<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match self.lookup_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await?,
            None => call.await,
        }
    }
}
